//! Primitive-approximation action for discretized worldlines.
//!
//! Every link carries the kinetic weight of a free-particle propagator
//! over one time step, every active bead a potential weight τ·V(r). The
//! moves only ever need action *differences* over the beads they touch,
//! plus the free propagator ρ₀ (with its Gaussian normalization and a
//! sum over periodic images) for the sector-changing and swap
//! acceptance ratios.

use std::f64::consts::PI;

use crate::cell::IVec;
use crate::constants::SimulationConstants;
use crate::path::{BeadLocator, Path};
use crate::potential::Potential;

/// Primitive action evaluator.
#[derive(Debug, Clone)]
pub struct PrimitiveAction<V: Potential> {
    pub constants: SimulationConstants,
    pub potential: V,
}

impl<V: Potential> PrimitiveAction<V> {
    pub fn new(constants: SimulationConstants, potential: V) -> Self {
        Self { constants, potential }
    }

    /// Potential action τ·V of a single bead.
    pub fn potential_action(&self, path: &Path, b: BeadLocator) -> f64 {
        self.constants.tau * self.potential.evaluate(&path.pos(b))
    }

    /// Potential action of a bead at bisection level `level`, where one
    /// coarse slice stands in for 2^level fine slices.
    pub fn potential_action_at_level(&self, path: &Path, b: BeadLocator, level: usize) -> f64 {
        (1 << level) as f64 * self.potential_action(path, b)
    }

    /// Potential action summed over the link walk from `b1` to `b2`,
    /// inclusive of both ends. Panics in debug builds if the chain
    /// breaks before reaching `b2`.
    pub fn potential_action_range(&self, path: &Path, b1: BeadLocator, b2: BeadLocator) -> f64 {
        let mut total = self.potential_action(path, b1);
        let mut cur = b1;
        while cur != b2 {
            cur = path
                .next(cur)
                .expect("potential_action_range walked off an open end");
            total += self.potential_action(path, cur);
        }
        total
    }

    /// Kinetic action of the single link `b1 -> b2`,
    /// |Δr|² / (4Λτ) with the minimum-image separation.
    pub fn kinetic_link_action(&self, path: &Path, b1: BeadLocator, b2: BeadLocator) -> f64 {
        let sep = path.cell.sep(&path.pos(b1), &path.pos(b2));
        sep.norm_squared() / (4.0 * self.constants.lambda * self.constants.tau)
    }

    /// Kinetic action summed over the link walk from `b1` to `b2`.
    pub fn kinetic_action(&self, path: &Path, b1: BeadLocator, b2: BeadLocator) -> f64 {
        let mut total = 0.0;
        let mut cur = b1;
        while cur != b2 {
            let next = path
                .next(cur)
                .expect("kinetic_action walked off an open end");
            total += self.kinetic_link_action(path, cur, next);
            cur = next;
        }
        total
    }

    /// Free-particle propagator over `m` time steps for the separation
    /// `b1 -> b2 + image(w)`, including the Gaussian normalization.
    pub fn rho0_image(
        &self,
        path: &Path,
        b1: BeadLocator,
        b2: BeadLocator,
        m: usize,
        w: &IVec,
    ) -> f64 {
        let lt = self.constants.lambda * self.constants.tau * m as f64;
        let sep = path.pos(b2) + path.cell.image_shift(w) - path.pos(b1);
        (4.0 * PI * lt).powf(-1.5) * (-sep.norm_squared() / (4.0 * lt)).exp()
    }

    /// Free-particle propagator over `m` time steps summed over all
    /// winding images within `max_wind`. This is the reverse-proposal
    /// density of Open and the pivot weight of the swap moves.
    pub fn rho0(&self, path: &Path, b1: BeadLocator, b2: BeadLocator, m: usize) -> f64 {
        let mw = self.constants.max_wind;
        let mut total = 0.0;
        for wx in -mw..=mw {
            for wy in -mw..=mw {
                for wz in -mw..=mw {
                    total += self.rho0_image(path, b1, b2, m, &IVec::new(wx, wy, wz));
                }
            }
        }
        total
    }
}
