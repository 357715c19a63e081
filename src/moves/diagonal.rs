//! Moves that leave the sector unchanged: whole-worldline translation,
//! single-bead displacement, and the two Lévy reconstructions.

use rand::Rng;

use crate::cell::DVec;
use crate::constants::SimulationConstants;
use crate::path::BeadLocator;
use crate::potential::Potential;

use super::{Ensemble, MoveContext, MoveState};

/// Rigid translation of one worldline by a uniform displacement.
///
/// The kinetic action is invariant under a common translation, so the
/// acceptance depends on the potential difference alone.
pub struct CenterOfMassMove {
    pub state: MoveState,
    /// Half-width of the uniform shift, tuned toward ~50% acceptance.
    pub delta: f64,
    win_attempted: usize,
    win_accepted: usize,
    beads: Vec<BeadLocator>,
}

impl CenterOfMassMove {
    pub const NAME: &'static str = "center of mass";

    pub fn new(constants: SimulationConstants) -> Self {
        Self {
            state: MoveState::new(constants, Ensemble::Any, false),
            delta: constants.com_delta,
            win_attempted: 0,
            win_accepted: 0,
            beads: Vec::new(),
        }
    }

    /// Rescale the step toward the target acceptance rate over the
    /// window since the last adaptation.
    pub fn adapt_delta(&mut self, target: f64) {
        if self.win_attempted < 100 {
            return;
        }
        let rate = self.win_accepted as f64 / self.win_attempted as f64;
        if rate < target - 0.05 {
            self.delta *= 0.95;
        } else if rate > target + 0.05 {
            self.delta *= 1.05;
        }
        self.win_attempted = 0;
        self.win_accepted = 0;
    }

    pub fn attempt<V: Potential, R: Rng>(&mut self, ctx: &mut MoveContext<V, R>) -> bool {
        self.state.bump_attempt(ctx.totals);
        self.win_attempted += 1;
        if !self.state.ensemble.allows(ctx.path.is_diagonal()) {
            return false;
        }
        let Some(seed) = ctx.path.random_active_bead(ctx.rng) else {
            return false;
        };
        self.beads.clear();
        self.beads.extend(ctx.path.worldline_containing(seed));

        let shift = DVec::new(
            (ctx.rng.gen::<f64>() - 0.5) * 2.0 * self.delta,
            (ctx.rng.gen::<f64>() - 0.5) * 2.0 * self.delta,
            (ctx.rng.gen::<f64>() - 0.5) * 2.0 * self.delta,
        );

        let mut old_v = 0.0;
        for &b in &self.beads {
            old_v += ctx.action.potential_action(ctx.path, b);
        }
        for &b in &self.beads {
            self.state.save_position(ctx.path, b);
            let r = ctx.path.cell.box_put(ctx.path.pos(b) + shift);
            ctx.path.update_bead(b, r);
        }
        let mut new_v = 0.0;
        for &b in &self.beads {
            new_v += ctx.action.potential_action(ctx.path, b);
        }

        if self.state.metropolis(-(new_v - old_v), ctx.rng) {
            self.state.keep(ctx.totals);
            self.win_accepted += 1;
            true
        } else {
            self.state.restore_positions(ctx.path);
            debug_assert!(ctx.path.is_consistent());
            false
        }
    }
}

/// Gaussian kick of a single bead against the full local action.
///
/// Useful in the classical / high-temperature regime where worldlines
/// are nearly point-like.
pub struct DisplaceMove {
    pub state: MoveState,
}

impl DisplaceMove {
    pub const NAME: &'static str = "displace";

    pub fn new(constants: SimulationConstants) -> Self {
        Self {
            state: MoveState::new(constants, Ensemble::Any, false),
        }
    }

    pub fn attempt<V: Potential, R: Rng>(&mut self, ctx: &mut MoveContext<V, R>) -> bool {
        self.state.bump_attempt(ctx.totals);
        if !self.state.ensemble.allows(ctx.path.is_diagonal()) {
            return false;
        }
        let Some(b) = ctx.path.random_active_bead(ctx.rng) else {
            return false;
        };
        let prev = ctx.path.prev(b);
        let next = ctx.path.next(b);

        let local_action = |ctx: &MoveContext<V, R>| {
            let mut s = ctx.action.potential_action(ctx.path, b);
            if let Some(p) = prev {
                s += ctx.action.kinetic_link_action(ctx.path, p, b);
            }
            if let Some(n) = next {
                s += ctx.action.kinetic_link_action(ctx.path, b, n);
            }
            s
        };

        let old_action = local_action(ctx);
        self.state.save_position(ctx.path, b);
        let r0 = ctx.path.pos(b);
        let r = self.state.free_step(ctx.path, &r0, ctx.rng);
        ctx.path.update_bead(b, r);
        let new_action = local_action(ctx);

        if self.state.metropolis(-(new_action - old_action), ctx.rng) {
            self.state.keep(ctx.totals);
            true
        } else {
            self.state.restore_positions(ctx.path);
            debug_assert!(ctx.path.is_consistent());
            false
        }
    }
}

/// Exact resampling of the kinetic action over a fixed-length segment
/// via sequential Brownian-bridge draws.
pub struct StagingMove {
    pub state: MoveState,
    segment: Vec<BeadLocator>,
}

impl StagingMove {
    pub const NAME: &'static str = "staging";

    pub fn new(constants: SimulationConstants) -> Self {
        Self {
            state: MoveState::new(constants, Ensemble::Any, false),
            segment: Vec::new(),
        }
    }

    pub fn attempt<V: Potential, R: Rng>(&mut self, ctx: &mut MoveContext<V, R>) -> bool {
        self.state.bump_attempt(ctx.totals);
        if !self.state.ensemble.allows(ctx.path.is_diagonal()) {
            return false;
        }
        let stage_length = 1 << self.state.constants.num_levels;
        if stage_length < 2 || stage_length >= ctx.path.num_slices() {
            return false;
        }
        let Some(start) = ctx.path.random_active_bead(ctx.rng) else {
            return false;
        };
        // the stage must not cross the worm gap
        self.segment.clear();
        self.segment.push(start);
        let mut cur = start;
        for _ in 0..stage_length {
            match ctx.path.next(cur) {
                Some(n) => {
                    self.segment.push(n);
                    cur = n;
                }
                None => return false,
            }
        }
        let end = self.segment[stage_length];

        let mut old_v = 0.0;
        for &b in &self.segment[1..stage_length] {
            old_v += ctx.action.potential_action(ctx.path, b);
        }
        for k in 1..stage_length {
            let b = self.segment[k];
            self.state.save_position(ctx.path, b);
            let r = self.state.new_staging_position(
                ctx.path,
                self.segment[k - 1],
                end,
                stage_length,
                k,
                ctx.rng,
            );
            ctx.path.update_bead(b, r);
        }
        let mut new_v = 0.0;
        for &b in &self.segment[1..stage_length] {
            new_v += ctx.action.potential_action(ctx.path, b);
        }

        // the bridge samples the kinetic action exactly
        if self.state.metropolis(-(new_v - old_v), ctx.rng) {
            self.state.keep(ctx.totals);
            true
        } else {
            self.state.restore_positions(ctx.path);
            debug_assert!(ctx.path.is_consistent());
            false
        }
    }
}

/// Multilevel Lévy reconstruction with early rejection at coarse
/// levels.
pub struct BisectionMove {
    pub state: MoveState,
    segment: Vec<BeadLocator>,
}

impl BisectionMove {
    pub const NAME: &'static str = "bisection";

    pub fn new(constants: SimulationConstants) -> Self {
        Self {
            state: MoveState::new(constants, Ensemble::Any, false),
            segment: Vec::new(),
        }
    }

    /// From-scratch recomputation of the level action difference,
    /// compared against the incremental bookkeeping in debug builds.
    #[cfg(debug_assertions)]
    fn check_level<V: Potential, R: Rng>(
        &self,
        ctx: &MoveContext<V, R>,
        level: usize,
        old_positions: &[(BeadLocator, DVec)],
        tracked: f64,
    ) {
        let shift = 1 << (level - 1);
        let span = self.segment.len() - 1;
        let mut direct = 0.0;
        for t in (shift..span).step_by(2 * shift) {
            let b = self.segment[t];
            direct += ctx.action.potential_action_at_level(ctx.path, b, level - 1);
            let old = old_positions
                .iter()
                .rev()
                .find(|(saved, _)| *saved == b)
                .expect("bead sampled at this level was journaled")
                .1;
            let scale = (1 << (level - 1)) as f64 * ctx.action.constants.tau;
            direct -= scale * ctx.action.potential.evaluate(&old);
        }
        assert!(
            (direct - tracked).abs() < 1e-10,
            "level {} action drift: {} vs {}",
            level,
            direct,
            tracked
        );
    }

    pub fn attempt<V: Potential, R: Rng>(&mut self, ctx: &mut MoveContext<V, R>) -> bool {
        self.state.bump_attempt(ctx.totals);
        if !self.state.ensemble.allows(ctx.path.is_diagonal()) {
            return false;
        }
        let num_levels = self.state.constants.num_levels;
        let span = 1usize << num_levels;
        if num_levels < 1 || span >= ctx.path.num_slices() {
            return false;
        }
        let Some(start) = ctx.path.random_active_bead(ctx.rng) else {
            return false;
        };
        self.segment.clear();
        self.segment.push(start);
        let mut cur = start;
        for _ in 0..span {
            match ctx.path.next(cur) {
                Some(n) => {
                    self.segment.push(n);
                    cur = n;
                }
                None => return false,
            }
        }

        let mut old_delta_action = 0.0;
        for level in (1..=num_levels).rev() {
            let shift = 1usize << (level - 1);
            let mut level_diff = 0.0;
            for t in (shift..span).step_by(2 * shift) {
                let b = self.segment[t];
                level_diff -= ctx.action.potential_action_at_level(ctx.path, b, level - 1);
                self.state.save_position(ctx.path, b);
                let r = self
                    .state
                    .new_bisection_position(ctx.path, b, shift, ctx.rng)
                    .expect("bisection segment verified contiguous");
                ctx.path.update_bead(b, r);
                level_diff += ctx.action.potential_action_at_level(ctx.path, b, level - 1);
            }
            let delta_action = old_delta_action + level_diff;
            #[cfg(debug_assertions)]
            self.check_level(ctx, level, &self.state.saved, level_diff);

            self.state.num_attempted_level[level] += 1;
            if self.state.metropolis(-(delta_action - old_delta_action), ctx.rng) {
                self.state.num_accepted_level[level] += 1;
                old_delta_action = delta_action;
            } else {
                self.state.restore_positions(ctx.path);
                debug_assert!(ctx.path.is_consistent());
                return false;
            }
        }

        self.state.num_attempted_level[0] += 1;
        self.state.num_accepted_level[0] += 1;
        self.state.keep(ctx.totals);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::PrimitiveAction;
    use crate::cell::Cell;
    use crate::moves::MoveStatistics;
    use crate::path::Path;
    use crate::potential::{FreePotential, HarmonicPotential};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn constants() -> SimulationConstants {
        SimulationConstants {
            tau: 0.1,
            lambda: 0.5,
            num_time_slices: 8,
            num_levels: 2,
            max_wind: 1,
            ..Default::default()
        }
    }

    fn free_setup() -> (Path, PrimitiveAction<FreePotential>) {
        let path = Path::new(
            Cell::cube(6.0),
            8,
            &[DVec::zeros(), DVec::new(1.0, 0.0, 0.0)],
        );
        (path, PrimitiveAction::new(constants(), FreePotential))
    }

    #[test]
    fn staging_without_potential_always_accepts() {
        let (mut path, action) = free_setup();
        let mut rng = StdRng::seed_from_u64(42);
        let mut totals = MoveStatistics::default();
        let mut mv = StagingMove::new(constants());
        for _ in 0..500 {
            let mut ctx = MoveContext {
                path: &mut path,
                action: &action,
                rng: &mut rng,
                totals: &mut totals,
            };
            assert!(mv.attempt(&mut ctx));
        }
        assert_eq!(mv.state.num_accepted, 500);
        assert_eq!(totals.accepted, 500);
        assert!(path.is_consistent());
    }

    #[test]
    fn bisection_level_accounting() {
        let mut path = Path::new(Cell::cube(6.0), 8, &[DVec::zeros()]);
        let action = PrimitiveAction::new(constants(), HarmonicPotential { omega: 1.0 });
        let mut rng = StdRng::seed_from_u64(9);
        let mut totals = MoveStatistics::default();
        let mut mv = BisectionMove::new(constants());
        for _ in 0..300 {
            let mut ctx = MoveContext {
                path: &mut path,
                action: &action,
                rng: &mut rng,
                totals: &mut totals,
            };
            mv.attempt(&mut ctx);
        }
        let attempted: usize = mv.state.num_attempted_level.iter().sum();
        assert!(attempted >= mv.state.num_attempted);
        assert_eq!(mv.state.num_accepted_level[0], mv.state.num_accepted);
        assert!(path.is_consistent());
    }

    #[test]
    fn rejected_displace_restores_path() {
        // a stiff well rejects nearly every kick away from the origin
        let mut path = Path::new(Cell::cube(6.0), 8, &[DVec::zeros()]);
        let action = PrimitiveAction::new(constants(), HarmonicPotential { omega: 50.0 });
        let mut rng = StdRng::seed_from_u64(4);
        let mut totals = MoveStatistics::default();
        let mut mv = DisplaceMove::new(constants());
        for _ in 0..200 {
            let snapshot = path.clone();
            let mut ctx = MoveContext {
                path: &mut path,
                action: &action,
                rng: &mut rng,
                totals: &mut totals,
            };
            if !mv.attempt(&mut ctx) {
                assert_eq!(path, snapshot);
            }
        }
        assert_eq!(totals.attempted, 200);
    }

    #[test]
    fn center_of_mass_classical_equipartition() {
        // single slice-pair worldline in a harmonic well: the sampled
        // per-component spread matches exp(-β·½ω²x²)
        let omega = 1.0;
        let c = SimulationConstants {
            tau: 0.5,
            num_time_slices: 2,
            ..constants()
        };
        let beta = c.beta();
        let mut path = Path::new(Cell::cube(40.0), 2, &[DVec::zeros()]);
        let action = PrimitiveAction::new(c, HarmonicPotential { omega });
        let mut rng = StdRng::seed_from_u64(1);
        let mut totals = MoveStatistics::default();
        let mut mv = CenterOfMassMove::new(c);
        mv.delta = 1.5;
        let mut sum_x2 = 0.0;
        let mut samples = 0usize;
        for sweep in 0..60_000 {
            let mut ctx = MoveContext {
                path: &mut path,
                action: &action,
                rng: &mut rng,
                totals: &mut totals,
            };
            mv.attempt(&mut ctx);
            if sweep >= 10_000 {
                let x = path.pos(BeadLocator::new(0, 0)).x;
                sum_x2 += x * x;
                samples += 1;
            }
        }
        let measured = sum_x2 / samples as f64;
        let expected = 1.0 / (beta * omega * omega);
        assert!(
            (measured - expected).abs() < 0.1 * expected,
            "<x²> = {}, expected {}",
            measured,
            expected
        );
    }
}
