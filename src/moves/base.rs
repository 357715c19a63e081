//! Shared move scaffold: statistics, scratch buffers and the Gaussian
//! bridge samplers every move builds on.

use rand::Rng;
use rand_distr::StandardNormal;

use crate::cell::{DVec, IVec};
use crate::constants::SimulationConstants;
use crate::path::{BeadLocator, Path};

use super::{Ensemble, MoveStatistics};

/// State composed into every concrete move: the sector gate, counters,
/// and the scratch buffers that are reused across attempts so the
/// accept/reject hot path allocates nothing after warmup.
#[derive(Debug, Clone)]
pub struct MoveState {
    pub ensemble: Ensemble,
    pub variable_length: bool,
    pub constants: SimulationConstants,

    pub num_attempted: usize,
    pub num_accepted: usize,
    pub num_attempted_level: Vec<usize>,
    pub num_accepted_level: Vec<usize>,

    /// Saved (bead, original position) pairs in order of touch.
    pub(crate) saved: Vec<(BeadLocator, DVec)>,
    /// Prefix sums for tower-sampling winding sectors.
    pub cumrho0: Vec<f64>,
    /// Winding images in a fixed odometer order.
    winding: Vec<IVec>,
}

impl MoveState {
    pub fn new(constants: SimulationConstants, ensemble: Ensemble, variable_length: bool) -> Self {
        let mw = constants.max_wind;
        let mut winding = Vec::with_capacity(constants.num_wind());
        for wx in -mw..=mw {
            for wy in -mw..=mw {
                for wz in -mw..=mw {
                    winding.push(IVec::new(wx, wy, wz));
                }
            }
        }
        Self {
            ensemble,
            variable_length,
            constants,
            num_attempted: 0,
            num_accepted: 0,
            num_attempted_level: vec![0; constants.num_levels + 1],
            num_accepted_level: vec![0; constants.num_levels + 1],
            saved: Vec::new(),
            cumrho0: Vec::with_capacity(constants.num_wind()),
            winding,
        }
    }

    /// Per-move acceptance ratio.
    pub fn acceptance_ratio(&self) -> f64 {
        if self.num_attempted == 0 {
            0.0
        } else {
            self.num_accepted as f64 / self.num_attempted as f64
        }
    }

    /// Acceptance ratio at a single bisection level.
    pub fn acceptance_ratio_level(&self, level: usize) -> f64 {
        if self.num_attempted_level[level] == 0 {
            0.0
        } else {
            self.num_accepted_level[level] as f64 / self.num_attempted_level[level] as f64
        }
    }

    pub fn reset_accept(&mut self) {
        self.num_attempted = 0;
        self.num_accepted = 0;
        self.num_attempted_level.iter_mut().for_each(|c| *c = 0);
        self.num_accepted_level.iter_mut().for_each(|c| *c = 0);
    }

    /// Register one attempt, per-move and globally. Called exactly once
    /// at the top of every `attempt`, before any guard.
    pub(crate) fn bump_attempt(&mut self, totals: &mut MoveStatistics) {
        self.num_attempted += 1;
        totals.attempted += 1;
    }

    /// Register an acceptance.
    pub(crate) fn keep(&mut self, totals: &mut MoveStatistics) {
        self.num_accepted += 1;
        totals.accepted += 1;
        self.saved.clear();
    }

    /// Metropolis test in log space. NaN differences mean the
    /// configuration or the action is corrupt; abort rather than
    /// silently reject.
    pub(crate) fn metropolis<R: Rng>(&self, log_ratio: f64, rng: &mut R) -> bool {
        assert!(!log_ratio.is_nan(), "NaN in acceptance ratio");
        if log_ratio >= 0.0 {
            true
        } else {
            rng.gen::<f64>().ln() < log_ratio
        }
    }

    /// Record a bead position before mutating it.
    pub(crate) fn save_position(&mut self, path: &Path, b: BeadLocator) {
        self.saved.push((b, path.pos(b)));
    }

    /// Restore every saved position, newest first, and drop the journal.
    pub(crate) fn restore_positions(&mut self, path: &mut Path) {
        while let Some((b, r)) = self.saved.pop() {
            path.update_bead(b, r);
        }
    }

    fn gaussian<R: Rng>(&self, rng: &mut R, sigma: f64) -> DVec {
        let x: f64 = rng.sample(StandardNormal);
        let y: f64 = rng.sample(StandardNormal);
        let z: f64 = rng.sample(StandardNormal);
        DVec::new(sigma * x, sigma * y, sigma * z)
    }

    /// Sample the next bead of a Brownian bridge toward `end`, `k`-th of
    /// `stage_length - 1` intermediate beads, conditioned on the
    /// minimum-image separation.
    pub fn new_staging_position<R: Rng>(
        &self,
        path: &Path,
        prev: BeadLocator,
        end: BeadLocator,
        stage_length: usize,
        k: usize,
        rng: &mut R,
    ) -> DVec {
        debug_assert!(k >= 1 && k < stage_length);
        let links_left = (stage_length - k + 1) as f64;
        let r0 = path.pos(prev);
        let delta = path.cell.sep(&r0, &path.pos(end));
        let mean = r0 + delta / links_left;
        let var = 2.0 * self.constants.lambda * self.constants.tau * (links_left - 1.0)
            / links_left;
        path.cell.box_put(mean + self.gaussian(rng, var.sqrt()))
    }

    /// Staging step that first tower-samples a winding image for the
    /// remaining segment. Returns the new position and the image chosen,
    /// or `None` when every image weight underflows.
    pub fn new_staging_position_with_winding<R: Rng>(
        &mut self,
        path: &Path,
        prev: BeadLocator,
        end: BeadLocator,
        stage_length: usize,
        k: usize,
        rng: &mut R,
    ) -> Option<(DVec, IVec)> {
        debug_assert!(k >= 1 && k < stage_length);
        let links_left = stage_length - k + 1;
        let (wind, _norm) = self.sample_winding_sector(path, prev, end, links_left, rng)?;
        let r0 = path.pos(prev);
        let delta = path.pos(end) + path.cell.image_shift(&wind) - r0;
        let f = links_left as f64;
        let mean = r0 + delta / f;
        let var = 2.0 * self.constants.lambda * self.constants.tau * (f - 1.0) / f;
        let r = path.cell.box_put(mean + self.gaussian(rng, var.sqrt()));
        Some((r, wind))
    }

    /// Tower-sample a winding image for a free bridge of `m` links from
    /// `b0` to `b1`. Returns the image and the unnormalized weight sum,
    /// or `None` if all weights underflow; `cumrho0` holds the
    /// normalized CDF afterwards.
    pub fn sample_winding_sector<R: Rng>(
        &mut self,
        path: &Path,
        b0: BeadLocator,
        b1: BeadLocator,
        m: usize,
        rng: &mut R,
    ) -> Option<(IVec, f64)> {
        let denom = 4.0 * self.constants.lambda * self.constants.tau * m as f64;
        let delta = path.pos(b1) - path.pos(b0);
        self.cumrho0.clear();
        let mut total = 0.0;
        for w in &self.winding {
            let sep = delta + path.cell.image_shift(w);
            total += (-sep.norm_squared() / denom).exp();
            self.cumrho0.push(total);
        }
        if total <= 0.0 {
            return None;
        }
        for c in &mut self.cumrho0 {
            *c /= total;
        }
        let u: f64 = rng.gen();
        let idx = self
            .cumrho0
            .iter()
            .position(|&c| u < c)
            .unwrap_or(self.cumrho0.len() - 1);
        Some((self.winding[idx], total))
    }

    /// Net winding of the existing segment from `start` to `end`,
    /// reconstructed from the per-link minimum-image displacements.
    pub fn get_winding_number(
        &self,
        path: &Path,
        start: BeadLocator,
        end: BeadLocator,
    ) -> Option<IVec> {
        let mut travelled = DVec::zeros();
        let mut cur = start;
        while cur != end {
            let next = path.next(cur)?;
            travelled += path.cell.sep(&path.pos(cur), &path.pos(next));
            cur = next;
        }
        let direct = path.pos(end) - path.pos(start);
        let diff = travelled - direct;
        Some(IVec::new(
            (diff.x / path.cell.side.x).round() as i32,
            (diff.y / path.cell.side.y).round() as i32,
            (diff.z / path.cell.side.z).round() as i32,
        ))
    }

    /// Unbridged free-particle step from `r0`.
    pub fn free_step<R: Rng>(&self, path: &Path, r0: &DVec, rng: &mut R) -> DVec {
        path.cell
            .box_put(r0 + self.gaussian(rng, self.constants.sqrt_2_lambda_tau()))
    }

    /// Free-particle step from the position of `prev`.
    pub fn new_free_particle_position<R: Rng>(
        &self,
        path: &Path,
        prev: BeadLocator,
        rng: &mut R,
    ) -> DVec {
        let r0 = path.pos(prev);
        self.free_step(path, &r0, rng)
    }

    /// Midpoint draw of the multilevel construction: bead `b` between
    /// its neighbors `shift` slices away on either side, variance
    /// Λτ·shift. `None` when a neighbor chain is broken.
    pub fn new_bisection_position<R: Rng>(
        &self,
        path: &Path,
        b: BeadLocator,
        shift: usize,
        rng: &mut R,
    ) -> Option<DVec> {
        let prev = path.prev_n(b, shift)?;
        let next = path.next_n(b, shift)?;
        let r0 = path.pos(prev);
        let delta = path.cell.sep(&r0, &path.pos(next));
        let mean = r0 + delta * 0.5;
        let sigma = (self.constants.lambda * self.constants.tau * shift as f64).sqrt();
        Some(path.cell.box_put(mean + self.gaussian(rng, sigma)))
    }
}
