//! Permutation moves: reconnect the worm end through a pivot bead on
//! another worldline, mixing particle identities.
//!
//! Together with Open/Close these generate every bosonic permutation
//! cycle. The pivot is tower-sampled from the free-propagator weights of
//! all beads `swap_length` slices from the worm end, and the reverse
//! normalization is evaluated from the post-move end so the proposal
//! ratio `SigmaSwap / SigmaHead` restores detailed balance.

use rand::Rng;

use crate::action::PrimitiveAction;
use crate::constants::SimulationConstants;
use crate::path::{BeadLocator, Path, Worm};
use crate::potential::Potential;

use super::{Ensemble, MoveContext, MoveState};

/// Cumulative pivot distribution, reused across attempts.
#[derive(Debug, Default)]
struct PivotSampler {
    candidates: Vec<BeadLocator>,
    cumulant: Vec<f64>,
}

impl PivotSampler {
    /// Accumulate the winding-summed free-propagator weight of every
    /// bead `swap_length` slices from `b`: forward of it for
    /// `sign >= 0` (head side), backward for negative `sign` (tail
    /// side). Returns the normalization Σρ₀.
    fn get_norm<V: Potential>(
        &mut self,
        path: &Path,
        action: &PrimitiveAction<V>,
        b: BeadLocator,
        swap_length: usize,
        sign: i32,
    ) -> f64 {
        let m = path.num_slices();
        let slice = if sign >= 0 {
            (b.slice + swap_length) % m
        } else {
            (b.slice + m - swap_length % m) % m
        };
        self.candidates.clear();
        self.cumulant.clear();
        let mut total = 0.0;
        for cand in path.beads_at_slice(slice) {
            total += action.rho0(path, b, cand, swap_length);
            self.candidates.push(cand);
            self.cumulant.push(total);
        }
        total
    }

    /// Tower-sample a pivot from the accumulated weights.
    fn select_pivot<R: Rng>(&self, rng: &mut R, total: f64) -> BeadLocator {
        let u = rng.gen::<f64>() * total;
        let idx = self
            .cumulant
            .iter()
            .position(|&c| u < c)
            .unwrap_or(self.cumulant.len() - 1);
        self.candidates[idx]
    }
}

/// Reconnect the worm head through a pivot on another worldline.
pub struct SwapHeadMove {
    pub state: MoveState,
    pivots: PivotSampler,
    segment: Vec<BeadLocator>,
}

impl SwapHeadMove {
    pub const NAME: &'static str = "swap head";

    pub fn new(constants: SimulationConstants) -> Self {
        Self {
            state: MoveState::new(constants, Ensemble::OffDiagonal, false),
            pivots: PivotSampler::default(),
            segment: Vec::new(),
        }
    }

    fn undo<V: Potential, R: Rng>(
        &mut self,
        ctx: &mut MoveContext<V, R>,
        head: BeadLocator,
        swap_bead: BeadLocator,
        next_swap: BeadLocator,
    ) {
        self.state.restore_positions(ctx.path);
        ctx.path.break_link(head);
        ctx.path.make_link(swap_bead, next_swap);
        debug_assert!(ctx.path.is_consistent());
    }

    pub fn attempt<V: Potential, R: Rng>(&mut self, ctx: &mut MoveContext<V, R>) -> bool {
        self.state.bump_attempt(ctx.totals);
        if !self.state.ensemble.allows(ctx.path.is_diagonal()) {
            return false;
        }
        let swap_length = 1usize << self.state.constants.num_levels;
        if swap_length < 1 || swap_length > ctx.path.num_slices() - 1 {
            return false;
        }
        let worm = ctx.path.worm.expect("off-diagonal sector has a worm");

        let sigma_swap =
            self.pivots
                .get_norm(ctx.path, ctx.action, worm.head, swap_length, 1);
        if sigma_swap <= 0.0 {
            return false;
        }
        let pivot = self.pivots.select_pivot(ctx.rng, sigma_swap);
        // the spliced segment must be intact and must not terminate on
        // the other worm end
        let Some(swap_bead) = ctx.path.prev_n(pivot, swap_length) else {
            return false;
        };
        if swap_bead == worm.tail {
            return false;
        }
        let next_swap = ctx.path.next(swap_bead).expect("chain verified intact");

        self.segment.clear();
        let mut old_v = 0.0;
        let mut cur = next_swap;
        for _ in 0..swap_length - 1 {
            self.segment.push(cur);
            old_v += ctx.action.potential_action(ctx.path, cur);
            cur = ctx.path.next(cur).expect("chain verified intact");
        }
        debug_assert_eq!(cur, pivot);

        // splice: the old head takes over the chain into the pivot, the
        // swap bead becomes the dangling end
        ctx.path.break_link(swap_bead);
        ctx.path.make_link(worm.head, next_swap);

        let mut new_v = 0.0;
        let mut prev = worm.head;
        for k in 1..swap_length {
            let b = self.segment[k - 1];
            self.state.save_position(ctx.path, b);
            let step = self.state.new_staging_position_with_winding(
                ctx.path,
                prev,
                pivot,
                swap_length,
                k,
                ctx.rng,
            );
            match step {
                Some((r, _wind)) => {
                    ctx.path.update_bead(b, r);
                    new_v += ctx.action.potential_action(ctx.path, b);
                }
                None => {
                    self.undo(ctx, worm.head, swap_bead, next_swap);
                    return false;
                }
            }
            prev = b;
        }

        // reverse normalization from the post-move head
        let sigma_head = self
            .pivots
            .get_norm(ctx.path, ctx.action, swap_bead, swap_length, 1);
        if sigma_head <= 0.0 {
            self.undo(ctx, worm.head, swap_bead, next_swap);
            return false;
        }

        let log_ratio = sigma_swap.ln() - sigma_head.ln() - (new_v - old_v);
        if self.state.metropolis(log_ratio, ctx.rng) {
            ctx.path.worm = Some(Worm { head: swap_bead, tail: worm.tail });
            self.state.keep(ctx.totals);
            debug_assert!(ctx.path.is_consistent());
            true
        } else {
            self.undo(ctx, worm.head, swap_bead, next_swap);
            false
        }
    }
}

/// Mirror image of [`SwapHeadMove`] acting on the worm tail.
pub struct SwapTailMove {
    pub state: MoveState,
    pivots: PivotSampler,
    segment: Vec<BeadLocator>,
}

impl SwapTailMove {
    pub const NAME: &'static str = "swap tail";

    pub fn new(constants: SimulationConstants) -> Self {
        Self {
            state: MoveState::new(constants, Ensemble::OffDiagonal, false),
            pivots: PivotSampler::default(),
            segment: Vec::new(),
        }
    }

    fn undo<V: Potential, R: Rng>(
        &mut self,
        ctx: &mut MoveContext<V, R>,
        prev_swap: BeadLocator,
        swap_bead: BeadLocator,
    ) {
        self.state.restore_positions(ctx.path);
        ctx.path.break_link(prev_swap);
        ctx.path.make_link(prev_swap, swap_bead);
        debug_assert!(ctx.path.is_consistent());
    }

    pub fn attempt<V: Potential, R: Rng>(&mut self, ctx: &mut MoveContext<V, R>) -> bool {
        self.state.bump_attempt(ctx.totals);
        if !self.state.ensemble.allows(ctx.path.is_diagonal()) {
            return false;
        }
        let swap_length = 1usize << self.state.constants.num_levels;
        if swap_length < 1 || swap_length > ctx.path.num_slices() - 1 {
            return false;
        }
        let worm = ctx.path.worm.expect("off-diagonal sector has a worm");

        let sigma_swap =
            self.pivots
                .get_norm(ctx.path, ctx.action, worm.tail, swap_length, -1);
        if sigma_swap <= 0.0 {
            return false;
        }
        let pivot = self.pivots.select_pivot(ctx.rng, sigma_swap);
        let Some(swap_bead) = ctx.path.next_n(pivot, swap_length) else {
            return false;
        };
        if swap_bead == worm.head {
            return false;
        }
        let prev_swap = ctx.path.prev(swap_bead).expect("chain verified intact");

        self.segment.clear();
        let mut old_v = 0.0;
        let mut cur = ctx.path.next(pivot).expect("chain verified intact");
        for _ in 0..swap_length - 1 {
            self.segment.push(cur);
            old_v += ctx.action.potential_action(ctx.path, cur);
            cur = ctx.path.next(cur).expect("chain verified intact");
        }
        debug_assert_eq!(cur, swap_bead);

        ctx.path.break_link(prev_swap);
        ctx.path.make_link(prev_swap, worm.tail);

        let mut new_v = 0.0;
        let mut prev = pivot;
        for k in 1..swap_length {
            let b = self.segment[k - 1];
            self.state.save_position(ctx.path, b);
            let step = self.state.new_staging_position_with_winding(
                ctx.path,
                prev,
                worm.tail,
                swap_length,
                k,
                ctx.rng,
            );
            match step {
                Some((r, _wind)) => {
                    ctx.path.update_bead(b, r);
                    new_v += ctx.action.potential_action(ctx.path, b);
                }
                None => {
                    self.undo(ctx, prev_swap, swap_bead);
                    return false;
                }
            }
            prev = b;
        }

        let sigma_tail = self
            .pivots
            .get_norm(ctx.path, ctx.action, swap_bead, swap_length, -1);
        if sigma_tail <= 0.0 {
            self.undo(ctx, prev_swap, swap_bead);
            return false;
        }

        let log_ratio = sigma_swap.ln() - sigma_tail.ln() - (new_v - old_v);
        if self.state.metropolis(log_ratio, ctx.rng) {
            ctx.path.worm = Some(Worm { head: worm.head, tail: swap_bead });
            self.state.keep(ctx.totals);
            debug_assert!(ctx.path.is_consistent());
            true
        } else {
            self.undo(ctx, prev_swap, swap_bead);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{Cell, DVec};
    use crate::moves::MoveStatistics;
    use crate::potential::FreePotential;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn constants() -> SimulationConstants {
        SimulationConstants {
            tau: 0.1,
            lambda: 0.5,
            num_time_slices: 16,
            num_levels: 2,
            mbar: 4,
            max_wind: 1,
            ..Default::default()
        }
    }

    /// Two worldlines, a worm with an 8-slice gap on the first.
    fn worm_path() -> Path {
        let mut path = Path::new(
            Cell::cube(6.0),
            16,
            &[DVec::zeros(), DVec::new(1.0, 0.0, 0.0)],
        );
        let head = BeadLocator::new(2, 0);
        let mut cur = head;
        let mut interior = Vec::new();
        for _ in 1..8 {
            cur = path.next(cur).unwrap();
            interior.push(cur);
        }
        let tail = path.next(cur).unwrap();
        for b in interior {
            path.del_bead(b);
        }
        path.worm = Some(Worm { head, tail });
        assert!(path.is_consistent());
        path
    }

    #[test]
    fn swap_head_rewires_onto_the_other_worldline() {
        let mut path = worm_path();
        let action = PrimitiveAction::new(constants(), FreePotential);
        let mut rng = StdRng::seed_from_u64(6);
        let mut totals = MoveStatistics::default();
        let mut mv = SwapHeadMove::new(constants());
        let head0 = path.worm.unwrap().head;
        let mut accepted = false;
        for _ in 0..100 {
            let snapshot = path.clone();
            let mut ctx = MoveContext {
                path: &mut path,
                action: &action,
                rng: &mut rng,
                totals: &mut totals,
            };
            if mv.attempt(&mut ctx) {
                accepted = true;
                break;
            }
            assert_eq!(path, snapshot, "rejection must restore the path");
        }
        assert!(accepted, "swap head never accepted");
        assert!(path.is_consistent());
        // the acceptance moves the head to the second worldline's slot
        // on the same slice
        assert_ne!(path.worm.unwrap().head, head0);
        assert_eq!(path.worm.unwrap().head.slice, head0.slice);
    }

    #[test]
    fn swap_tail_mirrors_swap_head() {
        let mut path = worm_path();
        let action = PrimitiveAction::new(constants(), FreePotential);
        let mut rng = StdRng::seed_from_u64(8);
        let mut totals = MoveStatistics::default();
        let mut mv = SwapTailMove::new(constants());
        let tail0 = path.worm.unwrap().tail;
        let mut accepted = false;
        for _ in 0..100 {
            let snapshot = path.clone();
            let mut ctx = MoveContext {
                path: &mut path,
                action: &action,
                rng: &mut rng,
                totals: &mut totals,
            };
            if mv.attempt(&mut ctx) {
                accepted = true;
                break;
            }
            assert_eq!(path, snapshot);
        }
        assert!(accepted, "swap tail never accepted");
        assert!(path.is_consistent());
        assert_ne!(path.worm.unwrap().tail, tail0);
        assert_eq!(path.worm.unwrap().tail.slice, tail0.slice);
    }

    #[test]
    fn swap_head_gates_on_sector() {
        let mut path = Path::new(Cell::cube(6.0), 16, &[DVec::zeros()]);
        let snapshot = path.clone();
        let action = PrimitiveAction::new(constants(), FreePotential);
        let mut rng = StdRng::seed_from_u64(2);
        let mut totals = MoveStatistics::default();
        let mut mv = SwapHeadMove::new(constants());
        let mut ctx = MoveContext {
            path: &mut path,
            action: &action,
            rng: &mut rng,
            totals: &mut totals,
        };
        assert!(!mv.attempt(&mut ctx));
        assert_eq!(path, snapshot);
        assert_eq!(totals.attempted, 1);
    }
}
