//! Moves acting on broken worldline ends: free-end restaging, staging
//! across the break, and relocation of the break itself.

use rand::Rng;

use crate::constants::SimulationConstants;
use crate::path::BeadLocator;
use crate::potential::Potential;

use super::{Ensemble, MoveContext, MoveState};

/// Resample the last `mbar` beads of one worm end with unconstrained
/// free-particle steps.
///
/// One side of the staged segment is anchored on the worldline, the
/// other side is the dangling end, so every link is drawn exactly from
/// its kinetic weight and only the potential difference decides.
pub struct EndStagingMove {
    pub state: MoveState,
    segment: Vec<BeadLocator>,
}

impl EndStagingMove {
    pub const NAME: &'static str = "end staging";

    pub fn new(constants: SimulationConstants) -> Self {
        Self {
            state: MoveState::new(constants, Ensemble::OffDiagonal, false),
            segment: Vec::new(),
        }
    }

    pub fn attempt<V: Potential, R: Rng>(&mut self, ctx: &mut MoveContext<V, R>) -> bool {
        self.state.bump_attempt(ctx.totals);
        if !self.state.ensemble.allows(ctx.path.is_diagonal()) {
            return false;
        }
        let worm = ctx.path.worm.expect("off-diagonal sector has a worm");
        let m = self.state.constants.mbar;
        if m < 1 {
            return false;
        }
        // Pick the end to restage: true walks left-to-right into the
        // head, false right-to-left into the tail.
        let left_moving = ctx.rng.gen::<bool>();

        self.segment.clear();
        if left_moving {
            let Some(anchor) = ctx.path.prev_n(worm.head, m) else {
                return false;
            };
            let mut cur = anchor;
            for _ in 0..m {
                cur = ctx.path.next(cur).expect("segment verified contiguous");
                self.segment.push(cur);
            }
        } else {
            let Some(anchor) = ctx.path.next_n(worm.tail, m) else {
                return false;
            };
            let mut cur = anchor;
            for _ in 0..m {
                cur = ctx.path.prev(cur).expect("segment verified contiguous");
                self.segment.push(cur);
            }
        }

        let mut old_v = 0.0;
        for &b in &self.segment {
            old_v += ctx.action.potential_action(ctx.path, b);
        }
        let mut prev_pos = if left_moving {
            ctx.path.pos(ctx.path.prev(self.segment[0]).expect("anchor present"))
        } else {
            ctx.path.pos(ctx.path.next(self.segment[0]).expect("anchor present"))
        };
        for idx in 0..self.segment.len() {
            let b = self.segment[idx];
            self.state.save_position(ctx.path, b);
            let r = self.state.free_step(ctx.path, &prev_pos, ctx.rng);
            ctx.path.update_bead(b, r);
            prev_pos = r;
        }
        let mut new_v = 0.0;
        for &b in &self.segment {
            new_v += ctx.action.potential_action(ctx.path, b);
        }

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

/// Stage a bridge across the worm break, repositioning the head, the
/// tail and their neighbors while the break itself stays put.
///
/// The broken link carries a proposal Gaussian but no kinetic action, so
/// the acceptance picks up the single-link propagator ratio of the old
/// and new break separations; the bridge normalization cancels.
pub struct MidStagingMove {
    pub state: MoveState,
    segment: Vec<BeadLocator>,
}

impl MidStagingMove {
    pub const NAME: &'static str = "mid staging";

    pub fn new(constants: SimulationConstants) -> Self {
        Self {
            state: MoveState::new(constants, Ensemble::OffDiagonal, false),
            segment: Vec::new(),
        }
    }

    pub fn attempt<V: Potential, R: Rng>(&mut self, ctx: &mut MoveContext<V, R>) -> bool {
        self.state.bump_attempt(ctx.totals);
        if !self.state.ensemble.allows(ctx.path.is_diagonal()) {
            return false;
        }
        let worm = ctx.path.worm.expect("off-diagonal sector has a worm");
        if ctx.path.worm_gap() != Some(1) {
            return false;
        }
        let m = self.state.constants.mbar;
        if m < 2 {
            return false;
        }
        // links left of the break; at least one so the head restages
        let k = ctx.rng.gen_range(1..m);
        let Some(left) = ctx.path.prev_n(worm.head, k) else {
            return false;
        };
        let Some(right) = ctx.path.next_n(worm.tail, m - k - 1) else {
            return false;
        };
        // short worms: both anchors must stay clear of the resampled ends
        if left == worm.tail || right == worm.head {
            return false;
        }

        // virtual chain left -> ... -> head | tail -> ... -> right
        self.segment.clear();
        let mut cur = left;
        for _ in 0..k {
            cur = ctx.path.next(cur).expect("left span verified");
            self.segment.push(cur);
        }
        cur = worm.tail;
        for _ in 0..(m - k - 1) {
            self.segment.push(cur);
            cur = ctx.path.next(cur).expect("right span verified");
        }

        let rho_old = ctx.action.rho0(ctx.path, worm.head, worm.tail, 1);
        if rho_old <= 0.0 {
            return false;
        }
        let mut old_v = 0.0;
        for &b in &self.segment {
            old_v += ctx.action.potential_action(ctx.path, b);
        }
        let mut prev = left;
        let mut failed = false;
        for j in 0..self.segment.len() {
            let b = self.segment[j];
            self.state.save_position(ctx.path, b);
            let step =
                self.state
                    .new_staging_position_with_winding(ctx.path, prev, right, m, j + 1, ctx.rng);
            match step {
                Some((r, _wind)) => ctx.path.update_bead(b, r),
                None => {
                    failed = true;
                    break;
                }
            }
            prev = b;
        }
        if failed {
            self.state.restore_positions(ctx.path);
            debug_assert!(ctx.path.is_consistent());
            return false;
        }
        let rho_new = ctx.action.rho0(ctx.path, worm.head, worm.tail, 1);
        if rho_new <= 0.0 {
            self.state.restore_positions(ctx.path);
            return false;
        }
        let mut new_v = 0.0;
        for &b in &self.segment {
            new_v += ctx.action.potential_action(ctx.path, b);
        }

        let log_ratio = -(new_v - old_v) + rho_old.ln() - rho_new.ln();
        if self.state.metropolis(log_ratio, ctx.rng) {
            self.state.keep(ctx.totals);
            true
        } else {
            self.state.restore_positions(ctx.path);
            debug_assert!(ctx.path.is_consistent());
            false
        }
    }
}

/// Move the break to a different worldline by exchanging a dangling end
/// with an intact link on the same slice pair. Positions never change
/// and rejection never mutates, so there is nothing to undo.
pub struct SwapBreakMove {
    pub state: MoveState,
}

impl SwapBreakMove {
    pub const NAME: &'static str = "swap break";

    pub fn new(constants: SimulationConstants) -> Self {
        Self {
            state: MoveState::new(constants, Ensemble::OffDiagonal, false),
        }
    }

    pub fn attempt<V: Potential, R: Rng>(&mut self, ctx: &mut MoveContext<V, R>) -> bool {
        self.state.bump_attempt(ctx.totals);
        if !self.state.ensemble.allows(ctx.path.is_diagonal()) {
            return false;
        }
        let mut worm = ctx.path.worm.expect("off-diagonal sector has a worm");
        let head_side = ctx.rng.gen::<bool>();

        if head_side {
            let slice = worm.head.slice;
            let candidates: Vec<BeadLocator> = ctx
                .path
                .beads_at_slice(slice)
                .filter(|&b| ctx.path.next(b).is_some())
                .collect();
            if candidates.is_empty() {
                return false;
            }
            let cl = candidates[ctx.rng.gen_range(0..candidates.len())];
            let cr = ctx.path.next(cl).expect("candidate has a forward link");
            let rho_new = ctx.action.rho0(ctx.path, worm.head, cr, 1);
            let rho_old = ctx.action.rho0(ctx.path, cl, cr, 1);
            if rho_new <= 0.0 || rho_old <= 0.0 {
                return false;
            }
            if self.state.metropolis(rho_new.ln() - rho_old.ln(), ctx.rng) {
                ctx.path.break_link(cl);
                ctx.path.make_link(worm.head, cr);
                worm.head = cl;
                ctx.path.worm = Some(worm);
                self.state.keep(ctx.totals);
                debug_assert!(ctx.path.is_consistent());
                true
            } else {
                false
            }
        } else {
            let slice = worm.tail.slice;
            let candidates: Vec<BeadLocator> = ctx
                .path
                .beads_at_slice(slice)
                .filter(|&b| ctx.path.prev(b).is_some())
                .collect();
            if candidates.is_empty() {
                return false;
            }
            let cr = candidates[ctx.rng.gen_range(0..candidates.len())];
            let cl = ctx.path.prev(cr).expect("candidate has a backward link");
            let rho_new = ctx.action.rho0(ctx.path, cl, worm.tail, 1);
            let rho_old = ctx.action.rho0(ctx.path, cl, cr, 1);
            if rho_new <= 0.0 || rho_old <= 0.0 {
                return false;
            }
            if self.state.metropolis(rho_new.ln() - rho_old.ln(), ctx.rng) {
                ctx.path.break_link(cl);
                ctx.path.make_link(cl, worm.tail);
                worm.tail = cr;
                ctx.path.worm = Some(worm);
                self.state.keep(ctx.totals);
                debug_assert!(ctx.path.is_consistent());
                true
            } else {
                false
            }
        }
    }
}
