//! Worm extension and retraction at either endpoint.
//!
//! Growth moves append free-particle-sampled beads so the kinetic
//! action cancels against the proposal; the chemical-potential factor
//! carries the sign of the bead-count change, pairing AdvanceHead with
//! RecedeHead and AdvanceTail with RecedeTail under detailed balance.

use rand::Rng;

use crate::cell::DVec;
use crate::constants::SimulationConstants;
use crate::path::{BeadLocator, Worm};
use crate::potential::Potential;

use super::{Ensemble, MoveContext, MoveState};

/// Extend the worm head forward in imaginary time.
pub struct AdvanceHeadMove {
    pub state: MoveState,
    created: Vec<BeadLocator>,
}

impl AdvanceHeadMove {
    pub const NAME: &'static str = "advance head";

    pub fn new(constants: SimulationConstants) -> Self {
        Self {
            state: MoveState::new(constants, Ensemble::OffDiagonal, true),
            created: Vec::new(),
        }
    }

    pub fn attempt<V: Potential, R: Rng>(&mut self, ctx: &mut MoveContext<V, R>) -> bool {
        self.state.bump_attempt(ctx.totals);
        if !self.state.ensemble.allows(ctx.path.is_diagonal()) {
            return false;
        }
        let c = self.state.constants;
        if c.max_worm_length() <= 1 {
            return false;
        }
        let len = ctx.rng.gen_range(1..c.max_worm_length());
        let worm = ctx.path.worm.expect("off-diagonal sector has a worm");
        let gap = ctx.path.worm_gap().expect("worm gap defined");
        // never advance onto the tail: keep at least one missing link
        if len + 1 > gap {
            return false;
        }

        self.created.clear();
        let mut new_v = 0.0;
        let mut cur = worm.head;
        for _ in 0..len {
            let r = self.state.new_free_particle_position(ctx.path, cur, ctx.rng);
            let b = ctx.path.add_next_bead(cur, r);
            new_v += ctx.action.potential_action(ctx.path, b);
            self.created.push(b);
            cur = b;
        }
        ctx.path.worm = Some(Worm { head: cur, tail: worm.tail });

        let log_ratio = -new_v + c.mu * len as f64 * c.tau;
        if self.state.metropolis(log_ratio, ctx.rng) {
            self.state.keep(ctx.totals);
            debug_assert!(ctx.path.is_consistent());
            true
        } else {
            for &b in self.created.iter().rev() {
                ctx.path.del_bead(b);
            }
            ctx.path.worm = Some(worm);
            debug_assert!(ctx.path.is_consistent());
            false
        }
    }
}

/// Retract the worm head backward in imaginary time.
pub struct RecedeHeadMove {
    pub state: MoveState,
    removed: Vec<(BeadLocator, DVec)>,
}

impl RecedeHeadMove {
    pub const NAME: &'static str = "recede head";

    pub fn new(constants: SimulationConstants) -> Self {
        Self {
            state: MoveState::new(constants, Ensemble::OffDiagonal, true),
            removed: Vec::new(),
        }
    }

    pub fn attempt<V: Potential, R: Rng>(&mut self, ctx: &mut MoveContext<V, R>) -> bool {
        self.state.bump_attempt(ctx.totals);
        if !self.state.ensemble.allows(ctx.path.is_diagonal()) {
            return false;
        }
        let c = self.state.constants;
        if c.max_worm_length() <= 1 {
            return false;
        }
        let len = ctx.rng.gen_range(1..c.max_worm_length());
        let worm = ctx.path.worm.expect("off-diagonal sector has a worm");
        let Some(new_head) = ctx.path.prev_n(worm.head, len) else {
            return false;
        };
        if new_head == worm.tail {
            // the worm keeps at least one link
            return false;
        }

        self.removed.clear();
        let mut old_v = 0.0;
        let mut cur = new_head;
        for _ in 0..len {
            cur = ctx.path.next(cur).expect("segment verified contiguous");
            old_v += ctx.action.potential_action(ctx.path, cur);
            self.removed.push((cur, ctx.path.pos(cur)));
        }
        for &(b, _) in &self.removed {
            ctx.path.del_bead(b);
        }
        ctx.path.worm = Some(Worm { head: new_head, tail: worm.tail });

        let log_ratio = old_v - c.mu * len as f64 * c.tau;
        if self.state.metropolis(log_ratio, ctx.rng) {
            self.state.keep(ctx.totals);
            debug_assert!(ctx.path.is_consistent());
            true
        } else {
            let mut cur = new_head;
            for &(b, r) in &self.removed {
                ctx.path.restore_bead(b, r);
                ctx.path.make_link(cur, b);
                cur = b;
            }
            ctx.path.worm = Some(worm);
            debug_assert!(ctx.path.is_consistent());
            false
        }
    }
}

/// Advance the worm tail forward in imaginary time, shortening the
/// worm.
pub struct AdvanceTailMove {
    pub state: MoveState,
    removed: Vec<(BeadLocator, DVec)>,
}

impl AdvanceTailMove {
    pub const NAME: &'static str = "advance tail";

    pub fn new(constants: SimulationConstants) -> Self {
        Self {
            state: MoveState::new(constants, Ensemble::OffDiagonal, true),
            removed: Vec::new(),
        }
    }

    pub fn attempt<V: Potential, R: Rng>(&mut self, ctx: &mut MoveContext<V, R>) -> bool {
        self.state.bump_attempt(ctx.totals);
        if !self.state.ensemble.allows(ctx.path.is_diagonal()) {
            return false;
        }
        let c = self.state.constants;
        if c.max_worm_length() <= 1 {
            return false;
        }
        let len = ctx.rng.gen_range(1..c.max_worm_length());
        let worm = ctx.path.worm.expect("off-diagonal sector has a worm");
        let Some(new_tail) = ctx.path.next_n(worm.tail, len) else {
            return false;
        };
        if new_tail == worm.head {
            return false;
        }

        // the tail bead and the len-1 beads after it disappear
        self.removed.clear();
        let mut old_v = 0.0;
        let mut cur = worm.tail;
        for _ in 0..len {
            old_v += ctx.action.potential_action(ctx.path, cur);
            self.removed.push((cur, ctx.path.pos(cur)));
            cur = ctx.path.next(cur).expect("segment verified contiguous");
        }
        for &(b, _) in &self.removed {
            ctx.path.del_bead(b);
        }
        ctx.path.worm = Some(Worm { head: worm.head, tail: new_tail });

        let log_ratio = old_v - c.mu * len as f64 * c.tau;
        if self.state.metropolis(log_ratio, ctx.rng) {
            self.state.keep(ctx.totals);
            debug_assert!(ctx.path.is_consistent());
            true
        } else {
            let mut iter = self.removed.iter();
            let &(tail, r_tail) = iter.next().expect("removed at least one bead");
            ctx.path.restore_bead(tail, r_tail);
            let mut cur = tail;
            for &(b, r) in iter {
                ctx.path.restore_bead(b, r);
                ctx.path.make_link(cur, b);
                cur = b;
            }
            ctx.path.make_link(cur, new_tail);
            ctx.path.worm = Some(worm);
            debug_assert!(ctx.path.is_consistent());
            false
        }
    }
}

/// Recede the worm tail backward in imaginary time, growing the worm.
pub struct RecedeTailMove {
    pub state: MoveState,
    created: Vec<BeadLocator>,
}

impl RecedeTailMove {
    pub const NAME: &'static str = "recede tail";

    pub fn new(constants: SimulationConstants) -> Self {
        Self {
            state: MoveState::new(constants, Ensemble::OffDiagonal, true),
            created: Vec::new(),
        }
    }

    pub fn attempt<V: Potential, R: Rng>(&mut self, ctx: &mut MoveContext<V, R>) -> bool {
        self.state.bump_attempt(ctx.totals);
        if !self.state.ensemble.allows(ctx.path.is_diagonal()) {
            return false;
        }
        let c = self.state.constants;
        if c.max_worm_length() <= 1 {
            return false;
        }
        let len = ctx.rng.gen_range(1..c.max_worm_length());
        let worm = ctx.path.worm.expect("off-diagonal sector has a worm");
        let gap = ctx.path.worm_gap().expect("worm gap defined");
        if len + 1 > gap {
            return false;
        }

        self.created.clear();
        let mut new_v = 0.0;
        let mut cur = worm.tail;
        for _ in 0..len {
            let r0 = ctx.path.pos(cur);
            let r = self.state.free_step(ctx.path, &r0, ctx.rng);
            let b = ctx.path.add_prev_bead(cur, r);
            new_v += ctx.action.potential_action(ctx.path, b);
            self.created.push(b);
            cur = b;
        }
        ctx.path.worm = Some(Worm { head: worm.head, tail: cur });

        let log_ratio = -new_v + c.mu * len as f64 * c.tau;
        if self.state.metropolis(log_ratio, ctx.rng) {
            self.state.keep(ctx.totals);
            debug_assert!(ctx.path.is_consistent());
            true
        } else {
            for &b in self.created.iter().rev() {
                ctx.path.del_bead(b);
            }
            ctx.path.worm = Some(worm);
            debug_assert!(ctx.path.is_consistent());
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::PrimitiveAction;
    use crate::cell::Cell;
    use crate::moves::MoveStatistics;
    use crate::path::Path;
    use crate::potential::FreePotential;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn constants() -> SimulationConstants {
        SimulationConstants {
            tau: 0.1,
            lambda: 0.5,
            num_time_slices: 16,
            mbar: 3,
            max_wind: 1,
            ..Default::default()
        }
    }

    fn worm_path() -> Path {
        let mut path = Path::new(
            Cell::cube(6.0),
            16,
            &[DVec::zeros(), DVec::new(1.0, 0.0, 0.0)],
        );
        // open a gap of 8 on worldline 0
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

    fn run_many<F: FnMut(&mut MoveContext<FreePotential, StdRng>) -> bool>(
        path: &mut Path,
        rng: &mut StdRng,
        totals: &mut MoveStatistics,
        n: usize,
        mut f: F,
    ) -> usize {
        let action = PrimitiveAction::new(constants(), FreePotential);
        let mut accepted = 0;
        for _ in 0..n {
            let snapshot = path.clone();
            let mut ctx = MoveContext {
                path: &mut *path,
                action: &action,
                rng: &mut *rng,
                totals: &mut *totals,
            };
            if f(&mut ctx) {
                accepted += 1;
            } else {
                assert_eq!(*ctx.path, snapshot, "rejection must restore the path");
            }
            assert!(path.is_consistent());
        }
        accepted
    }

    #[test]
    fn advance_and_recede_head_balance_bead_counts() {
        let mut path = worm_path();
        let mut rng = StdRng::seed_from_u64(77);
        let mut totals = MoveStatistics::default();
        let mut advance = AdvanceHeadMove::new(constants());
        let mut recede = RecedeHeadMove::new(constants());
        let n0 = path.num_active_beads();
        for _ in 0..200 {
            run_many(&mut path, &mut rng, &mut totals, 1, |ctx| advance.attempt(ctx));
            run_many(&mut path, &mut rng, &mut totals, 1, |ctx| recede.attempt(ctx));
        }
        // free action, μ=0: every geometrically valid proposal accepts,
        // so the bead count random-walks but the worm stays intact
        let gap = path.worm_gap().unwrap();
        assert!(gap >= 1);
        assert_eq!(
            path.num_active_beads() as i64 - n0 as i64,
            8 - gap as i64,
            "bead count must track the gap"
        );
        assert_eq!(totals.attempted, 400);
    }

    #[test]
    fn tail_moves_mirror_head_moves() {
        let mut path = worm_path();
        let mut rng = StdRng::seed_from_u64(78);
        let mut totals = MoveStatistics::default();
        let mut advance = AdvanceTailMove::new(constants());
        let mut recede = RecedeTailMove::new(constants());
        for _ in 0..200 {
            run_many(&mut path, &mut rng, &mut totals, 1, |ctx| advance.attempt(ctx));
            run_many(&mut path, &mut rng, &mut totals, 1, |ctx| recede.attempt(ctx));
        }
        assert!(path.worm.is_some());
        assert!(path.worm_gap().unwrap() >= 1);
    }

    #[test]
    fn head_moves_reject_in_diagonal_sector() {
        let mut path = Path::new(Cell::cube(6.0), 16, &[DVec::zeros()]);
        let snapshot = path.clone();
        let mut rng = StdRng::seed_from_u64(1);
        let mut totals = MoveStatistics::default();
        let action = PrimitiveAction::new(constants(), FreePotential);
        let mut mv = AdvanceHeadMove::new(constants());
        let mut ctx = MoveContext {
            path: &mut path,
            action: &action,
            rng: &mut rng,
            totals: &mut totals,
        };
        assert!(!mv.attempt(&mut ctx));
        assert_eq!(path, snapshot);
        assert_eq!(totals.attempted, 1);
        assert_eq!(mv.state.num_attempted, 1);
        assert_eq!(mv.state.num_accepted, 0);
    }
}
