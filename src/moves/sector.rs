//! Sector-changing moves: Open/Close, Insert/Remove and their
//! canonical variants.
//!
//! All of them carry the worm-constant factor `C·Mbar·N·M` (Insert and
//! Remove trade the worldline count `N` for the cell volume `V`) so the
//! stationary distribution over sectors matches the grand-canonical
//! target, and each pair is exactly reciprocal.

use rand::Rng;

use crate::cell::DVec;
use crate::constants::SimulationConstants;
use crate::path::{BeadLocator, Path, Worm};
use crate::potential::Potential;

use super::{Ensemble, MoveContext, MoveState};

/// Relink the restored chain `head -> interior... -> tail`.
fn relink_chain(path: &mut Path, head: BeadLocator, interior: &[(BeadLocator, DVec)], tail: BeadLocator) {
    let mut cur = head;
    for &(b, r) in interior {
        path.restore_bead(b, r);
        path.make_link(cur, b);
        cur = b;
    }
    path.make_link(cur, tail);
}

/// Open a gap in a closed worldline, leaving a worm behind.
pub struct OpenMove {
    pub state: MoveState,
    canonical: bool,
    removed: Vec<(BeadLocator, DVec)>,
}

impl OpenMove {
    pub const NAME: &'static str = "open";

    pub fn new(constants: SimulationConstants) -> Self {
        Self {
            state: MoveState::new(constants, Ensemble::Diagonal, true),
            canonical: false,
            removed: Vec::new(),
        }
    }

    fn new_canonical(constants: SimulationConstants) -> Self {
        Self {
            canonical: true,
            ..Self::new(constants)
        }
    }

    pub fn attempt<V: Potential, R: Rng>(&mut self, ctx: &mut MoveContext<V, R>) -> bool {
        self.state.bump_attempt(ctx.totals);
        if !self.state.ensemble.allows(ctx.path.is_diagonal()) {
            return false;
        }
        let c = self.state.constants;
        let m_slices = ctx.path.num_slices();
        if c.max_worm_length() <= 1 {
            return false;
        }
        let gap = ctx.rng.gen_range(1..c.max_worm_length());
        if gap > m_slices - 1 {
            return false;
        }
        let Some(head) = ctx.path.random_active_bead(ctx.rng) else {
            return false;
        };
        if self.canonical && head.slice + gap > m_slices - 1 {
            // the gap would wrap the reference slice and change the
            // canonical particle number
            return false;
        }
        let tail = ctx
            .path
            .next_n(head, gap)
            .expect("diagonal worldlines are closed");

        let n_particles = ctx.path.get_true_num_particles();
        let rho = ctx.action.rho0(ctx.path, head, tail, gap);
        if rho <= 0.0 {
            return false;
        }

        self.removed.clear();
        let mut old_v = 0.0;
        let mut cur = head;
        for _ in 1..gap {
            cur = ctx.path.next(cur).expect("gap span verified");
            old_v += ctx.action.potential_action(ctx.path, cur);
            self.removed.push((cur, ctx.path.pos(cur)));
        }
        if gap == 1 {
            ctx.path.break_link(head);
        } else {
            for &(b, _) in &self.removed {
                ctx.path.del_bead(b);
            }
        }
        ctx.path.worm = Some(Worm { head, tail });

        let norm = c.worm_constant
            * c.mbar as f64
            * n_particles as f64
            * c.num_time_slices as f64;
        let log_ratio = norm.ln() - rho.ln() + old_v + c.mu * gap as f64 * c.tau;
        if self.state.metropolis(log_ratio, ctx.rng) {
            self.state.keep(ctx.totals);
            debug_assert!(ctx.path.is_consistent());
            true
        } else {
            relink_chain(ctx.path, head, &self.removed, tail);
            ctx.path.worm = None;
            debug_assert!(ctx.path.is_consistent());
            false
        }
    }
}

/// Bridge the worm gap with a Lévy construction, restoring a diagonal
/// configuration. Exact reciprocal of [`OpenMove`].
pub struct CloseMove {
    pub state: MoveState,
    canonical: bool,
    created: Vec<BeadLocator>,
}

impl CloseMove {
    pub const NAME: &'static str = "close";

    pub fn new(constants: SimulationConstants) -> Self {
        Self {
            state: MoveState::new(constants, Ensemble::OffDiagonal, true),
            canonical: false,
            created: Vec::new(),
        }
    }

    fn new_canonical(constants: SimulationConstants) -> Self {
        Self {
            canonical: true,
            ..Self::new(constants)
        }
    }

    fn undo<V: Potential, R: Rng>(&mut self, ctx: &mut MoveContext<V, R>, worm: Worm) {
        if self.created.is_empty() {
            ctx.path.break_link(worm.head);
        } else {
            for &b in self.created.iter().rev() {
                ctx.path.del_bead(b);
            }
        }
        ctx.path.worm = Some(worm);
        debug_assert!(ctx.path.is_consistent());
    }

    pub fn attempt<V: Potential, R: Rng>(&mut self, ctx: &mut MoveContext<V, R>) -> bool {
        self.state.bump_attempt(ctx.totals);
        if !self.state.ensemble.allows(ctx.path.is_diagonal()) {
            return false;
        }
        let c = self.state.constants;
        let m_slices = ctx.path.num_slices();
        let worm = ctx.path.worm.expect("off-diagonal sector has a worm");
        let gap = ctx.path.worm_gap().expect("worm gap defined");
        if gap >= c.max_worm_length() || gap > m_slices - 1 {
            return false;
        }
        if self.canonical && worm.head.slice + gap > m_slices - 1 {
            return false;
        }
        let n_after = (ctx.path.num_active_beads() + gap - 1) / m_slices;
        let rho = ctx.action.rho0(ctx.path, worm.head, worm.tail, gap);
        if rho <= 0.0 {
            return false;
        }

        self.created.clear();
        let mut new_v = 0.0;
        let mut cur = worm.head;
        for k in 1..gap {
            let step = self.state.new_staging_position_with_winding(
                ctx.path,
                cur,
                worm.tail,
                gap,
                k,
                ctx.rng,
            );
            match step {
                Some((r, _wind)) => {
                    let b = ctx.path.add_next_bead(cur, r);
                    new_v += ctx.action.potential_action(ctx.path, b);
                    self.created.push(b);
                    cur = b;
                }
                None => {
                    self.undo(ctx, worm);
                    return false;
                }
            }
        }
        ctx.path.make_link(cur, worm.tail);
        ctx.path.worm = None;

        let norm = c.worm_constant
            * c.mbar as f64
            * n_after as f64
            * c.num_time_slices as f64;
        let log_ratio = rho.ln() - norm.ln() - new_v - c.mu * gap as f64 * c.tau;
        if self.state.metropolis(log_ratio, ctx.rng) {
            self.state.keep(ctx.totals);
            debug_assert!(ctx.path.is_consistent());
            true
        } else {
            self.undo(ctx, worm);
            false
        }
    }
}

/// Open constrained to gaps that never wrap the reference slice, so the
/// particle number measured at slice 0 is conserved.
pub struct CanonicalOpenMove {
    inner: OpenMove,
}

impl CanonicalOpenMove {
    pub const NAME: &'static str = "canonical open";

    pub fn new(constants: SimulationConstants) -> Self {
        Self {
            inner: OpenMove::new_canonical(constants),
        }
    }

    pub fn attempt<V: Potential, R: Rng>(&mut self, ctx: &mut MoveContext<V, R>) -> bool {
        self.inner.attempt(ctx)
    }
}

impl std::ops::Deref for CanonicalOpenMove {
    type Target = OpenMove;
    fn deref(&self) -> &OpenMove {
        &self.inner
    }
}

/// Close constrained like [`CanonicalOpenMove`].
pub struct CanonicalCloseMove {
    inner: CloseMove,
}

impl CanonicalCloseMove {
    pub const NAME: &'static str = "canonical close";

    pub fn new(constants: SimulationConstants) -> Self {
        Self {
            inner: CloseMove::new_canonical(constants),
        }
    }

    pub fn attempt<V: Potential, R: Rng>(&mut self, ctx: &mut MoveContext<V, R>) -> bool {
        self.inner.attempt(ctx)
    }
}

impl std::ops::Deref for CanonicalCloseMove {
    type Target = CloseMove;
    fn deref(&self) -> &CloseMove {
        &self.inner
    }
}

/// Grow a brand-new worm from a uniformly drawn anchor position.
pub struct InsertMove {
    pub state: MoveState,
    created: Vec<BeadLocator>,
}

impl InsertMove {
    pub const NAME: &'static str = "insert";

    pub fn new(constants: SimulationConstants) -> Self {
        Self {
            state: MoveState::new(constants, Ensemble::Diagonal, true),
            created: Vec::new(),
        }
    }

    pub fn attempt<V: Potential, R: Rng>(&mut self, ctx: &mut MoveContext<V, R>) -> bool {
        self.state.bump_attempt(ctx.totals);
        if !self.state.ensemble.allows(ctx.path.is_diagonal()) {
            return false;
        }
        let c = self.state.constants;
        let m_slices = ctx.path.num_slices();
        if c.max_worm_length() <= 1 {
            return false;
        }
        let len = ctx.rng.gen_range(1..c.max_worm_length());
        if len > m_slices - 1 {
            return false;
        }
        let s0 = ctx.rng.gen_range(0..m_slices);
        let anchor = ctx.path.cell.random_position(ctx.rng);

        self.created.clear();
        let tail = ctx.path.add_bead_at(s0, anchor);
        self.created.push(tail);
        let mut new_v = ctx.action.potential_action(ctx.path, tail);
        let mut cur = tail;
        for _ in 0..len {
            let r = self.state.new_free_particle_position(ctx.path, cur, ctx.rng);
            let b = ctx.path.add_next_bead(cur, r);
            new_v += ctx.action.potential_action(ctx.path, b);
            self.created.push(b);
            cur = b;
        }
        ctx.path.worm = Some(Worm { head: cur, tail });

        let norm = c.worm_constant
            * c.mbar as f64
            * ctx.path.cell.volume()
            * c.num_time_slices as f64;
        let log_ratio = norm.ln() - new_v + c.mu * len as f64 * c.tau;
        if self.state.metropolis(log_ratio, ctx.rng) {
            self.state.keep(ctx.totals);
            debug_assert!(ctx.path.is_consistent());
            true
        } else {
            for &b in self.created.iter().rev() {
                ctx.path.del_bead(b);
            }
            ctx.path.worm = None;
            debug_assert!(ctx.path.is_consistent());
            false
        }
    }
}

/// Delete the whole worm, returning to the diagonal sector. Exact
/// reciprocal of [`InsertMove`].
pub struct RemoveMove {
    pub state: MoveState,
    removed: Vec<(BeadLocator, DVec)>,
}

impl RemoveMove {
    pub const NAME: &'static str = "remove";

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
        let worm = ctx.path.worm.expect("off-diagonal sector has a worm");
        // only worms Insert could have produced
        let Some(len) = ctx.path.worm_length_within(c.max_worm_length() - 1) else {
            return false;
        };
        if len < 1 || len > ctx.path.num_slices() - 1 {
            return false;
        }

        let old_v = ctx.action.potential_action_range(ctx.path, worm.tail, worm.head);
        self.removed.clear();
        let mut cur = worm.tail;
        loop {
            self.removed.push((cur, ctx.path.pos(cur)));
            if cur == worm.head {
                break;
            }
            cur = ctx.path.next(cur).expect("worm length verified");
        }
        for &(b, _) in &self.removed {
            ctx.path.del_bead(b);
        }
        ctx.path.worm = None;

        let norm = c.worm_constant
            * c.mbar as f64
            * ctx.path.cell.volume()
            * c.num_time_slices as f64;
        let log_ratio = old_v - norm.ln() - c.mu * len as f64 * c.tau;
        if self.state.metropolis(log_ratio, ctx.rng) {
            self.state.keep(ctx.totals);
            debug_assert!(ctx.path.is_consistent());
            true
        } else {
            let mut iter = self.removed.iter();
            let &(tail, r_tail) = iter.next().expect("worm had at least one bead");
            ctx.path.restore_bead(tail, r_tail);
            let mut cur = tail;
            for &(b, r) in iter {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::PrimitiveAction;
    use crate::cell::Cell;
    use crate::moves::MoveStatistics;
    use crate::potential::FreePotential;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn constants() -> SimulationConstants {
        SimulationConstants {
            tau: 0.1,
            lambda: 0.5,
            num_time_slices: 16,
            mbar: 4,
            max_wind: 1,
            worm_constant: 0.5,
            ..Default::default()
        }
    }

    fn diagonal_path() -> Path {
        Path::new(
            Cell::cube(5.0),
            16,
            &[
                DVec::zeros(),
                DVec::new(1.0, 0.5, 0.0),
                DVec::new(-1.0, 0.0, 0.5),
                DVec::new(0.0, -1.0, -0.5),
            ],
        )
    }

    fn ctx_parts() -> (PrimitiveAction<FreePotential>, StdRng, MoveStatistics) {
        (
            PrimitiveAction::new(constants(), FreePotential),
            StdRng::seed_from_u64(2024),
            MoveStatistics::default(),
        )
    }

    #[test]
    fn rejected_open_restores_everything() {
        let mut path = diagonal_path();
        // a vanishing worm constant forces rejection
        let c = SimulationConstants {
            worm_constant: 1e-300,
            ..constants()
        };
        let action = PrimitiveAction::new(c, FreePotential);
        let mut rng = StdRng::seed_from_u64(5);
        let mut totals = MoveStatistics::default();
        let mut mv = OpenMove::new(c);
        for _ in 0..300 {
            let snapshot = path.clone();
            let mut ctx = MoveContext {
                path: &mut path,
                action: &action,
                rng: &mut rng,
                totals: &mut totals,
            };
            assert!(!mv.attempt(&mut ctx));
            assert_eq!(path, snapshot);
        }
        assert_eq!(totals.attempted, 300);
        assert_eq!(totals.accepted, 0);
    }

    #[test]
    fn open_then_close_round_trip() {
        let mut path = diagonal_path();
        let (action, mut rng, mut totals) = ctx_parts();
        let mut open = OpenMove::new(constants());
        let mut close = CloseMove::new(constants());
        let n0 = path.get_true_num_particles();
        let mut opened = 0;
        for _ in 0..2000 {
            if path.is_diagonal() {
                let mut ctx = MoveContext {
                    path: &mut path,
                    action: &action,
                    rng: &mut rng,
                    totals: &mut totals,
                };
                if open.attempt(&mut ctx) {
                    opened += 1;
                }
            } else {
                let mut ctx = MoveContext {
                    path: &mut path,
                    action: &action,
                    rng: &mut rng,
                    totals: &mut totals,
                };
                close.attempt(&mut ctx);
            }
            assert!(path.is_consistent());
        }
        assert!(opened > 0, "open never accepted");
        // drive back to the diagonal sector and verify bead bookkeeping
        let mut guard = 0;
        while !path.is_diagonal() {
            let mut ctx = MoveContext {
                path: &mut path,
                action: &action,
                rng: &mut rng,
                totals: &mut totals,
            };
            close.attempt(&mut ctx);
            guard += 1;
            assert!(guard < 100_000, "close never recovered the diagonal sector");
        }
        assert_eq!(path.get_true_num_particles(), n0);
        assert_eq!(path.num_active_beads(), n0 * 16);
    }

    #[test]
    fn insert_then_remove_round_trip() {
        let mut path = diagonal_path();
        let (action, mut rng, mut totals) = ctx_parts();
        let mut insert = InsertMove::new(constants());
        let mut remove = RemoveMove::new(constants());
        let n0 = path.num_active_beads();
        let mut inserted = 0;
        for _ in 0..2000 {
            if path.is_diagonal() {
                let mut ctx = MoveContext {
                    path: &mut path,
                    action: &action,
                    rng: &mut rng,
                    totals: &mut totals,
                };
                if insert.attempt(&mut ctx) {
                    inserted += 1;
                }
            } else {
                let mut ctx = MoveContext {
                    path: &mut path,
                    action: &action,
                    rng: &mut rng,
                    totals: &mut totals,
                };
                remove.attempt(&mut ctx);
            }
            assert!(path.is_consistent());
        }
        assert!(inserted > 0, "insert never accepted");
        let mut guard = 0;
        while !path.is_diagonal() {
            let mut ctx = MoveContext {
                path: &mut path,
                action: &action,
                rng: &mut rng,
                totals: &mut totals,
            };
            remove.attempt(&mut ctx);
            guard += 1;
            assert!(guard < 100_000, "remove never recovered the diagonal sector");
        }
        assert_eq!(path.num_active_beads(), n0);
    }

    #[test]
    fn canonical_open_never_wraps_the_reference_slice() {
        let (action, mut rng, mut totals) = ctx_parts();
        let mut mv = CanonicalOpenMove::new(constants());
        for _ in 0..500 {
            let mut path = diagonal_path();
            let mut ctx = MoveContext {
                path: &mut path,
                action: &action,
                rng: &mut rng,
                totals: &mut totals,
            };
            if mv.attempt(&mut ctx) {
                let worm = path.worm.unwrap();
                assert!(worm.head.slice < worm.tail.slice, "gap wrapped τ=0");
            }
        }
    }

    #[test]
    fn sector_gating_leaves_path_untouched() {
        let mut path = diagonal_path();
        let (action, mut rng, mut totals) = ctx_parts();
        let snapshot = path.clone();
        let mut close = CloseMove::new(constants());
        let mut remove = RemoveMove::new(constants());
        for _ in 0..10 {
            let mut ctx = MoveContext {
                path: &mut path,
                action: &action,
                rng: &mut rng,
                totals: &mut totals,
            };
            assert!(!close.attempt(&mut ctx));
            let mut ctx = MoveContext {
                path: &mut path,
                action: &action,
                rng: &mut rng,
                totals: &mut totals,
            };
            assert!(!remove.attempt(&mut ctx));
        }
        assert_eq!(path, snapshot);
        assert_eq!(totals.attempted, 20);
    }
}
