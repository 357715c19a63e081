//! Monte Carlo updates of the worldline configuration.
//!
//! Every move is a plain struct holding its scratch state, entered
//! through `attempt` with a [`MoveContext`] borrowing the path, the
//! action, the RNG and the global statistics for the duration of the
//! call. The [`Move`] sum type gives the driver a uniform handle over
//! the whole table.

mod base;
mod breaks;
mod diagonal;
mod sector;
mod swap;
mod worm;

pub use base::MoveState;
pub use breaks::{EndStagingMove, MidStagingMove, SwapBreakMove};
pub use diagonal::{BisectionMove, CenterOfMassMove, DisplaceMove, StagingMove};
pub use sector::{
    CanonicalCloseMove, CanonicalOpenMove, CloseMove, InsertMove, OpenMove, RemoveMove,
};
pub use swap::{SwapHeadMove, SwapTailMove};
pub use worm::{AdvanceHeadMove, AdvanceTailMove, RecedeHeadMove, RecedeTailMove};

use rand::Rng;

use crate::action::PrimitiveAction;
use crate::path::Path;
use crate::potential::Potential;

/// Which sector a move may operate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ensemble {
    Any,
    Diagonal,
    OffDiagonal,
}

impl Ensemble {
    /// Does a configuration in the given sector satisfy this gate?
    pub fn allows(self, diagonal: bool) -> bool {
        match self {
            Ensemble::Any => true,
            Ensemble::Diagonal => diagonal,
            Ensemble::OffDiagonal => !diagonal,
        }
    }
}

/// Process-wide attempt/accept totals, owned by the driver and bumped
/// exactly once per attempt by every move.
#[derive(Debug, Clone, Copy, Default)]
pub struct MoveStatistics {
    pub attempted: u64,
    pub accepted: u64,
}

impl MoveStatistics {
    pub fn acceptance_ratio(&self) -> f64 {
        if self.attempted == 0 {
            0.0
        } else {
            self.accepted as f64 / self.attempted as f64
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Everything a move borrows for one attempt.
pub struct MoveContext<'a, V: Potential, R: Rng> {
    pub path: &'a mut Path,
    pub action: &'a PrimitiveAction<V>,
    pub rng: &'a mut R,
    pub totals: &'a mut MoveStatistics,
}

/// Sum type over all concrete moves.
pub enum Move {
    CenterOfMass(CenterOfMassMove),
    Displace(DisplaceMove),
    Staging(StagingMove),
    Bisection(BisectionMove),
    EndStaging(EndStagingMove),
    MidStaging(MidStagingMove),
    SwapBreak(SwapBreakMove),
    Open(OpenMove),
    Close(CloseMove),
    CanonicalOpen(CanonicalOpenMove),
    CanonicalClose(CanonicalCloseMove),
    Insert(InsertMove),
    Remove(RemoveMove),
    AdvanceHead(AdvanceHeadMove),
    RecedeHead(RecedeHeadMove),
    AdvanceTail(AdvanceTailMove),
    RecedeTail(RecedeTailMove),
    SwapHead(SwapHeadMove),
    SwapTail(SwapTailMove),
}

impl Move {
    /// Attempt the move once. True means the path now holds the
    /// accepted configuration; false means it is unchanged.
    pub fn attempt<V: Potential, R: Rng>(&mut self, ctx: &mut MoveContext<V, R>) -> bool {
        match self {
            Move::CenterOfMass(m) => m.attempt(ctx),
            Move::Displace(m) => m.attempt(ctx),
            Move::Staging(m) => m.attempt(ctx),
            Move::Bisection(m) => m.attempt(ctx),
            Move::EndStaging(m) => m.attempt(ctx),
            Move::MidStaging(m) => m.attempt(ctx),
            Move::SwapBreak(m) => m.attempt(ctx),
            Move::Open(m) => m.attempt(ctx),
            Move::Close(m) => m.attempt(ctx),
            Move::CanonicalOpen(m) => m.attempt(ctx),
            Move::CanonicalClose(m) => m.attempt(ctx),
            Move::Insert(m) => m.attempt(ctx),
            Move::Remove(m) => m.attempt(ctx),
            Move::AdvanceHead(m) => m.attempt(ctx),
            Move::RecedeHead(m) => m.attempt(ctx),
            Move::AdvanceTail(m) => m.attempt(ctx),
            Move::RecedeTail(m) => m.attempt(ctx),
            Move::SwapHead(m) => m.attempt(ctx),
            Move::SwapTail(m) => m.attempt(ctx),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Move::CenterOfMass(_) => CenterOfMassMove::NAME,
            Move::Displace(_) => DisplaceMove::NAME,
            Move::Staging(_) => StagingMove::NAME,
            Move::Bisection(_) => BisectionMove::NAME,
            Move::EndStaging(_) => EndStagingMove::NAME,
            Move::MidStaging(_) => MidStagingMove::NAME,
            Move::SwapBreak(_) => SwapBreakMove::NAME,
            Move::Open(_) => OpenMove::NAME,
            Move::Close(_) => CloseMove::NAME,
            Move::CanonicalOpen(_) => CanonicalOpenMove::NAME,
            Move::CanonicalClose(_) => CanonicalCloseMove::NAME,
            Move::Insert(_) => InsertMove::NAME,
            Move::Remove(_) => RemoveMove::NAME,
            Move::AdvanceHead(_) => AdvanceHeadMove::NAME,
            Move::RecedeHead(_) => RecedeHeadMove::NAME,
            Move::AdvanceTail(_) => AdvanceTailMove::NAME,
            Move::RecedeTail(_) => RecedeTailMove::NAME,
            Move::SwapHead(_) => SwapHeadMove::NAME,
            Move::SwapTail(_) => SwapTailMove::NAME,
        }
    }

    pub fn state(&self) -> &MoveState {
        match self {
            Move::CenterOfMass(m) => &m.state,
            Move::Displace(m) => &m.state,
            Move::Staging(m) => &m.state,
            Move::Bisection(m) => &m.state,
            Move::EndStaging(m) => &m.state,
            Move::MidStaging(m) => &m.state,
            Move::SwapBreak(m) => &m.state,
            Move::Open(m) => &m.state,
            Move::Close(m) => &m.state,
            Move::CanonicalOpen(m) => &m.state,
            Move::CanonicalClose(m) => &m.state,
            Move::Insert(m) => &m.state,
            Move::Remove(m) => &m.state,
            Move::AdvanceHead(m) => &m.state,
            Move::RecedeHead(m) => &m.state,
            Move::AdvanceTail(m) => &m.state,
            Move::RecedeTail(m) => &m.state,
            Move::SwapHead(m) => &m.state,
            Move::SwapTail(m) => &m.state,
        }
    }

    pub fn ensemble(&self) -> Ensemble {
        self.state().ensemble
    }

    pub fn variable_length(&self) -> bool {
        self.state().variable_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensemble_gating_table() {
        assert!(Ensemble::Any.allows(true) && Ensemble::Any.allows(false));
        assert!(Ensemble::Diagonal.allows(true) && !Ensemble::Diagonal.allows(false));
        assert!(!Ensemble::OffDiagonal.allows(true) && Ensemble::OffDiagonal.allows(false));
    }

    #[test]
    fn statistics_ratio() {
        let mut stats = MoveStatistics::default();
        assert_eq!(stats.acceptance_ratio(), 0.0);
        stats.attempted = 4;
        stats.accepted = 1;
        assert_eq!(stats.acceptance_ratio(), 0.25);
        stats.reset();
        assert_eq!(stats.attempted, 0);
    }
}
