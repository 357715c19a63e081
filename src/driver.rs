//! Simulation driver: owns the move table, serializes attempts against
//! the path and reports acceptance statistics.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::action::PrimitiveAction;
use crate::cell::{Cell, DVec};
use crate::constants::SimulationConstants;
use crate::moves::{
    AdvanceHeadMove, AdvanceTailMove, BisectionMove, CanonicalCloseMove, CanonicalOpenMove,
    CenterOfMassMove, CloseMove, DisplaceMove, EndStagingMove, InsertMove, MidStagingMove, Move,
    MoveContext, MoveStatistics, OpenMove, RecedeHeadMove, RecedeTailMove, RemoveMove,
    StagingMove, SwapBreakMove, SwapHeadMove, SwapTailMove,
};
use crate::path::Path;
use crate::potential::Potential;

/// Particle positions on a simple cubic grid filling the cell.
pub fn lattice_positions(n: usize, cell: &Cell) -> Vec<DVec> {
    let per_side = (n as f64).powf(1.0 / 3.0).ceil().max(1.0) as usize;
    let spacing = DVec::new(
        cell.side.x / per_side as f64,
        cell.side.y / per_side as f64,
        cell.side.z / per_side as f64,
    );
    let mut positions = Vec::with_capacity(n);
    'fill: for i in 0..per_side {
        for j in 0..per_side {
            for k in 0..per_side {
                if positions.len() == n {
                    break 'fill;
                }
                positions.push(cell.box_put(DVec::new(
                    (i as f64 + 0.5) * spacing.x - 0.5 * cell.side.x,
                    (j as f64 + 0.5) * spacing.y - 0.5 * cell.side.y,
                    (k as f64 + 0.5) * spacing.z - 0.5 * cell.side.z,
                )));
            }
        }
    }
    positions
}

/// The full move table for one ensemble.
pub fn standard_moves(constants: SimulationConstants, canonical: bool) -> Vec<Move> {
    let mut moves = vec![
        Move::CenterOfMass(CenterOfMassMove::new(constants)),
        Move::Displace(DisplaceMove::new(constants)),
        Move::Staging(StagingMove::new(constants)),
        Move::Bisection(BisectionMove::new(constants)),
        Move::EndStaging(EndStagingMove::new(constants)),
        Move::MidStaging(MidStagingMove::new(constants)),
        Move::SwapBreak(SwapBreakMove::new(constants)),
        Move::AdvanceHead(AdvanceHeadMove::new(constants)),
        Move::RecedeHead(RecedeHeadMove::new(constants)),
        Move::AdvanceTail(AdvanceTailMove::new(constants)),
        Move::RecedeTail(RecedeTailMove::new(constants)),
        Move::SwapHead(SwapHeadMove::new(constants)),
        Move::SwapTail(SwapTailMove::new(constants)),
    ];
    if canonical {
        moves.push(Move::CanonicalOpen(CanonicalOpenMove::new(constants)));
        moves.push(Move::CanonicalClose(CanonicalCloseMove::new(constants)));
    } else {
        moves.push(Move::Open(OpenMove::new(constants)));
        moves.push(Move::Close(CloseMove::new(constants)));
        moves.push(Move::Insert(InsertMove::new(constants)));
        moves.push(Move::Remove(RemoveMove::new(constants)));
    }
    moves
}

/// One worm-algorithm simulation: path, action, moves and RNG.
pub struct WormSimulation<V: Potential> {
    pub path: Path,
    pub action: PrimitiveAction<V>,
    pub moves: Vec<Move>,
    pub totals: MoveStatistics,
    rng: StdRng,
    /// Sweeps spent in the off-diagonal sector, for sector diagnostics.
    pub off_diagonal_ticks: u64,
    pub total_ticks: u64,
}

impl<V: Potential> WormSimulation<V> {
    pub fn new(path: Path, potential: V, constants: SimulationConstants, canonical: bool, seed: u64) -> Self {
        Self {
            path,
            action: PrimitiveAction::new(constants, potential),
            moves: standard_moves(constants, canonical),
            totals: MoveStatistics::default(),
            rng: StdRng::seed_from_u64(seed),
            off_diagonal_ticks: 0,
            total_ticks: 0,
        }
    }

    /// Attempt one randomly selected move whose sector gate matches the
    /// current configuration.
    pub fn attempt_random_move(&mut self) -> bool {
        let diagonal = self.path.is_diagonal();
        let idx = loop {
            let i = self.rng.gen_range(0..self.moves.len());
            if self.moves[i].ensemble().allows(diagonal) {
                break i;
            }
        };
        let mv = &mut self.moves[idx];
        let mut ctx = MoveContext {
            path: &mut self.path,
            action: &self.action,
            rng: &mut self.rng,
            totals: &mut self.totals,
        };
        mv.attempt(&mut ctx)
    }

    /// One sweep: as many attempts as there are active beads.
    pub fn sweep(&mut self) {
        let attempts = self.path.num_active_beads().max(1);
        for _ in 0..attempts {
            self.attempt_random_move();
            self.total_ticks += 1;
            if !self.path.is_diagonal() {
                self.off_diagonal_ticks += 1;
            }
        }
    }

    /// Equilibration with periodic center-of-mass step adaptation
    /// toward ~50% acceptance.
    pub fn equilibrate(&mut self, sweeps: usize) {
        for s in 0..sweeps {
            self.sweep();
            if s % 50 == 49 {
                for mv in &mut self.moves {
                    if let Move::CenterOfMass(com) = mv {
                        com.adapt_delta(0.5);
                    }
                }
            }
        }
    }

    /// Fraction of attempts that found the off-diagonal sector.
    pub fn off_diagonal_fraction(&self) -> f64 {
        if self.total_ticks == 0 {
            0.0
        } else {
            self.off_diagonal_ticks as f64 / self.total_ticks as f64
        }
    }

    /// Per-move acceptance table.
    pub fn acceptance_report(&self) -> String {
        let mut out = String::from("move                 attempted   accepted   ratio\n");
        for mv in &self.moves {
            let st = mv.state();
            out.push_str(&format!(
                "{:<20} {:>9} {:>10} {:>7.4}\n",
                mv.name(),
                st.num_attempted,
                st.num_accepted,
                st.acceptance_ratio()
            ));
        }
        out.push_str(&format!(
            "{:<20} {:>9} {:>10} {:>7.4}\n",
            "total",
            self.totals.attempted,
            self.totals.accepted,
            self.totals.acceptance_ratio()
        ));
        out
    }
}
