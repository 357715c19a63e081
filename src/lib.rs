//! Worm-algorithm path integral Monte Carlo for continuous-space
//! bosons at finite temperature.
//!
//! The crate centers on the move subsystem: reversible
//! Metropolis-Hastings updates of a linked-bead worldline configuration
//! that switch the simulation between the diagonal (closed worldlines
//! only) and off-diagonal (one worm) sectors, extend or retract the
//! worm, resample segments with exact Lévy bridges, and mix particle
//! identities through swap moves.
//!
//! Reference: Boninsegni, Prokof'ev & Svistunov (2006) "Worm algorithm
//! for continuous-space path integral Monte Carlo simulations"
//! Phys. Rev. Lett. 96, 070601

pub mod action;
pub mod cell;
pub mod config;
pub mod constants;
pub mod driver;
pub mod moves;
pub mod path;
pub mod potential;


// Re-export commonly used types at crate root
pub use action::PrimitiveAction;
pub use cell::{Cell, DVec, IVec};
pub use config::{ConfigError, SimulationConfig};
pub use constants::SimulationConstants;
pub use driver::{lattice_positions, standard_moves, WormSimulation};
pub use moves::{Ensemble, Move, MoveContext, MoveState, MoveStatistics};
pub use path::{BeadLocator, Path, Worm};
pub use potential::{FreePotential, HarmonicPotential, Potential};
