//! Read-only simulation constants shared by every move.

use serde::{Deserialize, Serialize};

/// Physical and algorithmic constants of a single simulation.
///
/// Constructed once by the setup layer and handed to the moves by value;
/// moves never mutate it. `lambda` is ħ²/2m in the working units, `tau`
/// the imaginary-time step so that β = `tau · num_time_slices`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SimulationConstants {
    /// Imaginary-time step τ.
    pub tau: f64,
    /// Λ = ħ²/2m.
    pub lambda: f64,
    /// Chemical potential μ.
    pub mu: f64,
    /// Worm constant C controlling the diagonal/off-diagonal ratio.
    pub worm_constant: f64,
    /// Mean proposed worm update length; variable-length moves draw from
    /// `[1, 2·mbar)`.
    pub mbar: usize,
    /// Number of imaginary-time slices M.
    pub num_time_slices: usize,
    /// Bisection / swap levels; the staged segment spans 2^num_levels
    /// slices.
    pub num_levels: usize,
    /// Largest winding image considered per spatial direction.
    pub max_wind: i32,
    /// Half-width of the uniform center-of-mass displacement.
    pub com_delta: f64,
}

impl SimulationConstants {
    /// Inverse temperature β = M·τ.
    pub fn beta(&self) -> f64 {
        self.tau * self.num_time_slices as f64
    }

    /// Width of a single free-particle imaginary-time step.
    pub fn sqrt_2_lambda_tau(&self) -> f64 {
        (2.0 * self.lambda * self.tau).sqrt()
    }

    pub fn sqrt_lambda_tau(&self) -> f64 {
        (self.lambda * self.tau).sqrt()
    }

    /// Number of winding images per tower-sampling pass,
    /// (2·max_wind + 1)^NDIM.
    pub fn num_wind(&self) -> usize {
        let w = (2 * self.max_wind + 1) as usize;
        w * w * w
    }

    /// Exclusive upper bound for variable move lengths.
    pub fn max_worm_length(&self) -> usize {
        2 * self.mbar
    }
}

impl Default for SimulationConstants {
    fn default() -> Self {
        Self {
            tau: 0.05,
            lambda: 0.5,
            mu: 0.0,
            worm_constant: 1.0,
            mbar: 4,
            num_time_slices: 16,
            num_levels: 2,
            max_wind: 1,
            com_delta: 0.3,
        }
    }
}
