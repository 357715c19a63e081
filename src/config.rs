//! Simulation configuration loaded from a YAML file.

use std::path::Path as FsPath;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cell::Cell;
use crate::constants::SimulationConstants;

/// Errors raised while loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid parameter: {0}")]
    Invalid(String),
}

/// All user-facing simulation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    pub num_particles: usize,
    pub num_time_slices: usize,
    /// Imaginary-time step; β = tau · num_time_slices.
    pub tau: f64,
    /// Λ = ħ²/2m.
    pub lambda: f64,
    /// Cubic box side.
    pub box_side: f64,
    pub mu: f64,
    pub worm_constant: f64,
    pub mbar: usize,
    pub num_levels: usize,
    pub max_wind: i32,
    pub com_delta: f64,
    /// Fixed particle number: use the canonical open/close pair and
    /// drop Insert/Remove.
    pub canonical: bool,
    pub seed: u64,
    pub equilibration_sweeps: usize,
    pub production_sweeps: usize,
    /// Harmonic trap frequency; zero means free particles.
    pub omega: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            num_particles: 4,
            num_time_slices: 16,
            tau: 0.05,
            lambda: 0.5,
            box_side: 6.0,
            mu: 0.0,
            worm_constant: 1.0,
            mbar: 4,
            num_levels: 2,
            max_wind: 1,
            com_delta: 0.3,
            canonical: false,
            seed: 1984,
            equilibration_sweeps: 500,
            production_sweeps: 2000,
            omega: 0.0,
        }
    }
}

impl SimulationConfig {
    /// Read a YAML configuration file.
    pub fn from_yaml_file(path: &FsPath) -> Result<Self, ConfigError> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let config: SimulationConfig = serde_yaml::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_particles == 0 {
            return Err(ConfigError::Invalid("num_particles must be positive".into()));
        }
        if self.num_time_slices < 2 {
            return Err(ConfigError::Invalid("num_time_slices must be at least 2".into()));
        }
        if self.tau <= 0.0 || self.lambda <= 0.0 || self.box_side <= 0.0 {
            return Err(ConfigError::Invalid(
                "tau, lambda and box_side must be positive".into(),
            ));
        }
        if self.mbar < 1 {
            return Err(ConfigError::Invalid("mbar must be at least 1".into()));
        }
        if (1usize << self.num_levels) >= self.num_time_slices {
            return Err(ConfigError::Invalid(
                "2^num_levels must be smaller than num_time_slices".into(),
            ));
        }
        if self.max_wind < 0 {
            return Err(ConfigError::Invalid("max_wind must be non-negative".into()));
        }
        Ok(())
    }

    pub fn constants(&self) -> SimulationConstants {
        SimulationConstants {
            tau: self.tau,
            lambda: self.lambda,
            mu: self.mu,
            worm_constant: self.worm_constant,
            mbar: self.mbar,
            num_time_slices: self.num_time_slices,
            num_levels: self.num_levels,
            max_wind: self.max_wind,
            com_delta: self.com_delta,
        }
    }

    pub fn cell(&self) -> Cell {
        Cell::cube(self.box_side)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        SimulationConfig::default().validate().unwrap();
    }

    #[test]
    fn yaml_round_trip() {
        let yaml = "num_particles: 2\nnum_time_slices: 8\ntau: 0.1\nworm_constant: 0.25\n";
        let config: SimulationConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.num_particles, 2);
        assert_eq!(config.num_time_slices, 8);
        assert_eq!(config.worm_constant, 0.25);
        // untouched fields keep their defaults
        assert_eq!(config.mbar, SimulationConfig::default().mbar);
        config.validate().unwrap();
    }

    #[test]
    fn bad_levels_rejected() {
        let config = SimulationConfig {
            num_time_slices: 4,
            num_levels: 2,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
