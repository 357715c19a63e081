//! Periodic simulation cell.
//!
//! Worldline beads live in a rectangular box with periodic boundary
//! conditions in every spatial direction. All positions handed to the
//! action or stored on the path are kept inside the primary image
//! `[-L/2, L/2)` per component; winding sectors are tracked separately
//! by the moves.

use nalgebra::Vector3;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Real-valued position or displacement vector.
pub type DVec = Vector3<f64>;
/// Integer winding / image vector.
pub type IVec = Vector3<i32>;

/// Rectangular periodic box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    /// Side lengths per spatial direction.
    pub side: DVec,
}

impl Cell {
    pub fn new(side: DVec) -> Self {
        assert!(side.iter().all(|&s| s > 0.0), "box sides must be positive");
        Self { side }
    }

    /// Cubic box of side `length`.
    pub fn cube(length: f64) -> Self {
        Self::new(Vector3::new(length, length, length))
    }

    /// Box volume.
    pub fn volume(&self) -> f64 {
        self.side.x * self.side.y * self.side.z
    }

    /// Reduce a position into the primary image `[-L/2, L/2)` per
    /// component.
    pub fn box_put(&self, r: DVec) -> DVec {
        let mut out = r;
        for i in 0..3 {
            out[i] -= self.side[i] * (out[i] / self.side[i]).round();
            // round() maps exactly +L/2 onto -L/2 only for the negative
            // half-integer; pin the boundary explicitly.
            if out[i] >= 0.5 * self.side[i] {
                out[i] -= self.side[i];
            }
        }
        out
    }

    /// Minimum-image separation `r2 - r1`.
    pub fn sep(&self, r1: &DVec, r2: &DVec) -> DVec {
        self.box_put(r2 - r1)
    }

    /// Uniform random point inside the primary image.
    pub fn random_position<R: Rng>(&self, rng: &mut R) -> DVec {
        DVec::new(
            (rng.gen::<f64>() - 0.5) * self.side.x,
            (rng.gen::<f64>() - 0.5) * self.side.y,
            (rng.gen::<f64>() - 0.5) * self.side.z,
        )
    }

    /// Displacement of the image copy `w` relative to the primary image.
    pub fn image_shift(&self, w: &IVec) -> DVec {
        DVec::new(
            w.x as f64 * self.side.x,
            w.y as f64 * self.side.y,
            w.z as f64 * self.side.z,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn box_put_reduces_into_primary_image() {
        let cell = Cell::cube(2.0);
        let r = cell.box_put(DVec::new(2.7, -3.1, 0.9));
        for i in 0..3 {
            assert!(r[i] >= -1.0 && r[i] < 1.0, "component {} = {}", i, r[i]);
        }
        assert_relative_eq!(r.x, 0.7, epsilon = 1e-12);
        assert_relative_eq!(r.y, 0.9, epsilon = 1e-12);
        assert_relative_eq!(r.z, 0.9, epsilon = 1e-12);
    }

    #[test]
    fn box_put_is_idempotent_on_boundary() {
        let cell = Cell::cube(2.0);
        let r = cell.box_put(DVec::new(1.0, -1.0, 0.0));
        assert!(r.x < 1.0);
        assert_relative_eq!(cell.box_put(r).x, r.x);
    }

    #[test]
    fn random_position_stays_inside() {
        let cell = Cell::new(DVec::new(1.0, 2.0, 3.0));
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let r = cell.random_position(&mut rng);
            for i in 0..3 {
                assert!(r[i].abs() <= 0.5 * cell.side[i]);
            }
        }
    }

    #[test]
    fn image_shift_scales_sides() {
        let cell = Cell::new(DVec::new(1.0, 2.0, 3.0));
        let shift = cell.image_shift(&IVec::new(1, -1, 2));
        assert_relative_eq!(shift.x, 1.0);
        assert_relative_eq!(shift.y, -2.0);
        assert_relative_eq!(shift.z, 6.0);
    }
}
