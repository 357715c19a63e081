//! External potentials.
//!
//! The action evaluates a one-body potential at every active bead. The
//! trait seam keeps the move subsystem independent of the potential
//! form; interaction potentials would plug in at the same seam.

use crate::cell::DVec;

/// One-body external potential V(r).
pub trait Potential: Clone + Send + Sync {
    /// Evaluate the potential at position `r`.
    fn evaluate(&self, r: &DVec) -> f64;

    /// Name of the potential for display.
    fn name(&self) -> &'static str;
}

/// No external potential; the free Bose gas.
#[derive(Debug, Clone, Copy, Default)]
pub struct FreePotential;

impl Potential for FreePotential {
    fn evaluate(&self, _r: &DVec) -> f64 {
        0.0
    }

    fn name(&self) -> &'static str {
        "free"
    }
}

/// Isotropic harmonic well V(r) = ½ ω² |r|².
#[derive(Debug, Clone, Copy)]
pub struct HarmonicPotential {
    pub omega: f64,
}

impl Potential for HarmonicPotential {
    fn evaluate(&self, r: &DVec) -> f64 {
        0.5 * self.omega * self.omega * r.norm_squared()
    }

    fn name(&self) -> &'static str {
        "harmonic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn harmonic_value() {
        let v = HarmonicPotential { omega: 2.0 };
        let r = DVec::new(1.0, 0.0, 1.0);
        assert_relative_eq!(v.evaluate(&r), 4.0);
        assert_relative_eq!(FreePotential.evaluate(&r), 0.0);
    }
}
