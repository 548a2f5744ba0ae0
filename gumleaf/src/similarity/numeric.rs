//! Gaussian similarity of numeric literals.

use crate::debug;
use crate::error::{MatchError, Result};

/// `exp(-d^2 / (2 sigma^2))` where `d = |a - b| / max(|a|, |b|)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianSimilarity {
    sigma: f64,
}

impl Default for GaussianSimilarity {
    fn default() -> Self {
        Self { sigma: 1.0 }
    }
}

impl GaussianSimilarity {
    /// A measure with the given spread.
    pub fn new(sigma: f64) -> Result<Self> {
        if !(sigma > 0.0 && sigma.is_finite()) {
            return Err(MatchError::Configuration(format!(
                "gaussian sigma must be positive and finite, got {sigma}"
            )));
        }
        Ok(Self { sigma })
    }

    /// Similarity of two numbers; equal numbers give 1.0.
    pub fn similarity(&self, a: f64, b: f64) -> f64 {
        if a == b {
            return 1.0;
        }
        if !a.is_finite() || !b.is_finite() {
            return 0.0;
        }
        let d = (a - b).abs() / a.abs().max(b.abs());
        (-(d * d) / (2.0 * self.sigma * self.sigma)).exp()
    }

    /// Compare two labels as real numbers. Unparsable labels give 0.0.
    pub fn compare_reals(&self, a: &str, b: &str) -> f64 {
        match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
            (Ok(x), Ok(y)) => self.similarity(x, y),
            _ => {
                debug!(a, b, "real comparison on non-numeric labels");
                0.0
            }
        }
    }

    /// Compare two labels as integers, falling back to real parsing (and then
    /// to 0.0) when either label is not an integer.
    pub fn compare_integers(&self, a: &str, b: &str) -> f64 {
        match (a.trim().parse::<i128>(), b.trim().parse::<i128>()) {
            (Ok(x), Ok(y)) if x == y => 1.0,
            (Ok(x), Ok(y)) => self.similarity(x as f64, y as f64),
            _ => self.compare_reals(a, b),
        }
    }
}
