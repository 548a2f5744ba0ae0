//! Character n-gram similarity.

use core::cmp::Ordering;

use crate::error::{MatchError, Result};

/// Boundary marker used to pad labels so short labels still produce n-grams.
const BOUNDARY: char = '\0';

/// Dice coefficient over the n-gram multisets of two labels.
///
/// Labels are padded with `n - 1` boundary markers on both sides and cut to
/// their leading `window` characters. With `n = 3` this is the q-gram distance
/// similarity `1 - L1(qa, qb) / (|qa| + |qb|)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NGramCalculator {
    n: usize,
    window: usize,
}

impl Default for NGramCalculator {
    fn default() -> Self {
        Self { n: 2, window: 256 }
    }
}

impl NGramCalculator {
    /// A calculator over `n`-grams with the default window.
    pub fn new(n: usize) -> Result<Self> {
        if n == 0 {
            return Err(MatchError::Configuration("n-gram size must be at least 1".into()));
        }
        Ok(Self {
            n,
            ..Self::default()
        })
    }

    /// Trigrams, the ChangeDistiller leaf metric.
    pub fn trigrams() -> Self {
        Self { n: 3, window: 256 }
    }

    /// Only compare the first `window` characters of each label.
    pub fn with_window(self, window: usize) -> Result<Self> {
        if window == 0 {
            return Err(MatchError::Configuration("n-gram window must be at least 1".into()));
        }
        Ok(Self { window, ..self })
    }

    /// The gram size.
    pub fn n(&self) -> usize {
        self.n
    }

    fn padded(&self, label: &str) -> Vec<char> {
        let pad = self.n - 1;
        let mut chars = Vec::with_capacity(label.len().min(self.window) + 2 * pad);
        chars.extend(core::iter::repeat_n(BOUNDARY, pad));
        chars.extend(label.chars().take(self.window));
        chars.extend(core::iter::repeat_n(BOUNDARY, pad));
        chars
    }

    /// Similarity in `[0, 1]`; identical labels give exactly 1.0.
    pub fn similarity(&self, a: &str, b: &str) -> f64 {
        if a == b {
            return 1.0;
        }
        let pa = self.padded(a);
        let pb = self.padded(b);
        let mut ga: Vec<&[char]> = pa.windows(self.n).collect();
        let mut gb: Vec<&[char]> = pb.windows(self.n).collect();
        let total = ga.len() + gb.len();
        if total == 0 {
            return 1.0;
        }
        ga.sort_unstable();
        gb.sort_unstable();

        let (mut i, mut j, mut common) = (0, 0, 0);
        while i < ga.len() && j < gb.len() {
            match ga[i].cmp(gb[j]) {
                Ordering::Less => i += 1,
                Ordering::Greater => j += 1,
                Ordering::Equal => {
                    common += 1;
                    i += 1;
                    j += 1;
                }
            }
        }
        2.0 * common as f64 / total as f64
    }
}
