//! HyperLogLog cardinality estimator.
//!
//! `m = 2^p` registers, each holding the longest run observed in the hashes
//! routed to it. Elements are hashed with 64-bit xxHash; the low `p` bits pick
//! the register and the remaining `64 - p` bits supply `rho`, the 1-based
//! position of their leftmost set bit.
//!
//! ```text
//!  63                                p p-1            0
//! ┌──────────────────────────────────┬────────────────┐
//! │      w = hash >> p  (rho)        │  register idx  │
//! └──────────────────────────────────┴────────────────┘
//! ```
//!
//! The estimate is the bias-corrected harmonic mean of `2^-register`, with
//! linear counting for small cardinalities and the negative-log correction
//! near the 32-bit ceiling. With `p = 14` the standard error is about 0.81%.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::xxh64;

/// Precision used by the engine.
pub const HLL_P: u8 = 14;

const TWO_POW_32: f64 = 4_294_967_296.0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HyperLogLog {
    p: u8,
    registers: Vec<u8>,
}

impl Default for HyperLogLog {
    fn default() -> Self {
        Self::new()
    }
}

fn alpha(m: usize) -> f64 {
    match m {
        16 => 0.673,
        32 => 0.697,
        64 => 0.709,
        _ => 0.7213 / (1.0 + 1.079 / m as f64),
    }
}

impl HyperLogLog {
    pub fn new() -> Self {
        Self::with_precision(HLL_P)
    }

    /// Creates an estimator with `2^p` registers; `p` is clamped to `4..=18`.
    pub fn with_precision(p: u8) -> Self {
        let p = p.clamp(4, 18);
        Self {
            p,
            registers: vec![0; 1 << p],
        }
    }

    pub fn precision(&self) -> u8 {
        self.p
    }

    pub fn registers(&self) -> &[u8] {
        &self.registers
    }

    /// Register index and rho for an element.
    fn position(&self, element: &[u8]) -> (usize, u8) {
        let hash = xxh64(element, 0);
        let p = self.p as u32;
        let index = (hash & ((1u64 << p) - 1)) as usize;
        let w = hash >> p;

        // w has 64 - p significant bits; an all-zero remainder gets the
        // largest representable run.
        let rho = if w == 0 {
            64 - p + 1
        } else {
            w.leading_zeros() - p + 1
        };
        (index, rho as u8)
    }

    /// Adds an element.
    ///
    /// # Returns
    ///
    /// `true` if a register increased (the estimate may have changed).
    pub fn add(&mut self, element: &[u8]) -> bool {
        let (index, rho) = self.position(element);
        if rho > self.registers[index] {
            self.registers[index] = rho;
            true
        } else {
            false
        }
    }

    /// Current cardinality estimate.
    pub fn count(&self) -> u64 {
        let m = self.registers.len() as f64;
        let mut sum = 0.0;
        let mut zeros = 0usize;
        for &r in &self.registers {
            sum += 1.0 / (1u64 << r) as f64;
            if r == 0 {
                zeros += 1;
            }
        }

        let raw = alpha(self.registers.len()) * m * m / sum;

        let estimate = if raw <= 2.5 * m && zeros > 0 {
            m * (m / zeros as f64).ln()
        } else if raw > TWO_POW_32 / 30.0 {
            -TWO_POW_32 * (1.0 - raw / TWO_POW_32).ln()
        } else {
            raw
        };

        estimate.round() as u64
    }

    /// Folds `other` into `self` by register-wise maximum.
    pub fn merge(&mut self, other: &HyperLogLog) -> Result<()> {
        if self.registers.len() != other.registers.len() {
            return Err(EngineError::OutOfRange(
                "cannot merge estimators with different register counts".to_string(),
            ));
        }
        for (mine, theirs) in self.registers.iter_mut().zip(&other.registers) {
            if *theirs > *mine {
                *mine = *theirs;
            }
        }
        Ok(())
    }

    pub(crate) fn approx_size(&self) -> usize {
        self.registers.len()
    }
}
