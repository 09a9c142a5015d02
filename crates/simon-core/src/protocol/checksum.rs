//! Two-byte running checksum carried at the tail of every frame.
//!
//! The recurrence resembles Fletcher-16 but folds the *already updated*
//! first sum into the second one:
//!
//! ```text
//! sum1 = (sum1 + byte) mod 255
//! sum2 = (sum1 + sum2) mod 255
//! ```
//!
//! Deployed nodes compute it exactly this way, so it must not be "fixed"
//! into the textbook algorithm.  Only payload bytes are summed; the checksum
//! bytes and the address byte never are.

use serde::{Deserialize, Serialize};

/// Modulus applied to both running sums.
const MODULUS: u16 = 255;

/// The `(sum1, sum2)` pair, each held in `0..=254`.
///
/// # Examples
///
/// ```rust
/// use simon_core::Checksum;
///
/// let checksum = Checksum::compute(b"PING");
/// assert_eq!(checksum, Checksum { sum1: 47, sum2: 1 });
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum {
    pub sum1: u8,
    pub sum2: u8,
}

impl Checksum {
    /// Computes the checksum over `payload`.
    pub fn compute(payload: &[u8]) -> Self {
        payload
            .iter()
            .fold(Self::default(), |checksum, &byte| checksum.update(byte))
    }

    /// Folds one more payload byte into the running sums.
    #[must_use]
    pub fn update(self, byte: u8) -> Self {
        let sum1 = (u16::from(self.sum1) + u16::from(byte)) % MODULUS;
        let sum2 = (sum1 + u16::from(self.sum2)) % MODULUS;
        Self {
            sum1: sum1 as u8,
            sum2: sum2 as u8,
        }
    }

    /// Returns the two bytes in wire order.
    pub fn to_bytes(self) -> [u8; 2] {
        [self.sum1, self.sum2]
    }

    /// Builds a checksum from the two bytes in wire order.
    pub fn from_bytes(bytes: [u8; 2]) -> Self {
        Self {
            sum1: bytes[0],
            sum2: bytes[1],
        }
    }
}
