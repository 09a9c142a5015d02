//! Bit-level link layer: the clocked transmitter and the edge-driven decoder.
//!
//! Both directions share one timing model.  `T` is the half-period: the
//! minimum time the transmitter holds any line level.  The receiver never
//! measures time; it reacts to edges and only waits `T/3` after each one so
//! that CLOCK and DATA changes from the same bit have settled.
//!
//! ```text
//!          start      bit 7   bit 6   ...   bit 0   park    stop
//! CLOCK ───────────┐       ┌───────┐     ...        ┌─────────────────
//!                  └───────┘       └───   ...  ─────┘
//! DATA  ───┐   ┌───X═══════X═══════X═══   ...  ═════╤───────┐   ┌─────
//!          └───┘                                            └───┘
//! ```

pub mod receiver;
pub mod transmitter;

pub use receiver::{receive_acknowledgment, receive_frame, DecoderState, EdgeSample};
pub use transmitter::{transmit_acknowledgment, transmit_frame};

use serde::{Deserialize, Serialize};

use crate::protocol::DEFAULT_HALF_PERIOD_US;

/// Delays derived from the half-period `T`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    pub half_period_us: u32,
}

impl Timing {
    pub fn new(half_period_us: u32) -> Self {
        Self { half_period_us }
    }

    /// `T`: hold time of every level the transmitter sets.
    pub fn half_period(&self) -> u32 {
        self.half_period_us
    }

    /// `T/3`: wait after an edge before sampling both lines.
    pub fn settle(&self) -> u32 {
        self.half_period_us / 3
    }

    /// `2T`: lead-in before an acknowledgment byte, long enough for the
    /// original sender to turn its lines around.
    pub fn ack_lead(&self) -> u32 {
        self.half_period_us.saturating_mul(2)
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self::new(DEFAULT_HALF_PERIOD_US)
    }
}

/// How one frame reception ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DecodeOutcome {
    /// A stop condition ended the frame.
    Stopped { payload_len: usize },
    /// The frame filled the buffer and was cut off there.
    Overflow { payload_len: usize },
    /// Fewer bytes than the trailer needs arrived before the stop.
    Runt { bytes: usize },
}

impl DecodeOutcome {
    /// Payload length to verify and extract, or `None` for a runt.
    ///
    /// An overflow is handled exactly like a regular stop.
    pub fn payload_len(&self) -> Option<usize> {
        match *self {
            DecodeOutcome::Stopped { payload_len } | DecodeOutcome::Overflow { payload_len } => {
                Some(payload_len)
            }
            DecodeOutcome::Runt { .. } => None,
        }
    }
}
