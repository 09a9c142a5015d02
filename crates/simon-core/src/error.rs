//! Error types surfaced by the engine.
//!
//! Protocol-level trouble (truncation, checksum mismatch, foreign address,
//! rejected acknowledgment, buffer overrun) is handled inside the session
//! loops and never shows up here.  What does show up is a failing line
//! backend, which is also how an outside watchdog aborts a blocked transfer.

use std::fmt;

use thiserror::Error;

/// Failure of a `send` or `receive` call.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkError<E: fmt::Debug> {
    /// `send`/`receive` was called before `bind`.
    #[error("node is not bound to a clock/data line pair")]
    Unbound,

    /// The line backend reported an error (pin fault, bus closed, deadline).
    #[error("line access failed: {0:?}")]
    Line(E),
}

/// Invalid engine configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The half-period is too short to derive a non-zero settle delay.
    #[error("half period must be at least {min} µs, got {actual} µs")]
    HalfPeriodTooShort { min: u32, actual: u32 },

    #[error("half period must be at most {max} µs, got {actual} µs")]
    HalfPeriodTooLong { max: u32, actual: u32 },

    /// The frame would not fit the one-byte frame length.
    #[error("payload capacity must be at most {max} bytes, got {actual}")]
    CapacityTooLarge { max: usize, actual: usize },
}
