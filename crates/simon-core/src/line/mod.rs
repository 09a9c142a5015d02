//! Line access abstraction for the two bus wires.
//!
//! The protocol never touches hardware directly.  Everything it needs from
//! the outside world goes through [`LineInterface`]: switching a line between
//! input and output, driving or sampling its level, busy-waiting for a number
//! of microseconds and grouping several updates into one critical section.
//!
//! # Backends
//!
//! - [`sim`] – a deterministic, virtual-time bus for tests and host tools.
//! - `hal` (feature `hal`) – open-drain pins from any embedded-hal 1.0 HAL.

use std::fmt;
use std::ops::Not;

pub mod sim;

#[cfg(feature = "hal")]
pub mod hal;

/// One of the two bus wires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Line {
    /// Toggled once per transmitted bit; the receiver's timing reference.
    Clock,
    /// Carries the bit value while CLOCK changes phase.
    Data,
}

/// Logical level of a line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Level {
    Low,
    /// Idle level; the bus is pulled up when nobody drives it.
    #[default]
    High,
}

impl Level {
    /// Level carrying bit value `bit`.
    pub fn from_bit(bit: bool) -> Self {
        if bit {
            Level::High
        } else {
            Level::Low
        }
    }

    pub fn is_high(self) -> bool {
        self == Level::High
    }

    pub fn is_low(self) -> bool {
        self == Level::Low
    }
}

impl Not for Level {
    type Output = Level;

    fn not(self) -> Level {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

impl From<bool> for Level {
    fn from(bit: bool) -> Self {
        Level::from_bit(bit)
    }
}

/// Direction of a line as seen from this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Released: the node only samples the line.
    Input,
    /// Driven by this node.
    Output,
}

/// Access to the CLOCK and DATA lines of one node.
///
/// Every method is fallible so that backends with fallible pins can report
/// faults, and so that a supervising watchdog can make a blocked transfer
/// return by failing the next line operation.
pub trait LineInterface {
    /// Backend-specific failure.
    type Error: fmt::Debug;

    /// Switches `line` to input (released) or output (driven).
    fn set_direction(&mut self, line: Line, direction: Direction) -> Result<(), Self::Error>;

    /// Drives `line` to `level`.  Only meaningful while the line is an output.
    fn write_level(&mut self, line: Line, level: Level) -> Result<(), Self::Error>;

    /// Samples the current level of `line`.
    fn read_level(&mut self, line: Line) -> Result<Level, Self::Error>;

    /// Busy-waits for `us` microseconds.
    fn delay_us(&mut self, us: u32) -> Result<(), Self::Error>;

    /// Runs `f` so that every line update inside it becomes visible to the
    /// peer at once.
    ///
    /// The default runs `f` directly, which is correct for backends whose
    /// individual updates cannot be interleaved with anything else.
    fn critical_section<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R
    where
        Self: Sized,
    {
        f(self)
    }
}
