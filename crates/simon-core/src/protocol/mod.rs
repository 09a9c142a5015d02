//! Wire constants, checksum and frame buffer.
//!
//! Frame layout on the wire, MSB first per byte:
//! ```text
//! [payload:0..capacity][checksum1:1][checksum2:1][destination:1]
//! ```

pub mod checksum;
pub mod frame;

pub use checksum::Checksum;
pub use frame::FrameBuffer;

/// Acknowledgment byte sent when a frame verified correctly (`0b0110_1101`).
pub const ACCEPT_BYTE: u8 = 0x6D;

/// Acknowledgment byte sent when the checksum did not match (`0b1010_1010`).
pub const REJECT_BYTE: u8 = 0xAA;

/// Number of bytes appended after the payload: two checksum bytes and the
/// destination address.
pub const TRAILER_LEN: usize = 3;

/// Default minimum half-period `T` in microseconds.
pub const DEFAULT_HALF_PERIOD_US: u32 = 50;

/// Default payload capacity in bytes.
pub const DEFAULT_PAYLOAD_CAPACITY: usize = 100;

/// Smallest usable half-period; below this the settle delay `T/3` is zero.
pub const MIN_HALF_PERIOD_US: u32 = 3;

/// Largest accepted half-period, in microseconds.
pub const MAX_HALF_PERIOD_US: u32 = 32_767;

/// Largest payload capacity: a whole frame, trailer included, is counted in
/// one byte.
pub const MAX_PAYLOAD_CAPACITY: usize = u8::MAX as usize - TRAILER_LEN;
