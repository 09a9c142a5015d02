//! # simon-core
//!
//! Protocol core for the SIMON two-wire bus: a self-clocked serial link
//! between small nodes that share nothing but a CLOCK line and a DATA line.
//!
//! # Architecture overview
//!
//! A sender toggles CLOCK once per bit and puts the bit value on DATA.  The
//! receiver has no clock of its own; it watches both lines and treats every
//! edge as "a new bit is on the wire".  Two DATA pulses taken while CLOCK sits
//! HIGH mark the start and the end of a frame.
//!
//! - **`protocol`** – Constants, the two-byte checksum and the fixed-capacity
//!   frame buffer (`payload · checksum1 · checksum2 · address`).
//!
//! - **`line`** – The [`LineInterface`] trait the protocol runs on, plus two
//!   backends: a deterministic simulated bus and (feature `hal`) open-drain
//!   embedded-hal pins.
//!
//! - **`link`** – The bit-level transmitter and the edge-driven decoder,
//!   including the short accept/reject acknowledgment transfer.
//!
//! - **`session`** – [`SimonNode`], the engine that sends until acknowledged
//!   and receives until a valid frame addressed to it arrives.

pub mod error;
pub mod line;
pub mod link;
pub mod protocol;
pub mod session;

pub use error::{ConfigError, LinkError};
pub use line::{Direction, Level, Line, LineInterface};
pub use link::{DecodeOutcome, Timing};
pub use protocol::{
    checksum::Checksum, frame::FrameBuffer, ACCEPT_BYTE, DEFAULT_HALF_PERIOD_US,
    DEFAULT_PAYLOAD_CAPACITY, REJECT_BYTE, TRAILER_LEN,
};
pub use session::{NodeConfig, SessionStats, SimonNode};
