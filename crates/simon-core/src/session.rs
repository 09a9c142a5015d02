//! Session engine: reliable delivery of one text message between two nodes.
//!
//! # Sender
//!
//! ```text
//! build frame ─► transmit ─► read ack ─┬─ ACCEPT ─► done
//!                   ▲                   │
//!                   └──── anything else ┘
//! ```
//!
//! # Receiver
//!
//! ```text
//! clear ─► decode ─┬─ runt / foreign address ─► (silently) decode again
//!                  ├─ checksum ok  ─► ACCEPT ─► return payload
//!                  └─ checksum bad ─► REJECT ─► decode again
//! ```
//!
//! There is no retry limit and no timeout.  The only way out of a blocked
//! `send` or `receive` is a failing line operation, which surfaces as
//! [`LinkError::Line`].

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::error::{ConfigError, LinkError};
use crate::line::{Direction, Line, LineInterface};
use crate::link::{
    receive_acknowledgment, receive_frame, transmit_acknowledgment, transmit_frame, DecodeOutcome,
    Timing,
};
use crate::protocol::frame::FrameBuffer;
use crate::protocol::{
    ACCEPT_BYTE, DEFAULT_HALF_PERIOD_US, DEFAULT_PAYLOAD_CAPACITY, MAX_HALF_PERIOD_US,
    MAX_PAYLOAD_CAPACITY, MIN_HALF_PERIOD_US, REJECT_BYTE,
};

// ── Configuration ─────────────────────────────────────────────────────────────

/// Construction parameters of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Own address; stamped on nothing, matched against inbound frames.
    pub address: u8,

    /// Half-period `T` in microseconds.  Both peers must agree on the order
    /// of magnitude; the receiver only relies on it for the settle delay.
    #[serde(default = "default_half_period_us")]
    pub half_period_us: u32,

    /// Largest payload in bytes.  Longer messages are truncated on send and
    /// cut off on receive.
    #[serde(default = "default_payload_capacity")]
    pub payload_capacity: usize,
}

fn default_half_period_us() -> u32 {
    DEFAULT_HALF_PERIOD_US
}

fn default_payload_capacity() -> usize {
    DEFAULT_PAYLOAD_CAPACITY
}

impl NodeConfig {
    /// Default timing and capacity for `address`.
    pub fn new(address: u8) -> Self {
        Self {
            address,
            half_period_us: DEFAULT_HALF_PERIOD_US,
            payload_capacity: DEFAULT_PAYLOAD_CAPACITY,
        }
    }

    /// # Errors
    ///
    /// - [`ConfigError::HalfPeriodTooShort`] when `T/3` would round to zero.
    /// - [`ConfigError::HalfPeriodTooLong`] above [`MAX_HALF_PERIOD_US`].
    /// - [`ConfigError::CapacityTooLarge`] above [`MAX_PAYLOAD_CAPACITY`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.half_period_us < MIN_HALF_PERIOD_US {
            return Err(ConfigError::HalfPeriodTooShort {
                min: MIN_HALF_PERIOD_US,
                actual: self.half_period_us,
            });
        }
        if self.half_period_us > MAX_HALF_PERIOD_US {
            return Err(ConfigError::HalfPeriodTooLong {
                max: MAX_HALF_PERIOD_US,
                actual: self.half_period_us,
            });
        }
        if self.payload_capacity > MAX_PAYLOAD_CAPACITY {
            return Err(ConfigError::CapacityTooLarge {
                max: MAX_PAYLOAD_CAPACITY,
                actual: self.payload_capacity,
            });
        }
        Ok(())
    }
}

// ── Statistics ────────────────────────────────────────────────────────────────

/// Counters kept by one node over its lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Frames put on the wire, retransmissions included.
    pub frames_transmitted: u64,
    pub retransmissions: u64,
    pub acks_accepted: u64,
    pub acks_rejected: u64,
    /// Receptions that ended in a stop condition, an overflow or a runt.
    pub frames_decoded: u64,
    pub frames_accepted: u64,
    pub frames_rejected: u64,
    /// Frames addressed to another node.
    pub frames_ignored: u64,
    pub overflows: u64,
    pub runts: u64,
}

// ── Engine ────────────────────────────────────────────────────────────────────

/// One bus participant: configuration, its frame buffer and its lines.
///
/// `send` and `receive` borrow the node mutably, so one node can never run
/// two transfers at once.  Two nodes sharing one physical bus must still be
/// coordinated by the caller.
#[derive(Debug)]
pub struct SimonNode<L> {
    config: NodeConfig,
    timing: Timing,
    frame: FrameBuffer,
    lines: Option<L>,
    stats: SessionStats,
}

impl<L: LineInterface> SimonNode<L> {
    /// Node with default timing and capacity.
    pub fn new(address: u8) -> Self {
        Self::from_valid(NodeConfig::new(address))
    }

    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation.
    pub fn with_config(config: NodeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_valid(config))
    }

    fn from_valid(config: NodeConfig) -> Self {
        Self {
            timing: Timing::new(config.half_period_us),
            frame: FrameBuffer::new(config.payload_capacity),
            lines: None,
            stats: SessionStats::default(),
            config,
        }
    }

    pub fn address(&self) -> u8 {
        self.config.address
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// The frame buffer as left by the last transfer.
    pub fn frame(&self) -> &FrameBuffer {
        &self.frame
    }

    pub fn lines(&self) -> Option<&L> {
        self.lines.as_ref()
    }

    pub fn is_bound(&self) -> bool {
        self.lines.is_some()
    }

    /// Takes ownership of the line pair and releases both lines.
    ///
    /// Binding is one-shot: once bound, later calls drop the offered lines
    /// untouched and return `Ok`.
    ///
    /// # Errors
    ///
    /// [`LinkError::Line`] if releasing the lines fails; the node stays
    /// unbound.
    pub fn bind(&mut self, mut lines: L) -> Result<(), LinkError<L::Error>> {
        if self.lines.is_some() {
            debug!(address = self.config.address, "already bound, ignoring new lines");
            return Ok(());
        }
        lines
            .critical_section(|l| {
                l.set_direction(Line::Clock, Direction::Input)?;
                l.set_direction(Line::Data, Direction::Input)
            })
            .map_err(LinkError::Line)?;
        self.lines = Some(lines);
        debug!(address = self.config.address, "bound to lines");
        Ok(())
    }

    /// Delivers `text` to `destination`, retransmitting until it is accepted.
    ///
    /// Text longer than the payload capacity is truncated.  Blocks until the
    /// receiver accepts; there is no retry limit.
    ///
    /// # Errors
    ///
    /// - [`LinkError::Unbound`] if [`bind`](Self::bind) was never called.
    /// - [`LinkError::Line`] on the first failing line operation.
    pub fn send(&mut self, destination: u8, text: &str) -> Result<(), LinkError<L::Error>> {
        let lines = self.lines.as_mut().ok_or(LinkError::Unbound)?;

        let payload_len = self.frame.build(text.as_bytes(), destination);
        if payload_len < text.len() {
            debug!(
                requested = text.len(),
                payload_len, "payload truncated to capacity"
            );
        }
        let frame = self.frame.frame_bytes(payload_len);

        let mut attempt: u64 = 0;
        loop {
            transmit_frame(lines, self.timing, frame).map_err(LinkError::Line)?;
            self.stats.frames_transmitted += 1;
            if attempt > 0 {
                self.stats.retransmissions += 1;
            }
            debug!(destination, payload_len, attempt, "frame transmitted");

            let ack = receive_acknowledgment(lines, self.timing).map_err(LinkError::Line)?;
            if ack == ACCEPT_BYTE {
                self.stats.acks_accepted += 1;
                info!(
                    from = self.config.address,
                    to = destination,
                    payload_len,
                    attempts = attempt + 1,
                    "message delivered"
                );
                return Ok(());
            }

            self.stats.acks_rejected += 1;
            warn!(
                destination,
                ack,
                attempt,
                "frame not accepted, retransmitting"
            );
            attempt += 1;
        }
    }

    /// Waits for a frame addressed to this node and returns its payload.
    ///
    /// Frames for other nodes and runts are skipped without a reply.  A frame
    /// with a bad checksum is answered with a rejection and reception starts
    /// over.
    ///
    /// # Errors
    ///
    /// - [`LinkError::Unbound`] if [`bind`](Self::bind) was never called.
    /// - [`LinkError::Line`] on the first failing line operation.
    pub fn receive(&mut self) -> Result<String, LinkError<L::Error>> {
        let lines = self.lines.as_mut().ok_or(LinkError::Unbound)?;
        let own = self.config.address;

        loop {
            self.frame.clear();
            let outcome =
                receive_frame(lines, self.timing, &mut self.frame).map_err(LinkError::Line)?;
            self.stats.frames_decoded += 1;

            let payload_len = match outcome {
                DecodeOutcome::Stopped { payload_len } => payload_len,
                DecodeOutcome::Overflow { payload_len } => {
                    self.stats.overflows += 1;
                    payload_len
                }
                DecodeOutcome::Runt { bytes } => {
                    self.stats.runts += 1;
                    debug!(bytes, "discarding runt frame");
                    continue;
                }
            };

            let address = self.frame.address(payload_len);
            if address != own {
                self.stats.frames_ignored += 1;
                trace!(own, address, "frame for another node");
                continue;
            }

            if self.frame.verify(payload_len) {
                transmit_acknowledgment(lines, self.timing, ACCEPT_BYTE)
                    .map_err(LinkError::Line)?;
                self.stats.frames_accepted += 1;
                debug!(own, payload_len, "frame accepted");
                return Ok(self.frame.payload(payload_len));
            }

            self.stats.frames_rejected += 1;
            warn!(
                own,
                computed = ?self.frame.checksum(payload_len),
                stored = ?self.frame.stored_checksum(payload_len),
                "checksum mismatch, requesting retransmission"
            );
            transmit_acknowledgment(lines, self.timing, REJECT_BYTE).map_err(LinkError::Line)?;
        }
    }
}
