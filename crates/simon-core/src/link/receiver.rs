//! Edge-driven frame decoder and acknowledgment reader.
//!
//! The receiver has no clock of its own.  It synchronises on the start
//! condition, then treats every change of either line as "a new bit cell has
//! begun", waits `T/3` for the other line to follow and samples both.  That
//! makes it tolerant of any transmitter speed as long as every level is held
//! for at least `T`.

use tracing::{debug, trace, warn};

use super::{DecodeOutcome, Timing};
use crate::line::{Direction, Level, Line, LineInterface};
use crate::protocol::frame::FrameBuffer;
use crate::protocol::TRAILER_LEN;

/// Phase of one frame reception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// Lines not yet released or sampled.
    Idle,
    /// Waiting for DATA to fall at the start condition.
    AwaitingDataEdge,
    /// Waiting for the first CLOCK toggle, which carries bit 7 of byte 0.
    AwaitingClockEdge,
    /// Decoding one bit per line change.
    Decoding,
    /// Reception finished.
    Done(DecodeOutcome),
}

/// Previous and current samples of both lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EdgeSample {
    pub clock_prev: Level,
    pub data_prev: Level,
    pub clock_curr: Level,
    pub data_curr: Level,
}

impl EdgeSample {
    /// History seeded from one sample: previous equals current.
    pub fn seeded(clock: Level, data: Level) -> Self {
        Self {
            clock_prev: clock,
            data_prev: data,
            clock_curr: clock,
            data_curr: data,
        }
    }

    /// `true` once either line differs from its saved value.
    pub fn changed(&self) -> bool {
        self.clock_prev != self.clock_curr || self.data_prev != self.data_curr
    }

    /// DATA fell while CLOCK stayed HIGH.  Bit cells never produce this: the
    /// clock toggles on every bit and is parked HIGH only before the stop.
    pub fn is_stop(&self) -> bool {
        self.data_curr == Level::Low
            && self.data_prev == Level::High
            && self.clock_prev == Level::High
            && self.clock_curr == Level::High
    }

    /// Saves the current samples as the new previous ones.
    pub fn commit(&mut self) {
        self.clock_prev = self.clock_curr;
        self.data_prev = self.data_curr;
    }
}

/// Receives one frame into `frame`, which the caller should have cleared.
///
/// Blocks until a complete frame was seen; there is no timeout.  Bits that
/// would land past the end of the buffer are dropped.
///
/// # Errors
///
/// Returns the first error reported by the line backend.
pub fn receive_frame<L: LineInterface>(
    lines: &mut L,
    timing: Timing,
    frame: &mut FrameBuffer,
) -> Result<DecodeOutcome, L::Error> {
    FrameDecoder::new(frame).run(lines, timing)
}

/// Reads one acknowledgment byte: eight CLOCK toggles, DATA sampled at each.
///
/// # Errors
///
/// Returns the first error reported by the line backend.
pub fn receive_acknowledgment<L: LineInterface>(
    lines: &mut L,
    timing: Timing,
) -> Result<u8, L::Error> {
    release(lines)?;
    lines.delay_us(timing.settle())?;

    let mut clock_prev = lines.read_level(Line::Clock)?;
    let mut byte = 0u8;
    for bit in (0..8).rev() {
        let mut clock_curr = clock_prev;
        while clock_curr == clock_prev {
            clock_curr = lines.read_level(Line::Clock)?;
        }
        clock_prev = clock_curr;
        if lines.read_level(Line::Data)?.is_high() {
            byte |= 1 << bit;
        }
    }

    trace!(byte, "acknowledgment received");
    Ok(byte)
}

fn release<L: LineInterface>(lines: &mut L) -> Result<(), L::Error> {
    lines.critical_section(|l| {
        l.set_direction(Line::Data, Direction::Input)?;
        l.set_direction(Line::Clock, Direction::Input)
    })
}

struct FrameDecoder<'a> {
    frame: &'a mut FrameBuffer,
    state: DecoderState,
    sample: EdgeSample,
    byte_index: usize,
    bit_index: u8,
}

impl<'a> FrameDecoder<'a> {
    fn new(frame: &'a mut FrameBuffer) -> Self {
        Self {
            frame,
            state: DecoderState::Idle,
            sample: EdgeSample::default(),
            byte_index: 0,
            bit_index: 7,
        }
    }

    fn run<L: LineInterface>(mut self, lines: &mut L, timing: Timing) -> Result<DecodeOutcome, L::Error> {
        loop {
            let next = match self.state {
                DecoderState::Idle => {
                    release(lines)?;
                    lines.delay_us(timing.settle())?;
                    let clock = lines.read_level(Line::Clock)?;
                    let data = lines.read_level(Line::Data)?;
                    self.sample = EdgeSample::seeded(clock, data);
                    DecoderState::AwaitingDataEdge
                }
                DecoderState::AwaitingDataEdge => {
                    while self.sample.data_prev == self.sample.data_curr {
                        self.sample.clock_prev = lines.read_level(Line::Clock)?;
                        self.sample.data_prev = lines.read_level(Line::Data)?;
                    }
                    DecoderState::AwaitingClockEdge
                }
                DecoderState::AwaitingClockEdge => {
                    while self.sample.clock_prev == self.sample.clock_curr {
                        self.sample.clock_curr = lines.read_level(Line::Clock)?;
                    }
                    DecoderState::Decoding
                }
                DecoderState::Decoding => self.decode_bit(lines, timing)?,
                DecoderState::Done(outcome) => return Ok(outcome),
            };
            trace!(from = ?self.state, to = ?next, "decoder transition");
            self.state = next;
        }
    }

    fn decode_bit<L: LineInterface>(&mut self, lines: &mut L, timing: Timing) -> Result<DecoderState, L::Error> {
        while !self.sample.changed() {
            self.sample.clock_curr = lines.read_level(Line::Clock)?;
            self.sample.data_curr = lines.read_level(Line::Data)?;
        }

        lines.delay_us(timing.settle())?;
        self.sample.clock_curr = lines.read_level(Line::Clock)?;
        self.sample.data_curr = lines.read_level(Line::Data)?;

        if self.sample.is_stop() {
            return Ok(DecoderState::Done(self.stopped()));
        }

        self.sample.commit();
        self.store_bit(self.sample.data_prev);

        if self.bit_index > 0 {
            self.bit_index -= 1;
            return Ok(DecoderState::Decoding);
        }

        self.bit_index = 7;
        self.byte_index += 1;
        if self.byte_index > self.frame.frame_capacity() {
            let payload_len = self.frame.capacity();
            warn!(payload_len, "frame overran the receive buffer, cutting off");
            return Ok(DecoderState::Done(DecodeOutcome::Overflow { payload_len }));
        }
        Ok(DecoderState::Decoding)
    }

    fn stopped(&self) -> DecodeOutcome {
        if self.byte_index < TRAILER_LEN {
            debug!(bytes = self.byte_index, "runt frame");
            return DecodeOutcome::Runt {
                bytes: self.byte_index,
            };
        }
        let payload_len = self.byte_index - TRAILER_LEN;
        debug!(payload_len, "frame decoded");
        DecodeOutcome::Stopped { payload_len }
    }

    fn store_bit(&mut self, level: Level) {
        let mask = 1u8 << self.bit_index;
        if let Some(byte) = self.frame.as_bytes_mut().get_mut(self.byte_index) {
            if level.is_high() {
                *byte |= mask;
            } else {
                *byte &= !mask;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::testing::{Playback, Recorder};
    use crate::link::transmitter::{transmit_acknowledgment, transmit_frame};
    use crate::protocol::{ACCEPT_BYTE, REJECT_BYTE};

    const T: u32 = 50;

    fn recorded_frame(bytes: &[u8]) -> Playback {
        let mut recorder = Recorder::default();
        transmit_frame(&mut recorder, Timing::new(T), bytes).unwrap();
        recorder.into_playback()
    }

    #[test]
    fn test_seeded_sample_is_unchanged() {
        let sample = EdgeSample::seeded(Level::High, Level::Low);
        assert!(!sample.changed());
        assert!(!sample.is_stop());
    }

    #[test]
    fn test_stop_requires_clock_high_on_both_samples() {
        // Arrange
        let stop = EdgeSample {
            clock_prev: Level::High,
            data_prev: Level::High,
            clock_curr: Level::High,
            data_curr: Level::Low,
        };

        // Act / Assert
        assert!(stop.is_stop());
        assert!(!EdgeSample { clock_curr: Level::Low, ..stop }.is_stop());
        assert!(!EdgeSample { clock_prev: Level::Low, ..stop }.is_stop());
        assert!(!EdgeSample { data_prev: Level::Low, ..stop }.is_stop());
        assert!(!EdgeSample { data_curr: Level::High, ..stop }.is_stop());
    }

    #[test]
    fn test_commit_moves_current_to_previous() {
        let mut sample = EdgeSample::seeded(Level::High, Level::High);
        sample.clock_curr = Level::Low;
        assert!(sample.changed());
        sample.commit();
        assert!(!sample.changed());
        assert_eq!(sample.clock_prev, Level::Low);
    }

    #[test]
    fn test_decodes_recorded_frame() {
        // Arrange
        let mut sent = FrameBuffer::new(100);
        let len = sent.build(b"PING", 9);
        let mut lines = recorded_frame(sent.frame_bytes(len));
        let mut received = FrameBuffer::new(100);

        // Act
        let outcome = receive_frame(&mut lines, Timing::new(T), &mut received).unwrap();

        // Assert
        assert_eq!(outcome, DecodeOutcome::Stopped { payload_len: 4 });
        assert_eq!(received.frame_bytes(4), sent.frame_bytes(len));
        assert!(received.verify(4));
        assert_eq!(received.address(4), 9);
    }

    #[test]
    fn test_trailing_data_release_is_not_counted_as_a_byte() {
        // Arrange – address 8 ends in a 0 bit, so DATA rises again at the park
        let mut sent = FrameBuffer::new(16);
        let len = sent.build(b"A", 8);
        let mut lines = recorded_frame(sent.frame_bytes(len));
        let mut received = FrameBuffer::new(16);

        // Act
        let outcome = receive_frame(&mut lines, Timing::new(T), &mut received).unwrap();

        // Assert – the extra bit lands in the first unused slot only
        assert_eq!(outcome, DecodeOutcome::Stopped { payload_len: 1 });
        assert_eq!(received.frame_bytes(1), sent.frame_bytes(len));
        assert_eq!(received.as_bytes()[len + TRAILER_LEN], 0x80);
    }

    #[test]
    fn test_empty_payload_frame() {
        let mut sent = FrameBuffer::new(8);
        let len = sent.build(b"", 3);
        let mut lines = recorded_frame(sent.frame_bytes(len));
        let mut received = FrameBuffer::new(8);

        let outcome = receive_frame(&mut lines, Timing::new(T), &mut received).unwrap();

        assert_eq!(outcome, DecodeOutcome::Stopped { payload_len: 0 });
        assert_eq!(received.address(0), 3);
    }

    #[test]
    fn test_tolerates_data_lagging_clock() {
        // Arrange – DATA changes 10 µs after CLOCK, within the T/3 settle
        let mut sent = FrameBuffer::new(32);
        let len = sent.build(b"skewed", 77);
        let mut lines = recorded_frame(sent.frame_bytes(len)).skew(Line::Data, 10);
        let mut received = FrameBuffer::new(32);

        // Act
        let outcome = receive_frame(&mut lines, Timing::new(T), &mut received).unwrap();

        // Assert
        assert_eq!(outcome, DecodeOutcome::Stopped { payload_len: len });
        assert_eq!(received.payload(len), "skewed");
    }

    #[test]
    fn test_tolerates_clock_lagging_data() {
        let mut sent = FrameBuffer::new(32);
        let len = sent.build(b"skewed", 77);
        let mut lines = recorded_frame(sent.frame_bytes(len)).skew(Line::Clock, 10);
        let mut received = FrameBuffer::new(32);

        let outcome = receive_frame(&mut lines, Timing::new(T), &mut received).unwrap();

        assert_eq!(outcome, DecodeOutcome::Stopped { payload_len: len });
        assert!(received.verify(len));
    }

    #[test]
    fn test_oversized_frame_is_cut_off_at_capacity() {
        // Arrange – 10 byte payload into a 4 byte buffer
        let mut sent = FrameBuffer::new(10);
        let len = sent.build(b"0123456789", 1);
        let mut lines = recorded_frame(sent.frame_bytes(len));
        let mut received = FrameBuffer::new(4);

        // Act
        let outcome = receive_frame(&mut lines, Timing::new(T), &mut received).unwrap();

        // Assert
        assert_eq!(outcome, DecodeOutcome::Overflow { payload_len: 4 });
        assert_eq!(received.as_bytes(), &sent.frame_bytes(len)[..7]);
    }

    #[test]
    fn test_short_frame_is_a_runt() {
        let mut lines = recorded_frame(&[0x12, 0x34]);
        let mut received = FrameBuffer::new(8);

        let outcome = receive_frame(&mut lines, Timing::new(T), &mut received).unwrap();

        assert_eq!(outcome, DecodeOutcome::Runt { bytes: 2 });
    }

    #[test]
    fn test_silent_bus_surfaces_line_error() {
        let mut lines = Playback::new(Vec::new());
        let mut received = FrameBuffer::new(8);

        let result = receive_frame(&mut lines, Timing::new(T), &mut received);

        assert_eq!(result, Err("waveform exhausted"));
    }

    #[test]
    fn test_reads_recorded_acknowledgments() {
        for byte in [ACCEPT_BYTE, REJECT_BYTE, 0x00, 0xFF] {
            // Arrange
            let mut recorder = Recorder::default();
            transmit_acknowledgment(&mut recorder, Timing::new(T), byte).unwrap();
            let mut lines = recorder.into_playback();

            // Act
            let received = receive_acknowledgment(&mut lines, Timing::new(T)).unwrap();

            // Assert
            assert_eq!(received, byte);
        }
    }
}
