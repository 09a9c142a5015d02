//! Clocked bit transmitter.
//!
//! The transmitter owns the bus for the whole frame: it drives both lines,
//! toggles CLOCK once per bit and holds every level for `T`.  Each CLOCK/DATA
//! pair is updated inside one critical section so the receiver never samples
//! a half-applied bit.

use tracing::trace;

use super::Timing;
use crate::line::{Direction, Level, Line, LineInterface};

/// Sends `frame` (payload plus trailer) wrapped in start and stop conditions.
///
/// Sequence:
/// 1. both lines output HIGH, hold `T`;
/// 2. start: DATA LOW for `T`, DATA HIGH for `T`;
/// 3. every bit MSB first: DATA = bit, CLOCK = alternating phase starting
///    LOW, hold `T`;
/// 4. park: DATA HIGH and CLOCK HIGH, hold `T`;
/// 5. stop: DATA LOW for `T`, then DATA HIGH.
///
/// The lines are left driven HIGH.
///
/// # Errors
///
/// Returns the first error reported by the line backend.
pub fn transmit_frame<L: LineInterface>(
    lines: &mut L,
    timing: Timing,
    frame: &[u8],
) -> Result<(), L::Error> {
    let t = timing.half_period();
    trace!(bytes = frame.len(), "transmitting frame");

    drive_idle(lines)?;
    lines.delay_us(t)?;

    // Start condition.
    lines.write_level(Line::Data, Level::Low)?;
    lines.delay_us(t)?;
    lines.write_level(Line::Data, Level::High)?;
    lines.delay_us(t)?;

    send_bits(lines, t, frame)?;

    // Park CLOCK high so the stop condition is unambiguous.
    lines.critical_section(|l| {
        l.write_level(Line::Data, Level::High)?;
        l.write_level(Line::Clock, Level::High)
    })?;
    lines.delay_us(t)?;

    // Stop condition.
    lines.write_level(Line::Data, Level::Low)?;
    lines.delay_us(t)?;
    lines.write_level(Line::Data, Level::High)
}

/// Sends one acknowledgment byte: a `2T` lead-in with both lines HIGH, then
/// eight clocked bits MSB first.  No start or stop condition is sent.
///
/// # Errors
///
/// Returns the first error reported by the line backend.
pub fn transmit_acknowledgment<L: LineInterface>(
    lines: &mut L,
    timing: Timing,
    byte: u8,
) -> Result<(), L::Error> {
    trace!(byte, "transmitting acknowledgment");

    drive_idle(lines)?;
    lines.delay_us(timing.ack_lead())?;

    send_bits(lines, timing.half_period(), &[byte])?;

    lines.critical_section(|l| {
        l.write_level(Line::Data, Level::High)?;
        l.write_level(Line::Clock, Level::High)
    })
}

fn drive_idle<L: LineInterface>(lines: &mut L) -> Result<(), L::Error> {
    lines.critical_section(|l| {
        l.set_direction(Line::Data, Direction::Output)?;
        l.write_level(Line::Data, Level::High)?;
        l.set_direction(Line::Clock, Direction::Output)?;
        l.write_level(Line::Clock, Level::High)
    })
}

fn send_bits<L: LineInterface>(lines: &mut L, t: u32, bytes: &[u8]) -> Result<(), L::Error> {
    let mut phase = Level::Low;
    for &byte in bytes {
        for bit in (0..8).rev() {
            let data = Level::from_bit((byte >> bit) & 1 == 1);
            let clock = phase;
            lines.critical_section(|l| {
                l.write_level(Line::Data, data)?;
                l.write_level(Line::Clock, clock)
            })?;
            lines.delay_us(t)?;
            phase = !phase;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::testing::{Event, Recorder};

    const T: u32 = 50;

    fn timing() -> Timing {
        Timing::new(T)
    }

    #[test]
    fn test_frame_total_duration() {
        // Arrange
        let mut lines = Recorder::default();

        // Act – lead, start low, start high, 16 bits, park, stop low
        transmit_frame(&mut lines, timing(), &[0x00, 0xFF]).unwrap();

        // Assert
        assert_eq!(lines.now, u64::from(T) * (1 + 2 + 16 + 1 + 1));
    }

    #[test]
    fn test_frame_ends_with_data_release_without_delay() {
        let mut lines = Recorder::default();
        transmit_frame(&mut lines, timing(), &[0x42]).unwrap();
        assert_eq!(lines.events.last(), Some(&Event::Write(Line::Data, Level::High)));
    }

    #[test]
    fn test_start_condition_precedes_first_clock_edge() {
        // Arrange
        let mut lines = Recorder::default();

        // Act
        transmit_frame(&mut lines, timing(), &[0x80]).unwrap();

        // Assert – DATA dips at T and recovers at 2T with CLOCK still HIGH
        assert_eq!(lines.level_at(Line::Data, 60), Level::Low);
        assert_eq!(lines.level_at(Line::Clock, 60), Level::High);
        assert_eq!(lines.level_at(Line::Data, 110), Level::High);
        assert_eq!(lines.level_at(Line::Clock, 110), Level::High);
        assert_eq!(lines.level_at(Line::Clock, 160), Level::Low);
    }

    #[test]
    fn test_bits_are_sent_msb_first_with_alternating_clock() {
        // Arrange
        let mut lines = Recorder::default();

        // Act
        transmit_frame(&mut lines, timing(), &[0b1011_0010]).unwrap();

        // Assert – sample the middle of each bit cell
        let expected_data = [1, 0, 1, 1, 0, 0, 1, 0];
        for (i, &bit) in expected_data.iter().enumerate() {
            let mid = u64::from(T) * (3 + i as u64) + 25;
            let clock = if i % 2 == 0 { Level::Low } else { Level::High };
            assert_eq!(lines.level_at(Line::Data, mid), Level::from_bit(bit == 1), "bit {i}");
            assert_eq!(lines.level_at(Line::Clock, mid), clock, "clock {i}");
        }
    }

    #[test]
    fn test_every_bit_is_written_in_one_critical_section() {
        let mut lines = Recorder::default();
        transmit_frame(&mut lines, timing(), &[0xA5]).unwrap();

        // Each bit write pair sits between enter/exit markers.
        let sections = lines
            .events
            .windows(4)
            .filter(|w| {
                matches!(
                    w,
                    [
                        Event::Enter,
                        Event::Write(Line::Data, _),
                        Event::Write(Line::Clock, _),
                        Event::Exit
                    ]
                )
            })
            .count();
        assert_eq!(sections, 8 + 1);
    }

    #[test]
    fn test_stop_condition_follows_park() {
        // Arrange
        let mut lines = Recorder::default();

        // Act
        transmit_frame(&mut lines, timing(), &[0x00]).unwrap();

        // Assert – park at 11T..12T, stop LOW at 12T..13T, release at 13T
        let park = u64::from(T) * 11 + 10;
        let stop = u64::from(T) * 12 + 10;
        assert_eq!(lines.level_at(Line::Data, park), Level::High);
        assert_eq!(lines.level_at(Line::Clock, park), Level::High);
        assert_eq!(lines.level_at(Line::Data, stop), Level::Low);
        assert_eq!(lines.level_at(Line::Clock, stop), Level::High);
        assert_eq!(lines.level_at(Line::Data, u64::from(T) * 13), Level::High);
    }

    #[test]
    fn test_acknowledgment_waveform() {
        // Arrange
        let mut lines = Recorder::default();

        // Act
        transmit_acknowledgment(&mut lines, timing(), 0x6D).unwrap();

        // Assert – 2T lead, then 8 bits of 0b0110_1101
        assert_eq!(lines.now, u64::from(T) * 10);
        let expected = [0, 1, 1, 0, 1, 1, 0, 1];
        for (i, &bit) in expected.iter().enumerate() {
            let mid = u64::from(T) * (2 + i as u64) + 25;
            assert_eq!(lines.level_at(Line::Data, mid), Level::from_bit(bit == 1), "bit {i}");
        }
        assert_eq!(lines.level_at(Line::Clock, u64::from(T) * 10), Level::High);
        assert_eq!(lines.level_at(Line::Data, u64::from(T) * 10), Level::High);
    }

    #[test]
    fn test_line_error_aborts_transmission() {
        let mut lines = Recorder::failing_after(3);
        let result = transmit_frame(&mut lines, timing(), b"PING");
        assert_eq!(result, Err("line fault"));
    }
}
