//! Line backend over embedded-hal 1.0 pins.
//!
//! Both pins must be configured by the HAL as open-drain outputs with the
//! input buffer enabled, which is how most HALs expose a bidirectional pin.
//! Releasing a line then means driving it HIGH and letting the pull-up hold
//! it there, so [`Direction::Output`] needs no pin operation at all.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType, InputPin, OutputPin};

use super::{Direction, Level, Line, LineInterface};

/// CLOCK and DATA pins plus a microsecond delay source.
#[derive(Debug)]
pub struct HalLines<C, D, T> {
    clock: C,
    data: D,
    delay: T,
}

impl<C, D, T> HalLines<C, D, T>
where
    C: InputPin + OutputPin,
    D: ErrorType<Error = <C as ErrorType>::Error> + InputPin + OutputPin,
    T: DelayNs,
{
    pub fn new(clock: C, data: D, delay: T) -> Self {
        Self { clock, data, delay }
    }

    /// Gives the pins and the delay back to the caller.
    pub fn release(self) -> (C, D, T) {
        (self.clock, self.data, self.delay)
    }

    fn set_high(&mut self, line: Line) -> Result<(), <C as ErrorType>::Error> {
        match line {
            Line::Clock => self.clock.set_high(),
            Line::Data => self.data.set_high(),
        }
    }

    fn set_low(&mut self, line: Line) -> Result<(), <C as ErrorType>::Error> {
        match line {
            Line::Clock => self.clock.set_low(),
            Line::Data => self.data.set_low(),
        }
    }
}

impl<C, D, T> LineInterface for HalLines<C, D, T>
where
    C: InputPin + OutputPin,
    D: ErrorType<Error = <C as ErrorType>::Error> + InputPin + OutputPin,
    T: DelayNs,
{
    type Error = <C as ErrorType>::Error;

    fn set_direction(&mut self, line: Line, direction: Direction) -> Result<(), Self::Error> {
        match direction {
            Direction::Input => self.set_high(line),
            Direction::Output => Ok(()),
        }
    }

    fn write_level(&mut self, line: Line, level: Level) -> Result<(), Self::Error> {
        match level {
            Level::High => self.set_high(line),
            Level::Low => self.set_low(line),
        }
    }

    fn read_level(&mut self, line: Line) -> Result<Level, Self::Error> {
        let high = match line {
            Line::Clock => self.clock.is_high()?,
            Line::Data => self.data.is_high()?,
        };
        Ok(Level::from_bit(high))
    }

    fn delay_us(&mut self, us: u32) -> Result<(), Self::Error> {
        self.delay.delay_us(us);
        Ok(())
    }

    fn critical_section<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        critical_section::with(|_| f(self))
    }
}
