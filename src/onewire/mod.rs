//! Bit-banged one-wire bus master.

mod address;
pub mod commands;
pub mod crc;
mod error;

use embedded_hal::{
    blocking::delay::DelayUs,
    digital::v2::{InputPin, OutputPin},
};

pub use self::{address::Address, error::*};

/// One-wire bus on an open-drain pin with an external pull-up.
pub struct OneWire<P> {
    pin: P,
}

impl<P, E> OneWire<P>
where
    P: InputPin<Error = E> + OutputPin<Error = E>,
{
    pub const fn new(pin: P) -> Self {
        Self { pin }
    }

    pub fn release(self) -> P {
        self.pin
    }

    /// Perform a reset initialization sequence
    ///
    /// Succeeds if at least one device answered with a presence pulse.
    pub fn reset(&mut self, delay: &mut impl DelayUs<u32>) -> Result<(), E> {
        // Wait for the bus to be pulled high by the pull-up resistor
        let mut retries = 125;
        while self.pin.is_low()? {
            if retries == 0 {
                return Err(Error::BusNotHigh);
            }
            retries -= 1;
            delay.delay_us(2);
        }

        // Pull the bus low for 480us
        self.pin.set_low()?;
        delay.delay_us(480);

        // Release the bus and sample the presence pulse
        self.pin.set_high()?;
        delay.delay_us(70);
        let present = self.pin.is_low()?;
        delay.delay_us(410);

        if present {
            Ok(())
        } else {
            Err(Error::NoPresence)
        }
    }

    /// Write a single bit to the bus
    pub fn write_bit(&mut self, bit: bool, delay: &mut impl DelayUs<u32>) -> Result<(), E> {
        // A 1 is a short low pulse, a 0 holds the bus low for most of the slot
        let (low, high) = if bit { (10, 55) } else { (65, 5) };

        self.pin.set_low()?;
        delay.delay_us(low);
        self.pin.set_high()?;
        delay.delay_us(high);

        Ok(())
    }

    /// Read a single bit from the bus
    pub fn read_bit(&mut self, delay: &mut impl DelayUs<u32>) -> Result<bool, E> {
        // The device drives the bus within 15us of the falling edge
        let bit = critical_section::with(|_| {
            self.pin.set_low()?;
            delay.delay_us(1);
            self.pin.set_high()?;
            delay.delay_us(1);
            self.pin.is_high()
        })?;

        // Wait for the end of the timeslot
        delay.delay_us(53);

        Ok(bit)
    }

    /// Write a single byte to the bus, least significant bit first
    pub fn write_byte(&mut self, byte: u8, delay: &mut impl DelayUs<u32>) -> Result<(), E> {
        for i in 0..8 {
            self.write_bit((byte >> i) & 1 == 1, delay)?;
        }
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8], delay: &mut impl DelayUs<u32>) -> Result<(), E> {
        for &byte in bytes {
            self.write_byte(byte, delay)?;
        }
        Ok(())
    }

    /// Read a single byte from the bus, least significant bit first
    pub fn read_byte(&mut self, delay: &mut impl DelayUs<u32>) -> Result<u8, E> {
        let mut byte = 0;
        for i in 0..8 {
            if self.read_bit(delay)? {
                byte |= 1 << i;
            }
        }
        Ok(byte)
    }

    pub fn read_bytes(&mut self, bytes: &mut [u8], delay: &mut impl DelayUs<u32>) -> Result<(), E> {
        for byte in bytes {
            *byte = self.read_byte(delay)?;
        }
        Ok(())
    }

    /// Send a command to one device, or to all devices if `address` is `None`
    ///
    /// Resets the bus, selects the address (or skips ROM selection) and writes the command byte.
    pub fn send_command(
        &mut self,
        address: Option<&Address>,
        command: u8,
        delay: &mut impl DelayUs<u32>,
    ) -> Result<(), E> {
        self.reset(delay)?;
        match address {
            Some(address) => {
                self.write_byte(commands::MATCH_ROM, delay)?;
                self.write_bytes(&address.0.to_le_bytes(), delay)?;
            }
            None => self.write_byte(commands::SKIP_ROM, delay)?,
        }
        self.write_byte(command, delay)
    }

    /// Get iterator over all devices on the bus
    pub fn devices<'a, 'd, D: DelayUs<u32>>(
        &'a mut self,
        delay: &'d mut D,
    ) -> DeviceSearch<'a, 'd, P, D> {
        DeviceSearch {
            wire: self,
            delay,
            rom: 0,
            last_discrepancy: 0,
            finished: false,
        }
    }
}

/// ROM search over the bus, yielding one address per pass.
pub struct DeviceSearch<'a, 'd, P, D> {
    wire: &'a mut OneWire<P>,
    delay: &'d mut D,
    rom: u64,
    /// 1-based bit position where the last pass took the 0 branch, 0 if none
    last_discrepancy: u8,
    finished: bool,
}

impl<P, E, D> DeviceSearch<'_, '_, P, D>
where
    P: InputPin<Error = E> + OutputPin<Error = E>,
    D: DelayUs<u32>,
{
    fn search(&mut self) -> Result<Option<Address>, E> {
        if self.finished {
            return Ok(None);
        }

        self.wire.reset(self.delay)?;
        self.wire.write_byte(commands::SEARCH_NORMAL, self.delay)?;

        let mut last_zero = 0;
        for position in 1..=64u8 {
            let mask = 1u64 << (position - 1);
            let bit = self.wire.read_bit(self.delay)?;
            let complement = self.wire.read_bit(self.delay)?;

            let direction = if bit && complement {
                // Nobody answered
                self.finished = true;
                return Ok(None);
            } else if bit != complement {
                bit
            } else {
                // Devices disagree on this bit: retrace the previous path up to the last
                // discrepancy, then take the 1 branch there and 0 beyond it
                let direction = if position < self.last_discrepancy {
                    self.rom & mask != 0
                } else {
                    position == self.last_discrepancy
                };
                if !direction {
                    last_zero = position;
                }
                direction
            };

            if direction {
                self.rom |= mask;
            } else {
                self.rom &= !mask;
            }
            self.wire.write_bit(direction, self.delay)?;
        }

        self.last_discrepancy = last_zero;
        self.finished = last_zero == 0;

        let address = Address(self.rom);
        if address.is_valid() {
            Ok(Some(address))
        } else {
            Err(Error::CrcMismatch)
        }
    }
}

impl<P, E, D> Iterator for DeviceSearch<'_, '_, P, D>
where
    P: InputPin<Error = E> + OutputPin<Error = E>,
    D: DelayUs<u32>,
{
    type Item = Result<Address, E>;

    fn next(&mut self) -> Option<Self::Item> {
        let result = self.search();
        if result.is_err() {
            self.finished = true;
        }
        result.transpose()
    }
}
