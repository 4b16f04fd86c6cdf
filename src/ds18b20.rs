//! Implementation for the DS18B20 temperature sensor.

use embedded_hal::{
    blocking::delay::DelayUs,
    digital::v2::{InputPin, OutputPin},
};

use crate::{
    fixed_point::RawTemperature,
    onewire::{crc::check_crc8, Address, Error, OneWire},
    probe::{Duration, ProbeBus},
};

pub const FAMILY_CODE: u8 = 0x28;

pub const CONVERT_T: u8 = 0x44;
pub const READ_SCRATCHPAD: u8 = 0xBE;
pub const WRITE_SCRATCHPAD: u8 = 0x4E;

/// A single DS18B20 on a [`OneWire`] bus.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Ds18b20 {
    addr: Address,
}

impl Ds18b20 {
    #[inline]
    pub const fn new(addr: Address) -> Self {
        Self { addr }
    }

    /// Binds to `addr`, checking that it belongs to a DS18B20.
    pub fn with_address<E>(addr: Address) -> Result<Self, Error<E>> {
        if addr.family_code() == FAMILY_CODE {
            Ok(Self::new(addr))
        } else {
            Err(Error::FamilyCodeMismatch)
        }
    }

    #[inline]
    pub const fn address(&self) -> Address {
        self.addr
    }

    fn read_scratchpad<P, E>(
        &self,
        wire: &mut OneWire<P>,
        delay: &mut impl DelayUs<u32>,
    ) -> Result<[u8; 9], Error<E>>
    where
        P: InputPin<Error = E> + OutputPin<Error = E>,
    {
        wire.send_command(Some(&self.addr), READ_SCRATCHPAD, delay)?;

        let mut buf = [0u8; 9];
        wire.read_bytes(&mut buf, delay)?;
        check_crc8(&buf)?;

        Ok(buf)
    }

    fn write_scratchpad<P, E>(
        &self,
        wire: &mut OneWire<P>,
        delay: &mut impl DelayUs<u32>,
        data: [u8; 3],
    ) -> Result<(), Error<E>>
    where
        P: InputPin<Error = E> + OutputPin<Error = E>,
    {
        wire.send_command(Some(&self.addr), WRITE_SCRATCHPAD, delay)?;
        wire.write_bytes(&data, delay)?;
        wire.reset(delay)
    }

    /// Sets the resolution of the sensor, keeping the alarm registers
    pub fn set_resolution<P, E>(
        &self,
        wire: &mut OneWire<P>,
        delay: &mut impl DelayUs<u32>,
        res: Resolution,
    ) -> Result<(), Error<E>>
    where
        P: InputPin<Error = E> + OutputPin<Error = E>,
    {
        let buf = self.read_scratchpad(wire, delay)?;
        self.write_scratchpad(wire, delay, [buf[2], buf[3], res.to_config_register()])
    }

    /// Reads the temperature data from the sensor
    pub fn read_data<P, E>(
        &self,
        wire: &mut OneWire<P>,
        delay: &mut impl DelayUs<u32>,
    ) -> Result<RawTemperature, Error<E>>
    where
        P: InputPin<Error = E> + OutputPin<Error = E>,
    {
        let buf = self.read_scratchpad(wire, delay)?;
        decode_scratchpad(&buf)
    }
}

/// Extracts the temperature from a CRC-checked scratchpad.
///
/// Bits below the configured resolution are undefined and get masked off.
pub fn decode_scratchpad<E>(buf: &[u8; 9]) -> Result<RawTemperature, Error<E>> {
    let resolution = Resolution::from_config_register(buf[4]).ok_or(Error::UnexpectedResponse)?;

    let lsb = match resolution {
        Resolution::Bits9 => buf[0] & 0b1111_1000,
        Resolution::Bits10 => buf[0] & 0b1111_1100,
        Resolution::Bits11 => buf[0] & 0b1111_1110,
        Resolution::Bits12 => buf[0],
    };

    let value = i16::from_le_bytes([lsb, buf[1]]);
    Ok(RawTemperature::from_bits(i32::from(value)))
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Resolution {
    Bits9,
    Bits10,
    Bits11,
    Bits12,
}

impl Resolution {
    const fn from_config_register(reg: u8) -> Option<Self> {
        // Bit 7 reads back as zero and bits 4..0 as ones. Anything else is not a DS18B20 talking,
        // e.g. a probe holding the bus low.
        if reg & 0b1001_1111 != 0b0001_1111 {
            return None;
        }
        match reg & 0b0110_0000 {
            0b0000_0000 => Some(Self::Bits9),
            0b0010_0000 => Some(Self::Bits10),
            0b0100_0000 => Some(Self::Bits11),
            0b0110_0000 => Some(Self::Bits12),
            _ => None,
        }
    }

    pub const fn to_config_register(self) -> u8 {
        match self {
            Self::Bits9 => 0b0001_1111,
            Self::Bits10 => 0b0011_1111,
            Self::Bits11 => 0b0101_1111,
            Self::Bits12 => 0b0111_1111,
        }
    }

    pub const fn bits(self) -> u8 {
        match self {
            Self::Bits9 => 9,
            Self::Bits10 => 10,
            Self::Bits11 => 11,
            Self::Bits12 => 12,
        }
    }

    /// Returns the maximum conversion time
    pub const fn conversion_time(self) -> Duration {
        Duration::millis(match self {
            Self::Bits9 => 94,
            Self::Bits10 => 188,
            Self::Bits11 => 375,
            Self::Bits12 => 750,
        })
    }
}

/// [`ProbeBus`] over a [`OneWire`] bus with DS18B20 sensors.
///
/// Transport errors are logged and reported as missing readings.
pub struct Ds18b20Probe<P> {
    wire: OneWire<P>,
}

impl<P, E> Ds18b20Probe<P>
where
    P: InputPin<Error = E> + OutputPin<Error = E>,
{
    pub const fn new(wire: OneWire<P>) -> Self {
        Self { wire }
    }
}

impl<P, E> ProbeBus for Ds18b20Probe<P>
where
    P: InputPin<Error = E> + OutputPin<Error = E>,
{
    fn reset(&mut self, delay: &mut impl DelayUs<u32>) {
        if let Err(e) = self.wire.reset(delay) {
            debug!("Bus reset failed: {}", e.as_str());
        }
    }

    fn address(&mut self, index: usize, delay: &mut impl DelayUs<u32>) -> Option<Address> {
        let found = match self.wire.devices(delay).nth(index)? {
            Ok(addr) => addr,
            Err(e) => {
                warn!("Device search failed: {}", e.as_str());
                return None;
            }
        };

        match Ds18b20::with_address::<E>(found) {
            Ok(sensor) => Some(sensor.address()),
            Err(e) => {
                warn!("Device {} is no DS18B20: {}", found, e.as_str());
                None
            }
        }
    }

    fn set_resolution(
        &mut self,
        address: Address,
        resolution: Resolution,
        delay: &mut impl DelayUs<u32>,
    ) {
        let sensor = Ds18b20::new(address);
        if let Err(e) = sensor.set_resolution(&mut self.wire, delay, resolution) {
            warn!(
                "Setting {=u8}-bit resolution on {} failed: {}",
                resolution.bits(),
                address,
                e.as_str()
            );
        }
    }

    fn request_conversion(&mut self, delay: &mut impl DelayUs<u32>) {
        // Start conversion of all thermometers simultaneously
        if let Err(e) = self.wire.send_command(None, CONVERT_T, delay) {
            debug!("Conversion request failed: {}", e.as_str());
        }
    }

    fn read_raw(
        &mut self,
        address: Address,
        delay: &mut impl DelayUs<u32>,
    ) -> Option<RawTemperature> {
        match Ds18b20::new(address).read_data(&mut self.wire, delay) {
            Ok(temp) => Some(temp),
            Err(e) => {
                trace!("Reading {} failed: {}", address, e.as_str());
                None
            }
        }
    }
}
