/// A 64-bit ROM code of a device, family code in the lowest byte.
///
/// These are globally unique and used to single out one device on a shared bus.
#[derive(Copy, Clone, PartialEq, Eq, Default)]
pub struct Address(pub u64);

impl Address {
    pub const fn family_code(self) -> u8 {
        self.0.to_le_bytes()[0]
    }

    /// The CRC byte stored in the most significant byte of the ROM code.
    pub const fn crc(self) -> u8 {
        self.0.to_le_bytes()[7]
    }

    /// Whether the stored CRC matches the family code and serial number.
    pub fn is_valid(self) -> bool {
        super::crc::crc8(&self.0.to_le_bytes()) == 0
    }
}

impl core::fmt::Debug for Address {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> Result<(), core::fmt::Error> {
        write!(f, "{:016X?}", self.0)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Address {
    fn format(&self, f: defmt::Formatter<'_>) {
        defmt::write!(f, "{=u64:016X}", self.0);
    }
}
