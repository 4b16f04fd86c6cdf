//! Dallas/Maxim CRC-8 (polynomial x^8 + x^5 + x^4 + 1, reflected).

use super::Error;

/// Computes the CRC-8 of `data`.
///
/// Running it over a buffer that ends in its own CRC yields 0.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in data {
        let mut byte = byte;
        for _ in 0..8 {
            let mix = (crc ^ byte) & 0x01;
            crc >>= 1;
            if mix != 0 {
                crc ^= 0x8C;
            }
            byte >>= 1;
        }
    }
    crc
}

/// Checks a buffer whose last byte is the CRC of the preceding bytes.
pub fn check_crc8<E>(data: &[u8]) -> Result<(), Error<E>> {
    if crc8(data) == 0 {
        Ok(())
    } else {
        Err(Error::CrcMismatch)
    }
}
