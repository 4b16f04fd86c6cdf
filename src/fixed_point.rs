//! Fixed point representations shared by the sensor and its filters.

use fixed::types::{I28F4, I7F25, I7F9};

/// Single precision temperature: 7 integer bits & 9 fractional bits.
/// This gives us a precision of 1/512 degrees Celsius & a range of (-64, 64 - 1/512).
pub type Single = I7F9;

/// Double precision temperature: 7 integer bits & 25 fractional bits.
///
/// Used where two nearly equal filtered values are subtracted, so the difference keeps its
/// resolution.
pub type Double = I7F25;

/// Raw reading as delivered by the probe, with 4 fractional bits.
///
/// I28F4 gives us a precision of 0.0625 degrees Celsius & a range of (-2^27, 2^27 - 0.0625).
pub type RawTemperature = I28F4;

static_assertions::assert_eq_size!(Single, i16);
static_assertions::assert_eq_size!(Double, i32);

/// Number of fractional bits gained when going from a raw reading to [`Single`].
const RAW_TO_SINGLE_SHIFT: u32 = Single::FRAC_NBITS - RawTemperature::FRAC_NBITS;

/// Number of fractional bits between [`Single`] and [`Double`].
pub const SINGLE_TO_DOUBLE_SHIFT: u32 = Double::FRAC_NBITS - Single::FRAC_NBITS;

/// Converts a raw reading into [`Single`] precision.
///
/// The raw value is clamped to the range that survives the shift by 5 before shifting, so
/// out-of-range readings saturate instead of wrapping around.
#[must_use]
pub fn rescale_and_saturate(raw: RawTemperature) -> Single {
    const MIN: i32 = (i16::MIN >> RAW_TO_SINGLE_SHIFT) as i32;
    const MAX: i32 = (i16::MAX >> RAW_TO_SINGLE_SHIFT) as i32;

    let clamped = raw.to_bits().clamp(MIN, MAX);
    // Lossless: clamped << 5 lies within i16
    #[allow(clippy::cast_possible_truncation)]
    Single::from_bits((clamped << RAW_TO_SINGLE_SHIFT) as i16)
}

/// Widens a [`Single`] to [`Double`] precision. Exact.
#[must_use]
pub fn single_to_double(value: Single) -> Double {
    Double::from_bits(i32::from(value.to_bits()) << SINGLE_TO_DOUBLE_SHIFT)
}

/// Narrows a [`Double`] to [`Single`] precision, rounding towards negative infinity.
#[must_use]
pub fn double_to_single(value: Double) -> Single {
    // Both types have 7 integer bits, so the shifted value always fits
    #[allow(clippy::cast_possible_truncation)]
    Single::from_bits((value.to_bits() >> SINGLE_TO_DOUBLE_SHIFT) as i16)
}

/// Saturates a wide intermediate into [`Double`].
#[must_use]
pub(crate) fn saturate_double(bits: i64) -> Double {
    #[allow(clippy::cast_possible_truncation)]
    Double::from_bits(bits.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32)
}

/// Saturates a wide intermediate into [`Single`].
#[must_use]
pub(crate) fn saturate_single(bits: i64) -> Single {
    #[allow(clippy::cast_possible_truncation)]
    Single::from_bits(bits.clamp(i64::from(i16::MIN), i64::from(i16::MAX)) as i16)
}
