//! Smoothing filters applied to the probe's samples.
//!
//! [`TempSensor`](crate::TempSensor) only depends on the [`FilterStage`] contract; the smoothing
//! algorithm itself is pluggable. [`LowPassFilter`] is the implementation used by the firmware.

mod low_pass;

pub use self::low_pass::LowPassFilter;
use crate::fixed_point::{Double, Single};

/// Pair of coefficients configuring a [`FilterStage`].
///
/// The meaning of `a` and `b` is up to the filter implementation.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FilterCoefficients {
    pub a: u8,
    pub b: u8,
}

impl FilterCoefficients {
    #[inline]
    pub const fn new(a: u8, b: u8) -> Self {
        Self { a, b }
    }

    /// Unpacks coefficients stored as `a << 8 | b`.
    #[inline]
    pub const fn from_packed(packed: u16) -> Self {
        let [a, b] = packed.to_be_bytes();
        Self { a, b }
    }

    /// Packs the coefficients as `a << 8 | b`.
    #[inline]
    pub const fn to_packed(self) -> u16 {
        u16::from_be_bytes([self.a, self.b])
    }
}

impl From<u16> for FilterCoefficients {
    fn from(packed: u16) -> Self {
        Self::from_packed(packed)
    }
}

/// A smoothing filter with peak tracking.
pub trait FilterStage {
    /// Resets the filter history so that both its input and output equal `seed`.
    fn init(&mut self, seed: Single);

    /// Admits a new single precision sample.
    fn add(&mut self, value: Single);

    /// Admits a new double precision sample.
    fn add_double(&mut self, value: Double);

    /// The last sample admitted.
    fn read_input(&self) -> Single;

    /// The current filtered value.
    fn read_output(&self) -> Single;

    /// The current filtered value at double precision.
    fn read_output_double(&self) -> Double;

    /// The most recent local maximum of the output, if one was seen since [`FilterStage::init`].
    fn detect_pos_peak(&self) -> Option<Single>;

    /// The most recent local minimum of the output, if one was seen since [`FilterStage::init`].
    fn detect_neg_peak(&self) -> Option<Single>;

    /// Reconfigures the filter. Takes effect on the next added sample.
    fn set_coefficients(&mut self, coefficients: FilterCoefficients);
}
