//! Rate of change derived from the slow filter.
//!
//! Every `interval` samples, the change of the slow filter's double precision output since the
//! previous boundary is fed to the slope filter. The first boundary after (re-)initialization only
//! captures the reference, so the first delta is fed `interval + 1` samples after
//! initialization.

use crate::{
    filter::FilterStage,
    fixed_point::{saturate_single, Double, Single, SINGLE_TO_DOUBLE_SHIFT},
};

/// Decimation state of the slope estimate.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SlopeEstimator {
    interval: u8,
    countdown: u8,
    reference: Double,
}

impl SlopeEstimator {
    /// Creates an estimator with a reference of zero. Call [`SlopeEstimator::reset`] before use.
    ///
    /// `interval` is clamped to `1..=254`.
    pub const fn new(interval: u8) -> Self {
        let interval = match interval {
            0 => 1,
            u8::MAX => u8::MAX - 1,
            n => n,
        };
        Self {
            interval,
            countdown: priming(interval),
            reference: Double::ZERO,
        }
    }

    /// Restarts decimation from `reference`, the slow filter's current output.
    pub fn reset(&mut self, reference: Double) {
        self.countdown = priming(self.interval);
        self.reference = reference;
    }

    /// Advances by one sample. The slow filter must already contain the sample.
    ///
    /// Returns the delta if one was fed to `slope`.
    pub fn tick(&mut self, slow: &impl FilterStage, slope: &mut impl FilterStage) -> Option<Double> {
        if self.countdown == priming(self.interval) {
            // Skip the transient right after initialization
            self.reference = slow.read_output_double();
            self.countdown = self.interval;
            return None;
        }

        self.countdown -= 1;
        if self.countdown != 0 {
            return None;
        }

        let output = slow.read_output_double();
        let delta = output.saturating_sub(self.reference);
        slope.add_double(delta);
        self.reference = output;
        self.countdown = self.interval;
        Some(delta)
    }

    pub const fn countdown(&self) -> u8 {
        self.countdown
    }

    pub const fn reference(&self) -> Double {
        self.reference
    }
}

const fn priming(interval: u8) -> u8 {
    interval + 1
}

/// Scales a filtered delta per decimation interval to a per-hour slope.
///
/// `scale` is the number of intervals per hour. Saturates instead of wrapping.
pub fn per_hour(delta: Double, scale: i32) -> Single {
    saturate_single((i64::from(delta.to_bits()) * i64::from(scale)) >> SINGLE_TO_DOUBLE_SHIFT)
}
