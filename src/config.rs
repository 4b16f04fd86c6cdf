//! Timing and filter settings of a [`TempSensor`](crate::TempSensor).

use crate::{ds18b20::Resolution, filter::FilterCoefficients, probe::Duration};

/// Sensor settings. [`Config::DEFAULT`] assumes [`TempSensor::update`](crate::TempSensor::update)
/// runs once per second.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Conversion resolution configured on the probe.
    pub resolution: Resolution,
    /// How long the first valid reading may take after a conversion request.
    pub acquisition_timeout: Duration,
    /// A conversion is re-requested if none was issued for longer than this.
    pub refresh_interval: Duration,
    /// Time a reconnected probe is given before it is re-initialized.
    pub settle_time: Duration,
    /// Number of samples between two slope deltas.
    pub slope_interval: u8,
    /// Factor turning a delta per `slope_interval` samples into a delta per hour.
    pub slope_scale: i32,
    pub fast_coefficients: FilterCoefficients,
    pub slow_coefficients: FilterCoefficients,
    pub slope_coefficients: FilterCoefficients,
}

impl Config {
    pub const DEFAULT: Self = Self {
        resolution: Resolution::Bits12,
        acquisition_timeout: Duration::millis(2000),
        refresh_interval: Duration::millis(5000),
        settle_time: Duration::millis(2000),
        slope_interval: 30,
        slope_scale: 120,
        fast_coefficients: FilterCoefficients::new(1, 1),
        slow_coefficients: FilterCoefficients::new(4, 4),
        slope_coefficients: FilterCoefficients::new(3, 3),
    };

    /// Default settings with the slope scale matched to `tick`, the period between updates.
    ///
    /// Falls back to the 1 second default for a zero tick.
    pub const fn for_tick_period(tick: Duration) -> Self {
        const MILLIS_PER_HOUR: u32 = 3_600_000;

        let mut config = Self::DEFAULT;
        let interval = tick.to_millis().saturating_mul(config.slope_interval as u32);
        if interval != 0 {
            config.slope_scale = (MILLIS_PER_HOUR / interval) as i32;
        }
        config
    }

    /// Time to wait for a conversion at the configured resolution.
    pub const fn conversion_time(&self) -> Duration {
        self.resolution.conversion_time()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::DEFAULT
    }
}
