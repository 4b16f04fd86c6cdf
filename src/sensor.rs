//! Lifecycle of a single temperature probe.

use embedded_hal::blocking::delay::{DelayMs, DelayUs};

use crate::{
    config::Config,
    diagnostics::{Diagnostic, DiagnosticSink},
    filter::{FilterCoefficients, FilterStage, LowPassFilter},
    fixed_point::{rescale_and_saturate, RawTemperature, Single},
    onewire::Address,
    probe::{Clock, Duration, Instant, ProbeBus},
    slope::{per_hour, SlopeEstimator},
};

/// Connection state of a [`TempSensor`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// [`TempSensor::init`] has not run yet.
    Uninitialized,
    /// The probe delivered valid readings and the filters are seeded.
    Connected,
    /// The probe stopped answering. Filters hold their last estimates.
    Disconnected,
}

/// Snapshot of all estimates of a [`TempSensor`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Reading {
    /// Most recent unfiltered sample.
    pub raw: Single,
    pub fast: Single,
    pub slow: Single,
    /// Degrees per hour.
    pub slope: Single,
    pub pos_peak: Option<Single>,
    pub neg_peak: Option<Single>,
}

/// A temperature probe with fast, slow and slope estimates.
///
/// Call [`TempSensor::init`] once, then [`TempSensor::update`] once per tick. Both block on
/// `delay` while the probe converts. Queries can be made at any time and return the last
/// estimates, also while the probe is disconnected.
pub struct TempSensor<C, S, F = LowPassFilter> {
    address: Address,
    channel: u8,
    config: Config,
    state: State,
    last_request: Instant,
    fast: F,
    slow: F,
    slope_filter: F,
    slope: SlopeEstimator,
    clock: C,
    sink: S,
}

impl<C, S, F> TempSensor<C, S, F>
where
    C: Clock,
    S: DiagnosticSink,
    F: FilterStage + Default,
{
    /// Creates a sensor for the probe at `address`, with the default [`Config`].
    ///
    /// `channel` identifies the probe in diagnostics. `address` is replaced by the address found
    /// on the bus during [`TempSensor::init`] if there is one.
    pub fn new(address: Address, channel: u8, clock: C, sink: S) -> Self {
        let filters = [F::default(), F::default(), F::default()];
        Self::with_filters(address, channel, clock, sink, filters).with_config(Config::DEFAULT)
    }
}

impl<C, S, F> TempSensor<C, S, F>
where
    C: Clock,
    S: DiagnosticSink,
    F: FilterStage,
{
    /// Creates a sensor with caller supplied fast, slow and slope filters, in that order.
    ///
    /// The filters keep their coefficients.
    pub fn with_filters(address: Address, channel: u8, clock: C, sink: S, filters: [F; 3]) -> Self {
        let config = Config::DEFAULT;
        let [fast, slow, slope_filter] = filters;
        let last_request = clock.now();

        Self {
            address,
            channel,
            config,
            state: State::Uninitialized,
            last_request,
            fast,
            slow,
            slope_filter,
            slope: SlopeEstimator::new(config.slope_interval),
            clock,
            sink,
        }
    }

    /// Replaces the configuration and applies its filter coefficients.
    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self.slope = SlopeEstimator::new(config.slope_interval);
        self.fast.set_coefficients(config.fast_coefficients);
        self.slow.set_coefficients(config.slow_coefficients);
        self.slope_filter.set_coefficients(config.slope_coefficients);
        self
    }

    /// Acquires the probe and seeds all filters from it.
    ///
    /// The first reading after power-up is discarded. If no valid reading arrives within
    /// [`Config::acquisition_timeout`] of the conversion request, the sensor is left
    /// [`State::Disconnected`] and the filters are not touched.
    #[cfg_attr(feature = "sizing", inline(never))]
    pub fn init<B, D>(&mut self, bus: &mut B, delay: &mut D)
    where
        B: ProbeBus,
        D: DelayUs<u32> + DelayMs<u32>,
    {
        trace!("init channel {=u8}", self.channel);

        bus.reset(delay);

        match bus.address(0, delay) {
            Some(address) => self.address = address,
            None => self.sink.emit(Diagnostic::AddressNotFound {
                channel: self.channel,
                cached: self.address,
            }),
        }

        bus.set_resolution(self.address, self.config.resolution, delay);

        self.request_conversion(bus, delay);
        delay.delay_ms(self.config.conversion_time().to_millis());
        if self.poll_reading(bus, delay).is_none() {
            warn!("No reading from channel {=u8} after init", self.channel);
            self.mark_disconnected();
            return;
        }

        // The first reading after power-up is not accurate, convert again
        self.request_conversion(bus, delay);
        delay.delay_ms(self.config.conversion_time().to_millis());
        let Some(seed) = bus.read_raw(self.address, delay) else {
            warn!("Channel {=u8} lost during init", self.channel);
            self.mark_disconnected();
            return;
        };

        let seed = rescale_and_saturate(seed);
        self.fast.init(seed);
        self.slow.init(seed);
        self.slope_filter.init(Single::ZERO);
        self.slope.reset(self.slow.read_output_double());
        self.state = State::Connected;

        debug!("Channel {=u8} connected at {=i16}", self.channel, seed.to_bits());
    }

    /// Reads the probe and feeds the filters. Call once per tick.
    ///
    /// A missing reading marks the sensor disconnected and leaves the filters alone. The first
    /// valid reading after that re-initializes the sensor after [`Config::settle_time`].
    #[cfg_attr(feature = "sizing", inline(never))]
    pub fn update<B, D>(&mut self, bus: &mut B, delay: &mut D)
    where
        B: ProbeBus,
        D: DelayUs<u32> + DelayMs<u32>,
    {
        if self.since_request() > self.config.refresh_interval {
            // No pending conversion to read, start one and wait for it
            self.request_conversion(bus, delay);
            delay.delay_ms(self.config.conversion_time().to_millis());
        }

        let Some(mut raw) = bus.read_raw(self.address, delay) else {
            self.mark_disconnected();
            return;
        };

        if self.state != State::Connected {
            let previous = self.state;

            // Give a freshly inserted probe time to make proper contact
            delay.delay_ms(self.config.settle_time.to_millis());
            self.init(bus, delay);
            if self.state != State::Connected {
                return;
            }
            if previous == State::Disconnected {
                self.sink.emit(Diagnostic::Reconnected {
                    channel: self.channel,
                });
            }

            raw = match bus.read_raw(self.address, delay) {
                Some(raw) => raw,
                None => {
                    self.mark_disconnected();
                    return;
                }
            };
        }

        self.feed(raw);

        // Already start the next conversion, it is ready by the next tick
        self.request_conversion(bus, delay);
    }

    fn feed(&mut self, raw: RawTemperature) {
        let temp = rescale_and_saturate(raw);
        self.fast.add(temp);
        self.slow.add(temp);

        if let Some(delta) = self.slope.tick(&self.slow, &mut self.slope_filter) {
            trace!("Channel {=u8} slope delta {=i32}", self.channel, delta.to_bits());
        }
    }

    /// Polls until a valid reading arrives or the acquisition timeout passes.
    fn poll_reading<B, D>(&mut self, bus: &mut B, delay: &mut D) -> Option<RawTemperature>
    where
        B: ProbeBus,
        D: DelayUs<u32>,
    {
        loop {
            if let Some(raw) = bus.read_raw(self.address, delay) {
                return Some(raw);
            }
            if self.since_request() > self.config.acquisition_timeout {
                return None;
            }
        }
    }

    fn request_conversion<B, D>(&mut self, bus: &mut B, delay: &mut D)
    where
        B: ProbeBus,
        D: DelayUs<u32>,
    {
        bus.request_conversion(delay);
        self.last_request = self.clock.now();
    }

    fn since_request(&self) -> Duration {
        self.clock
            .now()
            .checked_duration_since(self.last_request)
            .unwrap_or(Duration::millis(0))
    }

    fn mark_disconnected(&mut self) {
        if self.state == State::Connected {
            self.sink.emit(Diagnostic::Disconnected {
                channel: self.channel,
            });
        }
        self.state = State::Disconnected;
    }

    /// Most recent unfiltered sample.
    pub fn read(&self) -> Single {
        self.fast.read_input()
    }

    pub fn read_fast_filtered(&self) -> Single {
        self.fast.read_output()
    }

    pub fn read_slow_filtered(&self) -> Single {
        self.slow.read_output()
    }

    /// Rate of change in degrees per hour.
    ///
    /// Only accurate if [`TempSensor::update`] runs at the tick period the configured
    /// [`Config::slope_scale`] was made for.
    pub fn read_slope(&self) -> Single {
        per_hour(self.slope_filter.read_output_double(), self.config.slope_scale)
    }

    /// Most recent maximum of the slow estimate.
    ///
    /// `None` until the slow filter has produced a local maximum since it was last seeded.
    pub fn detect_pos_peak(&self) -> Option<Single> {
        self.slow.detect_pos_peak()
    }

    /// Most recent minimum of the slow estimate.
    ///
    /// `None` until the slow filter has produced a local minimum since it was last seeded.
    pub fn detect_neg_peak(&self) -> Option<Single> {
        self.slow.detect_neg_peak()
    }

    pub fn reading(&self) -> Reading {
        Reading {
            raw: self.read(),
            fast: self.read_fast_filtered(),
            slow: self.read_slow_filtered(),
            slope: self.read_slope(),
            pos_peak: self.detect_pos_peak(),
            neg_peak: self.detect_neg_peak(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == State::Connected
    }

    pub const fn state(&self) -> State {
        self.state
    }

    pub const fn address(&self) -> Address {
        self.address
    }

    pub const fn channel(&self) -> u8 {
        self.channel
    }

    pub const fn config(&self) -> &Config {
        &self.config
    }

    pub const fn sink(&self) -> &S {
        &self.sink
    }

    pub const fn fast_filter(&self) -> &F {
        &self.fast
    }

    pub const fn slow_filter(&self) -> &F {
        &self.slow
    }

    pub const fn slope_filter(&self) -> &F {
        &self.slope_filter
    }

    pub fn set_fast_filter_coefficients(&mut self, coefficients: impl Into<FilterCoefficients>) {
        self.fast.set_coefficients(coefficients.into());
    }

    pub fn set_slow_filter_coefficients(&mut self, coefficients: impl Into<FilterCoefficients>) {
        self.slow.set_coefficients(coefficients.into());
    }

    pub fn set_slope_filter_coefficients(&mut self, coefficients: impl Into<FilterCoefficients>) {
        self.slope_filter.set_coefficients(coefficients.into());
    }
}

#[cfg(test)]
mod tests;
