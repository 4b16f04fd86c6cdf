use core::cell::Cell;
use std::{collections::VecDeque, rc::Rc, vec::Vec};

use embedded_hal::blocking::delay::{DelayMs, DelayUs};

use super::*;
use crate::{
    ds18b20::Resolution,
    fixed_point::{single_to_double, Double},
};

const ADDR: Address = Address(0x05_00_00_0F_83_FB_60_28);
const CACHED: Address = Address(0xAA_00_00_00_00_00_00_28);

/// Millisecond clock shared by the simulated bus and delay.
#[derive(Clone, Default)]
struct SimClock(Rc<Cell<u32>>);

impl SimClock {
    fn advance(&self, ms: u32) {
        self.0.set(self.0.get().wrapping_add(ms));
    }

    fn millis(&self) -> u32 {
        self.0.get()
    }
}

impl Clock for SimClock {
    fn now(&self) -> Instant {
        Instant::from_ticks(self.0.get())
    }
}

struct SimDelay(SimClock);

impl DelayMs<u32> for SimDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.0.advance(ms);
    }
}

impl DelayUs<u32> for SimDelay {
    fn delay_us(&mut self, _: u32) {}
}

/// Probe that replays scripted readings, then keeps returning `fallback`.
struct SimBus {
    clock: SimClock,
    address: Option<Address>,
    readings: VecDeque<Option<RawTemperature>>,
    fallback: Option<RawTemperature>,
    /// Time every read takes
    read_ms: u32,
    resets: usize,
    requests: usize,
    reads: usize,
    resolution: Option<Resolution>,
}

impl SimBus {
    fn new(clock: &SimClock, fallback: Option<f32>) -> Self {
        Self {
            clock: clock.clone(),
            address: Some(ADDR),
            readings: VecDeque::new(),
            fallback: fallback.map(RawTemperature::from_num),
            read_ms: 10,
            resets: 0,
            requests: 0,
            reads: 0,
            resolution: None,
        }
    }

    fn script(&mut self, readings: impl IntoIterator<Item = Option<f32>>) {
        self.readings
            .extend(readings.into_iter().map(|r| r.map(RawTemperature::from_num)));
    }

    fn set_fallback(&mut self, fallback: Option<f32>) {
        self.fallback = fallback.map(RawTemperature::from_num);
    }
}

impl ProbeBus for SimBus {
    fn reset(&mut self, _: &mut impl DelayUs<u32>) {
        self.resets += 1;
    }

    fn address(&mut self, index: usize, _: &mut impl DelayUs<u32>) -> Option<Address> {
        assert_eq!(index, 0);
        self.address
    }

    fn set_resolution(&mut self, address: Address, resolution: Resolution, _: &mut impl DelayUs<u32>) {
        assert_eq!(Some(address), self.address.or(Some(CACHED)));
        self.resolution = Some(resolution);
    }

    fn request_conversion(&mut self, _: &mut impl DelayUs<u32>) {
        self.requests += 1;
    }

    fn read_raw(&mut self, _: Address, _: &mut impl DelayUs<u32>) -> Option<RawTemperature> {
        self.reads += 1;
        self.clock.advance(self.read_ms);
        self.readings.pop_front().unwrap_or(self.fallback)
    }
}

#[derive(Default)]
struct Recorder(Vec<Diagnostic>);

impl DiagnosticSink for Recorder {
    fn emit(&mut self, diagnostic: Diagnostic) {
        self.0.push(diagnostic);
    }
}

/// Passes samples straight through and counts double precision inputs.
#[derive(Default)]
struct CountingFilter {
    input: Single,
    output: Rc<Cell<Double>>,
    doubles: Rc<Cell<usize>>,
    coefficients: FilterCoefficients,
}

impl FilterStage for CountingFilter {
    fn init(&mut self, seed: Single) {
        self.input = seed;
        self.output.set(single_to_double(seed));
        self.doubles.set(0);
    }

    fn add(&mut self, value: Single) {
        self.input = value;
        self.output.set(single_to_double(value));
    }

    fn add_double(&mut self, value: Double) {
        self.doubles.set(self.doubles.get() + 1);
        self.output.set(value);
    }

    fn read_input(&self) -> Single {
        self.input
    }

    fn read_output(&self) -> Single {
        crate::fixed_point::double_to_single(self.output.get())
    }

    fn read_output_double(&self) -> Double {
        self.output.get()
    }

    fn detect_pos_peak(&self) -> Option<Single> {
        None
    }

    fn detect_neg_peak(&self) -> Option<Single> {
        None
    }

    fn set_coefficients(&mut self, coefficients: FilterCoefficients) {
        self.coefficients = coefficients;
    }
}

type Sensor<F = LowPassFilter> = TempSensor<SimClock, Recorder, F>;

struct Rig<F = LowPassFilter> {
    clock: SimClock,
    bus: SimBus,
    delay: SimDelay,
    sensor: Sensor<F>,
}

impl<F: FilterStage> Rig<F> {
    fn init(&mut self) {
        self.sensor.init(&mut self.bus, &mut self.delay);
    }

    fn update(&mut self) {
        self.sensor.update(&mut self.bus, &mut self.delay);
    }

    fn tick(&mut self) {
        self.clock.advance(1000);
        self.update();
    }

    fn diagnostics(&self) -> &[Diagnostic] {
        &self.sensor.sink().0
    }
}

fn rig(fallback: Option<f32>) -> Rig {
    let clock = SimClock::default();
    Rig {
        bus: SimBus::new(&clock, fallback),
        delay: SimDelay(clock.clone()),
        sensor: TempSensor::new(CACHED, 4, clock.clone(), Recorder::default()),
        clock,
    }
}

fn counting_rig(fallback: Option<f32>) -> Rig<CountingFilter> {
    let clock = SimClock::default();
    Rig {
        bus: SimBus::new(&clock, fallback),
        delay: SimDelay(clock.clone()),
        sensor: TempSensor::new(CACHED, 4, clock.clone(), Recorder::default()),
        clock,
    }
}

fn single(t: f32) -> Single {
    Single::from_num(t)
}

#[test]
fn starts_uninitialized() {
    let rig = rig(Some(20.0));
    assert_eq!(rig.sensor.state(), State::Uninitialized);
    assert!(!rig.sensor.is_connected());
    assert_eq!(rig.sensor.address(), CACHED);
    assert_eq!(rig.sensor.channel(), 4);
}

#[test]
fn init_seeds_filters_with_second_reading() {
    let mut rig = rig(Some(30.0));
    rig.bus.script([Some(18.0), Some(21.5)]);
    rig.init();

    assert!(rig.sensor.is_connected());
    assert_eq!(rig.sensor.read(), single(21.5));
    assert_eq!(rig.sensor.read_fast_filtered(), single(21.5));
    assert_eq!(rig.sensor.read_slow_filtered(), single(21.5));
    assert_eq!(rig.sensor.read_slope(), Single::ZERO);

    assert_eq!(rig.bus.resets, 1);
    assert_eq!(rig.bus.requests, 2);
    assert_eq!(rig.bus.resolution, Some(Resolution::Bits12));
    assert_eq!(rig.sensor.address(), ADDR);
    assert!(rig.diagnostics().is_empty());

    // Two conversions of 750ms each
    assert!(rig.clock.millis() >= 1500);
}

#[test]
fn init_polls_until_first_valid_reading() {
    let mut rig = rig(Some(30.0));
    rig.bus.script([None, None, None, Some(18.0), Some(19.0)]);
    rig.init();

    assert!(rig.sensor.is_connected());
    assert_eq!(rig.bus.reads, 5);
    assert_eq!(rig.sensor.read(), single(19.0));
}

#[test]
fn init_times_out_without_touching_filters() {
    let mut rig = rig(None);
    rig.init();

    assert_eq!(rig.sensor.state(), State::Disconnected);
    assert!(!rig.sensor.is_connected());
    assert_eq!(rig.sensor.read(), Single::ZERO);
    assert_eq!(rig.sensor.read_slow_filtered(), Single::ZERO);

    // Gave up only once the timeout had passed, without a second conversion
    assert!(rig.clock.millis() > 2000);
    assert!(rig.clock.millis() < 2100);
    assert_eq!(rig.bus.requests, 1);

    // Failing to connect is not a disconnect
    assert!(rig.diagnostics().is_empty());
}

#[test]
fn init_treats_invalid_second_reading_as_timeout() {
    let mut rig = rig(None);
    rig.bus.script([Some(20.0), None]);
    rig.init();

    assert_eq!(rig.sensor.state(), State::Disconnected);
    assert_eq!(rig.sensor.read(), Single::ZERO);
}

#[test]
fn missing_address_falls_back_to_cached() {
    let mut rig = rig(Some(20.0));
    rig.bus.address = None;
    rig.init();

    assert!(rig.sensor.is_connected());
    assert_eq!(rig.sensor.address(), CACHED);
    assert_eq!(
        rig.diagnostics(),
        [Diagnostic::AddressNotFound {
            channel: 4,
            cached: CACHED
        }]
    );
}

#[test]
fn update_feeds_fast_and_slow_filters() {
    let mut rig = rig(Some(20.0));
    rig.init();

    rig.bus.set_fallback(Some(24.0));
    rig.tick();

    assert_eq!(rig.sensor.read(), single(24.0));
    let fast = rig.sensor.read_fast_filtered();
    let slow = rig.sensor.read_slow_filtered();
    assert!(fast > single(20.0) && fast < single(24.0));
    assert!(slow > single(20.0) && slow < fast);

    for _ in 0..300 {
        rig.tick();
    }
    assert!(single(24.0) - rig.sensor.read_fast_filtered() <= Single::DELTA);
    assert!(single(24.0) - rig.sensor.read_slow_filtered() <= Single::DELTA);
}

#[test]
fn update_saturates_out_of_range_readings() {
    let mut rig = counting_rig(Some(20.0));
    rig.init();

    rig.bus.set_fallback(Some(125.0));
    rig.tick();
    assert_eq!(rig.sensor.read(), Single::from_bits(1023 << 5));
}

#[test]
fn update_requests_next_conversion() {
    let mut rig = rig(Some(20.0));
    rig.init();
    let requests = rig.bus.requests;

    rig.tick();
    assert_eq!(rig.bus.requests, requests + 1);
    rig.tick();
    assert_eq!(rig.bus.requests, requests + 2);
}

#[test]
fn stale_request_is_renewed_before_reading() {
    let mut rig = rig(Some(20.0));
    rig.init();
    let requests = rig.bus.requests;
    let before = rig.clock.millis();

    rig.clock.advance(5001);
    rig.update();

    // One to refresh, one for the next tick
    assert_eq!(rig.bus.requests, requests + 2);
    assert!(rig.clock.millis() - before >= 5001 + 750);
}

#[test]
fn disconnect_keeps_last_estimates() {
    let mut rig = rig(Some(20.0));
    rig.init();
    rig.bus.set_fallback(Some(22.0));
    for _ in 0..10 {
        rig.tick();
    }
    let before = rig.sensor.reading();

    rig.bus.set_fallback(None);
    rig.tick();
    assert_eq!(rig.sensor.state(), State::Disconnected);
    assert_eq!(rig.sensor.reading(), before);
    assert_eq!(rig.diagnostics(), [Diagnostic::Disconnected { channel: 4 }]);

    // Only the transition is reported
    rig.tick();
    rig.tick();
    assert_eq!(rig.sensor.reading(), before);
    assert_eq!(rig.diagnostics().len(), 1);
}

#[test]
fn reconnect_reinitializes_instead_of_resuming() {
    let mut rig = rig(Some(20.0));
    rig.init();
    for _ in 0..40 {
        rig.tick();
    }
    rig.bus.set_fallback(None);
    rig.tick();
    assert!(!rig.sensor.is_connected());

    rig.bus.set_fallback(Some(30.0));
    let resets = rig.bus.resets;
    let before = rig.clock.millis();
    rig.tick();

    assert!(rig.sensor.is_connected());
    assert_eq!(rig.bus.resets, resets + 1);
    // Settle time plus two conversions
    assert!(rig.clock.millis() - before >= 1000 + 2000 + 2 * 750);

    // Seeded from the new reading, not blended with the old history
    assert_eq!(rig.sensor.read(), single(30.0));
    assert_eq!(rig.sensor.read_fast_filtered(), single(30.0));
    assert_eq!(rig.sensor.read_slow_filtered(), single(30.0));
    assert_eq!(rig.sensor.read_slope(), Single::ZERO);
    assert_eq!(
        rig.diagnostics(),
        [
            Diagnostic::Disconnected { channel: 4 },
            Diagnostic::Reconnected { channel: 4 }
        ]
    );
}

#[test]
fn failed_reconnect_stays_disconnected() {
    let mut rig = rig(Some(20.0));
    rig.init();
    rig.tick();
    let before = rig.sensor.reading();

    rig.bus.set_fallback(None);
    rig.tick();

    // A single valid reading, then the probe is gone again
    rig.bus.script([Some(25.0)]);
    rig.tick();

    assert_eq!(rig.sensor.state(), State::Disconnected);
    assert_eq!(rig.sensor.reading(), before);
    assert_eq!(rig.diagnostics(), [Diagnostic::Disconnected { channel: 4 }]);
}

#[test]
fn update_before_init_acquires_the_probe() {
    let mut rig = rig(Some(20.0));
    rig.update();

    assert!(rig.sensor.is_connected());
    assert_eq!(rig.sensor.read(), single(20.0));
    assert!(rig.diagnostics().is_empty());
}

#[test]
fn slope_gets_one_delta_per_thirty_updates() {
    let mut rig = counting_rig(Some(20.0));
    rig.init();
    let doubles = rig.sensor.slope_filter().doubles.clone();

    for _ in 0..30 {
        rig.tick();
    }
    assert_eq!(doubles.get(), 0);

    rig.tick();
    assert_eq!(doubles.get(), 1);

    for _ in 0..29 {
        rig.tick();
    }
    assert_eq!(doubles.get(), 1);
    rig.tick();
    assert_eq!(doubles.get(), 2);
}

#[test]
fn slope_delta_skips_the_first_sample() {
    let mut rig = counting_rig(Some(20.0));
    rig.init();

    // The jump right after init is the reference, not part of the first delta
    rig.bus.set_fallback(Some(21.0));
    rig.tick();
    for _ in 0..29 {
        rig.tick();
    }
    rig.bus.set_fallback(Some(21.5));
    rig.tick();

    assert_eq!(rig.sensor.slope_filter().read_output_double(), Double::from_num(0.5));
    assert_eq!(rig.sensor.read_slope(), single(60.0));
}

#[test]
fn disconnect_pauses_slope_decimation() {
    let mut rig = counting_rig(Some(20.0));
    rig.init();
    let doubles = rig.sensor.slope_filter().doubles.clone();

    for _ in 0..20 {
        rig.tick();
    }
    rig.bus.set_fallback(None);
    for _ in 0..20 {
        rig.tick();
    }
    assert_eq!(doubles.get(), 0);

    // Reconnecting restarts decimation from scratch
    rig.bus.set_fallback(Some(20.0));
    for _ in 0..30 {
        rig.tick();
    }
    assert_eq!(doubles.get(), 0);
    rig.tick();
    assert_eq!(doubles.get(), 1);
}

#[test]
fn read_slope_scales_to_degrees_per_hour() {
    let mut rig = counting_rig(Some(20.0));
    rig.init();

    rig.sensor
        .slope_filter()
        .output
        .set(Double::from_bits(1 << 16));
    assert_eq!(rig.sensor.read_slope(), Single::from_bits(120));
}

#[test]
fn slope_scale_follows_config() {
    let clock = SimClock::default();
    let mut sensor: Sensor<CountingFilter> =
        TempSensor::new(CACHED, 4, clock.clone(), Recorder::default())
            .with_config(Config::for_tick_period(Duration::millis(2000)));
    let mut bus = SimBus::new(&clock, Some(20.0));
    sensor.init(&mut bus, &mut SimDelay(clock));

    sensor
        .slope_filter()
        .output
        .set(Double::from_bits(1 << 16));
    assert_eq!(sensor.read_slope(), Single::from_bits(60));
}

#[test]
fn queries_have_no_side_effects() {
    let mut rig = rig(Some(20.0));
    rig.init();
    rig.bus.set_fallback(Some(21.0));
    for _ in 0..5 {
        rig.tick();
    }
    let state = rig.sensor.state();
    let reading = rig.sensor.reading();
    let reads = rig.bus.reads;

    for _ in 0..3 {
        assert_eq!(rig.sensor.read(), reading.raw);
        assert_eq!(rig.sensor.read_fast_filtered(), reading.fast);
        assert_eq!(rig.sensor.read_slow_filtered(), reading.slow);
        assert_eq!(rig.sensor.read_slope(), reading.slope);
        assert_eq!(rig.sensor.detect_pos_peak(), reading.pos_peak);
        assert_eq!(rig.sensor.detect_neg_peak(), reading.neg_peak);
        assert!(rig.sensor.is_connected());
    }
    assert_eq!(rig.sensor.state(), state);
    assert_eq!(rig.bus.reads, reads);
}

#[test]
fn queries_work_while_disconnected() {
    let mut rig = rig(None);
    rig.init();
    let reading = rig.sensor.reading();
    assert_eq!(reading.raw, Single::ZERO);
    assert_eq!(reading.pos_peak, None);
    assert_eq!(rig.sensor.state(), State::Disconnected);
}

#[test]
fn peaks_come_from_the_slow_filter() {
    let mut rig = rig(Some(20.0));
    rig.sensor.set_slow_filter_coefficients(FilterCoefficients::new(0, 0));
    rig.init();
    assert_eq!(rig.sensor.detect_pos_peak(), None);
    assert_eq!(rig.sensor.detect_neg_peak(), None);

    for t in [21.0, 23.0, 22.0, 19.0, 20.0] {
        rig.bus.set_fallback(Some(t));
        rig.tick();
    }
    assert_eq!(rig.sensor.detect_pos_peak(), Some(single(23.0)));
    assert_eq!(rig.sensor.detect_neg_peak(), Some(single(19.0)));
}

#[test]
fn coefficient_setters_reach_each_filter() {
    let mut rig = rig(Some(20.0));
    assert_eq!(
        rig.sensor.fast_filter().coefficients(),
        Config::DEFAULT.fast_coefficients
    );

    rig.sensor.set_fast_filter_coefficients(0x0102_u16);
    rig.sensor.set_slow_filter_coefficients(FilterCoefficients::new(5, 6));
    rig.sensor.set_slope_filter_coefficients(0x0708_u16);

    assert_eq!(rig.sensor.fast_filter().coefficients(), FilterCoefficients::new(1, 2));
    assert_eq!(rig.sensor.slow_filter().coefficients(), FilterCoefficients::new(5, 6));
    assert_eq!(rig.sensor.slope_filter().coefficients(), FilterCoefficients::new(7, 8));
}

#[test]
fn survives_clock_wraparound() {
    let mut rig = rig(Some(20.0));
    rig.clock.advance(u32::MAX - 1000);
    rig.init();
    assert!(rig.sensor.is_connected());

    let requests = rig.bus.requests;
    for _ in 0..5 {
        rig.tick();
    }
    // No spurious refreshes across the wrap
    assert_eq!(rig.bus.requests, requests + 5);
    assert!(rig.sensor.is_connected());
}
