#![no_std]
#![no_main]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::wildcard_imports)]

use defmt_rtt as _;
use panic_probe as _;
use rtic_tempsensor::Address;

/// Address of the probe, used if the bus search comes up empty.
const PROBE_ADDR: Address = Address(0x05_00_00_0F_83_FB_60_28);
/// Pin the probe's bus is on, for diagnostics.
const PROBE_CHANNEL: u8 = 12;

#[rtic::app(device = stm32f0xx_hal::pac, dispatchers = [USART1, TIM14])]
mod app {
    use defmt::{unreachable, *};
    use rtic_monotonics::{
        stm32::{Tim2 as Mono, *},
        Monotonic,
    };
    use rtic_sync::{
        channel::{ReceiveError, Receiver, Sender},
        make_channel,
    };
    use rtic_tempsensor::{
        onewire::OneWire, Clock, Ds18b20Probe, Instant, LogSink, Reading, TempSensor,
    };
    use stm32f0xx_hal::{
        delay::Delay,
        gpio::{OpenDrain, Output, Pin, PushPull},
        pac::IWDG,
        prelude::*,
        watchdog::Watchdog,
    };

    use crate::{PROBE_ADDR, PROBE_CHANNEL};

    /// Millisecond clock on top of the TIM2 monotonic.
    pub struct MonoClock;

    impl Clock for MonoClock {
        fn now(&self) -> Instant {
            // Wrapping to 32 bits is fine, instants are compared with wrapping arithmetic
            #[allow(clippy::cast_possible_truncation)]
            let ms = Mono::now().duration_since_epoch().to_millis() as u32;
            Instant::from_ticks(ms)
        }
    }

    type Probe = Ds18b20Probe<Pin<Output<OpenDrain>>>;
    type Sensor = TempSensor<MonoClock, LogSink>;

    #[shared]
    struct Shared {}

    #[local]
    struct Local {
        probe: Probe,
        sensor: Sensor,
        tx: Sender<'static, Reading, 1>,
    }

    #[init]
    fn init(mut cx: init::Context) -> (Shared, Local) {
        // Set system clock to 24 MHz
        let mut rcc = cx
            .device
            .RCC
            .configure()
            .hsi48()
            .sysclk(24.mhz())
            .pclk(24.mhz())
            .hclk(24.mhz())
            .freeze(&mut cx.device.FLASH);

        trace!("sysclk: {}", rcc.clocks.sysclk().0);

        // Enable tim2 monotonic
        let token = rtic_monotonics::create_stm32_tim2_monotonic_token!();
        Mono::start(24_000_000, token);

        // Setup systick delay, used for one-wire bit timing and conversion waits
        let delay = Delay::new(cx.core.SYST, &rcc);

        // Setup GPIO
        let gpioa = cx.device.GPIOA.split(&mut rcc);
        let gpiob = cx.device.GPIOB.split(&mut rcc);
        let pb3 = gpiob.pb3.into_push_pull_output(&cx.cs);

        let _ = blinky::spawn(pb3.downgrade());
        let _ = watchdog::spawn(cx.device.IWDG);

        // Setup DS18B20 bus
        let mut pa12 = gpioa.pa12.into_open_drain_output(&cx.cs);
        unwrap!(pa12.set_high());
        let probe = Ds18b20Probe::new(OneWire::new(pa12.downgrade()));

        let sensor = TempSensor::new(PROBE_ADDR, PROBE_CHANNEL, MonoClock, LogSink);
        info!("Sensor config: {}", sensor.config());

        // Setup channels
        let (tx, rx) = make_channel!(Reading, 1);

        let _ = acquire::spawn(delay);
        let _ = report::spawn(rx);

        (Shared {}, Local { probe, sensor, tx })
    }

    #[idle]
    fn idle(_: idle::Context) -> ! {
        loop {
            cortex_m::asm::wfi();
        }
    }

    #[task(priority = 1)]
    async fn blinky(_: blinky::Context, mut pin: Pin<Output<PushPull>>) {
        unwrap!(pin.set_low());
        let mut now = Mono::now();
        loop {
            unwrap!(pin.toggle());
            now += 500.millis();
            Mono::delay_until(now).await;
        }
    }

    // Preempts the acquisition task, which blocks for seconds while re-acquiring the probe
    #[task(priority = 2)]
    async fn watchdog(_: watchdog::Context, wdg: IWDG) {
        let mut wdg = Watchdog::new(wdg);
        wdg.start(1.hz());

        loop {
            wdg.feed();
            Mono::delay(100.millis()).await;
        }
    }

    /// Updates the sensor once per second
    #[task(priority = 1, local = [probe, sensor, tx])]
    async fn acquire(cx: acquire::Context, mut delay: Delay) {
        let probe = cx.local.probe;
        let sensor = cx.local.sensor;
        let tx = cx.local.tx;

        sensor.init(probe, &mut delay);
        if !sensor.is_connected() {
            warn!("Probe on channel {=u8} not found, retrying", PROBE_CHANNEL);
        }

        let mut now = Mono::now();
        loop {
            now += 1.secs();
            Mono::delay_until(now).await;

            sensor.update(probe, &mut delay);
            if sensor.is_connected() && tx.try_send(sensor.reading()).is_err() {
                trace!("Reporter busy, reading dropped");
            }
        }
    }

    #[task(priority = 1)]
    async fn report(_: report::Context, mut rx: Receiver<'static, Reading, 1>) {
        loop {
            let reading = match rx.recv().await {
                Ok(reading) => reading,
                Err(ReceiveError::Empty) => continue,
                Err(ReceiveError::NoSender) => unreachable!("Sender dropped"),
            };

            debug!(
                "Temperature: {=f32}, fast: {=f32}, slow: {=f32}, slope: {=f32}/h",
                reading.raw.to_num::<f32>(),
                reading.fast.to_num::<f32>(),
                reading.slow.to_num::<f32>(),
                reading.slope.to_num::<f32>(),
            );
            if let Some(peak) = reading.pos_peak {
                trace!("Last maximum: {=f32}", peak.to_num::<f32>());
            }
            if let Some(peak) = reading.neg_peak {
                trace!("Last minimum: {=f32}", peak.to_num::<f32>());
            }
        }
    }

    timestamp!("{=u64:us}", {
        Mono::now().duration_since_epoch().to_micros()
    });
}
