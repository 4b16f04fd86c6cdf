//! Interfaces to the probe hardware and the system clock.

use embedded_hal::blocking::delay::DelayUs;

use crate::{ds18b20::Resolution, fixed_point::RawTemperature, onewire::Address};

/// Millisecond instant from a wrapping 32-bit counter.
pub type Instant = fugit::TimerInstantU32<1_000>;

/// Millisecond duration.
pub type Duration = fugit::MillisDurationU32;

/// Monotonic millisecond clock.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// Bus with a temperature probe on it.
///
/// Implementations report failures through their return values only; none of these operations
/// may panic. Bit timing is driven by the `delay` passed in, so several probes can share one
/// transport and delay.
pub trait ProbeBus {
    /// Issues a bus reset.
    fn reset(&mut self, delay: &mut impl DelayUs<u32>);

    /// Looks up the address of the `index`th device on the bus.
    fn address(&mut self, index: usize, delay: &mut impl DelayUs<u32>) -> Option<Address>;

    /// Configures the conversion resolution of the device at `address`.
    fn set_resolution(
        &mut self,
        address: Address,
        resolution: Resolution,
        delay: &mut impl DelayUs<u32>,
    );

    /// Starts a conversion on all devices on the bus.
    fn request_conversion(&mut self, delay: &mut impl DelayUs<u32>);

    /// Reads the last converted temperature of the device at `address`.
    ///
    /// Returns `None` if there is no valid reading, because the device is disconnected or has not
    /// finished converting.
    fn read_raw(
        &mut self,
        address: Address,
        delay: &mut impl DelayUs<u32>,
    ) -> Option<RawTemperature>;
}
