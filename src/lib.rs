//! Acquisition and conditioning of a single DS18B20 temperature probe.
//!
//! [`TempSensor`] owns the probe's lifecycle: it requests conversions, detects disconnects,
//! re-acquires the probe when it answers again and feeds every valid sample through a fast and a
//! slow [`FilterStage`]. Every 30 samples the change of the slow filter's output is fed to a third
//! filter, from which a per-hour slope is derived.
//!
//! All arithmetic is fixed point. See [`fixed_point`] for the representations used.
#![cfg_attr(not(test), no_std)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

// Must come first so the logging macros are visible to the other modules.
mod fmt;

pub mod config;
pub mod diagnostics;
pub mod ds18b20;
pub mod filter;
pub mod fixed_point;
pub mod onewire;
pub mod probe;
pub mod sensor;
pub mod slope;

pub use self::{
    config::Config,
    diagnostics::{Diagnostic, DiagnosticSink, LogSink},
    ds18b20::{Ds18b20Probe, Resolution},
    filter::{FilterCoefficients, FilterStage, LowPassFilter},
    fixed_point::{rescale_and_saturate, Double, RawTemperature, Single},
    onewire::Address,
    probe::{Clock, Instant, ProbeBus},
    sensor::{Reading, State, TempSensor},
};
