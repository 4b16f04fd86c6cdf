//! Diagnostic events reported by [`TempSensor`](crate::TempSensor).

use crate::onewire::Address;

/// Something an operator should know about a probe.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Diagnostic {
    /// No device was found at the expected bus index, the cached address is used instead.
    AddressNotFound { channel: u8, cached: Address },
    /// A connected probe stopped answering.
    Disconnected { channel: u8 },
    /// A disconnected probe answered again and was re-initialized.
    Reconnected { channel: u8 },
}

impl Diagnostic {
    pub const fn channel(&self) -> u8 {
        match *self {
            Self::AddressNotFound { channel, .. }
            | Self::Disconnected { channel }
            | Self::Reconnected { channel } => channel,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AddressNotFound { .. } => "Unable to find address for sensor",
            Self::Disconnected { .. } => "Temperature sensor disconnected",
            Self::Reconnected { .. } => "Temperature sensor reconnected",
        }
    }
}

/// Receiver of [`Diagnostic`]s.
///
/// Emitting is fire-and-forget: implementations must not block and cannot fail.
pub trait DiagnosticSink {
    fn emit(&mut self, diagnostic: Diagnostic);
}

impl<T: DiagnosticSink + ?Sized> DiagnosticSink for &mut T {
    fn emit(&mut self, diagnostic: Diagnostic) {
        (**self).emit(diagnostic);
    }
}

/// Discards all diagnostics.
impl DiagnosticSink for () {
    fn emit(&mut self, _: Diagnostic) {}
}

/// Writes diagnostics to the debug log.
#[derive(Debug, Default, Copy, Clone)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn emit(&mut self, diagnostic: Diagnostic) {
        match diagnostic {
            Diagnostic::AddressNotFound { channel, cached } => {
                warn!("{} on channel {=u8}, using {}", diagnostic.as_str(), channel, cached);
            }
            Diagnostic::Disconnected { channel } | Diagnostic::Reconnected { channel } => {
                info!("{} on channel {=u8}", diagnostic.as_str(), channel);
            }
        }
    }
}
