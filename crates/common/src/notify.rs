//! User-visible status notices
//!
//! The manager reports connection lifecycle and diagnostics through a
//! `NotificationSink`. A headless embedding can use `NullSink`; `LogSink`
//! routes notices to `tracing`.

use protocol::ConnectError;
use std::fmt;
use tracing::{info, warn};

/// Human-readable status surfaced to the user or operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A connection to the selected device was established
    DeviceConnected { device_name: String },
    /// Permission was granted and the device is now selected
    DeviceSelected { device_name: String },
    /// The selected device was unplugged or switched off
    DeviceDetached,
    /// Device enumeration was attempted without a USB subsystem
    SubsystemUnavailable,
    /// An operation failed; carries the specific kind
    Failure(ConnectError),
}

impl Notice {
    /// Whether this notice reports a failure
    pub fn is_failure(&self) -> bool {
        matches!(self, Notice::Failure(_) | Notice::SubsystemUnavailable)
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::DeviceConnected { device_name } => write!(f, "Device connected: {}", device_name),
            Notice::DeviceSelected { device_name } => {
                write!(f, "Permission granted for device {}", device_name)
            }
            Notice::DeviceDetached => write!(f, "USB device has been turned off"),
            Notice::SubsystemUnavailable => {
                write!(f, "USB manager is not initialized while getting device list")
            }
            Notice::Failure(err) => write!(f, "{}", err),
        }
    }
}

/// Receiver of user-visible notices
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Sink that reports notices through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, notice: Notice) {
        if notice.is_failure() {
            warn!(target: "usb_printer::notice", "{}", notice);
        } else {
            info!(target: "usb_printer::notice", "{}", notice);
        }
    }
}

/// Sink that discards every notice
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn notify(&self, _notice: Notice) {}
}
