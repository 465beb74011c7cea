//! Common utilities for usb-printer
//!
//! This crate provides the seams between the connection manager and the
//! outside world: the platform USB traits, the notification sink, the
//! platform event bridge, error handling, logging setup and test doubles.

pub mod channel;
pub mod error;
pub mod logging;
pub mod notify;
pub mod test_utils;
pub mod usb_types;

pub use channel::{EventReceiver, EventSender, PlatformEvent, create_event_bridge};
pub use error::{Error, Result};
pub use logging::setup_logging;
pub use notify::{LogSink, Notice, NotificationSink, NullSink};
pub use usb_types::{DeviceLink, UsbSubsystem};
