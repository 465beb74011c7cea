//! usb-printer core
//!
//! Streams raw print data to a USB printer over its bulk OUT endpoint.
//! The `DeviceConnectionManager` owns the single device session; the
//! `Dispatcher` exposes it to a host application; `usb` holds the libusb
//! backend and the background transfer worker.

pub mod config;
pub mod dispatch;
pub mod events;
pub mod manager;
pub mod usb;

pub use dispatch::{Dispatcher, decode_base64};
pub use events::spawn_event_pump;
pub use manager::{ConnectionState, DeviceConnectionManager, ManagerSettings};
