//! Shared types for usb-printer
//!
//! This crate defines the plain data exchanged between the platform USB
//! backend, the connection manager and the call dispatcher: device
//! descriptors, endpoint information, the failure taxonomy and the
//! dispatcher's call/reply messages.
//!
//! # Example
//!
//! ```
//! use protocol::{DeviceDescriptor, DeviceListing};
//!
//! let device = DeviceDescriptor {
//!     vendor_id: 1234,
//!     product_id: 5678,
//!     device_id: 1001,
//!     device_name: "/dev/bus/usb/001/002".to_string(),
//!     manufacturer_name: None,
//!     product_name: Some("Receipt Printer".to_string()),
//! };
//!
//! let listing = DeviceListing::from(&device);
//! assert_eq!(listing.vendor_id, "1234");
//! assert_eq!(listing.manufacturer, "unknown");
//! ```

pub mod error;
pub mod messages;
pub mod types;

pub use error::{CallError, ConnectError, UsbError};
pub use messages::{DeviceListing, PrinterCall, Reply, UNKNOWN_STRING};
pub use types::{
    DeviceDescriptor, EndpointDirection, EndpointInfo, PermissionTicket, TransferKind,
};
