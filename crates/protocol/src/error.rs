//! Error types
//!
//! `UsbError` is what the platform reports. `ConnectError` is the manager's
//! diagnostic taxonomy: every kind collapses to `false` at the operation
//! boundary but is surfaced to the notification sink first. `CallError` is
//! reserved for malformed caller input.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Platform-level USB failure
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum UsbError {
    #[error("transfer timed out")]
    Timeout,
    #[error("endpoint stalled")]
    Pipe,
    #[error("device disconnected")]
    NoDevice,
    #[error("entity not found")]
    NotFound,
    #[error("resource busy")]
    Busy,
    #[error("buffer overflow")]
    Overflow,
    #[error("I/O error")]
    Io,
    #[error("invalid parameter")]
    InvalidParam,
    #[error("access denied")]
    Access,
    #[error("{message}")]
    Other { message: String },
}

/// Why a selection or connection attempt failed
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ConnectError {
    #[error("no device with vendor_id {vendor_id} and product_id {product_id} is attached")]
    NotFound { vendor_id: u16, product_id: u16 },

    #[error("user refused to give USB device permissions for {device_name}")]
    PermissionDenied { device_name: String },

    #[error("{device_name} has no bulk output endpoint on interface {interface}")]
    NoSuitableEndpoint { device_name: String, interface: u8 },

    #[error("failed to claim interface {interface} of {device_name}: {source}")]
    ClaimFailed {
        device_name: String,
        interface: u8,
        source: UsbError,
    },

    #[error("failed to open {device_name}: {source}")]
    OpenFailed {
        device_name: String,
        source: UsbError,
    },

    #[error("no device selected")]
    NotConnected,

    #[error("USB subsystem is not available")]
    SubsystemUnavailable,
}

/// Malformed input from the caller
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum CallError {
    #[error("invalid base64 payload: {reason}")]
    InvalidBase64 { reason: String },
}
