//! Dispatcher message definitions
//!
//! The host application talks to the printer core through these calls. The
//! method names and field names mirror what existing host integrations send.

use crate::types::DeviceDescriptor;
use serde::{Deserialize, Serialize};

/// Placeholder for string descriptors the platform could not provide
pub const UNKNOWN_STRING: &str = "unknown";

/// A call from the host application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum PrinterCall {
    /// Enumerate attached devices
    #[serde(rename = "getUSBDeviceList")]
    ListDevices,

    /// Select a device and request access to it
    #[serde(rename = "connect", rename_all = "camelCase")]
    Connect { vendor_id: i64, product_id: i64 },

    /// Close the active connection and forget the selected device
    #[serde(rename = "close")]
    Close,

    /// Send UTF-8 text
    #[serde(rename = "printText")]
    PrintText { text: String },

    /// Send base64-encoded binary
    #[serde(rename = "printRawText")]
    PrintRawText { raw: String },

    /// Send raw bytes
    #[serde(rename = "write")]
    Write { data: Vec<u8> },
}

impl PrinterCall {
    /// Method name as it appears on the wire
    pub fn method(&self) -> &'static str {
        match self {
            PrinterCall::ListDevices => "getUSBDeviceList",
            PrinterCall::Connect { .. } => "connect",
            PrinterCall::Close => "close",
            PrinterCall::PrintText { .. } => "printText",
            PrinterCall::PrintRawText { .. } => "printRawText",
            PrinterCall::Write { .. } => "write",
        }
    }
}

/// Result of a successful call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
    Devices(Vec<DeviceListing>),
    Bool(bool),
}

/// Device entry as handed to the host application
///
/// Every field is a string. Numeric ids are rendered in decimal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceListing {
    pub device_name: String,
    pub manufacturer: String,
    pub product_name: String,
    pub device_id: String,
    pub vendor_id: String,
    pub product_id: String,
}

impl From<&DeviceDescriptor> for DeviceListing {
    fn from(device: &DeviceDescriptor) -> Self {
        Self {
            device_name: device.device_name.clone(),
            manufacturer: device
                .manufacturer_name
                .clone()
                .unwrap_or_else(|| UNKNOWN_STRING.to_string()),
            product_name: device
                .product_name
                .clone()
                .unwrap_or_else(|| UNKNOWN_STRING.to_string()),
            device_id: device.device_id.to_string(),
            vendor_id: device.vendor_id.to_string(),
            product_id: device.product_id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_method_names() {
        let json = r#"{"method":"connect","vendorId":1234,"productId":5678}"#;
        let call: PrinterCall = serde_json::from_str(json).unwrap();
        assert_eq!(
            call,
            PrinterCall::Connect {
                vendor_id: 1234,
                product_id: 5678
            }
        );
        assert_eq!(call.method(), "connect");

        let call: PrinterCall = serde_json::from_str(r#"{"method":"getUSBDeviceList"}"#).unwrap();
        assert_eq!(call, PrinterCall::ListDevices);

        let call: PrinterCall =
            serde_json::from_str(r#"{"method":"write","data":[27,64]}"#).unwrap();
        assert_eq!(call, PrinterCall::Write { data: vec![27, 64] });
    }

    #[test]
    fn test_unknown_method_rejected() {
        let result: Result<PrinterCall, _> = serde_json::from_str(r#"{"method":"reboot"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_listing_from_descriptor() {
        let device = DeviceDescriptor {
            vendor_id: 1208,
            product_id: 514,
            device_id: 260,
            device_name: "/dev/bus/usb/001/004".to_string(),
            manufacturer_name: Some("EPSON".to_string()),
            product_name: None,
        };

        let listing = DeviceListing::from(&device);
        assert_eq!(listing.device_name, "/dev/bus/usb/001/004");
        assert_eq!(listing.manufacturer, "EPSON");
        assert_eq!(listing.product_name, UNKNOWN_STRING);
        assert_eq!(listing.device_id, "260");
        assert_eq!(listing.vendor_id, "1208");
        assert_eq!(listing.product_id, "514");

        let json = serde_json::to_value(&listing).unwrap();
        assert_eq!(json["productName"], "unknown");
        assert_eq!(json["vendorId"], "1208");
    }

    #[test]
    fn test_reply_serialization() {
        assert_eq!(serde_json::to_string(&Reply::Bool(true)).unwrap(), "true");
        assert_eq!(serde_json::to_string(&Reply::Devices(vec![])).unwrap(), "[]");
    }
}
