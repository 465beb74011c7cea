//! USB type definitions
//!
//! Immutable snapshots of what the platform reports about attached devices.
//! None of these types hold a live platform handle.

use serde::{Deserialize, Serialize};

/// Snapshot of an attached USB device
///
/// Re-fetched on every enumeration and never cached beyond the call that
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// Platform-assigned device number
    pub device_id: u32,
    /// Platform device path or name
    pub device_name: String,
    /// Manufacturer string (if readable)
    pub manufacturer_name: Option<String>,
    /// Product string (if readable)
    pub product_name: Option<String>,
}

impl DeviceDescriptor {
    /// Whether this device carries the given vendor/product pair
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

/// Endpoint transfer direction, from the host's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointDirection {
    /// Device to host
    In,
    /// Host to device
    Out,
}

/// Endpoint transfer mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// One endpoint of an interface's first alternate setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointInfo {
    /// Endpoint address including the direction bit
    pub address: u8,
    pub direction: EndpointDirection,
    pub kind: TransferKind,
    pub max_packet_size: u16,
}

impl EndpointInfo {
    /// Bulk transfer in the host-to-device direction
    pub fn is_bulk_out(&self) -> bool {
        self.kind == TransferKind::Bulk && self.direction == EndpointDirection::Out
    }
}

/// Correlates an in-flight permission prompt with the device that triggered it
///
/// The platform echoes the ticket back with the outcome. The vendor/product
/// pair lets the outcome be resolved against a fresh enumeration, since a
/// device handle may not survive the round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionTicket {
    /// Monotonic request number; a newer request supersedes older ones
    pub id: u64,
    pub vendor_id: u16,
    pub product_id: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(kind: TransferKind, direction: EndpointDirection) -> EndpointInfo {
        EndpointInfo {
            address: if direction == EndpointDirection::In { 0x81 } else { 0x01 },
            direction,
            kind,
            max_packet_size: 64,
        }
    }

    #[test]
    fn test_is_bulk_out() {
        assert!(endpoint(TransferKind::Bulk, EndpointDirection::Out).is_bulk_out());
        assert!(!endpoint(TransferKind::Bulk, EndpointDirection::In).is_bulk_out());
        assert!(!endpoint(TransferKind::Interrupt, EndpointDirection::Out).is_bulk_out());
    }

    #[test]
    fn test_descriptor_matches() {
        let device = DeviceDescriptor {
            vendor_id: 0x04b8,
            product_id: 0x0202,
            device_id: 1,
            device_name: "printer".to_string(),
            manufacturer_name: None,
            product_name: None,
        };

        assert!(device.matches(0x04b8, 0x0202));
        assert!(!device.matches(0x04b8, 0x0203));
        assert!(!device.matches(0x04b9, 0x0202));
    }
}
