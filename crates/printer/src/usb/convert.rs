//! Conversions from rusb types
//!
//! Maps libusb errors and endpoint descriptors onto the backend-neutral
//! types the manager works with.

use protocol::{EndpointDirection, EndpointInfo, TransferKind, UsbError};

/// Map rusb::Error to protocol::UsbError
pub fn map_rusb_error(err: rusb::Error) -> UsbError {
    match err {
        rusb::Error::Timeout => UsbError::Timeout,
        rusb::Error::Pipe => UsbError::Pipe,
        rusb::Error::NoDevice => UsbError::NoDevice,
        rusb::Error::NotFound => UsbError::NotFound,
        rusb::Error::Busy => UsbError::Busy,
        rusb::Error::Overflow => UsbError::Overflow,
        rusb::Error::Io => UsbError::Io,
        rusb::Error::InvalidParam => UsbError::InvalidParam,
        rusb::Error::Access => UsbError::Access,
        _ => UsbError::Other {
            message: err.to_string(),
        },
    }
}

pub fn map_direction(direction: rusb::Direction) -> EndpointDirection {
    match direction {
        rusb::Direction::In => EndpointDirection::In,
        rusb::Direction::Out => EndpointDirection::Out,
    }
}

pub fn map_transfer_type(transfer_type: rusb::TransferType) -> TransferKind {
    match transfer_type {
        rusb::TransferType::Control => TransferKind::Control,
        rusb::TransferType::Isochronous => TransferKind::Isochronous,
        rusb::TransferType::Bulk => TransferKind::Bulk,
        rusb::TransferType::Interrupt => TransferKind::Interrupt,
    }
}

pub fn endpoint_info(endpoint: &rusb::EndpointDescriptor<'_>) -> EndpointInfo {
    EndpointInfo {
        address: endpoint.address(),
        direction: map_direction(endpoint.direction()),
        kind: map_transfer_type(endpoint.transfer_type()),
        max_packet_size: endpoint.max_packet_size(),
    }
}

/// Platform device number: bus in the high byte, address in the low byte
pub fn device_number(bus: u8, address: u8) -> u32 {
    (u32::from(bus) << 8) | u32::from(address)
}

/// usbfs path of a device
pub fn device_path(bus: u8, address: u8) -> String {
    format!("/dev/bus/usb/{:03}/{:03}", bus, address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_rusb_error() {
        assert_eq!(map_rusb_error(rusb::Error::Timeout), UsbError::Timeout);
        assert_eq!(map_rusb_error(rusb::Error::Pipe), UsbError::Pipe);
        assert_eq!(map_rusb_error(rusb::Error::NoDevice), UsbError::NoDevice);
        assert_eq!(map_rusb_error(rusb::Error::Access), UsbError::Access);
        assert!(matches!(
            map_rusb_error(rusb::Error::NotSupported),
            UsbError::Other { .. }
        ));
    }

    #[test]
    fn test_map_endpoint_attributes() {
        assert_eq!(map_direction(rusb::Direction::Out), EndpointDirection::Out);
        assert_eq!(
            map_transfer_type(rusb::TransferType::Bulk),
            TransferKind::Bulk
        );
        assert_eq!(
            map_transfer_type(rusb::TransferType::Interrupt),
            TransferKind::Interrupt
        );
    }

    #[test]
    fn test_device_number_and_path() {
        assert_eq!(device_number(1, 4), 260);
        assert_eq!(device_number(3, 0x7f), 0x037f);
        assert_eq!(device_path(1, 4), "/dev/bus/usb/001/004");
    }
}
