//! Platform USB seams
//!
//! The connection manager never talks to a USB stack directly. It goes
//! through these two traits so that the libusb backend, an OS-mediated
//! backend with real permission prompts, and the test doubles are
//! interchangeable.

use protocol::{DeviceDescriptor, EndpointInfo, PermissionTicket, UsbError};
use std::time::Duration;

/// Platform USB subsystem
///
/// Enumerates devices, mediates access permission and opens raw handles.
pub trait UsbSubsystem: Send + Sync {
    /// Snapshot of the currently attached devices, in platform order
    fn devices(&self) -> Result<Vec<DeviceDescriptor>, UsbError>;

    /// Ask the platform to prompt for access to `device`
    ///
    /// Returns once the prompt has been issued. The outcome is delivered
    /// later as `PlatformEvent::PermissionResolved` carrying `ticket`.
    fn request_permission(
        &self,
        device: &DeviceDescriptor,
        ticket: PermissionTicket,
    ) -> Result<(), UsbError>;

    /// Endpoints of `interface` (first alternate setting)
    fn interface_endpoints(
        &self,
        device: &DeviceDescriptor,
        interface: u8,
    ) -> Result<Vec<EndpointInfo>, UsbError>;

    /// Open a raw handle to `device`
    fn open(&self, device: &DeviceDescriptor) -> Result<Box<dyn DeviceLink>, UsbError>;
}

/// An open device handle
///
/// Dropping the link closes the handle.
pub trait DeviceLink: Send + Sync {
    /// Claim `interface` for exclusive use
    ///
    /// With `force`, a kernel driver or other holder is detached first.
    fn claim_interface(&mut self, interface: u8, force: bool) -> Result<(), UsbError>;

    /// Release a previously claimed interface
    fn release_interface(&mut self, interface: u8) -> Result<(), UsbError>;

    /// Write `data` to a bulk OUT endpoint, returning the number of bytes sent
    fn bulk_out(&self, endpoint: u8, data: &[u8], timeout: Duration) -> Result<usize, UsbError>;
}
