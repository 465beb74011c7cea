//! Test utilities for usb-printer
//!
//! Provides in-memory implementations of the platform seams so the
//! connection manager can be driven deterministically in tests.
//!
//! # Example
//!
//! ```
//! use common::UsbSubsystem;
//! use common::test_utils::{MockSubsystem, create_mock_descriptor};
//!
//! let subsystem = MockSubsystem::new();
//! subsystem.add_printer(create_mock_descriptor(1, 1234, 5678));
//!
//! let devices = subsystem.devices().unwrap();
//! assert_eq!(devices.len(), 1);
//! assert_eq!(devices[0].vendor_id, 1234);
//! ```

use crate::notify::{Notice, NotificationSink};
use crate::usb_types::{DeviceLink, UsbSubsystem};
use protocol::{
    DeviceDescriptor, EndpointDirection, EndpointInfo, PermissionTicket, TransferKind, UsbError,
};
use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a mock DeviceDescriptor for testing
///
/// # Example
/// ```
/// use common::test_utils::create_mock_descriptor;
///
/// let device = create_mock_descriptor(7, 0x04b8, 0x0202);
/// assert_eq!(device.device_id, 7);
/// assert_eq!(device.device_name, "/dev/bus/usb/001/007");
/// ```
pub fn create_mock_descriptor(device_id: u32, vendor_id: u16, product_id: u16) -> DeviceDescriptor {
    DeviceDescriptor {
        vendor_id,
        product_id,
        device_id,
        device_name: format!("/dev/bus/usb/001/{:03}", device_id),
        manufacturer_name: Some(format!("Test Manufacturer {}", device_id)),
        product_name: Some(format!("Test Printer {}", device_id)),
    }
}

/// Endpoint layout of a typical printer interface: bulk OUT 0x01, bulk IN 0x82
pub fn printer_endpoints() -> Vec<EndpointInfo> {
    vec![
        EndpointInfo {
            address: 0x82,
            direction: EndpointDirection::In,
            kind: TransferKind::Bulk,
            max_packet_size: 64,
        },
        EndpointInfo {
            address: 0x01,
            direction: EndpointDirection::Out,
            kind: TransferKind::Bulk,
            max_packet_size: 64,
        },
    ]
}

/// Endpoint layout with no bulk OUT endpoint (HID-style)
pub fn interrupt_only_endpoints() -> Vec<EndpointInfo> {
    vec![
        EndpointInfo {
            address: 0x81,
            direction: EndpointDirection::In,
            kind: TransferKind::Interrupt,
            max_packet_size: 8,
        },
        EndpointInfo {
            address: 0x02,
            direction: EndpointDirection::Out,
            kind: TransferKind::Interrupt,
            max_packet_size: 8,
        },
    ]
}

/// A bulk transfer observed by a `MockLink`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedTransfer {
    pub device_id: u32,
    pub endpoint: u8,
    pub data: Vec<u8>,
    pub timeout: Duration,
}

#[derive(Default)]
struct MockState {
    devices: Vec<DeviceDescriptor>,
    endpoints: HashMap<u32, Vec<EndpointInfo>>,
    permission_requests: Vec<PermissionTicket>,
    opens: u32,
    claims: Vec<(u32, u8, bool)>,
    releases: Vec<(u32, u8)>,
    closes: u32,
    fail_enumeration: bool,
    fail_claim: bool,
    fail_transfers: bool,
    transfer_delay: Duration,
}

/// In-memory `UsbSubsystem`
///
/// Cloning shares the underlying state, so a test can keep a handle for
/// inspection after moving one into the manager.
#[derive(Clone)]
pub struct MockSubsystem {
    state: Arc<Mutex<MockState>>,
    transfer_tx: Arc<Mutex<mpsc::Sender<RecordedTransfer>>>,
    transfer_rx: Arc<Mutex<mpsc::Receiver<RecordedTransfer>>>,
}

impl Default for MockSubsystem {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSubsystem {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            transfer_tx: Arc::new(Mutex::new(tx)),
            transfer_rx: Arc::new(Mutex::new(rx)),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Attach a device with a printer-style endpoint layout
    pub fn add_printer(&self, device: DeviceDescriptor) {
        self.add_device(device, printer_endpoints());
    }

    /// Attach a device with an explicit interface 0 endpoint layout
    pub fn add_device(&self, device: DeviceDescriptor, endpoints: Vec<EndpointInfo>) {
        let mut state = self.state();
        state.endpoints.insert(device.device_id, endpoints);
        state.devices.push(device);
    }

    /// Unplug every device matching the vendor/product pair
    pub fn remove_device(&self, vendor_id: u16, product_id: u16) {
        self.state()
            .devices
            .retain(|d| !d.matches(vendor_id, product_id));
    }

    pub fn set_fail_enumeration(&self, fail: bool) {
        self.state().fail_enumeration = fail;
    }

    pub fn set_fail_claim(&self, fail: bool) {
        self.state().fail_claim = fail;
    }

    pub fn set_fail_transfers(&self, fail: bool) {
        self.state().fail_transfers = fail;
    }

    /// Make every bulk transfer sleep before completing
    pub fn set_transfer_delay(&self, delay: Duration) {
        self.state().transfer_delay = delay;
    }

    /// Permission prompts issued so far
    pub fn permission_requests(&self) -> Vec<PermissionTicket> {
        self.state().permission_requests.clone()
    }

    /// The most recent permission prompt
    pub fn last_ticket(&self) -> Option<PermissionTicket> {
        self.state().permission_requests.last().copied()
    }

    /// Number of raw handles opened
    pub fn open_count(&self) -> u32 {
        self.state().opens
    }

    /// Number of raw handles closed (dropped)
    pub fn close_count(&self) -> u32 {
        self.state().closes
    }

    /// Interface claims as (device_id, interface, force)
    pub fn claims(&self) -> Vec<(u32, u8, bool)> {
        self.state().claims.clone()
    }

    /// Interface releases as (device_id, interface)
    pub fn releases(&self) -> Vec<(u32, u8)> {
        self.state().releases.clone()
    }

    /// Wait for the next completed bulk transfer
    pub fn next_transfer(&self, timeout: Duration) -> Option<RecordedTransfer> {
        self.transfer_rx.lock().unwrap().recv_timeout(timeout).ok()
    }
}

impl UsbSubsystem for MockSubsystem {
    fn devices(&self) -> Result<Vec<DeviceDescriptor>, UsbError> {
        let state = self.state();
        if state.fail_enumeration {
            return Err(UsbError::Io);
        }
        Ok(state.devices.clone())
    }

    fn request_permission(
        &self,
        _device: &DeviceDescriptor,
        ticket: PermissionTicket,
    ) -> Result<(), UsbError> {
        self.state().permission_requests.push(ticket);
        Ok(())
    }

    fn interface_endpoints(
        &self,
        device: &DeviceDescriptor,
        interface: u8,
    ) -> Result<Vec<EndpointInfo>, UsbError> {
        if interface != 0 {
            return Err(UsbError::NotFound);
        }
        self.state()
            .endpoints
            .get(&device.device_id)
            .cloned()
            .ok_or(UsbError::NoDevice)
    }

    fn open(&self, device: &DeviceDescriptor) -> Result<Box<dyn DeviceLink>, UsbError> {
        let mut state = self.state();
        if !state.devices.iter().any(|d| d.device_id == device.device_id) {
            return Err(UsbError::NoDevice);
        }
        state.opens += 1;
        drop(state);

        Ok(Box::new(MockLink {
            device_id: device.device_id,
            state: Arc::clone(&self.state),
            transfer_tx: self.transfer_tx.lock().unwrap().clone(),
        }))
    }
}

/// Raw handle produced by `MockSubsystem::open`
pub struct MockLink {
    device_id: u32,
    state: Arc<Mutex<MockState>>,
    transfer_tx: mpsc::Sender<RecordedTransfer>,
}

impl DeviceLink for MockLink {
    fn claim_interface(&mut self, interface: u8, force: bool) -> Result<(), UsbError> {
        let mut state = self.state.lock().unwrap();
        state.claims.push((self.device_id, interface, force));
        if state.fail_claim {
            return Err(UsbError::Busy);
        }
        Ok(())
    }

    fn release_interface(&mut self, interface: u8) -> Result<(), UsbError> {
        self.state
            .lock()
            .unwrap()
            .releases
            .push((self.device_id, interface));
        Ok(())
    }

    fn bulk_out(&self, endpoint: u8, data: &[u8], timeout: Duration) -> Result<usize, UsbError> {
        let (delay, fail) = {
            let state = self.state.lock().unwrap();
            (state.transfer_delay, state.fail_transfers)
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if fail {
            return Err(UsbError::NoDevice);
        }

        let _ = self.transfer_tx.send(RecordedTransfer {
            device_id: self.device_id,
            endpoint,
            data: data.to_vec(),
            timeout,
        });
        Ok(data.len())
    }
}

impl Drop for MockLink {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.closes += 1;
        }
    }
}

/// Sink that keeps every notice for later assertions
#[derive(Clone, Default)]
pub struct RecordingSink {
    notices: Arc<Mutex<Vec<Notice>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every notice received so far
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    /// Whether a notice equal to `notice` was received
    pub fn contains(&self, notice: &Notice) -> bool {
        self.notices.lock().unwrap().iter().any(|n| n == notice)
    }

    /// Notices that report failures
    pub fn failures(&self) -> Vec<Notice> {
        self.notices()
            .into_iter()
            .filter(Notice::is_failure)
            .collect()
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }
}
