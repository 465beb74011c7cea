//! libusb backend
//!
//! Implements the platform seams over `rusb`. Desktop libusb has no
//! interactive permission prompt, so a permission request probes whether the
//! device can be opened and reports that as the outcome. Detach
//! notifications come from libusb hot-plug callbacks, which only fire while
//! an event loop is running (see `spawn_event_loop`).

use crate::usb::convert::{device_number, device_path, endpoint_info, map_rusb_error};
use common::{DeviceLink, EventSender, PlatformEvent, UsbSubsystem};
use protocol::{DeviceDescriptor, EndpointInfo, PermissionTicket, UsbError};
use rusb::{Context, Device, DeviceHandle, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How long one `handle_events` call may block
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// `UsbSubsystem` backed by a libusb context
pub struct RusbSubsystem {
    context: Context,
    events: EventSender,
    _hotplug_registration: Mutex<Option<Registration<Context>>>,
}

impl RusbSubsystem {
    /// Create the libusb context and register for detach notifications
    pub fn new(events: EventSender) -> Result<Self, rusb::Error> {
        let context = Context::new()?;

        let registration = if rusb::has_hotplug() {
            let watcher: Box<dyn Hotplug<Context>> = Box::new(DetachWatcher::new(events.clone()));
            match HotplugBuilder::new()
                .enumerate(false)
                .register(&context, watcher)
            {
                Ok(registration) => {
                    debug!("Hot-plug callbacks registered");
                    Some(registration)
                }
                Err(e) => {
                    warn!("Failed to register hot-plug callbacks: {}", e);
                    None
                }
            }
        } else {
            warn!("libusb has no hot-plug support; detach will not be noticed");
            None
        };

        Ok(Self {
            context,
            events,
            _hotplug_registration: Mutex::new(registration),
        })
    }

    /// Run libusb event handling on a dedicated thread
    ///
    /// Hot-plug callbacks are delivered from this thread.
    pub fn spawn_event_loop(&self) -> std::io::Result<EventLoopHandle> {
        let context = self.context.clone();
        let running = Arc::new(AtomicBool::new(true));
        let keep_running = Arc::clone(&running);

        let thread = std::thread::Builder::new()
            .name("usb-events".to_string())
            .spawn(move || {
                info!("USB event loop started");
                while keep_running.load(Ordering::Relaxed) {
                    match context.handle_events(Some(EVENT_POLL_INTERVAL)) {
                        Ok(()) => {}
                        Err(rusb::Error::Interrupted) => {
                            debug!("USB event handling interrupted");
                        }
                        Err(e) => {
                            warn!("Error handling USB events: {}", e);
                            std::thread::sleep(EVENT_POLL_INTERVAL);
                        }
                    }
                }
                info!("USB event loop stopped");
            })?;

        Ok(EventLoopHandle { running, thread })
    }

    /// Find the live libusb device behind a descriptor
    fn find_device(&self, descriptor: &DeviceDescriptor) -> Result<Device<Context>, UsbError> {
        let devices = self.context.devices().map_err(map_rusb_error)?;

        devices
            .iter()
            .find(|device| {
                device_number(device.bus_number(), device.address()) == descriptor.device_id
                    && device
                        .device_descriptor()
                        .is_ok_and(|d| descriptor.matches(d.vendor_id(), d.product_id()))
            })
            .ok_or(UsbError::NoDevice)
    }
}

impl UsbSubsystem for RusbSubsystem {
    fn devices(&self) -> Result<Vec<DeviceDescriptor>, UsbError> {
        let devices = self.context.devices().map_err(map_rusb_error)?;

        Ok(devices.iter().filter_map(|device| describe(&device)).collect())
    }

    fn request_permission(
        &self,
        device: &DeviceDescriptor,
        ticket: PermissionTicket,
    ) -> Result<(), UsbError> {
        let usb_device = self.find_device(device)?;

        let granted = match usb_device.open() {
            Ok(_handle) => true,
            Err(rusb::Error::Access) => false,
            Err(e) => return Err(map_rusb_error(e)),
        };

        debug!(
            "Access probe for {}: {}",
            device.device_name,
            if granted { "granted" } else { "denied" }
        );

        self.events
            .send(PlatformEvent::PermissionResolved { ticket, granted })
            .map_err(|e| UsbError::Other {
                message: e.to_string(),
            })
    }

    fn interface_endpoints(
        &self,
        device: &DeviceDescriptor,
        interface: u8,
    ) -> Result<Vec<EndpointInfo>, UsbError> {
        let usb_device = self.find_device(device)?;

        let config = usb_device
            .active_config_descriptor()
            .or_else(|_| usb_device.config_descriptor(0))
            .map_err(map_rusb_error)?;

        let interface = config
            .interfaces()
            .find(|i| i.number() == interface)
            .ok_or(UsbError::NotFound)?;

        let endpoints: Vec<EndpointInfo> = interface
            .descriptors()
            .next()
            .map(|alt| alt.endpoint_descriptors().map(|e| endpoint_info(&e)).collect())
            .unwrap_or_default();

        Ok(endpoints)
    }

    fn open(&self, device: &DeviceDescriptor) -> Result<Box<dyn DeviceLink>, UsbError> {
        let usb_device = self.find_device(device)?;
        let handle = usb_device.open().map_err(map_rusb_error)?;

        debug!("Opened {}", device.device_name);

        Ok(Box::new(RusbLink {
            handle,
            name: device.device_name.clone(),
            claimed: Vec::new(),
            detached: Vec::new(),
        }))
    }
}

/// Snapshot a libusb device, skipping root hubs
fn describe(device: &Device<Context>) -> Option<DeviceDescriptor> {
    let descriptor = device.device_descriptor().ok()?;
    let bus = device.bus_number();
    let address = device.address();

    // Root hubs are VID 0x1d6b (Linux Foundation) with device class 9 (Hub)
    if descriptor.vendor_id() == 0x1d6b && descriptor.class_code() == 9 {
        return None;
    }

    // String descriptors need an open handle; without access they stay unset
    let (manufacturer_name, product_name) = match device.open() {
        Ok(handle) => (
            descriptor
                .manufacturer_string_index()
                .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok()),
            descriptor
                .product_string_index()
                .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok()),
        ),
        Err(_) => (None, None),
    };

    Some(DeviceDescriptor {
        vendor_id: descriptor.vendor_id(),
        product_id: descriptor.product_id(),
        device_id: device_number(bus, address),
        device_name: device_path(bus, address),
        manufacturer_name,
        product_name,
    })
}

/// Open libusb device handle
///
/// Dropping the link releases every claimed interface and hands detached
/// interfaces back to their kernel drivers.
pub struct RusbLink {
    handle: DeviceHandle<Context>,
    name: String,
    claimed: Vec<u8>,
    detached: Vec<u8>,
}

impl RusbLink {
    fn reattach_kernel_driver(&mut self, interface: u8) {
        if !self.detached.contains(&interface) {
            return;
        }
        self.detached.retain(|i| *i != interface);

        if let Err(e) = self.handle.attach_kernel_driver(interface) {
            debug!(
                "Could not reattach kernel driver to interface {} of {}: {}",
                interface, self.name, e
            );
        } else {
            debug!(
                "Reattached kernel driver to interface {} of {}",
                interface, self.name
            );
        }
    }
}

impl DeviceLink for RusbLink {
    fn claim_interface(&mut self, interface: u8, force: bool) -> Result<(), UsbError> {
        if force {
            match self.handle.kernel_driver_active(interface) {
                Ok(true) => {
                    debug!(
                        "Detaching kernel driver from interface {} of {}",
                        interface, self.name
                    );
                    match self.handle.detach_kernel_driver(interface) {
                        Ok(()) => self.detached.push(interface),
                        Err(e) => warn!(
                            "Failed to detach kernel driver from interface {}: {}",
                            interface, e
                        ),
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    debug!(
                        "Could not check kernel driver status for interface {}: {}",
                        interface, e
                    );
                }
            }
        }

        if let Err(e) = self.handle.claim_interface(interface) {
            self.reattach_kernel_driver(interface);
            return Err(map_rusb_error(e));
        }

        debug!("Claimed interface {} of {}", interface, self.name);
        self.claimed.push(interface);
        Ok(())
    }

    fn release_interface(&mut self, interface: u8) -> Result<(), UsbError> {
        self.claimed.retain(|i| *i != interface);
        let result = self.handle.release_interface(interface).map_err(map_rusb_error);
        self.reattach_kernel_driver(interface);

        if result.is_ok() {
            debug!("Released interface {} of {}", interface, self.name);
        }
        result
    }

    fn bulk_out(&self, endpoint: u8, data: &[u8], timeout: Duration) -> Result<usize, UsbError> {
        self.handle
            .write_bulk(endpoint, data, timeout)
            .map_err(map_rusb_error)
    }
}

impl Drop for RusbLink {
    fn drop(&mut self) {
        for interface in std::mem::take(&mut self.claimed) {
            if let Err(e) = self.handle.release_interface(interface) {
                debug!("Failed to release interface {}: {}", interface, e);
            }
            self.reattach_kernel_driver(interface);
        }
        debug!("Closed {}", self.name);
    }
}

/// Hot-plug callback that reports removals on the event bridge
struct DetachWatcher {
    events: EventSender,
}

impl DetachWatcher {
    fn new(events: EventSender) -> Self {
        Self { events }
    }
}

impl<T: UsbContext> Hotplug<T> for DetachWatcher {
    fn device_arrived(&mut self, device: Device<T>) {
        debug!(
            "Hot-plug: device arrived (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
    }

    fn device_left(&mut self, device: Device<T>) {
        let device_id = device_number(device.bus_number(), device.address());

        // libusb usually keeps the cached descriptor readable after removal
        let event = match device.device_descriptor() {
            Ok(descriptor) => {
                debug!(
                    "Hot-plug: device left {:04x}:{:04x}",
                    descriptor.vendor_id(),
                    descriptor.product_id()
                );
                PlatformEvent::DeviceDetached {
                    vendor_id: descriptor.vendor_id(),
                    product_id: descriptor.product_id(),
                }
            }
            Err(e) => {
                debug!(
                    "Hot-plug: no descriptor for removed device {} ({}), matching by device number",
                    device_id, e
                );
                PlatformEvent::DeviceRemoved { device_id }
            }
        };

        if let Err(e) = self.events.send(event) {
            error!("Failed to send detach event: {}", e);
        }
    }
}

/// Running libusb event loop
pub struct EventLoopHandle {
    running: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl EventLoopHandle {
    /// Stop the loop and wait for the thread to exit
    pub fn stop(self) {
        self.running.store(false, Ordering::Relaxed);
        if self.thread.join().is_err() {
            error!("USB event loop thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::create_event_bridge;

    #[test]
    fn test_rusb_subsystem_creation() {
        let (sender, _receiver) = create_event_bridge();

        // libusb may be unavailable in the test environment
        match RusbSubsystem::new(sender) {
            Ok(subsystem) => {
                let devices = subsystem.devices().unwrap_or_default();
                assert!(devices.iter().all(|d| d.device_name.starts_with("/dev/bus/usb/")));
            }
            Err(e) => {
                eprintln!("libusb context creation failed (expected without USB): {}", e);
            }
        }
    }

    #[test]
    fn test_event_loop_stops() {
        let (sender, _receiver) = create_event_bridge();

        if let Ok(subsystem) = RusbSubsystem::new(sender) {
            let handle = subsystem.spawn_event_loop().unwrap();
            handle.stop();
        }
    }
}
