//! USB device connection manager
//!
//! Owns the whole lifecycle of the single printer session: enumeration,
//! permission negotiation, connection establishment, bulk transfers and
//! teardown on close or detach.
//!
//! ```text
//! Idle -> AwaitingPermission -> Selected -> Connected -> Idle
//!                \-> Idle (denied)
//! ```
//!
//! Every public operation reports a plain success flag. The specific
//! failure kind is logged and handed to the notification sink before it is
//! collapsed.

use crate::usb::worker::{SharedLink, TransferJob, TransferWorker};
use common::{Notice, NotificationSink, PlatformEvent, UsbSubsystem};
use protocol::{ConnectError, DeviceDescriptor, EndpointInfo, PermissionTicket};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Interface that carries the printer's bulk endpoints
pub const DEFAULT_INTERFACE: u8 = 0;

/// Hardware timeout for one bulk transfer
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(100);

/// Observable session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Nothing selected, nothing pending
    Idle,
    /// A permission prompt is in flight
    AwaitingPermission,
    /// Permission granted, no connection yet
    Selected,
    /// Interface claimed and ready for transfers
    Connected,
}

/// Tunables for the manager
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Interface scanned for the bulk OUT endpoint
    pub interface: u8,
    /// Timeout for each bulk transfer
    pub transfer_timeout: Duration,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            interface: DEFAULT_INTERFACE,
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
        }
    }
}

/// A permission prompt waiting for its outcome
#[derive(Debug, Clone, Copy)]
struct PendingPermissionRequest {
    ticket: PermissionTicket,
}

/// The live session
///
/// Device, interface, endpoint and handle exist together or not at all.
struct ActiveConnection {
    device: DeviceDescriptor,
    interface: u8,
    endpoint: EndpointInfo,
    link: Arc<SharedLink>,
}

#[derive(Default)]
struct SessionState {
    selected: Option<DeviceDescriptor>,
    pending: Option<PendingPermissionRequest>,
    connection: Option<ActiveConnection>,
    next_ticket: u64,
}

impl SessionState {
    fn issue_ticket(&mut self, vendor_id: u16, product_id: u16) -> PermissionTicket {
        self.next_ticket += 1;
        PermissionTicket {
            id: self.next_ticket,
            vendor_id,
            product_id,
        }
    }
}

/// Manager for the single USB printer session
///
/// Callers are expected to invoke one operation at a time. Platform events
/// may arrive concurrently on other threads; all session state sits behind
/// one mutex.
pub struct DeviceConnectionManager {
    subsystem: Option<Arc<dyn UsbSubsystem>>,
    sink: Arc<dyn NotificationSink>,
    settings: ManagerSettings,
    session: Mutex<SessionState>,
    transfers: TransferWorker,
}

impl DeviceConnectionManager {
    /// Create a manager backed by `subsystem`
    pub fn new(
        subsystem: Arc<dyn UsbSubsystem>,
        sink: Arc<dyn NotificationSink>,
        settings: ManagerSettings,
    ) -> common::Result<Self> {
        Self::build(Some(subsystem), sink, settings)
    }

    /// Create a manager for a host without a usable USB subsystem
    ///
    /// Enumeration returns nothing and every connection attempt fails with
    /// `SubsystemUnavailable`.
    pub fn without_subsystem(
        sink: Arc<dyn NotificationSink>,
        settings: ManagerSettings,
    ) -> common::Result<Self> {
        Self::build(None, sink, settings)
    }

    fn build(
        subsystem: Option<Arc<dyn UsbSubsystem>>,
        sink: Arc<dyn NotificationSink>,
        settings: ManagerSettings,
    ) -> common::Result<Self> {
        let transfers = TransferWorker::spawn()?;

        info!(
            "USB printer manager initialized (interface {}, transfer timeout {}s)",
            settings.interface,
            settings.transfer_timeout.as_secs()
        );

        Ok(Self {
            subsystem,
            sink,
            settings,
            session: Mutex::new(SessionState::default()),
            transfers,
        })
    }

    fn session(&self) -> MutexGuard<'_, SessionState> {
        // A panic elsewhere must not wedge detach handling
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn report(&self, err: ConnectError) {
        warn!("{}", err);
        self.sink.notify(Notice::Failure(err));
    }

    /// List currently attached devices
    ///
    /// Fails soft: without a subsystem, or when enumeration fails, the list
    /// is empty.
    pub fn list_devices(&self) -> Vec<DeviceDescriptor> {
        let Some(subsystem) = &self.subsystem else {
            warn!("USB subsystem is not available while listing devices");
            self.sink.notify(Notice::SubsystemUnavailable);
            return Vec::new();
        };

        match subsystem.devices() {
            Ok(devices) => {
                debug!("Enumerated {} devices", devices.len());
                devices
            }
            Err(e) => {
                warn!("Failed to enumerate USB devices: {}", e);
                Vec::new()
            }
        }
    }

    /// Look up an attached device by vendor/product id
    fn find_device(&self, vendor_id: u16, product_id: u16) -> Result<DeviceDescriptor, ConnectError> {
        self.list_devices()
            .into_iter()
            .find(|d| d.matches(vendor_id, product_id))
            .ok_or(ConnectError::NotFound {
                vendor_id,
                product_id,
            })
    }

    /// Authorize and target a device for subsequent transfers
    ///
    /// Returns `true` when the device is already selected or a permission
    /// prompt was issued. Issuing is not granting: the device only becomes
    /// usable once the platform reports the outcome via `handle_event`.
    pub fn select_device(&self, vendor_id: u16, product_id: u16) -> bool {
        let mut session = self.session();

        if session
            .selected
            .as_ref()
            .is_some_and(|d| d.matches(vendor_id, product_id))
        {
            debug!(
                "Device {:04x}:{:04x} already selected",
                vendor_id, product_id
            );
            return true;
        }

        // A new selection invalidates whatever came before, found or not
        self.teardown(&mut session);

        let Some(subsystem) = self.subsystem.clone() else {
            self.report(ConnectError::SubsystemUnavailable);
            return false;
        };

        let device = match self.find_device(vendor_id, product_id) {
            Ok(device) => device,
            Err(err) => {
                self.report(err);
                return false;
            }
        };

        let ticket = session.issue_ticket(vendor_id, product_id);
        session.pending = Some(PendingPermissionRequest { ticket });

        info!(
            "Requesting permission for {} (vendor_id: {}, product_id: {}, ticket {})",
            device.device_name, vendor_id, product_id, ticket.id
        );

        if let Err(e) = subsystem.request_permission(&device, ticket) {
            session.pending = None;
            warn!(
                "Failed to request permission for {}: {}",
                device.device_name, e
            );
            self.sink
                .notify(Notice::Failure(ConnectError::PermissionDenied {
                    device_name: device.device_name,
                }));
            return false;
        }

        true
    }

    /// Apply a platform event
    pub fn handle_event(&self, event: PlatformEvent) {
        match event {
            PlatformEvent::PermissionResolved { ticket, granted } => {
                self.handle_permission_result(ticket, granted);
            }
            PlatformEvent::DeviceDetached {
                vendor_id,
                product_id,
            } => {
                self.handle_detach(&format!("{:04x}:{:04x}", vendor_id, product_id), |d| {
                    d.matches(vendor_id, product_id)
                });
            }
            PlatformEvent::DeviceRemoved { device_id } => {
                self.handle_detach(&format!("device {}", device_id), |d| {
                    d.device_id == device_id
                });
            }
            PlatformEvent::Shutdown => {}
        }
    }

    /// Resolve a permission prompt
    ///
    /// Outcomes for tickets that are no longer pending (superseded by a
    /// newer selection, or cleared by teardown) are discarded.
    pub fn handle_permission_result(&self, ticket: PermissionTicket, granted: bool) {
        let mut session = self.session();

        match session.pending {
            Some(pending) if pending.ticket == ticket => {
                session.pending = None;
            }
            _ => {
                debug!("Discarding stale permission result for ticket {}", ticket.id);
                return;
            }
        }

        // The platform may not echo a usable handle; re-resolve by id
        let resolved = self.find_device(ticket.vendor_id, ticket.product_id);

        if !granted {
            let device_name = match &resolved {
                Ok(device) => device.device_name.clone(),
                Err(_) => format!("{:04x}:{:04x}", ticket.vendor_id, ticket.product_id),
            };
            self.report(ConnectError::PermissionDenied { device_name });
            return;
        }

        match resolved {
            Ok(device) => {
                info!(
                    "Permission granted for {} (vendor_id: {}, product_id: {})",
                    device.device_name, device.vendor_id, device.product_id
                );
                self.sink.notify(Notice::DeviceSelected {
                    device_name: device.device_name.clone(),
                });
                session.selected = Some(device);
            }
            Err(err) => self.report(err),
        }
    }

    /// React to a device being unplugged
    ///
    /// Only a removal of the selected or connected device ends the session.
    fn handle_detach(&self, label: &str, is_removed: impl Fn(&DeviceDescriptor) -> bool) {
        let mut session = self.session();

        let affects_session = session.selected.as_ref().is_some_and(&is_removed)
            || session
                .connection
                .as_ref()
                .is_some_and(|c| is_removed(&c.device));

        if !affects_session {
            debug!("Ignoring detach of unrelated device {}", label);
            return;
        }

        info!("Selected device {} detached", label);
        self.sink.notify(Notice::DeviceDetached);
        self.close_connection(&mut session);
        session.selected = None;
    }

    /// Open the connection to the selected device if not already open
    ///
    /// Transfers call this lazily; calling it explicitly is never required.
    pub fn open_connection(&self) -> bool {
        let mut session = self.session();
        match self.ensure_connection(&mut session) {
            Ok(_) => true,
            Err(err) => {
                self.report(err);
                false
            }
        }
    }

    fn ensure_connection(
        &self,
        session: &mut SessionState,
    ) -> Result<(Arc<SharedLink>, u8, String), ConnectError> {
        let subsystem = self
            .subsystem
            .as_ref()
            .ok_or(ConnectError::SubsystemUnavailable)?;
        let device = session
            .selected
            .clone()
            .ok_or(ConnectError::NotConnected)?;

        if let Some(connection) = &session.connection {
            debug!("USB connection already established");
            return Ok((
                Arc::clone(&connection.link),
                connection.endpoint.address,
                connection.device.device_name.clone(),
            ));
        }

        let interface = self.settings.interface;
        let device_name = device.device_name.clone();

        let endpoints = subsystem
            .interface_endpoints(&device, interface)
            .map_err(|source| ConnectError::OpenFailed {
                device_name: device_name.clone(),
                source,
            })?;

        // First match wins
        let endpoint = endpoints
            .into_iter()
            .find(EndpointInfo::is_bulk_out)
            .ok_or_else(|| ConnectError::NoSuitableEndpoint {
                device_name: device_name.clone(),
                interface,
            })?;

        let mut link = subsystem
            .open(&device)
            .map_err(|source| ConnectError::OpenFailed {
                device_name: device_name.clone(),
                source,
            })?;

        if let Err(source) = link.claim_interface(interface, true) {
            // Dropping the link closes the handle
            drop(link);
            return Err(ConnectError::ClaimFailed {
                device_name,
                interface,
                source,
            });
        }

        let link = Arc::new(SharedLink::new(link));

        info!(
            "Connected to {} (interface {}, endpoint {:#04x})",
            device_name, interface, endpoint.address
        );
        self.sink.notify(Notice::DeviceConnected {
            device_name: device_name.clone(),
        });

        session.connection = Some(ActiveConnection {
            device,
            interface,
            endpoint,
            link: Arc::clone(&link),
        });

        Ok((link, endpoint.address, device_name))
    }

    /// Close the active connection, if any, and forget the selected device
    ///
    /// Safe to call repeatedly and from the detach path.
    pub fn close_connection_if_exists(&self) {
        let mut session = self.session();
        self.close_connection(&mut session);
    }

    fn close_connection(&self, session: &mut SessionState) {
        let Some(connection) = session.connection.take() else {
            return;
        };
        session.selected = None;

        let ActiveConnection {
            device,
            interface,
            link,
            ..
        } = connection;

        // Transfers still queued on this link fail once it is emptied
        if let Some(Err(e)) = link.close(interface) {
            warn!(
                "Failed to release interface {} of {}: {}",
                interface, device.device_name, e
            );
        }

        info!("Closed connection to {}", device.device_name);
    }

    /// Drop every trace of the previous selection
    fn teardown(&self, session: &mut SessionState) {
        self.close_connection(session);
        session.selected = None;
        if let Some(pending) = session.pending.take() {
            debug!("Superseding permission request {}", pending.ticket.id);
        }
    }

    /// Send a payload to the selected device
    ///
    /// Connects on demand. Returns `true` once the transfer is queued on the
    /// background worker; completion and hardware errors are only logged.
    pub fn send(&self, payload: Vec<u8>) -> bool {
        let target = {
            let mut session = self.session();
            self.ensure_connection(&mut session)
        };

        let (link, endpoint, device_name) = match target {
            Ok(target) => target,
            Err(err) => {
                self.report(err);
                return false;
            }
        };

        debug!("Queueing {} bytes for {}", payload.len(), device_name);

        let job = TransferJob {
            link,
            endpoint,
            payload,
            timeout: self.settings.transfer_timeout,
            device_name,
        };

        match self.transfers.submit(job) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to queue transfer: {}", e);
                false
            }
        }
    }

    /// Current session state
    pub fn state(&self) -> ConnectionState {
        let session = self.session();
        if session.connection.is_some() {
            ConnectionState::Connected
        } else if session.selected.is_some() {
            ConnectionState::Selected
        } else if session.pending.is_some() {
            ConnectionState::AwaitingPermission
        } else {
            ConnectionState::Idle
        }
    }

    /// The device permission was granted for, if any
    pub fn selected_device(&self) -> Option<DeviceDescriptor> {
        self.session().selected.clone()
    }

    /// Whether an interface is currently claimed
    pub fn is_connected(&self) -> bool {
        self.session().connection.is_some()
    }

    /// Wait for queued transfers to finish, then close the session
    pub fn shutdown(&self) {
        self.transfers.shutdown();
        self.close_connection_if_exists();
        info!("USB printer manager shut down");
    }
}
