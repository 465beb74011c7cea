//! Connection Manager Integration Tests
//!
//! Drives the manager the way a host application does: platform events
//! arrive through the event bridge and are applied by the event pump
//! thread, while calls come from the test thread.
//!
//! # Test Scenarios
//! - Full select -> grant -> send flow
//! - Denied permission
//! - Detach while connected, then reconnect after re-plug
//! - Superseded permission outcomes
//! - Shutdown ordering
//!
//! Run with: `cargo test -p printer --test manager_tests`

use common::test_utils::{
    DEFAULT_TEST_TIMEOUT, MockSubsystem, RecordingSink, create_mock_descriptor,
};
use common::{EventSender, Notice, PlatformEvent, create_event_bridge};
use printer::{ConnectionState, DeviceConnectionManager, ManagerSettings, spawn_event_pump};
use protocol::ConnectError;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    subsystem: MockSubsystem,
    sink: RecordingSink,
    manager: Arc<DeviceConnectionManager>,
    events: EventSender,
    pump: Option<JoinHandle<()>>,
}

impl Harness {
    fn new() -> Self {
        let subsystem = MockSubsystem::new();
        let sink = RecordingSink::new();
        let manager = Arc::new(
            DeviceConnectionManager::new(
                Arc::new(subsystem.clone()),
                Arc::new(sink.clone()),
                ManagerSettings::default(),
            )
            .unwrap(),
        );
        let (events, receiver) = create_event_bridge();
        let pump = spawn_event_pump(Arc::clone(&manager), receiver).unwrap();

        Self {
            subsystem,
            sink,
            manager,
            events,
            pump: Some(pump),
        }
    }

    /// Answer the most recent permission prompt through the bridge
    fn resolve_permission(&self, granted: bool) {
        let ticket = self.subsystem.last_ticket().expect("no permission request");
        self.events
            .send(PlatformEvent::PermissionResolved { ticket, granted })
            .unwrap();
    }

    fn unplug(&self, vendor_id: u16, product_id: u16) {
        self.subsystem.remove_device(vendor_id, product_id);
        self.events
            .send(PlatformEvent::DeviceDetached {
                vendor_id,
                product_id,
            })
            .unwrap();
    }

    fn wait_for_state(&self, state: ConnectionState) {
        let deadline = Instant::now() + DEFAULT_TEST_TIMEOUT;
        while Instant::now() < deadline {
            if self.manager.state() == state {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!(
            "timed out waiting for {:?}, still {:?}",
            state,
            self.manager.state()
        );
    }

    fn shutdown(mut self) {
        self.manager.shutdown();
        self.events.send(PlatformEvent::Shutdown).unwrap();
        if let Some(pump) = self.pump.take() {
            pump.join().unwrap();
        }
    }
}

// ============================================================================
// Happy Path
// ============================================================================

#[test]
fn test_select_grant_send() {
    let harness = Harness::new();
    harness
        .subsystem
        .add_printer(create_mock_descriptor(1, 1234, 5678));

    assert!(harness.manager.select_device(1234, 5678));
    assert_eq!(harness.manager.state(), ConnectionState::AwaitingPermission);

    harness.resolve_permission(true);
    harness.wait_for_state(ConnectionState::Selected);

    assert!(harness.manager.send(b"hello".to_vec()));
    assert_eq!(harness.manager.state(), ConnectionState::Connected);

    let transfer = harness
        .subsystem
        .next_transfer(DEFAULT_TEST_TIMEOUT)
        .unwrap();
    assert_eq!(transfer.data, b"hello");
    assert_eq!(transfer.endpoint, 0x01);
    assert_eq!(transfer.device_id, 1);

    assert!(harness.sink.contains(&Notice::DeviceSelected {
        device_name: "/dev/bus/usb/001/001".to_string()
    }));
    assert!(harness.sink.contains(&Notice::DeviceConnected {
        device_name: "/dev/bus/usb/001/001".to_string()
    }));
    assert!(harness.sink.failures().is_empty());

    harness.shutdown();
}

#[test]
fn test_transfers_arrive_in_order() {
    let harness = Harness::new();
    harness
        .subsystem
        .add_printer(create_mock_descriptor(1, 1234, 5678));

    assert!(harness.manager.select_device(1234, 5678));
    harness.resolve_permission(true);
    harness.wait_for_state(ConnectionState::Selected);

    for i in 0..5u8 {
        assert!(harness.manager.send(vec![i; 4]));
    }
    for i in 0..5u8 {
        let transfer = harness
            .subsystem
            .next_transfer(DEFAULT_TEST_TIMEOUT)
            .unwrap();
        assert_eq!(transfer.data, vec![i; 4]);
    }

    // One connection serves every send
    assert_eq!(harness.subsystem.open_count(), 1);

    harness.shutdown();
}

// ============================================================================
// Permission
// ============================================================================

#[test]
fn test_permission_denied_leaves_session_idle() {
    let harness = Harness::new();
    harness
        .subsystem
        .add_printer(create_mock_descriptor(1, 1234, 5678));

    assert!(harness.manager.select_device(1234, 5678));
    harness.resolve_permission(false);
    harness.wait_for_state(ConnectionState::Idle);

    assert!(!harness.manager.send(b"hello".to_vec()));
    assert_eq!(harness.subsystem.open_count(), 0);
    assert!(harness.sink.contains(&Notice::Failure(
        ConnectError::PermissionDenied {
            device_name: "/dev/bus/usb/001/001".to_string()
        }
    )));

    harness.shutdown();
}

#[test]
fn test_late_grant_for_superseded_selection() {
    let harness = Harness::new();
    harness
        .subsystem
        .add_printer(create_mock_descriptor(1, 1234, 5678));
    harness
        .subsystem
        .add_printer(create_mock_descriptor(2, 0x04b8, 0x0202));

    assert!(harness.manager.select_device(1234, 5678));
    let first = harness.subsystem.last_ticket().unwrap();
    assert!(harness.manager.select_device(0x04b8, 0x0202));

    // The first prompt resolves after the second selection
    harness
        .events
        .send(PlatformEvent::PermissionResolved {
            ticket: first,
            granted: true,
        })
        .unwrap();
    harness.resolve_permission(true);
    harness.wait_for_state(ConnectionState::Selected);

    let selected = harness.manager.selected_device().unwrap();
    assert_eq!(selected.vendor_id, 0x04b8);
    assert_eq!(selected.product_id, 0x0202);

    harness.shutdown();
}

// ============================================================================
// Detach
// ============================================================================

#[test]
fn test_detach_then_send_fails_until_reselected() {
    let harness = Harness::new();
    harness
        .subsystem
        .add_printer(create_mock_descriptor(1, 1234, 5678));

    assert!(harness.manager.select_device(1234, 5678));
    harness.resolve_permission(true);
    harness.wait_for_state(ConnectionState::Selected);
    assert!(harness.manager.open_connection());

    harness.unplug(1234, 5678);
    harness.wait_for_state(ConnectionState::Idle);

    assert!(harness.sink.contains(&Notice::DeviceDetached));
    assert_eq!(harness.subsystem.releases(), vec![(1, 0)]);
    assert_eq!(harness.subsystem.close_count(), 1);
    assert!(!harness.manager.send(b"lost".to_vec()));

    // Plug it back in and start over
    harness
        .subsystem
        .add_printer(create_mock_descriptor(3, 1234, 5678));
    assert!(harness.manager.select_device(1234, 5678));
    harness.resolve_permission(true);
    harness.wait_for_state(ConnectionState::Selected);

    assert!(harness.manager.send(b"back".to_vec()));
    let transfer = harness
        .subsystem
        .next_transfer(DEFAULT_TEST_TIMEOUT)
        .unwrap();
    assert_eq!(transfer.data, b"back");
    assert_eq!(transfer.device_id, 3);

    harness.shutdown();
}

#[test]
fn test_detach_of_other_device_keeps_connection() {
    let harness = Harness::new();
    harness
        .subsystem
        .add_printer(create_mock_descriptor(1, 1234, 5678));
    harness
        .subsystem
        .add_printer(create_mock_descriptor(2, 0x046d, 0xc52b));

    assert!(harness.manager.select_device(1234, 5678));
    harness.resolve_permission(true);
    harness.wait_for_state(ConnectionState::Selected);
    assert!(harness.manager.open_connection());

    harness.unplug(0x046d, 0xc52b);
    // Flush the pump with a stale outcome it must ignore
    harness.resolve_permission(false);
    std::thread::sleep(Duration::from_millis(50));

    assert!(harness.manager.is_connected());
    assert!(!harness.sink.contains(&Notice::DeviceDetached));

    harness.shutdown();
}

// ============================================================================
// Close and Shutdown
// ============================================================================

#[test]
fn test_close_forgets_selection() {
    let harness = Harness::new();
    harness
        .subsystem
        .add_printer(create_mock_descriptor(1, 1234, 5678));

    assert!(harness.manager.select_device(1234, 5678));
    harness.resolve_permission(true);
    harness.wait_for_state(ConnectionState::Selected);
    assert!(harness.manager.send(b"one".to_vec()));
    assert!(harness.subsystem.next_transfer(DEFAULT_TEST_TIMEOUT).is_some());

    harness.manager.close_connection_if_exists();
    assert_eq!(harness.manager.state(), ConnectionState::Idle);
    assert!(!harness.manager.send(b"two".to_vec()));

    // Closing again changes nothing
    harness.manager.close_connection_if_exists();
    assert_eq!(harness.subsystem.close_count(), 1);

    harness.shutdown();
}

#[test]
fn test_shutdown_completes_queued_transfers() {
    let harness = Harness::new();
    harness
        .subsystem
        .add_printer(create_mock_descriptor(1, 1234, 5678));
    harness
        .subsystem
        .set_transfer_delay(Duration::from_millis(25));

    assert!(harness.manager.select_device(1234, 5678));
    harness.resolve_permission(true);
    harness.wait_for_state(ConnectionState::Selected);
    assert!(harness.manager.send(b"first".to_vec()));
    assert!(harness.manager.send(b"second".to_vec()));

    let subsystem = harness.subsystem.clone();
    harness.shutdown();

    assert_eq!(
        subsystem.next_transfer(DEFAULT_TEST_TIMEOUT).unwrap().data,
        b"first"
    );
    assert_eq!(
        subsystem.next_transfer(DEFAULT_TEST_TIMEOUT).unwrap().data,
        b"second"
    );
    assert_eq!(subsystem.close_count(), 1);
}
