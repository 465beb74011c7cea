//! Platform event pump
//!
//! Drains the platform event bridge on its own thread and applies each
//! event to the manager. Permission outcomes and detach notifications
//! therefore never run on the caller's thread.

use crate::manager::DeviceConnectionManager;
use common::{EventReceiver, PlatformEvent};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info};

/// Spawn the event pump
///
/// The thread exits on `PlatformEvent::Shutdown` or once every sender is
/// dropped.
pub fn spawn_event_pump(
    manager: Arc<DeviceConnectionManager>,
    events: EventReceiver,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("usb-event-pump".to_string())
        .spawn(move || run(&manager, &events))
}

fn run(manager: &DeviceConnectionManager, events: &EventReceiver) {
    info!("Platform event pump started");

    loop {
        match events.recv() {
            Ok(PlatformEvent::Shutdown) => {
                debug!("Event pump shutting down");
                break;
            }
            Ok(event) => {
                debug!("Platform event: {:?}", event);
                manager.handle_event(event);
            }
            Err(e) => {
                debug!("Platform event channel closed: {}", e);
                break;
            }
        }
    }

    info!("Platform event pump stopped");
}
