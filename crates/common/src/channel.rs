//! Async channel bridge between platform threads and the event pump
//!
//! Permission outcomes and detach notifications arrive on threads the
//! manager does not own. Platform backends push them into an `EventSender`;
//! the event pump drains the matching `EventReceiver`.

use async_channel::{Receiver, Sender, TryRecvError, unbounded};
use protocol::PermissionTicket;

/// Events delivered by the platform USB subsystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    /// Outcome of a permission prompt
    PermissionResolved {
        /// Ticket issued with the request
        ticket: PermissionTicket,
        /// Whether access was granted
        granted: bool,
    },

    /// A device was unplugged
    DeviceDetached {
        /// Vendor ID of the removed device
        vendor_id: u16,
        /// Product ID of the removed device
        product_id: u16,
    },

    /// A device was unplugged but its descriptor could no longer be read
    DeviceRemoved {
        /// Platform device number of the removed device
        device_id: u32,
    },

    /// Stop the event pump
    Shutdown,
}

/// Sending half, held by platform backends
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<PlatformEvent>,
}

impl EventSender {
    /// Send an event from a blocking context
    pub fn send(&self, event: PlatformEvent) -> crate::Result<()> {
        self.tx
            .send_blocking(event)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Send an event from an async context
    pub async fn send_async(&self, event: PlatformEvent) -> crate::Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Receiving half, drained by the event pump
#[derive(Debug, Clone)]
pub struct EventReceiver {
    rx: Receiver<PlatformEvent>,
}

impl EventReceiver {
    /// Receive the next event (blocking)
    pub fn recv(&self) -> crate::Result<PlatformEvent> {
        self.rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive an event without blocking
    ///
    /// Returns `Ok(None)` when the channel is empty and an error once every
    /// sender is gone.
    pub fn try_recv(&self) -> crate::Result<Option<PlatformEvent>> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(e) => Err(crate::Error::Channel(e.to_string())),
        }
    }

    /// Receive the next event (async)
    pub async fn recv_async(&self) -> crate::Result<PlatformEvent> {
        self.rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Create the platform event bridge
///
/// Unbounded: platform callbacks must never block on a busy pump.
/// Returns (EventSender for platform threads, EventReceiver for the pump)
pub fn create_event_bridge() -> (EventSender, EventReceiver) {
    let (tx, rx) = unbounded();
    (EventSender { tx }, EventReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bridge() {
        let (sender, receiver) = create_event_bridge();

        let handle = std::thread::spawn(move || {
            sender
                .send(PlatformEvent::DeviceDetached {
                    vendor_id: 1,
                    product_id: 2,
                })
                .unwrap();
        });

        let event = receiver.recv_async().await.unwrap();
        assert_eq!(
            event,
            PlatformEvent::DeviceDetached {
                vendor_id: 1,
                product_id: 2
            }
        );
        handle.join().unwrap();
    }

    #[test]
    fn test_try_recv_empty_then_closed() {
        let (sender, receiver) = create_event_bridge();
        assert!(matches!(receiver.try_recv(), Ok(None)));

        drop(sender);
        assert!(receiver.try_recv().is_err());
    }
}
