//! Call dispatcher
//!
//! Thin glue between the host application's calls and the connection
//! manager. Besides routing, it owns the two pre-steps the manager does not
//! care about: range-checking host integers into USB ids and decoding base64
//! payloads.

use crate::manager::DeviceConnectionManager;
use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use protocol::{CallError, DeviceListing, PrinterCall, Reply};
use std::sync::Arc;
use tracing::{debug, warn};

/// Standard alphabet; padding optional, as host encoders differ
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decode a base64 payload
///
/// Line breaks and other ASCII whitespace are ignored.
pub fn decode_base64(data: &str) -> Result<Vec<u8>, CallError> {
    let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();

    PAYLOAD_ENGINE
        .decode(compact.as_bytes())
        .map_err(|e| CallError::InvalidBase64 {
            reason: e.to_string(),
        })
}

/// Routes host calls to a shared manager
#[derive(Clone)]
pub struct Dispatcher {
    manager: Arc<DeviceConnectionManager>,
}

impl Dispatcher {
    pub fn new(manager: Arc<DeviceConnectionManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<DeviceConnectionManager> {
        &self.manager
    }

    /// Attached devices as host-facing listings
    pub fn list_devices(&self) -> Vec<DeviceListing> {
        self.manager
            .list_devices()
            .iter()
            .map(DeviceListing::from)
            .collect()
    }

    /// Select a device; ids outside the USB range never match
    pub fn select_device(&self, vendor_id: i64, product_id: i64) -> bool {
        let (Ok(vendor_id), Ok(product_id)) = (u16::try_from(vendor_id), u16::try_from(product_id))
        else {
            warn!(
                "Rejecting out-of-range device id {}:{}",
                vendor_id, product_id
            );
            return false;
        };
        self.manager.select_device(vendor_id, product_id)
    }

    /// Close the connection; always succeeds
    pub fn close_connection(&self) -> bool {
        self.manager.close_connection_if_exists();
        true
    }

    /// Send text as its UTF-8 bytes
    pub fn send_text(&self, text: &str) -> bool {
        self.manager.send(text.as_bytes().to_vec())
    }

    /// Decode and send a base64 payload
    ///
    /// Malformed input is an error rather than `false`.
    pub fn send_raw_base64(&self, data: &str) -> Result<bool, CallError> {
        let bytes = decode_base64(data)?;
        Ok(self.manager.send(bytes))
    }

    pub fn send_bytes(&self, data: Vec<u8>) -> bool {
        self.manager.send(data)
    }

    /// Route one call
    pub fn dispatch(&self, call: PrinterCall) -> Result<Reply, CallError> {
        debug!("Dispatching {}", call.method());

        let reply = match call {
            PrinterCall::ListDevices => Reply::Devices(self.list_devices()),
            PrinterCall::Connect {
                vendor_id,
                product_id,
            } => Reply::Bool(self.select_device(vendor_id, product_id)),
            PrinterCall::Close => Reply::Bool(self.close_connection()),
            PrinterCall::PrintText { text } => Reply::Bool(self.send_text(&text)),
            PrinterCall::PrintRawText { raw } => Reply::Bool(self.send_raw_base64(&raw)?),
            PrinterCall::Write { data } => Reply::Bool(self.send_bytes(data)),
        };

        Ok(reply)
    }
}
