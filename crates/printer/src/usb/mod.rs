//! USB subsystem
//!
//! Platform-facing half of the printer core:
//! - `backend`: the libusb implementation of the platform seams
//! - `convert`: rusb to protocol type mapping
//! - `worker`: the background thread that performs bulk transfers
//!
//! Transfers run on their own thread so that slow printer hardware never
//! blocks the caller.

pub mod backend;
pub mod convert;
pub mod worker;

pub use backend::{EventLoopHandle, RusbLink, RusbSubsystem};
pub use convert::map_rusb_error;
pub use worker::{SharedLink, TransferJob, TransferWorker};
