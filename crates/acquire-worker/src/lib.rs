//! acquire-worker: drives an apt-style acquire method subprocess.
//!
//! A method is a helper executable (`http`, `ftp`, `file`, `cdrom`, ...) that
//! fetches URIs on request. It talks to its parent over stdin/stdout using
//! blank-line terminated, header-style messages. [`Worker`] owns one such
//! subprocess, frames its output, dispatches each message to the item queue
//! and status sink, and queues requests back to it.

pub mod bridge;
pub mod channel;
pub mod config;
pub mod diagnostics;
pub mod driver;
pub mod error;
pub mod method;
pub mod queue;
pub mod status;
pub mod worker;

#[cfg(test)]
mod testing;

pub use config::Configuration;
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use driver::drive;
pub use error::{StartupError, WorkerError};
pub use method::{Capabilities, MethodConfig};
pub use queue::{AcquireItem, ItemDesc, ItemId, ItemQueue, TableQueue};
pub use status::AcquireStatus;
pub use worker::{Worker, WriteProgress};
