//! Worker - manages one method subprocess and its message stream.
//!
//! Flow:
//! 1. `start`: spawn the method, block for its first message batch
//!    (capabilities), push configuration if the method asked for it
//! 2. An external readiness loop calls `in_fd_ready` / `out_fd_ready` when the
//!    pipes are actionable and `pulse` periodically
//! 3. Inbound messages are dispatched strictly in arrival order
//! 4. On read/write failure the worker resets itself and must be restarted
//!
//! Nothing here blocks except `start` (first batch) and reaping a child that
//! is already exiting.

mod dispatch;
mod outbound;

use std::collections::VecDeque;
use std::os::fd::RawFd;
use std::path::PathBuf;
use std::rc::Rc;

use tokio_util::bytes::BytesMut;

use crate::bridge::codec::MessageCodec;
use crate::bridge::framer::{Framer, ReadStatus};
use crate::bridge::protocol::Message;
use crate::channel::{DuplexChannel, ExecSpawner, MethodSpawner, Reap};
use crate::config::Configuration;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::{StartupError, WorkerError};
use crate::method::MethodConfig;
use crate::queue::{ItemDesc, SharedItem, SharedQueue};
use crate::status::SharedStatus;

pub use outbound::WriteProgress;

/// Where methods live unless `Dir::Bin::Methods` says otherwise.
pub const DEFAULT_METHODS_DIR: &str = "/usr/lib/apt/methods/";

pub struct Worker {
    access: String,
    method: Rc<MethodConfig>,
    config: Rc<Configuration>,
    queue: Option<SharedQueue>,
    status_sink: Option<SharedStatus>,
    spawner: Rc<dyn MethodSpawner>,

    channel: Option<DuplexChannel>,
    in_ready: bool,
    out_ready: bool,
    framer: Framer,
    messages: VecDeque<Message>,
    codec: MessageCodec,
    outbound: BytesMut,

    current_item: Option<ItemDesc>,
    current_size: u64,
    total_size: u64,
    status: String,
    diagnostics: Diagnostics,
}

impl Worker {
    /// Worker that runs items from `queue`.
    pub fn new(
        method: Rc<MethodConfig>,
        config: Rc<Configuration>,
        queue: SharedQueue,
        status_sink: Option<SharedStatus>,
    ) -> Self {
        let mut worker = Self::probe(method, config);
        worker.queue = Some(queue);
        worker.status_sink = status_sink;
        worker
    }

    /// Worker that only starts the method to learn its capabilities.
    pub fn probe(method: Rc<MethodConfig>, config: Rc<Configuration>) -> Self {
        Self {
            access: method.access().to_string(),
            method,
            config,
            queue: None,
            status_sink: None,
            spawner: Rc::new(ExecSpawner),
            channel: None,
            in_ready: false,
            out_ready: false,
            framer: Framer::new(),
            messages: VecDeque::new(),
            codec: MessageCodec::new(),
            outbound: BytesMut::new(),
            current_item: None,
            current_size: 0,
            total_size: 0,
            status: String::new(),
            diagnostics: Diagnostics::new(),
        }
    }

    pub fn with_spawner(mut self, spawner: Rc<dyn MethodSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    pub fn access(&self) -> &str {
        &self.access
    }

    pub fn method(&self) -> &MethodConfig {
        &self.method
    }

    /// Executable for this worker's method.
    pub fn method_path(&self) -> PathBuf {
        self.config
            .find_dir("Dir::Bin::Methods", DEFAULT_METHODS_DIR)
            .join(&self.access)
    }

    /// Spawn the method and process its first message batch.
    pub fn start(&mut self) -> Result<(), StartupError> {
        let path = self.method_path();
        if !path.exists() {
            return Err(StartupError::MethodNotFound { path });
        }

        if self.channel.is_some() {
            self.shutdown();
        }
        self.item_done();

        tracing::debug!(method = %self.access, path = %path.display(), "Starting method");
        self.channel = Some(DuplexChannel::open(&*self.spawner, &path, &self.access)?);
        self.out_ready = false;
        self.in_ready = true;

        if !self.read_first_batch() {
            return Err(StartupError::StartupFailure {
                method: self.access.clone(),
            });
        }

        self.run_messages();
        if self.queue.is_some() {
            self.push_configuration();
        }
        Ok(())
    }

    /// Block until at least one complete message has arrived.
    fn read_first_batch(&mut self) -> bool {
        while self.messages.is_empty() {
            let Some(channel) = self.channel.as_mut() else {
                return false;
            };
            let status = match channel.wait_readable() {
                Ok(()) => match channel.inbound() {
                    Some(inbound) => self.framer.read_from(inbound, &mut self.messages),
                    None => return false,
                },
                Err(e) => Err(e),
            };
            match status {
                Ok(ReadStatus::Open) => {}
                Ok(ReadStatus::Closed) | Err(_) => {
                    self.method_failure();
                    return false;
                }
            }
        }
        true
    }

    /// Inbound endpoint is readable: drain it and dispatch what arrived.
    pub fn in_fd_ready(&mut self) -> Result<(), WorkerError> {
        let Some(inbound) = self.channel.as_mut().and_then(DuplexChannel::inbound) else {
            return Err(self.not_running());
        };

        match self.framer.read_from(inbound, &mut self.messages) {
            Ok(ReadStatus::Open) => {
                self.run_messages();
                Ok(())
            }
            Ok(ReadStatus::Closed) => Err(self.method_failure()),
            Err(e) => {
                tracing::debug!(method = %self.access, error = %e, "Read from method failed");
                Err(self.method_failure())
            }
        }
    }

    /// Dispatch every pending message, oldest first.
    pub fn run_messages(&mut self) {
        while let Some(message) = self.messages.pop_front() {
            self.dispatch(message);
        }
    }

    /// Periodic progress check: the size of the partially written
    /// destination file. Advisory only; a failed stat keeps the last value.
    pub fn pulse(&mut self) {
        let Some(item) = &self.current_item else {
            return;
        };
        let Some(owner) = self.resolve_owner(item) else {
            return;
        };
        let dest = owner.borrow().dest_file().to_path_buf();
        if let Ok(meta) = std::fs::metadata(&dest) {
            self.current_size = meta.len();
        }
    }

    /// Presumed-dead path: reap the child, drop both pipe ends and all queued
    /// traffic. Safe to call repeatedly; only the first call does anything.
    pub fn method_failure(&mut self) -> WorkerError {
        if let Some(mut channel) = self.channel.take() {
            self.diagnostics.push(Diagnostic::MethodDied {
                method: self.access.clone(),
            });
            // Close first so a child blocked on a full pipe can exit.
            channel.close();
            if channel.reap() == Reap::Mismatch {
                self.diagnostics.push(Diagnostic::ReapMismatch {
                    method: self.access.clone(),
                });
            }
        }

        self.in_ready = false;
        self.out_ready = false;
        self.outbound.clear();
        self.messages.clear();
        self.framer.clear();

        WorkerError::MethodDied {
            method: self.access.clone(),
        }
    }

    /// Graceful teardown: interrupt and reap the method.
    pub fn shutdown(&mut self) {
        if let Some(mut channel) = self.channel.take()
            && channel.shutdown() == Reap::Mismatch
        {
            self.diagnostics.push(Diagnostic::ReapMismatch {
                method: self.access.clone(),
            });
        }
        self.in_ready = false;
        self.out_ready = false;
        self.outbound.clear();
        self.messages.clear();
        self.framer.clear();
    }

    pub fn is_running(&self) -> bool {
        self.channel.as_ref().is_some_and(DuplexChannel::is_open)
    }

    /// The readiness loop should poll the inbound endpoint.
    pub fn wants_read(&self) -> bool {
        self.in_ready && self.is_running()
    }

    /// The readiness loop should poll the outbound endpoint.
    pub fn wants_write(&self) -> bool {
        self.out_ready && self.is_running()
    }

    pub fn inbound_fd(&self) -> Option<RawFd> {
        self.channel.as_ref().and_then(DuplexChannel::inbound_fd)
    }

    pub fn outbound_fd(&self) -> Option<RawFd> {
        self.channel.as_ref().and_then(DuplexChannel::outbound_fd)
    }

    pub fn pid(&self) -> Option<u32> {
        self.channel.as_ref().and_then(DuplexChannel::pid)
    }

    pub fn current_item(&self) -> Option<&ItemDesc> {
        self.current_item.as_ref()
    }

    pub fn current_size(&self) -> u64 {
        self.current_size
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Last 102 Status text from the method.
    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn pending_messages(&self) -> usize {
        self.messages.len()
    }

    /// Bytes queued for the method but not yet written.
    pub fn pending_output(&self) -> &[u8] {
        &self.outbound
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        self.diagnostics.drain()
    }

    fn resolve_owner(&self, item: &ItemDesc) -> Option<SharedItem> {
        self.queue.as_ref()?.borrow().owner(item.owner)
    }

    /// Current item reached a terminal message.
    fn item_done(&mut self) {
        self.current_item = None;
        self.current_size = 0;
        self.total_size = 0;
        self.status.clear();
    }

    fn not_running(&self) -> WorkerError {
        WorkerError::NotRunning {
            method: self.access.clone(),
        }
    }

    #[cfg(test)]
    fn receive(&mut self, bytes: &[u8]) {
        self.framer.extend(bytes, &mut self.messages).unwrap();
        self.run_messages();
    }
}
