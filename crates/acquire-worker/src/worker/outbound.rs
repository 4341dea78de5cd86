//! Outbound side: requests are encoded into a byte buffer that is drained
//! whenever the method's stdin is writable.

use std::io::{self, Write};

use tokio_util::bytes::{Buf, BytesMut};
use tokio_util::codec::Encoder;

use super::Worker;
use crate::bridge::protocol::Request;
use crate::config::quote::quote;
use crate::error::WorkerError;
use crate::queue::ItemDesc;

/// Result of one drain attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteProgress {
    /// Bytes accepted by the pipe; the rest stays buffered.
    Written(usize),
    /// The pipe is full; try again on the next readiness.
    WouldBlock,
}

impl Worker {
    /// Ask the method to fetch `item`.
    pub fn queue_item(&mut self, item: &ItemDesc) -> Result<(), WorkerError> {
        if self.outbound_fd().is_none() {
            return Err(self.not_running());
        }
        let owner = self.resolve_owner(item).ok_or_else(|| WorkerError::UnknownItem {
            uri: item.uri.clone(),
        })?;

        let request = {
            let owner = owner.borrow();
            Request::Acquire {
                uri: item.uri.clone(),
                filename: owner.dest_file().to_string_lossy().into_owned(),
                headers: owner.custom_headers(),
            }
        };
        self.enqueue(request);
        Ok(())
    }

    /// Push the whole configuration tree if the method asked for it.
    pub fn send_configuration(&mut self) -> Result<(), WorkerError> {
        if self.outbound_fd().is_none() {
            return Err(self.not_running());
        }
        self.push_configuration();
        Ok(())
    }

    pub(super) fn push_configuration(&mut self) {
        if !self.method.send_config() {
            return;
        }
        let items = self
            .config
            .iter()
            .map(|(key, value)| (key, value.to_string()))
            .collect();
        self.enqueue(Request::Configuration { items });
    }

    /// Append an encoded request to the outbound buffer. Never writes.
    pub(super) fn enqueue(&mut self, request: Request) {
        let code = request.code();
        let mut frame = BytesMut::new();
        if let Err(e) = self.codec.encode(request, &mut frame) {
            tracing::error!(method = %self.access, code, error = %e, "Failed to encode request");
            return;
        }

        tracing::debug!(
            target: "acquire_worker::wire",
            method = %self.access,
            " -> {}:{}",
            self.access,
            quote(&String::from_utf8_lossy(&frame), "\n")
        );

        self.outbound.extend_from_slice(&frame);
        self.out_ready = true;
    }

    /// Outbound endpoint is writable: one non-blocking write of the buffer.
    pub fn out_fd_ready(&mut self) -> Result<WriteProgress, WorkerError> {
        let Some(outbound) = self.channel.as_mut().and_then(|c| c.outbound()) else {
            return Err(self.not_running());
        };

        let result = loop {
            match outbound.write(&self.outbound) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other,
            }
        };

        match result {
            Ok(0) if !self.outbound.is_empty() => Err(self.method_failure()),
            Ok(n) => {
                self.outbound.advance(n);
                if self.outbound.is_empty() {
                    self.out_ready = false;
                }
                Ok(WriteProgress::Written(n))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(WriteProgress::WouldBlock),
            Err(e) => {
                tracing::debug!(method = %self.access, error = %e, "Write to method failed");
                Err(self.method_failure())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::config::{Configuration, parse_config_item};
    use crate::method::{Capabilities, MethodConfig};
    use crate::queue::{ItemQueue, TableQueue};
    use crate::testing::{IDLE_METHOD, RecordingItem, ShellSpawner, write_method};

    fn detached(
        access: &str,
        config: Configuration,
        queue: Rc<RefCell<TableQueue>>,
    ) -> (Worker, Rc<MethodConfig>) {
        let method = Rc::new(MethodConfig::new(access));
        let worker = Worker::new(Rc::clone(&method), Rc::new(config), queue, None);
        (worker, method)
    }

    #[test]
    fn acquire_request_bytes() {
        let queue = Rc::new(RefCell::new(TableQueue::new()));
        let desc = queue.borrow_mut().enqueue(
            "ftp://h/p.deb",
            "h p.deb",
            "p.deb",
            RecordingItem::shared("/tmp/p.deb"),
        );
        let (mut worker, _) = detached("ftp", Configuration::new(), queue);

        worker.enqueue(Request::Acquire {
            uri: desc.uri.clone(),
            filename: "/tmp/p.deb".to_string(),
            headers: String::new(),
        });
        assert_eq!(
            worker.pending_output(),
            b"600 URI Acquire\nURI: ftp://h/p.deb\nFilename: /tmp/p.deb\n\n"
        );
        assert!(worker.out_ready);
    }

    #[test]
    fn requests_queue_in_call_order() {
        let (mut worker, _) = detached("ftp", Configuration::new(), Rc::new(RefCell::new(TableQueue::new())));
        worker.enqueue(Request::MediaChanged { failed: true });
        worker.enqueue(Request::MediaChanged { failed: false });
        assert_eq!(
            worker.pending_output(),
            b"603 Media Changed\nFailed: true\n\n603 Media Changed\n\n"
        );
    }

    #[test]
    fn configuration_push_round_trips() {
        let mut config = Configuration::new();
        config.set("Acquire::http::Proxy", "http://proxy:3128/");
        config.set("Acquire::http::Timeout", "30");
        config.set("APT::Note", "two\nlines 100%");
        config.set("Dir::Empty", "");

        let (mut worker, method) = detached("ftp", config, Rc::new(RefCell::new(TableQueue::new())));
        method.negotiate(Capabilities {
            send_config: true,
            ..Capabilities::default()
        });
        worker.push_configuration();

        let text = String::from_utf8_lossy(worker.pending_output()).into_owned();
        assert!(text.starts_with("601 Configuration\n"));
        assert!(text.ends_with("\n\n"));

        let items: Vec<(String, String)> = text
            .lines()
            .filter_map(|line| line.strip_prefix("Config-Item: "))
            .filter_map(parse_config_item)
            .collect();
        assert_eq!(
            items,
            vec![
                ("Acquire::http::Proxy".to_string(), "http://proxy:3128/".to_string()),
                ("Acquire::http::Timeout".to_string(), "30".to_string()),
                ("APT::Note".to_string(), "two\nlines 100%".to_string()),
            ]
        );
    }

    #[test]
    fn no_configuration_unless_requested() {
        let mut config = Configuration::new();
        config.set("A::B", "c");
        let (mut worker, _) = detached("ftp", config, Rc::new(RefCell::new(TableQueue::new())));
        worker.push_configuration();
        assert!(worker.pending_output().is_empty());
        assert!(!worker.out_ready);
    }

    #[test]
    fn requests_refused_when_not_running() {
        let queue = Rc::new(RefCell::new(TableQueue::new()));
        let desc = queue
            .borrow_mut()
            .enqueue("ftp://h/p", "", "", RecordingItem::shared("/tmp/p"));
        let (mut worker, _) = detached("ftp", Configuration::new(), queue);

        assert!(matches!(worker.queue_item(&desc), Err(WorkerError::NotRunning { .. })));
        assert!(matches!(worker.send_configuration(), Err(WorkerError::NotRunning { .. })));
        assert!(matches!(worker.out_fd_ready(), Err(WorkerError::NotRunning { .. })));
    }

    #[test]
    fn queue_item_writes_to_running_method() {
        let dir = tempfile::tempdir().unwrap();
        write_method(dir.path(), "ftp", IDLE_METHOD);
        let mut config = Configuration::new();
        config.set("Dir::Bin::Methods", dir.path().to_string_lossy());

        let queue = Rc::new(RefCell::new(TableQueue::new()));
        let item = RecordingItem::shared("/tmp/p.deb");
        item.borrow_mut().headers = "\nLast-Modified: Tue, 01 Jan 2030 00:00:00 GMT".to_string();
        let desc = queue
            .borrow_mut()
            .enqueue("ftp://h/p.deb", "h p.deb", "p.deb", item);
        let (worker, _) = detached("ftp", config, queue);
        let mut worker = worker.with_spawner(Rc::new(ShellSpawner));
        worker.start().unwrap();

        worker.queue_item(&desc).unwrap();
        let expected: &[u8] = b"600 URI Acquire\nURI: ftp://h/p.deb\nFilename: /tmp/p.deb\nLast-Modified: Tue, 01 Jan 2030 00:00:00 GMT\n\n";
        assert_eq!(worker.pending_output(), expected);
        assert!(worker.wants_write());

        assert_eq!(
            worker.out_fd_ready().unwrap(),
            WriteProgress::Written(expected.len())
        );
        assert!(worker.pending_output().is_empty());
        assert!(!worker.wants_write());
    }

    #[test]
    fn queue_item_rejects_unknown_owner() {
        let dir = tempfile::tempdir().unwrap();
        write_method(dir.path(), "ftp", IDLE_METHOD);
        let mut config = Configuration::new();
        config.set("Dir::Bin::Methods", dir.path().to_string_lossy());

        let queue = Rc::new(RefCell::new(TableQueue::new()));
        let desc = queue
            .borrow_mut()
            .enqueue("ftp://h/q", "", "", RecordingItem::shared("/tmp/q"));
        queue.borrow_mut().item_done(&desc);

        let (worker, _) = detached("ftp", config, queue);
        let mut worker = worker.with_spawner(Rc::new(ShellSpawner));
        worker.start().unwrap();

        let err = worker.queue_item(&desc).unwrap_err();
        assert!(matches!(err, WorkerError::UnknownItem { ref uri } if uri == "ftp://h/q"));
        assert!(worker.pending_output().is_empty());
    }

    #[test]
    fn write_to_exited_method_recovers() {
        let dir = tempfile::tempdir().unwrap();
        write_method(
            dir.path(),
            "quit",
            "printf '100 Capabilities\\nVersion: 1.0\\n\\n'\nexec 0<&-\nsleep 1\n",
        );
        let mut config = Configuration::new();
        config.set("Dir::Bin::Methods", dir.path().to_string_lossy());
        let (worker, _) = detached("quit", config, Rc::new(RefCell::new(TableQueue::new())));
        let mut worker = worker.with_spawner(Rc::new(ShellSpawner));
        worker.start().unwrap();

        // Give the child time to close its stdin.
        std::thread::sleep(std::time::Duration::from_millis(200));
        worker.enqueue(Request::MediaChanged { failed: false });
        let err = worker.out_fd_ready().unwrap_err();
        assert!(matches!(err, WorkerError::MethodDied { .. }), "{err}");
        assert!(!worker.is_running());
        assert!(!worker.wants_write());
        assert!(worker.pending_output().is_empty());
        assert!(worker.outbound_fd().is_none());
        assert!(worker.inbound_fd().is_none());
    }

    #[test]
    fn full_pipe_keeps_buffer_for_later() {
        let dir = tempfile::tempdir().unwrap();
        // Never reads stdin, so the pipe fills up.
        write_method(
            dir.path(),
            "stuck",
            "printf '100 Capabilities\\nVersion: 1.0\\n\\n'\nexec sleep 30\n",
        );
        let mut config = Configuration::new();
        config.set("Dir::Bin::Methods", dir.path().to_string_lossy());
        let (worker, _) = detached("stuck", config, Rc::new(RefCell::new(TableQueue::new())));
        let mut worker = worker.with_spawner(Rc::new(ShellSpawner));
        worker.start().unwrap();

        // Well past any pipe buffer size.
        for _ in 0..20_000 {
            worker.enqueue(Request::MediaChanged { failed: true });
        }
        let queued = worker.pending_output().len();

        let mut written = 0;
        let mut blocked = false;
        for _ in 0..queued {
            match worker.out_fd_ready().unwrap() {
                WriteProgress::Written(n) => written += n,
                WriteProgress::WouldBlock => {
                    blocked = true;
                    break;
                }
            }
        }

        assert!(blocked);
        assert!(written > 0);
        assert_eq!(worker.pending_output().len(), queued - written);
        assert!(worker.is_running());
        assert!(worker.wants_write());
        assert!(worker.diagnostics().is_empty());

        worker.shutdown();
        assert!(!worker.is_running());
    }
}
