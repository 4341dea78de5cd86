//! Duplex byte channel to a method subprocess.
//!
//! Owns the child process and both pipe ends. The parent-side ends are
//! non-blocking; std marks them close-on-exec so later children never inherit
//! them. Teardown is scoped: dropping the channel closes both ends, sends
//! SIGINT and reaps the child, on every exit path.

use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::waitpid;
use nix::unistd::Pid;

use crate::error::StartupError;

/// Extension point for different method spawn strategies.
pub trait MethodSpawner {
    /// Start the method at `path` with piped stdin/stdout.
    fn spawn(&self, path: &Path) -> io::Result<Child>;
}

/// Executes the method directly with no arguments. Its stderr is shared with
/// ours so method diagnostics land in the same log stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExecSpawner;

impl MethodSpawner for ExecSpawner {
    fn spawn(&self, path: &Path) -> io::Result<Child> {
        Command::new(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
    }
}

/// Outcome of waiting for the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reap {
    /// The child was collected.
    Reaped,
    /// waitpid returned something other than our child.
    Mismatch,
    /// No child left to wait for.
    Idle,
}

pub struct DuplexChannel {
    method: String,
    process: Option<Pid>,
    inbound: Option<ChildStdout>,
    outbound: Option<ChildStdin>,
}

impl DuplexChannel {
    pub fn open(
        spawner: &dyn MethodSpawner,
        path: &Path,
        method: &str,
    ) -> Result<Self, StartupError> {
        let mut child = spawner.spawn(path).map_err(|source| StartupError::Spawn {
            method: method.to_string(),
            source,
        })?;

        // From here on, dropping `channel` interrupts and reaps the child.
        let channel = Self {
            method: method.to_string(),
            process: Some(Pid::from_raw(child.id() as libc::pid_t)),
            inbound: child.stdout.take(),
            outbound: child.stdin.take(),
        };

        let pipe_error = |source: io::Error| StartupError::Pipe {
            method: method.to_string(),
            source,
        };
        let (Some(inbound), Some(outbound)) = (&channel.inbound, &channel.outbound) else {
            return Err(pipe_error(io::Error::other("stdin/stdout not captured")));
        };
        set_nonblocking(inbound.as_raw_fd()).map_err(pipe_error)?;
        set_nonblocking(outbound.as_raw_fd()).map_err(pipe_error)?;

        tracing::debug!(
            method,
            pid = child.id(),
            inbound_fd = inbound.as_raw_fd(),
            outbound_fd = outbound.as_raw_fd(),
            "Method spawned"
        );
        Ok(channel)
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.map(|pid| pid.as_raw() as u32)
    }

    /// Both pipe ends are still open.
    pub fn is_open(&self) -> bool {
        self.inbound.is_some() && self.outbound.is_some()
    }

    pub fn inbound(&mut self) -> Option<&mut ChildStdout> {
        self.inbound.as_mut()
    }

    pub fn outbound(&mut self) -> Option<&mut ChildStdin> {
        self.outbound.as_mut()
    }

    pub fn inbound_fd(&self) -> Option<RawFd> {
        self.inbound.as_ref().map(AsRawFd::as_raw_fd)
    }

    pub fn outbound_fd(&self) -> Option<RawFd> {
        self.outbound.as_ref().map(AsRawFd::as_raw_fd)
    }

    /// Block until the inbound end is readable (data or hangup).
    pub fn wait_readable(&self) -> io::Result<()> {
        let fd = self
            .inbound_fd()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        loop {
            // SAFETY: `pfd` is a valid pollfd and `fd` stays open for the call.
            let rc = unsafe { libc::poll(&mut pfd, 1, -1) };
            if rc >= 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    /// Close both pipe ends. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.inbound = None;
        self.outbound = None;
    }

    /// Send SIGINT to a child that has not been reaped yet.
    pub fn interrupt(&self) {
        if let Some(pid) = self.process
            && let Err(errno) = kill(pid, Signal::SIGINT)
        {
            tracing::debug!(method = %self.method, %errno, "Failed to interrupt method");
        }
    }

    /// Blocking wait for the child. Only called once the child is known to be
    /// exiting.
    pub fn reap(&mut self) -> Reap {
        let Some(pid) = self.process.take() else {
            return Reap::Idle;
        };
        loop {
            match waitpid(pid, None) {
                Ok(status) if status.pid() == Some(pid) => {
                    tracing::debug!(method = %self.method, ?status, "Method reaped");
                    return Reap::Reaped;
                }
                Ok(status) => {
                    tracing::debug!(method = %self.method, ?status, "Unexpected wait status");
                    return Reap::Mismatch;
                }
                Err(Errno::EINTR) => continue,
                Err(errno) => {
                    tracing::debug!(method = %self.method, %errno, "waitpid failed");
                    return Reap::Mismatch;
                }
            }
        }
    }

    /// Graceful teardown: close, interrupt, reap.
    pub fn shutdown(&mut self) -> Reap {
        self.close();
        self.interrupt();
        self.reap()
    }
}

impl Drop for DuplexChannel {
    fn drop(&mut self) {
        if self.shutdown() == Reap::Mismatch {
            tracing::warn!(method = %self.method, "Waited for method but nothing was there");
        }
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: `fd` belongs to a pipe end owned by the caller for the whole call.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
