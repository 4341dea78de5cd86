//! Tokio readiness loop for a single [`Worker`].
//!
//! The worker itself never polls. This loop registers its two pipe ends with
//! the runtime's reactor and calls the non-blocking step functions when they
//! become actionable, plus `pulse` on a fixed interval. Must run on a
//! current-thread runtime or inside a `LocalSet`: the worker is `!Send`.

use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

use tokio::io::Interest;
use tokio::io::unix::AsyncFd;
use tokio::time::MissedTickBehavior;

use crate::error::WorkerError;
use crate::worker::{Worker, WriteProgress};

/// Registration handle for a pipe end the worker owns. Never closes the fd.
///
/// A failing step closes both ends inside the worker while the registration
/// is still alive. The step's error then returns from `drive` at once, which
/// drops the `AsyncFd`s before anything else runs on this thread. Their
/// deregistration of the closed fd fails and is ignored by tokio; the kernel
/// already removed the fd from the epoll set when it was closed.
struct Endpoint(RawFd);

impl AsRawFd for Endpoint {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

/// Run `worker` until `done` returns true.
///
/// Returns `WorkerError::MethodDied` if the method goes away first; the
/// worker has already been reset at that point.
pub async fn drive<F>(worker: &mut Worker, pulse: Duration, mut done: F) -> Result<(), WorkerError>
where
    F: FnMut(&Worker) -> bool,
{
    let (Some(in_fd), Some(out_fd)) = (worker.inbound_fd(), worker.outbound_fd()) else {
        return Err(WorkerError::NotRunning {
            method: worker.access().to_string(),
        });
    };
    let inbound = AsyncFd::with_interest(Endpoint(in_fd), Interest::READABLE)?;
    let outbound = AsyncFd::with_interest(Endpoint(out_fd), Interest::WRITABLE)?;

    let mut ticker = tokio::time::interval(pulse);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::debug!(method = %worker.access(), in_fd, out_fd, "Driving method");

    while !done(worker) {
        if !worker.is_running() {
            return Err(WorkerError::NotRunning {
                method: worker.access().to_string(),
            });
        }

        tokio::select! {
            biased;

            guard = inbound.readable(), if worker.wants_read() => {
                let mut guard = guard?;
                // On error the fds are already closed; return before anything
                // else can reuse their numbers.
                worker.in_fd_ready()?;
                // The framer reads until the pipe would block.
                guard.clear_ready();
            }
            guard = outbound.writable(), if worker.wants_write() => {
                let mut guard = guard?;
                if worker.out_fd_ready()? == WriteProgress::WouldBlock {
                    guard.clear_ready();
                }
            }
            _ = ticker.tick() => worker.pulse(),
        }
    }
    Ok(())
}
