//! Per-step deadlines and cooperative cancellation
//!
//! A migration step runs on the caller's thread, because the connection and
//! its open transaction are not shareable. A scoped watchdog thread waits for
//! the step to report back; if the deadline passes or the run is cancelled
//! first, it interrupts the connection so the running statement fails and the
//! batch transaction rolls back.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use crate::driver::Interrupt;
use crate::error::{Error, Result};

/// Deadline applied to each step unless configured otherwise
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// How often the watchdog looks at the cancellation flag
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Clonable cancellation flag shared between a runner and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Observed before the next step and by the
    /// watchdog of the step in flight.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

enum Abort {
    Timeout,
    Cancelled,
}

/// Run `step` under `timeout`, interrupting the connection when the deadline
/// passes or `cancel` fires.
///
/// An aborted step always reports [`Error::Timeout`] or [`Error::Cancelled`],
/// whatever the step itself returned.
pub(crate) fn run<T>(
    migration: &str,
    timeout: Duration,
    interrupt: &dyn Interrupt,
    cancel: &CancellationToken,
    step: impl FnOnce() -> Result<T>,
) -> Result<T> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let (result, abort) = thread::scope(|scope| {
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let watchdog = scope.spawn(move || {
            let deadline = Instant::now() + timeout;
            loop {
                let now = Instant::now();
                if now >= deadline {
                    interrupt.interrupt();
                    return Some(Abort::Timeout);
                }
                match done_rx.recv_timeout((deadline - now).min(POLL_INTERVAL)) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return None,
                    Err(RecvTimeoutError::Timeout) if cancel.is_cancelled() => {
                        interrupt.interrupt();
                        return Some(Abort::Cancelled);
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }
        });

        let result = step();
        // the watchdog may already be gone after aborting
        let _ = done_tx.send(());
        let abort = watchdog
            .join()
            .unwrap_or_else(|panic| std::panic::resume_unwind(panic));
        (result, abort)
    });

    match abort {
        Some(Abort::Timeout) => {
            tracing::warn!(migration, timeout = ?timeout, "migration step exceeded its deadline");
            Err(Error::Timeout {
                migration: migration.to_string(),
                after: timeout,
            })
        }
        Some(Abort::Cancelled) => {
            tracing::warn!(migration, "migration step cancelled");
            Err(Error::Cancelled)
        }
        None => result,
    }
}
