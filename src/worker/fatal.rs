//! # Once-only fatal error trap.
//!
//! Every path that can kill a worker (a panic anywhere in the process, a
//! service start that fails, a service task that reports a fatal error) ends
//! in [`FatalHandle::report`]. Only the first report wins: it is forwarded to
//! the runtime, which sends it to the supervisor and starts the shutdown path.
//! Later reports are logged and dropped.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use crate::relay::in_listener;
use crate::subscribers::panic_message;

/// The error the runtime forwards upward.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FatalReport {
    pub error: String,
    pub stack: Option<String>,
}

struct Inner {
    tripped: AtomicBool,
    tx: mpsc::UnboundedSender<FatalReport>,
}

/// Cloneable entry point into the fatal path.
#[derive(Clone)]
pub struct FatalHandle {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for FatalHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FatalHandle")
            .field("tripped", &self.is_tripped())
            .finish()
    }
}

impl FatalHandle {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<FatalReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            inner: Arc::new(Inner {
                tripped: AtomicBool::new(false),
                tx,
            }),
        };
        (handle, rx)
    }

    /// Reports a fatal error. Returns `true` only for the first report.
    pub fn report(&self, error: impl Into<String>, stack: Option<String>) -> bool {
        let error = error.into();
        if self.inner.tripped.swap(true, Ordering::SeqCst) {
            tracing::warn!(%error, "fatal error while already shutting down, ignored");
            return false;
        }
        tracing::error!(%error, "fatal error trapped");
        let _ = self.inner.tx.send(FatalReport { error, stack });
        true
    }

    /// Reports an `anyhow` error with its context chain and backtrace.
    pub fn report_error(&self, err: &anyhow::Error) -> bool {
        let bt = err.backtrace();
        let stack = match bt.status() {
            BacktraceStatus::Captured => Some(bt.to_string()),
            _ => None,
        };
        self.report(format!("{err:#}"), stack)
    }

    /// Returns `true` once any fatal error has been reported.
    pub fn is_tripped(&self) -> bool {
        self.inner.tripped.load(Ordering::SeqCst)
    }
}

/// Routes panics on any thread to `handle`, after the previous hook ran.
///
/// Panics raised inside relay listeners are left to the relay.
pub(crate) fn install_panic_hook(handle: FatalHandle) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        previous(info);
        if in_listener() {
            return;
        }
        let mut error = panic_message(info.payload());
        if let Some(location) = info.location() {
            error = format!("{error} at {location}");
        }
        let bt = Backtrace::capture();
        let stack = match bt.status() {
            BacktraceStatus::Captured => Some(bt.to_string()),
            _ => None,
        };
        handle.report(error, stack);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_first_report_is_forwarded() {
        let (handle, mut rx) = FatalHandle::new();
        assert!(handle.report("db connection lost", None));
        assert!(!handle.clone().report("second failure", None));
        assert!(handle.is_tripped());

        assert_eq!(rx.try_recv().unwrap().error, "db connection lost");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn anyhow_context_is_kept() {
        let (handle, mut rx) = FatalHandle::new();
        let err = anyhow::anyhow!("refused").context("connecting upstream");
        handle.report_error(&err);
        assert_eq!(rx.try_recv().unwrap().error, "connecting upstream: refused");
    }
}
