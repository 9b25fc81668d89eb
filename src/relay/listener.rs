//! # Listener wrapping.
//!
//! [`wrap_listener`] decorates a user handler at registration time. The
//! wrapper owns the registration timestamp and turns both returned errors and
//! panics into a [`ListenerFailure`] instead of letting them escape into the
//! emitting code.

use std::cell::Cell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::relay::FleetEvent;
use crate::subscribers::panic_message;

static LISTENER_SEQ: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static IN_LISTENER: Cell<bool> = const { Cell::new(false) };
}

/// Returns `true` while the current thread is running a wrapped listener.
///
/// The worker's panic hook uses this to leave listener panics to the relay.
pub(crate) fn in_listener() -> bool {
    IN_LISTENER.with(Cell::get)
}

/// Handler signature accepted by [`EventRelay::on`](crate::EventRelay::on).
pub type ListenerFn = dyn Fn(&FleetEvent) -> anyhow::Result<()> + Send + Sync;

/// Opaque registration handle returned by `on` and accepted by `off`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Why a listener invocation failed.
#[derive(Debug)]
pub enum ListenerFailure {
    /// The handler returned an error.
    Error(anyhow::Error),
    /// The handler panicked.
    Panic(String),
}

impl std::fmt::Display for ListenerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerFailure::Error(err) => write!(f, "{err:#}"),
            ListenerFailure::Panic(msg) => write!(f, "panic: {msg}"),
        }
    }
}

/// A registered handler plus its bookkeeping.
pub struct WrappedListener {
    id: ListenerId,
    kind: Arc<str>,
    registered_at: Instant,
    handler: Arc<ListenerFn>,
}

impl WrappedListener {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Event name this listener is registered for.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Time since registration.
    pub fn age(&self) -> Duration {
        self.registered_at.elapsed()
    }

    /// Runs the handler, catching errors and panics.
    pub fn invoke(&self, event: &FleetEvent) -> Result<(), ListenerFailure> {
        let was_inside = IN_LISTENER.with(|flag| flag.replace(true));
        let outcome = catch_unwind(AssertUnwindSafe(|| (self.handler)(event)));
        IN_LISTENER.with(|flag| flag.set(was_inside));

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(ListenerFailure::Error(err)),
            Err(payload) => Err(ListenerFailure::Panic(panic_message(&*payload))),
        }
    }
}

impl std::fmt::Debug for WrappedListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrappedListener")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("registered_at", &self.registered_at)
            .finish_non_exhaustive()
    }
}

/// Wraps `handler` as a listener for events named `kind`.
pub fn wrap_listener<F>(kind: &str, handler: F) -> WrappedListener
where
    F: Fn(&FleetEvent) -> anyhow::Result<()> + Send + Sync + 'static,
{
    WrappedListener {
        id: ListenerId(LISTENER_SEQ.fetch_add(1, Ordering::Relaxed)),
        kind: Arc::from(kind),
        registered_at: Instant::now(),
        handler: Arc::new(handler),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event() -> FleetEvent {
        FleetEvent::new("job:done", json!({"id": 1}), "supervisor")
    }

    #[test]
    fn returned_errors_are_captured() {
        let listener = wrap_listener("job:done", |_| anyhow::bail!("disk full"));
        match listener.invoke(&event()) {
            Err(ListenerFailure::Error(err)) => assert_eq!(err.to_string(), "disk full"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn panics_are_captured_and_flag_is_restored() {
        let listener = wrap_listener("job:done", |_| panic!("listener bug"));
        match listener.invoke(&event()) {
            Err(ListenerFailure::Panic(msg)) => assert_eq!(msg, "listener bug"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(!in_listener());
    }

    #[test]
    fn ids_are_unique() {
        let a = wrap_listener("a", |_| Ok(()));
        let b = wrap_listener("a", |_| Ok(()));
        assert_ne!(a.id(), b.id());
        assert_eq!(a.kind(), "a");
    }
}
