//! # Fleet-wide application event relay.
//!
//! [`EventRelay`] is a small named-event bus that exists in every process of
//! the fleet. What happens after the local listeners ran depends on the role:
//!
//! ```text
//! worker A: emit(type, payload)
//!   ├─► A's listeners for `type` (synchronously, registration order)
//!   └─► {"type":"FLEET_EVENT"} ──► supervisor
//!                                     ├─► supervisor listeners for `type`
//!                                     └─► every other live worker (not A)
//!                                            └─► their listeners for `type`
//! ```
//!
//! A supervisor-side `emit` reaches its own listeners and then every live worker.
//!
//! ## Rules
//! - Per-process emission order is preserved; there is no global order.
//! - A listener that returns `Err` or panics is logged together with the event
//!   metadata, and an [`ERROR_EVENT`] is delivered to local `"error"` listeners.
//!   Error events stay in the process that produced them.
//! - Failures inside `"error"` listeners are only logged.
//! - No replay: workers that join later do not see earlier events.

mod event;
mod listener;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::json;
use tokio::sync::mpsc;

use crate::protocol::WorkerMessage;

pub use event::{ERROR_EVENT, FleetEvent};
pub(crate) use listener::in_listener;
pub use listener::{ListenerFailure, ListenerFn, ListenerId, WrappedListener, wrap_listener};

/// Where emissions go after local delivery.
#[derive(Clone, Debug)]
enum Outlet {
    /// Standalone relay, local listeners only.
    Local,
    /// Worker process: mirror to the supervisor as `FLEET_EVENT` frames.
    Upstream(mpsc::UnboundedSender<WorkerMessage>),
    /// Supervisor process: hand to the supervisor loop for fan-out to workers.
    Fanout(mpsc::UnboundedSender<FleetEvent>),
}

type ListenerMap = HashMap<Arc<str>, Vec<Arc<WrappedListener>>>;

struct Inner {
    origin_id: String,
    outlet: Outlet,
    listeners: RwLock<ListenerMap>,
}

/// Named-event bus with cross-process forwarding.
///
/// Cheap to clone; clones share listeners.
#[derive(Clone)]
pub struct EventRelay {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for EventRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRelay")
            .field("origin_id", &self.inner.origin_id)
            .field("outlet", &self.inner.outlet)
            .finish_non_exhaustive()
    }
}

impl EventRelay {
    /// A relay that only delivers to listeners in this process.
    pub fn local(origin_id: impl Into<String>) -> Self {
        Self::with_outlet(origin_id.into(), Outlet::Local)
    }

    pub(crate) fn upstream(
        origin_id: impl Into<String>,
        tx: mpsc::UnboundedSender<WorkerMessage>,
    ) -> Self {
        Self::with_outlet(origin_id.into(), Outlet::Upstream(tx))
    }

    /// Supervisor-side relay; returns the receiver the supervisor loop drains.
    pub(crate) fn fanout(origin_id: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<FleetEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::with_outlet(origin_id.into(), Outlet::Fanout(tx)), rx)
    }

    fn with_outlet(origin_id: String, outlet: Outlet) -> Self {
        Self {
            inner: Arc::new(Inner {
                origin_id,
                outlet,
                listeners: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Identifier stamped into `originId` of emitted events.
    pub fn origin_id(&self) -> &str {
        &self.inner.origin_id
    }

    /// Registers `handler` for events named `kind`.
    pub fn on<F>(&self, kind: &str, handler: F) -> ListenerId
    where
        F: Fn(&FleetEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let listener = Arc::new(wrap_listener(kind, handler));
        let id = listener.id();
        let mut map = self
            .inner
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        map.entry(Arc::from(kind)).or_default().push(listener);
        tracing::debug!(event_type = kind, listener = ?id, "listener registered");
        id
    }

    /// Removes a listener. Returns `false` if it was not registered.
    ///
    /// The listener's lifetime (registration to removal) is logged per event name.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut map = self
            .inner
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let mut removed = None;
        for list in map.values_mut() {
            if let Some(pos) = list.iter().position(|l| l.id() == id) {
                removed = Some(list.remove(pos));
                break;
            }
        }
        map.retain(|_, list| !list.is_empty());
        drop(map);

        match removed {
            Some(listener) => {
                tracing::debug!(
                    event_type = listener.kind(),
                    listener = ?id,
                    lifetime_ms = listener.age().as_millis() as u64,
                    "listener removed"
                );
                true
            }
            None => false,
        }
    }

    /// Number of listeners registered for `kind`.
    pub fn listener_count(&self, kind: &str) -> usize {
        self.inner
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind)
            .map_or(0, Vec::len)
    }

    /// Emits an event: local listeners first, then forwarding by role.
    ///
    /// Returns the event as it was delivered.
    pub fn emit(&self, kind: &str, payload: serde_json::Value) -> FleetEvent {
        let event = FleetEvent::new(kind, payload, self.inner.origin_id.clone());
        self.deliver_local(&event);

        match &self.inner.outlet {
            Outlet::Local => {}
            Outlet::Upstream(tx) => {
                if tx
                    .send(WorkerMessage::FleetEvent {
                        event: event.clone(),
                    })
                    .is_err()
                {
                    tracing::warn!(
                        event_id = %event.event_id,
                        event_type = %event.kind,
                        "control channel closed, event not forwarded"
                    );
                }
            }
            Outlet::Fanout(tx) => {
                let _ = tx.send(event.clone());
            }
        }
        event
    }

    /// Calls every local listener registered for `event.kind`.
    ///
    /// Listeners are snapshotted first, so handlers may call `on`/`off`/`emit`.
    pub(crate) fn deliver_local(&self, event: &FleetEvent) {
        for listener in self.snapshot(&event.kind) {
            if let Err(failure) = listener.invoke(event) {
                self.on_listener_failure(&listener, event, failure);
            }
        }
    }

    fn snapshot(&self, kind: &str) -> Vec<Arc<WrappedListener>> {
        self.inner
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind)
            .cloned()
            .unwrap_or_default()
    }

    fn on_listener_failure(
        &self,
        listener: &WrappedListener,
        event: &FleetEvent,
        failure: ListenerFailure,
    ) {
        tracing::error!(
            event_id = %event.event_id,
            event_type = %event.kind,
            origin_id = %event.origin_id,
            timestamp = event.timestamp,
            listener = ?listener.id(),
            error = %failure,
            "event listener failed"
        );
        if event.is_error_event() {
            return;
        }

        let error_event = FleetEvent::new(
            ERROR_EVENT,
            json!({
                "error": failure.to_string(),
                "eventId": event.event_id,
                "eventType": event.kind,
                "originId": event.origin_id,
            }),
            self.inner.origin_id.clone(),
        );
        self.deliver_local(&error_event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder(relay: &EventRelay, kind: &str) -> Arc<Mutex<Vec<FleetEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        relay.on(kind, move |ev| {
            sink.lock().unwrap().push(ev.clone());
            Ok(())
        });
        seen
    }

    #[test]
    fn emit_runs_listeners_synchronously_in_order() {
        let relay = EventRelay::local("supervisor");
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = Arc::clone(&order);
            relay.on("tick", move |_| {
                order.lock().unwrap().push(n);
                Ok(())
            });
        }

        let ev = relay.emit("tick", json!({}));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(ev.origin_id, "supervisor");
    }

    #[test]
    fn failing_listener_becomes_error_event() {
        let relay = EventRelay::local("worker-0");
        let errors = recorder(&relay, ERROR_EVENT);
        let after = recorder(&relay, "job:done");
        relay.on("job:done", |_| anyhow::bail!("handler broke"));
        relay.on("job:done", |_| panic!("handler exploded"));

        let ev = relay.emit("job:done", json!({"id": 7}));

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].payload["eventId"], ev.event_id.as_str());
        assert_eq!(errors[0].payload["error"], "handler broke");
        assert_eq!(errors[1].payload["error"], "panic: handler exploded");
        assert_eq!(after.lock().unwrap().len(), 1);
    }

    #[test]
    fn failing_error_listener_does_not_recurse() {
        let relay = EventRelay::local("worker-0");
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        relay.on(ERROR_EVENT, move |_| {
            *counter.lock().unwrap() += 1;
            anyhow::bail!("error handler broke too")
        });
        relay.on("job:done", |_| anyhow::bail!("first failure"));

        relay.emit("job:done", json!(null));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn off_removes_only_the_given_listener() {
        let relay = EventRelay::local("supervisor");
        let keep = recorder(&relay, "tick");
        let drop_id = relay.on("tick", |_| anyhow::bail!("should be gone"));
        assert_eq!(relay.listener_count("tick"), 2);

        assert!(relay.off(drop_id));
        assert!(!relay.off(drop_id));
        assert_eq!(relay.listener_count("tick"), 1);

        relay.emit("tick", json!(null));
        assert_eq!(keep.lock().unwrap().len(), 1);
    }

    #[test]
    fn listeners_may_register_while_handling() {
        let relay = EventRelay::local("supervisor");
        let inner = relay.clone();
        relay.on("tick", move |_| {
            inner.on("tock", |_| Ok(()));
            Ok(())
        });
        relay.emit("tick", json!(null));
        assert_eq!(relay.listener_count("tock"), 1);
    }

    #[test]
    fn upstream_mirrors_emissions_but_not_error_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let relay = EventRelay::upstream("worker-1", tx);
        relay.on("job:done", |_| anyhow::bail!("nope"));

        let ev = relay.emit("job:done", json!({"id": 1}));

        match rx.try_recv() {
            Ok(WorkerMessage::FleetEvent { event }) => assert_eq!(event, ev),
            other => panic!("unexpected frame: {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn fanout_hands_emissions_to_the_supervisor_loop() {
        let (relay, mut rx) = EventRelay::fanout("supervisor");
        let ev = relay.emit("config:reload", json!({"version": 3}));
        assert_eq!(rx.try_recv().unwrap(), ev);
    }
}
