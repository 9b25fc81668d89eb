//! # Fan-out of lifecycle events to subscribers.
//!
//! Every subscriber owns a bounded queue and one delivery task, so the
//! supervisor loop never waits on a subscriber.
//!
//! ```text
//! supervisor ── emit(event) ──┬─► accepts? ─► [queue] ─► task ─► LogWriter::on_event
//!                             └─► accepts? ─► [queue] ─► task ─► Custom::on_event
//!                                                          └─ panic ─► SubscriberPanicked
//! ```
//!
//! A full queue drops the event for that subscriber alone and publishes
//! `SubscriberOverflow`. Overflow notices are never reported about themselves.
//! Each subscriber sees its events in publication order; there is no ordering
//! between subscribers.

use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use crate::events::{Bus, Event, EventKind};
use crate::subscribers::Subscribe;

struct Lane {
    sub: Arc<dyn Subscribe>,
    tx: mpsc::Sender<Arc<Event>>,
}

/// Delivers supervisor events to a fixed list of [`Subscribe`] implementations.
pub struct SubscriberSet {
    lanes: Vec<Lane>,
    tasks: Vec<JoinHandle<()>>,
    bus: Bus,
}

impl SubscriberSet {
    /// Starts one delivery task per subscriber. Needs a Tokio runtime.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>, bus: Bus) -> Self {
        let mut lanes = Vec::with_capacity(subs.len());
        let mut tasks = Vec::with_capacity(subs.len());
        for sub in subs {
            let (tx, rx) = mpsc::channel(sub.queue_capacity().max(1));
            tasks.push(tokio::spawn(deliver(Arc::clone(&sub), rx, bus.clone())));
            lanes.push(Lane { sub, tx });
        }
        Self { lanes, tasks, bus }
    }

    /// Queues `event` for every subscriber that accepts its kind.
    pub fn emit(&self, event: &Event) {
        let mut shared: Option<Arc<Event>> = None;
        for lane in &self.lanes {
            if !lane.sub.accepts(event.kind) {
                continue;
            }
            let ev = shared.get_or_insert_with(|| Arc::new(event.clone()));
            let reason = match lane.tx.try_send(Arc::clone(ev)) {
                Ok(()) => continue,
                Err(TrySendError::Full(_)) => "full",
                Err(TrySendError::Closed(_)) => "closed",
            };
            tracing::warn!(
                subscriber = lane.sub.name(),
                kind = event.kind.as_label(),
                reason,
                "event dropped for subscriber"
            );
            if event.kind != EventKind::SubscriberOverflow {
                self.bus
                    .publish(Event::subscriber_overflow(lane.sub.name(), reason));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    /// Closes every queue and waits until the queued events are delivered.
    pub async fn shutdown(self) {
        drop(self.lanes);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

async fn deliver(sub: Arc<dyn Subscribe>, mut rx: mpsc::Receiver<Arc<Event>>, bus: Bus) {
    while let Some(ev) = rx.recv().await {
        let outcome = std::panic::AssertUnwindSafe(sub.on_event(&ev))
            .catch_unwind()
            .await;
        if let Err(panic) = outcome {
            let info = panic_message(&*panic);
            tracing::warn!(subscriber = sub.name(), panic = %info, "subscriber panicked");
            bus.publish(Event::subscriber_panicked(sub.name(), info));
        }
    }
}

/// Extracts a printable message from a panic payload.
pub(crate) fn panic_message(any: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = any.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = any.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    struct Counter(Arc<AtomicUsize>);

    #[async_trait]
    impl Subscribe for Counter {
        async fn on_event(&self, _ev: &Event) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
        fn name(&self) -> &'static str {
            "counter"
        }
        fn accepts(&self, kind: EventKind) -> bool {
            kind != EventKind::HeartbeatReceived
        }
    }

    struct Exploding;

    #[async_trait]
    impl Subscribe for Exploding {
        async fn on_event(&self, _ev: &Event) {
            panic!("boom");
        }
        fn name(&self) -> &'static str {
            "exploding"
        }
    }

    #[tokio::test]
    async fn panicking_subscriber_does_not_starve_others() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let seen = Arc::new(AtomicUsize::new(0));
        let set = SubscriberSet::new(
            vec![Arc::new(Exploding), Arc::new(Counter(Arc::clone(&seen)))],
            bus.clone(),
        );

        set.emit(&Event::new(EventKind::WorkerSpawned).with_slot(0));
        set.emit(&Event::new(EventKind::HeartbeatReceived).with_slot(0));
        set.emit(&Event::new(EventKind::WorkerExited).with_slot(0));

        let ev = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ev.kind, EventKind::SubscriberPanicked);
        assert_eq!(
            ev.reason.as_deref(),
            Some("subscriber=exploding panic=boom")
        );

        set.shutdown().await;
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    struct Stalled;

    #[async_trait]
    impl Subscribe for Stalled {
        async fn on_event(&self, _ev: &Event) {
            std::future::pending::<()>().await;
        }
        fn name(&self) -> &'static str {
            "stalled"
        }
        fn queue_capacity(&self) -> usize {
            1
        }
    }

    #[tokio::test]
    async fn full_queue_reports_overflow() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let set = SubscriberSet::new(vec![Arc::new(Stalled)], bus.clone());
        assert_eq!(set.len(), 1);

        // The first event is taken by the stalled task; the next fills the queue.
        set.emit(&Event::new(EventKind::WorkerSpawned));
        tokio::task::yield_now().await;
        set.emit(&Event::new(EventKind::WorkerSpawned));
        set.emit(&Event::new(EventKind::WorkerSpawned));

        let ev = rx.recv().await.unwrap();
        assert!(ev.is_subscriber_overflow());
        assert_eq!(ev.reason.as_deref(), Some("subscriber=stalled reason=full"));
    }
}
