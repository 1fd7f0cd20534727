//! In-process event bus — pub/sub fan-out to external subscribers.
//!
//! Delivery is synchronous on the emitting thread, in subscription order, so
//! a session-filtered subscriber observes that session's events in emission
//! order. Each handler invocation is sandboxed: a panicking subscriber is
//! logged and skipped, never preventing delivery to the rest.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use conduit_core::BusEvent;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::error;

/// Subscriber callback.
pub type BusHandler = Arc<dyn Fn(&BusEvent) + Send + Sync>;

/// Opaque subscription identifier.
pub type SubscriptionId = u64;

struct Subscription {
    id: SubscriptionId,
    session_filter: Option<String>,
    handler: BusHandler,
}

struct BusInner {
    subscribers: Mutex<Vec<Subscription>>,
    next_id: AtomicU64,
    emit_count: AtomicU64,
}

/// The event bus. Cheap to clone — clones share the subscriber registry.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                emit_count: AtomicU64::new(0),
            }),
        }
    }

    /// Register a handler, optionally filtered to one session id.
    ///
    /// An empty filter string means "no filter" — the subscriber sees every
    /// event.
    pub fn subscribe(&self, session_filter: Option<&str>, handler: BusHandler) -> SubscriptionId {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let session_filter = session_filter.filter(|s| !s.is_empty()).map(String::from);
        self.inner.subscribers.lock().push(Subscription { id, session_filter, handler });
        id
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.inner.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() < before
    }

    /// Deliver an event to every matching subscriber.
    ///
    /// Returns the number of handlers invoked. Handlers run outside the
    /// registry lock, so a handler may subscribe/unsubscribe reentrantly.
    pub fn emit(&self, event: &BusEvent) -> usize {
        let _ = self.inner.emit_count.fetch_add(1, Ordering::Relaxed);

        let matching: Vec<BusHandler> = {
            let subscribers = self.inner.subscribers.lock();
            subscribers
                .iter()
                .filter(|s| match &s.session_filter {
                    Some(filter) => *filter == event.session_id,
                    None => true,
                })
                .map(|s| Arc::clone(&s.handler))
                .collect()
        };

        for handler in &matching {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                error!(
                    event_type = %event.event_type,
                    session_id = %event.session_id,
                    "event subscriber panicked; continuing delivery"
                );
            }
        }
        matching.len()
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// Total number of events emitted.
    pub fn emit_count(&self) -> u64 {
        self.inner.emit_count.load(Ordering::Relaxed)
    }

    /// Drop every subscription (shutdown / tests).
    pub fn clear(&self) {
        self.inner.subscribers.lock().clear();
    }

    /// Subscribe through an unbounded channel — the form async consumers
    /// (SSE, consumer WebSocket) use. Dropping the returned subscription
    /// unregisters the handler.
    pub fn subscribe_channel(&self, session_filter: Option<&str>) -> ChannelSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(
            session_filter,
            Arc::new(move |event: &BusEvent| {
                let _ = tx.send(event.clone());
            }),
        );
        ChannelSubscription { bus: self.clone(), id, rx }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A channel-backed subscription that unsubscribes on drop.
pub struct ChannelSubscription {
    bus: EventBus,
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<BusEvent>,
}

impl ChannelSubscription {
    /// Receive the next event; `None` after the bus is cleared.
    pub async fn recv(&mut self) -> Option<BusEvent> {
        self.rx.recv().await
    }

    /// Non-blocking receive (tests).
    pub fn try_recv(&mut self) -> Option<BusEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for ChannelSubscription {
    fn drop(&mut self) {
        let _ = self.bus.unsubscribe(self.id);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
