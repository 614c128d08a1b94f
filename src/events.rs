//! Event bus (§3, §9): named synchronous hook points fired by the core.
//!
//! Process-local only — never persisted to Redis. A plain mapping from
//! event name to an ordered list of handlers is all the spec calls for;
//! handlers run synchronously on the caller's stack and must not resume on
//! another thread, since some of them (`before_fork`, `after_fork`) run
//! inside a child produced by `fork()`, where spawning new OS threads is
//! unsafe.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// A single synchronous event handler. Boxed so callers can register
/// closures, function pointers, or anything else that fits the signature.
pub type Handler = Arc<dyn Fn(&EventPayload) + Send + Sync>;

/// Loosely-typed payload passed to handlers — the events this core fires
/// carry different shapes (a job envelope, a worker id, an error message),
/// so handlers pattern-match on what they expect.
#[derive(Debug, Clone)]
pub enum EventPayload {
    Job { queue: String, envelope: String },
    Worker { worker_id: String },
    Message(String),
    None,
}

#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Arc<RwLock<HashMap<&'static str, Vec<Handler>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `event`. Handlers fire in registration order.
    pub fn on(&self, event: &'static str, handler: Handler) {
        self.handlers.write().entry(event).or_default().push(handler);
    }

    /// Fire `event` synchronously, in registration order. Handler panics
    /// are not caught here — a panic inside a forked child is expected to
    /// abort that child, not the worker's own main loop.
    pub fn fire(&self, event: &'static str, payload: &EventPayload) {
        if let Some(handlers) = self.handlers.read().get(event) {
            for handler in handlers {
                handler(payload);
            }
        }
    }

    pub fn clear(&self, event: &'static str) {
        self.handlers.write().remove(event);
    }
}

/// Canonical event names fired by the worker lifecycle (§4.4).
pub mod names {
    pub const BEFORE_FIRST_FORK: &str = "before_first_fork";
    pub const BEFORE_FORK: &str = "before_fork";
    pub const AFTER_FORK: &str = "after_fork";
    pub const BEFORE_PERFORM: &str = "before_perform";
    pub const AFTER_PERFORM: &str = "after_perform";
    pub const ON_FAILURE: &str = "on_failure";
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn handlers_fire_in_order() {
        let bus = EventBus::new();
        let order = Arc::new(RwLock::new(Vec::new()));

        let o1 = order.clone();
        bus.on("x", Arc::new(move |_| o1.write().push(1)));
        let o2 = order.clone();
        bus.on("x", Arc::new(move |_| o2.write().push(2)));

        bus.fire("x", &EventPayload::None);
        assert_eq!(*order.read(), vec![1, 2]);
    }

    #[test]
    fn unregistered_event_is_a_no_op() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        bus.on("registered", Arc::new(move |_| { c.fetch_add(1, Ordering::SeqCst); }));
        bus.fire("other", &EventPayload::None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn clear_removes_handlers() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        bus.on("x", Arc::new(move |_| { c.fetch_add(1, Ordering::SeqCst); }));
        bus.clear("x");
        bus.fire("x", &EventPayload::None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
