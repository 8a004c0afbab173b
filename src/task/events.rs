//! Observer lists for task lifecycle events.
//!
//! Multicast delegates (the source's model) become explicit per-event
//! observer lists here. Firing copies the handler list out from under the
//! lock first, so a handler may subscribe or unsubscribe further handlers —
//! including on the same event — without deadlocking or being invoked
//! mid-iteration by its own registration.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Handle returned by `EventList::subscribe`, used to `unsubscribe` later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// An observer list for a single event type.
pub struct EventList<E> {
    handlers: Mutex<Vec<(HandlerId, Handler<E>)>>,
    next_id: AtomicU64,
}

impl<E> Default for EventList<E> {
    fn default() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<E> EventList<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, returning an id that can later be passed to
    /// `unsubscribe`.
    pub fn subscribe(&self, handler: impl Fn(&E) + Send + Sync + 'static) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .lock()
            .unwrap()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a previously registered handler. A no-op if it was already
    /// removed or never existed.
    pub fn unsubscribe(&self, id: HandlerId) {
        self.handlers.lock().unwrap().retain(|(h, _)| *h != id);
    }

    /// Fire the event to every currently-registered handler.
    pub(crate) fn fire(&self, event: &E) {
        let snapshot: Vec<Handler<E>> = {
            let guard = self.handlers.lock().unwrap();
            guard.iter().map(|(_, h)| h.clone()).collect()
        };
        for handler in snapshot {
            handler(event);
        }
    }

    /// Drop every handler. Called on terminal transition so that a handler
    /// closure capturing its own task's handle cannot keep the task's event
    /// list (and thus the closure, and thus the task) alive forever.
    pub(crate) fn clear(&self) {
        self.handlers.lock().unwrap().clear();
    }
}

/// Payload delivered to `OnStart` subscribers.
#[derive(Debug, Clone, Copy)]
pub struct StartEvent {
    pub task_id: u64,
}

/// Payload delivered to `OnEnd` subscribers.
#[derive(Debug, Clone)]
pub struct EndEvent {
    pub task_id: u64,
    pub success: bool,
    pub fault: Option<crate::error::Fault>,
}

/// Payload delivered to `OnProgress` subscribers.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub task_id: u64,
    pub current: u64,
    pub total: u64,
    pub message: String,
}
