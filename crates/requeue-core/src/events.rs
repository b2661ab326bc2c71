//! Lifecycle event notifier.
//!
//! A standalone observable the queue owns. Delivery is synchronous, in
//! subscription order, one handler call per occurrence.
//!
//! Read-type requests are dispatched eagerly rather than truly queued, so
//! `Added`/`Busy`/`Success`/`Removed` stay silent for them; only failures are
//! worth surfacing to the host. `Error` and `Execute` always fire. The
//! suppression itself happens at the emit sites in `queue`.

use std::sync::{Arc, Mutex, PoisonError};

use crate::domain::Request;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A new mutating request entered the queue.
    Added,
    /// A request was picked up for execution.
    Busy,
    /// A transport attempt is about to start. Fires for every dispatch.
    Execute,
    /// A request completed successfully; removal follows immediately.
    Success,
    /// A transport attempt failed.
    Error,
    /// A request left the queue.
    Removed,
}

pub type EventHandler = Arc<dyn Fn(&Request) + Send + Sync>;

#[derive(Default)]
pub struct Notifier {
    subscribers: Mutex<Vec<(EventKind, EventHandler)>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, kind: EventKind, handler: impl Fn(&Request) + Send + Sync + 'static) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((kind, Arc::new(handler)));
    }

    /// Deliver one event. The matching handlers are snapshotted before any of
    /// them runs, so a handler may subscribe or call back into the queue
    /// without holding the subscriber lock.
    pub fn emit(&self, kind: EventKind, request: &Request) {
        let handlers: Vec<EventHandler> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in handlers {
            handler(request);
        }
    }
}
