//! Typed publish/subscribe bus for lifecycle and result notifications.
//!
//! Subscribers register for one `EventKind` and receive every matching
//! `Event` on their own crossbeam channel. Receivers that have been dropped
//! are pruned on the next publish.

use crate::error::SessionError;
use crate::results::SessionResult;
use crossbeam_channel::{Receiver, Sender, unbounded};
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SessionLoaded,
    Error,
    ResultAdded,
    ScriptsChanged,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The session was cleared after initialization.
    SessionLoaded,
    /// Starting or stopping capture failed.
    Error { error: SessionError },
    /// A new result was appended to the store.
    ResultAdded { result: SessionResult },
    /// Handler scripts changed on disk or in configuration.
    ScriptsChanged,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::SessionLoaded => EventKind::SessionLoaded,
            Event::Error { .. } => EventKind::Error,
            Event::ResultAdded { .. } => EventKind::ResultAdded,
            Event::ScriptsChanged => EventKind::ScriptsChanged,
        }
    }
}

/// A cheap, cloneable handle to the shared bus.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<HashMap<EventKind, Vec<Sender<Event>>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, kind: EventKind) -> Receiver<Event> {
        let (tx, rx) = unbounded();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push(tx);
        rx
    }

    /// Delivers `event` to every live subscriber of its kind and returns how
    /// many received it.
    pub fn publish(&self, event: Event) -> usize {
        let kind = event.kind();
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(senders) = subscribers.get_mut(&kind) else {
            debug!("No subscribers for {:?}", kind);
            return 0;
        };
        senders.retain(|tx| tx.send(event.clone()).is_ok());
        senders.len()
    }
}
