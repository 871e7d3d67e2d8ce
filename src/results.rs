use crate::events::{Event, EventBus};
use crate::handler::Identity;
use serde::Serialize;

/// An identity extracted by a handler, before it is given a sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub handler_id: String,
    pub site: String,
    pub identity: Identity,
}

/// One recorded session identity. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionResult {
    pub handler_id: String,
    pub site: String,
    pub identity: Identity,
    pub sequence: u64,
}

/// Append-only record of results for the current session.
/// Every append is announced on the bus as `result_added`.
pub struct ResultStore {
    results: Vec<SessionResult>,
    next_sequence: u64,
    bus: EventBus,
}

impl ResultStore {
    pub fn new(bus: EventBus) -> Self {
        ResultStore {
            results: Vec::new(),
            next_sequence: 0,
            bus,
        }
    }

    pub fn append(&mut self, extraction: Extraction) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let result = SessionResult {
            handler_id: extraction.handler_id,
            site: extraction.site,
            identity: extraction.identity,
            sequence,
        };
        self.results.push(result.clone());
        self.bus.publish(Event::ResultAdded { result });
        sequence
    }

    pub fn all(&self) -> &[SessionResult] {
        &self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Drops every result and restarts numbering at zero.
    pub fn clear(&mut self) {
        self.results.clear();
        self.next_sequence = 0;
    }
}
