//! Handler registry: parses handler scripts and indexes them for dispatch.
//!
//! Every load builds a brand new immutable `Snapshot`. The registry publishes
//! it with an atomic pointer swap, so a dispatch that already holds the
//! previous snapshot finishes against it untouched.
//!
//! Precedence: builtin scripts are indexed before user scripts, and a later
//! script claiming an already indexed domain replaces the earlier one. A user
//! handler therefore overrides a builtin handler for the same domain.

use crate::handler::{HandlerDescriptor, Script, ScriptParser};
use arc_swap::ArcSwap;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;

/// Immutable view of all loaded handlers.
#[derive(Debug, Default)]
pub struct Snapshot {
    by_domain: HashMap<String, Arc<HandlerDescriptor>>,
    dynamic: Vec<Arc<HandlerDescriptor>>,
    handlers: usize,
}

impl Snapshot {
    /// Parses builtin then user scripts and indexes every one that parses.
    /// Scripts that fail to parse are logged and skipped.
    pub fn load(parser: &dyn ScriptParser, builtin: &[Script], user: &[Script]) -> Snapshot {
        let mut snapshot = Snapshot::default();
        for script in builtin.iter().chain(user) {
            let descriptor = match parser.parse(&script.id, &script.text) {
                Ok(descriptor) => Arc::new(descriptor),
                Err(failure) => {
                    warn!("Failed to load handler script: {}", failure);
                    continue;
                }
            };
            for domain in &descriptor.domains {
                let key = domain.to_ascii_lowercase();
                if let Some(previous) = snapshot.by_domain.insert(key, Arc::clone(&descriptor)) {
                    debug!(
                        "Handler '{}' overrides '{}' for domain {}",
                        descriptor.id, previous.id, domain
                    );
                }
            }
            if descriptor.is_dynamic() {
                snapshot.dynamic.push(Arc::clone(&descriptor));
            }
            snapshot.handlers += 1;
        }
        snapshot
    }

    /// Exact lookup. `domain` is compared case-insensitively.
    pub fn lookup(&self, domain: &str) -> Option<&Arc<HandlerDescriptor>> {
        self.by_domain.get(&domain.to_ascii_lowercase())
    }

    /// Dynamic handlers in load order.
    pub fn dynamic(&self) -> &[Arc<HandlerDescriptor>] {
        &self.dynamic
    }

    pub fn domain_count(&self) -> usize {
        self.by_domain.len()
    }

    /// Number of scripts that parsed successfully.
    pub fn handler_count(&self) -> usize {
        self.handlers
    }
}

/// Owner of the current snapshot.
pub struct HandlerRegistry {
    parser: Arc<dyn ScriptParser>,
    current: ArcSwap<Snapshot>,
}

impl HandlerRegistry {
    /// Starts with an empty snapshot; nothing matches until the first reload.
    pub fn new(parser: Arc<dyn ScriptParser>) -> Self {
        HandlerRegistry {
            parser,
            current: ArcSwap::from_pointee(Snapshot::default()),
        }
    }

    /// Builds a fresh snapshot and makes it the current one.
    pub fn reload(&self, builtin: &[Script], user: &[Script]) -> Arc<Snapshot> {
        let snapshot = Arc::new(Snapshot::load(self.parser.as_ref(), builtin, user));
        info!(
            "Loaded {} handlers ({} domains, {} dynamic) from {} scripts",
            snapshot.handler_count(),
            snapshot.domain_count(),
            snapshot.dynamic().len(),
            builtin.len() + user.len()
        );
        self.current.store(Arc::clone(&snapshot));
        snapshot
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }
}
