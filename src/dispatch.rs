//! Packet dispatch: decides which handler, if any, gets a packet.
//!
//! Order of evaluation for one packet:
//! 1. exact lookup of the packet's domain;
//! 2. if there is no exact handler, or it declines or faults, the dynamic
//!    handlers in load order, stopping at the first one that matches;
//! 3. otherwise the packet is dropped.
//!
//! Handler calls are isolated. An error or a panic inside a handler counts
//! as "no match" for that handler and dispatch carries on.

use crate::error::HandlerFault;
use crate::handler::{HandlerDescriptor, Identity};
use crate::parser::Packet;
use crate::registry::Snapshot;
use crate::results::Extraction;
use log::{debug, warn};
use std::panic::{self, AssertUnwindSafe};

/// Counters kept across packets.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub packets: u64,
    pub matched: u64,
    pub faults: u64,
}

#[derive(Debug, Default)]
pub struct PacketDispatcher {
    stats: DispatchStats,
}

impl PacketDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    pub fn dispatch(&mut self, packet: &Packet, snapshot: &Snapshot) -> Option<Extraction> {
        self.stats.packets += 1;
        let domain = packet.domain();

        if let Some(handler) = domain.as_deref().and_then(|d| snapshot.lookup(d)) {
            let found = self.invoke(handler, packet, |h, p| h.extract(p));
            if let Some(identity) = found {
                return Some(self.matched(handler, packet, identity));
            }
            debug!("Handler '{}' declined {:?}", handler.id, domain);
        }

        for handler in snapshot.dynamic() {
            if let Some(identity) = self.invoke(handler, packet, |h, p| h.try_match(p)) {
                return Some(self.matched(handler, packet, identity));
            }
        }

        debug!(
            "No handler for {} {}{}",
            packet.method,
            packet.site(),
            packet.path
        );
        None
    }

    fn invoke<F>(
        &mut self,
        handler: &HandlerDescriptor,
        packet: &Packet,
        call: F,
    ) -> Option<Identity>
    where
        F: FnOnce(&HandlerDescriptor, &Packet) -> Result<Option<Identity>, HandlerFault>,
    {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| call(handler, packet)))
            .unwrap_or_else(|payload| {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panicked".to_string());
                Err(HandlerFault::new(handler.id.clone(), reason))
            });
        match outcome {
            Ok(identity) => identity,
            Err(fault) => {
                self.stats.faults += 1;
                warn!("Handler '{}' failed on {}: {}", handler.id, packet.site(), fault);
                None
            }
        }
    }

    fn matched(
        &mut self,
        handler: &HandlerDescriptor,
        packet: &Packet,
        identity: Identity,
    ) -> Extraction {
        self.stats.matched += 1;
        Extraction {
            handler_id: handler.id.clone(),
            site: packet.site(),
            identity,
        }
    }
}
