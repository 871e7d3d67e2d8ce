//! Handler descriptors and the capabilities the parser hands to the core.
//!
//! A handler is opaque to the rest of the crate: the registry indexes it by
//! the domains it declares, and the dispatcher only ever calls `extract` or
//! `try_match` on it.

use crate::error::{HandlerFault, ParseFailure};
use crate::parser::Packet;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Session identity extracted from a packet, e.g. `{"sessionId": "abc123"}`.
pub type Identity = BTreeMap<String, String>;

/// Extraction logic used for exact domain matches.
///
/// `Ok(None)` means the packet does not carry identifying data for this
/// handler (the handler declines).
pub trait Extractor: Send + Sync {
    fn extract(&self, packet: &Packet) -> Result<Option<Identity>, HandlerFault>;
}

/// Content-based matching used when no exact handler produced an identity.
pub trait DynamicMatcher: Send + Sync {
    fn try_match(&self, packet: &Packet) -> Result<Option<Identity>, HandlerFault>;
}

/// What a parsed handler is able to do.
pub enum Capability {
    ExactOnly(Box<dyn Extractor>),
    ExactAndDynamic {
        extractor: Box<dyn Extractor>,
        matcher: Box<dyn DynamicMatcher>,
    },
}

/// A fully parsed handler, as produced by a `ScriptParser`.
pub struct HandlerDescriptor {
    pub id: String,
    pub name: String,
    pub domains: BTreeSet<String>,
    pub capability: Capability,
}

impl HandlerDescriptor {
    pub fn is_dynamic(&self) -> bool {
        matches!(self.capability, Capability::ExactAndDynamic { .. })
    }

    pub fn extract(&self, packet: &Packet) -> Result<Option<Identity>, HandlerFault> {
        match &self.capability {
            Capability::ExactOnly(extractor) => extractor.extract(packet),
            Capability::ExactAndDynamic { extractor, .. } => extractor.extract(packet),
        }
    }

    /// Always `Ok(None)` for handlers without dynamic capability.
    pub fn try_match(&self, packet: &Packet) -> Result<Option<Identity>, HandlerFault> {
        match &self.capability {
            Capability::ExactOnly(_) => Ok(None),
            Capability::ExactAndDynamic { matcher, .. } => matcher.try_match(packet),
        }
    }
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("domains", &self.domains)
            .field("dynamic", &self.is_dynamic())
            .finish()
    }
}

/// Raw handler script text together with its stable id (usually the file name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    pub id: String,
    pub text: String,
}

impl Script {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Script {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// Turns script text into a descriptor. The only producer of capabilities.
pub trait ScriptParser: Send + Sync {
    fn parse(&self, id: &str, text: &str) -> Result<HandlerDescriptor, ParseFailure>;
}

impl<F> ScriptParser for F
where
    F: Fn(&str, &str) -> Result<HandlerDescriptor, ParseFailure> + Send + Sync,
{
    fn parse(&self, id: &str, text: &str) -> Result<HandlerDescriptor, ParseFailure> {
        self(id, text)
    }
}
