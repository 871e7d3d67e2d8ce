//! Test doubles shared by the unit tests.

use crate::capture::{CaptureConfig, PacketSink, PacketSource, SourceOpener};
use crate::error::{CaptureError, HandlerFault};
use crate::handler::{Capability, DynamicMatcher, Extractor, HandlerDescriptor, Identity};
use crate::parser::Packet;
use crate::results::SessionResult;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// An HTTP request to `host` carrying `cookies`.
pub fn mock_packet(host: &str, cookies: &[(&str, &str)]) -> Packet {
    Packet {
        source_ip: "192.168.1.10".parse().unwrap(),
        dest_ip: "93.184.216.34".parse().unwrap(),
        source_port: 40000,
        dest_port: 80,
        method: "GET".to_string(),
        path: "/".to_string(),
        host: Some(host.to_string()),
        cookies: cookies
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        user_agent: None,
    }
}

pub fn mock_result(sequence: u64) -> SessionResult {
    SessionResult {
        handler_id: "bank.yaml".to_string(),
        site: "bank.example".to_string(),
        identity: Identity::from([("sessionId".to_string(), "abc123".to_string())]),
        sequence,
    }
}

/// Capture backend that never touches a device. Tests push packets through
/// `inject` and observe open/close counts.
#[derive(Default)]
pub struct FakeOpener {
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
    sink: Mutex<Option<PacketSink>>,
    fail_next: Mutex<Option<String>>,
}

impl FakeOpener {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn fail_next_open(&self, reason: &str) {
        *self.fail_next.lock().unwrap() = Some(reason.to_string());
    }

    /// Delivers a packet as the live source would. `false` once the session
    /// is no longer listening.
    pub fn inject(&self, packet: Packet) -> bool {
        match self.sink.lock().unwrap().as_ref() {
            Some(sink) => sink.deliver(packet),
            None => false,
        }
    }

    pub fn break_stream(&self, reason: &str) {
        if let Some(sink) = self.sink.lock().unwrap().take() {
            sink.fail(reason);
        }
    }
}

impl SourceOpener for FakeOpener {
    fn open(
        &self,
        config: &CaptureConfig,
        sink: PacketSink,
    ) -> Result<Box<dyn PacketSource>, CaptureError> {
        if let Some(reason) = self.fail_next.lock().unwrap().take() {
            return Err(CaptureError::Open {
                interface: config.interface.clone(),
                reason,
            });
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        *self.sink.lock().unwrap() = Some(sink);
        Ok(Box::new(FakeSource {
            closed: Arc::clone(&self.closed),
        }))
    }
}

struct FakeSource {
    closed: Arc<AtomicUsize>,
}

impl PacketSource for FakeSource {
    fn close(&mut self) -> Result<(), String> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// What a scripted handler does when invoked.
#[derive(Clone, Copy)]
pub enum Behaviour {
    /// Extracts `{sessionId: <cookie value>}` when the cookie is present.
    SessionCookie,
    Decline,
    Fail,
    Panic,
}

/// A handler whose behaviour is fixed by the test and which counts calls.
pub struct Scripted {
    behaviour: Behaviour,
    calls: Arc<AtomicUsize>,
}

impl Scripted {
    fn run(&self, packet: &Packet) -> Result<Option<Identity>, HandlerFault> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            Behaviour::SessionCookie => Ok(packet
                .cookie("sessionId")
                .map(|v| Identity::from([("sessionId".to_string(), v.to_string())]))),
            Behaviour::Decline => Ok(None),
            Behaviour::Fail => Err(HandlerFault::new("scripted", "refused packet")),
            Behaviour::Panic => panic!("scripted handler blew up"),
        }
    }
}

impl Extractor for Scripted {
    fn extract(&self, packet: &Packet) -> Result<Option<Identity>, HandlerFault> {
        self.run(packet)
    }
}

impl DynamicMatcher for Scripted {
    fn try_match(&self, packet: &Packet) -> Result<Option<Identity>, HandlerFault> {
        self.run(packet)
    }
}

/// Builds a descriptor and returns the shared call counter of its logic.
pub fn scripted_handler(
    id: &str,
    domains: &[&str],
    exact: Behaviour,
    dynamic: Option<Behaviour>,
) -> (HandlerDescriptor, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let extractor = Box::new(Scripted {
        behaviour: exact,
        calls: Arc::clone(&calls),
    });
    let capability = match dynamic {
        None => Capability::ExactOnly(extractor),
        Some(behaviour) => Capability::ExactAndDynamic {
            extractor,
            matcher: Box::new(Scripted {
                behaviour,
                calls: Arc::clone(&calls),
            }),
        },
    };
    let descriptor = HandlerDescriptor {
        id: id.to_string(),
        name: id.to_string(),
        domains: domains.iter().map(|d| d.to_string()).collect::<BTreeSet<_>>(),
        capability,
    };
    (descriptor, calls)
}

/// Parser that hands out prebuilt descriptors by script id.
pub fn prebuilt_parser(
    descriptors: Vec<HandlerDescriptor>,
) -> impl Fn(&str, &str) -> Result<HandlerDescriptor, crate::error::ParseFailure> + Send + Sync {
    let table = Mutex::new(
        descriptors
            .into_iter()
            .map(|d| (d.id.clone(), d))
            .collect::<std::collections::HashMap<_, _>>(),
    );
    move |id: &str, _text: &str| {
        table
            .lock()
            .unwrap()
            .remove(id)
            .ok_or_else(|| crate::error::ParseFailure::new(id, "unknown script"))
    }
}

/// Snapshot over prebuilt builtin and user descriptors, in that order.
pub fn snapshot_of(
    builtin: Vec<HandlerDescriptor>,
    user: Vec<HandlerDescriptor>,
) -> crate::registry::Snapshot {
    let scripts = |list: &[HandlerDescriptor]| {
        list.iter()
            .map(|d| crate::handler::Script::new(d.id.clone(), ""))
            .collect::<Vec<_>>()
    };
    let (builtin_scripts, user_scripts) = (scripts(&builtin), scripts(&user));
    let parser = prebuilt_parser(builtin.into_iter().chain(user).collect());
    crate::registry::Snapshot::load(&parser, &builtin_scripts, &user_scripts)
}
