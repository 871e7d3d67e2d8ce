//! Top-level session façade.
//!
//! The controller owns the handler registry, the result store and at most one
//! capture session. Lifecycle failures never escape `start_capture`,
//! `stop_capture` or `toggle_capture`; they are published as `error` events
//! instead.

use crate::capture::{
    CaptureConfig, CaptureSession, CaptureState, SourceEvent, SourceOpener,
};
use crate::dispatch::{DispatchStats, PacketDispatcher};
use crate::error::{ExportError, SessionError};
use crate::events::{Event, EventBus, EventKind};
use crate::handler::{Script, ScriptParser};
use crate::parser::Packet;
use crate::registry::{HandlerRegistry, Snapshot};
use crate::results::{ResultStore, SessionResult};
use crate::settings::ConfigSource;
use crossbeam_channel::{Receiver, never, select};
use log::{info, warn};
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Operator requests handled by the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Toggle,
    Clear,
    Status,
    Save(String),
    Quit,
}

pub struct SessionController {
    config: Box<dyn ConfigSource>,
    opener: Arc<dyn SourceOpener>,
    bus: EventBus,
    registry: HandlerRegistry,
    dispatcher: PacketDispatcher,
    results: ResultStore,
    session: Option<CaptureSession>,
    scripts_changed: Option<Receiver<Event>>,
    loaded: bool,
}

impl SessionController {
    pub fn new(
        config: Box<dyn ConfigSource>,
        parser: Arc<dyn ScriptParser>,
        opener: Arc<dyn SourceOpener>,
        bus: EventBus,
    ) -> Self {
        SessionController {
            config,
            opener,
            registry: HandlerRegistry::new(parser),
            dispatcher: PacketDispatcher::new(),
            results: ResultStore::new(bus.clone()),
            bus,
            session: None,
            scripts_changed: None,
            loaded: false,
        }
    }

    /// Loads configuration and handlers. Only the first call has an effect.
    pub fn initialize(&mut self) {
        if self.loaded {
            return;
        }
        if let Err(e) = self.config.load() {
            warn!("{}", e);
            self.publish_error(SessionError::Settings(e.to_string()));
        }
        self.clear_session();
        self.reload_handlers();
        self.loaded = true;
        self.scripts_changed = Some(self.bus.subscribe(EventKind::ScriptsChanged));
        info!("Session controller ready");
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Stops any capture, forgets every result and releases the session.
    pub fn clear_session(&mut self) {
        self.stop_capture();
        self.results.clear();
        self.session = None;
        if self.loaded {
            self.bus.publish(Event::SessionLoaded);
        }
    }

    pub fn start_capture(&mut self) {
        if self.is_capturing() {
            return;
        }
        if let Err(e) = self.try_start() {
            self.publish_error(e);
        }
    }

    fn try_start(&mut self) -> Result<(), SessionError> {
        // A failed or stopped session is released first, so a rejected
        // configuration leaves the controller `Idle`.
        if let Some(mut previous) = self.session.take() {
            previous.stop()?;
        }
        let config = CaptureConfig::new(
            self.config.capture_interface(),
            self.config.capture_filter(),
        )?;
        let session = self
            .session
            .insert(CaptureSession::new(config, Arc::clone(&self.opener)));
        session.start()
    }

    pub fn stop_capture(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Err(e) = session.stop() {
            self.publish_error(e.into());
        }
    }

    pub fn toggle_capture(&mut self) {
        if self.is_capturing() {
            self.stop_capture();
        } else {
            self.start_capture();
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.session.as_ref().is_some_and(CaptureSession::is_capturing)
    }

    /// `Idle` when no session exists.
    pub fn status(&self) -> CaptureState {
        self.session
            .as_ref()
            .map_or(CaptureState::Idle, |s| s.status().clone())
    }

    pub fn results(&self) -> &[SessionResult] {
        self.results.all()
    }

    pub fn handlers(&self) -> Arc<Snapshot> {
        self.registry.snapshot()
    }

    pub fn stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    /// Re-enumerates handler scripts and swaps in a new snapshot.
    pub fn reload_handlers(&mut self) {
        let builtin = self.config.builtin_scripts().unwrap_or_else(|e| {
            warn!("{}", e);
            Vec::<Script>::new()
        });
        let user = self.config.user_scripts().unwrap_or_else(|e| {
            warn!("{}", e);
            Vec::new()
        });
        self.registry.reload(&builtin, &user);
    }

    /// Dispatches one packet against the current snapshot and records any
    /// identity it yields. Returns the new result's sequence number.
    pub fn handle_packet(&mut self, packet: &Packet) -> Option<u64> {
        let snapshot = self.registry.snapshot();
        let extraction = self.dispatcher.dispatch(packet, &snapshot)?;
        info!(
            "Session found on {} by '{}'",
            extraction.site, extraction.handler_id
        );
        Some(self.results.append(extraction))
    }

    /// Handles everything already queued: handler-script changes first, then
    /// every packet delivered so far. Never blocks.
    pub fn process_pending(&mut self) -> usize {
        self.apply_script_changes();
        let mut handled = 0;
        loop {
            let next = match self.session.as_mut() {
                Some(session) => session.try_next(),
                None => None,
            };
            match next {
                Some(Ok(packet)) => {
                    self.handle_packet(&packet);
                    handled += 1;
                }
                Some(Err(e)) => self.publish_error(e.into()),
                None => break,
            }
        }
        handled
    }

    fn apply_script_changes(&mut self) {
        let changed = match &self.scripts_changed {
            Some(rx) => rx.try_iter().count() > 0,
            None => false,
        };
        if changed {
            self.on_scripts_changed();
        }
    }

    fn on_scripts_changed(&mut self) {
        info!("Handler scripts changed, reloading");
        if let Err(e) = self.config.load() {
            warn!("{}", e);
        }
        self.reload_handlers();
    }

    fn on_source_event(&mut self, event: Option<SourceEvent>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match event {
            Some(SourceEvent::Packet(packet)) => {
                self.handle_packet(&packet);
            }
            Some(SourceEvent::Failed(reason)) => {
                let err = session.fail(reason);
                self.publish_error(err.into());
            }
            None if session.is_capturing() => {
                let err = session.fail("capture source closed unexpectedly");
                self.publish_error(err.into());
            }
            None => {}
        }
    }

    /// Runs the event loop until `Command::Quit` or until the command
    /// channel closes, then shuts down.
    pub fn run(&mut self, commands: &Receiver<Command>) {
        loop {
            let packets = self
                .session
                .as_ref()
                .and_then(|s| s.events().cloned())
                .unwrap_or_else(never);
            let changes = self.scripts_changed.clone().unwrap_or_else(never);
            select! {
                recv(commands) -> command => match command {
                    Ok(Command::Quit) | Err(_) => break,
                    Ok(command) => self.execute(command),
                },
                recv(packets) -> event => self.on_source_event(event.ok()),
                recv(changes) -> _ => self.on_scripts_changed(),
            }
        }
        self.shutdown();
    }

    pub fn execute(&mut self, command: Command) {
        match command {
            Command::Start => self.start_capture(),
            Command::Stop => self.stop_capture(),
            Command::Toggle => self.toggle_capture(),
            Command::Clear => self.clear_session(),
            Command::Status => println!("{}", self.status_report()),
            Command::Save(path) => match self.export_results(&path) {
                Ok(()) => info!("Saved {} results to {}", self.results.len(), path),
                Err(e) => warn!("{}", e),
            },
            Command::Quit => self.shutdown(),
        }
    }

    /// One-line summary of capture state, handlers, dispatch counters and
    /// results, as printed by the `status` command.
    pub fn status_report(&self) -> String {
        let snapshot = self.registry.snapshot();
        let stats = self.dispatcher.stats();
        let capture = match &self.session {
            Some(session) => format!(
                "{:?} on {} ('{}')",
                session.status(),
                session.config().interface,
                session.config().filter
            ),
            None => format!("{:?}", CaptureState::Idle),
        };
        format!(
            "Status: {} | {} handlers, {} domains, {} dynamic | \
             {} packets, {} matched, {} faults | {} results",
            capture,
            snapshot.handler_count(),
            snapshot.domain_count(),
            snapshot.dynamic().len(),
            stats.packets,
            stats.matched,
            stats.faults,
            self.results.len()
        )
    }

    /// Writes every result, in sequence order, as YAML.
    pub fn export_results(&self, path: impl AsRef<Path>) -> Result<(), ExportError> {
        let path = path.as_ref();
        let yaml = serde_yaml::to_string(self.results.all())?;
        fs::write(path, yaml).map_err(|source| ExportError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Stops capture. The controller stays usable.
    pub fn shutdown(&mut self) {
        self.stop_capture();
    }

    fn publish_error(&self, error: SessionError) {
        warn!("{}", error);
        self.bus.publish(Event::Error { error });
    }
}
