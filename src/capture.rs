//! Capture sessions and the packet source boundary.
//!
//! A `CaptureSession` owns at most one open `PacketSource`. The source pushes
//! decoded packets into a channel through a `PacketSink`; the session's owner
//! drains that channel on its own event loop, so packets are always
//! dispatched on one thread.

use crate::error::{CaptureError, ConfigError, SessionError};
use crate::parser::{Packet, decode_frame};
use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use log::{debug, error, info, warn};
use pcap::{Capture, Device, Error};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

/// Interface and BPF filter a session is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    pub interface: String,
    pub filter: String,
}

impl CaptureConfig {
    /// Builds a config from possibly missing values and validates it.
    pub fn new(interface: Option<String>, filter: Option<String>) -> Result<Self, ConfigError> {
        let config = CaptureConfig {
            interface: interface.unwrap_or_default(),
            filter: filter.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interface.trim().is_empty() {
            return Err(ConfigError::InvalidInterface);
        }
        if self.filter.trim().is_empty() {
            return Err(ConfigError::InvalidFilter);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Capturing,
    Error(String),
}

/// What a source delivers to its session.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    Packet(Packet),
    /// The source stopped on its own; no more packets will follow.
    Failed(String),
}

/// Delivery end handed to a source when it is opened.
#[derive(Clone)]
pub struct PacketSink {
    tx: Sender<SourceEvent>,
}

impl PacketSink {
    /// Returns `false` once the session has gone away; the source should stop.
    pub fn deliver(&self, packet: Packet) -> bool {
        self.tx.send(SourceEvent::Packet(packet)).is_ok()
    }

    pub fn fail(&self, reason: impl Into<String>) {
        let _ = self.tx.send(SourceEvent::Failed(reason.into()));
    }
}

/// An open capture. Packets flow into the sink until `close` returns.
pub trait PacketSource: Send {
    fn close(&mut self) -> Result<(), String>;
}

/// Opens packet sources. Implemented by the pcap backend and by test fakes.
pub trait SourceOpener: Send + Sync {
    fn open(
        &self,
        config: &CaptureConfig,
        sink: PacketSink,
    ) -> Result<Box<dyn PacketSource>, CaptureError>;
}

/// One capture on one interface. At most one source is open at a time.
pub struct CaptureSession {
    config: CaptureConfig,
    opener: Arc<dyn SourceOpener>,
    state: CaptureState,
    source: Option<Box<dyn PacketSource>>,
    events: Option<Receiver<SourceEvent>>,
}

impl CaptureSession {
    pub fn new(config: CaptureConfig, opener: Arc<dyn SourceOpener>) -> Self {
        CaptureSession {
            config,
            opener,
            state: CaptureState::Idle,
            source: None,
            events: None,
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn status(&self) -> &CaptureState {
        &self.state
    }

    pub fn is_capturing(&self) -> bool {
        self.state == CaptureState::Capturing
    }

    /// Opens the source. A no-op while already capturing; allowed again after
    /// an error.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.is_capturing() {
            debug!("Capture on {} already running", self.config.interface);
            return Ok(());
        }
        self.config.validate()?;

        let (tx, rx) = unbounded();
        match self.opener.open(&self.config, PacketSink { tx }) {
            Ok(source) => {
                self.source = Some(source);
                self.events = Some(rx);
                self.state = CaptureState::Capturing;
                info!(
                    "Capturing on {} with filter '{}'",
                    self.config.interface, self.config.filter
                );
                Ok(())
            }
            Err(e) => {
                error!("{}", e);
                self.state = CaptureState::Error(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Closes the source and waits for it to release the device. Safe to call
    /// in any state. The session is `Idle` afterwards even if closing failed.
    pub fn stop(&mut self) -> Result<(), CaptureError> {
        let source = self.source.take();
        self.events = None;
        let was = std::mem::replace(&mut self.state, CaptureState::Idle);
        let Some(mut source) = source else {
            return Ok(());
        };
        if was == CaptureState::Capturing {
            info!("Stopped capture on {}", self.config.interface);
        }
        source.close().map_err(|reason| CaptureError::Release {
            interface: self.config.interface.clone(),
            reason,
        })
    }

    /// Channel the event loop selects on while capturing.
    pub fn events(&self) -> Option<&Receiver<SourceEvent>> {
        self.events.as_ref()
    }

    /// Takes the next delivered packet without blocking.
    /// A source failure moves the session to `Error` and is returned once.
    pub fn try_next(&mut self) -> Option<Result<Packet, CaptureError>> {
        let received = self.events.as_ref()?.try_recv();
        match received {
            Ok(SourceEvent::Packet(packet)) => Some(Ok(packet)),
            Ok(SourceEvent::Failed(reason)) => Some(Err(self.fail(reason))),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                Some(Err(self.fail("capture source closed unexpectedly")))
            }
        }
    }

    /// Records a mid-stream failure: releases the source and enters `Error`.
    pub fn fail(&mut self, reason: impl Into<String>) -> CaptureError {
        let reason = reason.into();
        self.events = None;
        if let Some(mut source) = self.source.take() {
            if let Err(e) = source.close() {
                warn!("Closing failed source on {}: {}", self.config.interface, e);
            }
        }
        self.state = CaptureState::Error(reason.clone());
        let err = CaptureError::Stream {
            interface: self.config.interface.clone(),
            reason,
        };
        error!("{}", err);
        err
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("{}", e);
        }
    }
}

/// Live capture through libpcap.
#[derive(Debug, Default, Clone, Copy)]
pub struct PcapOpener;

impl SourceOpener for PcapOpener {
    fn open(
        &self,
        config: &CaptureConfig,
        sink: PacketSink,
    ) -> Result<Box<dyn PacketSource>, CaptureError> {
        let open_error = |e: Error| CaptureError::Open {
            interface: config.interface.clone(),
            reason: e.to_string(),
        };
        let mut cap = Capture::from_device(config.interface.as_str())
            .map_err(open_error)?
            .promisc(true)
            .snaplen(65535)
            .timeout(1000)
            .open()
            .map_err(open_error)?;
        cap.filter(&config.filter, true).map_err(open_error)?;

        let terminate = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&terminate);
        let interface = config.interface.clone();
        let handle = thread::Builder::new()
            .name(format!("capture-{}", interface))
            .spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    match cap.next_packet() {
                        Ok(packet) => {
                            let Some(decoded) = decode_frame(packet.data) else {
                                continue;
                            };
                            // The session dropped its receiver; shut down quietly.
                            if !sink.deliver(decoded) {
                                info!("Channel closed, shutting down capture on {}", interface);
                                break;
                            }
                        }
                        Err(Error::TimeoutExpired) => continue,
                        Err(e) => {
                            sink.fail(e.to_string());
                            break;
                        }
                    }
                }
            })
            .map_err(|e| CaptureError::Open {
                interface: config.interface.clone(),
                reason: e.to_string(),
            })?;

        Ok(Box::new(PcapSource {
            terminate,
            handle: Some(handle),
        }))
    }
}

struct PcapSource {
    terminate: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PacketSource for PcapSource {
    fn close(&mut self) -> Result<(), String> {
        self.terminate.store(true, Ordering::SeqCst);
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| "capture thread panicked".to_string()),
            None => Ok(()),
        }
    }
}

impl Drop for PcapSource {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Names of the capture devices, for operators who have not configured one.
pub fn list_devices() -> Result<Vec<String>, Error> {
    Ok(Device::list()?.into_iter().map(|d| d.name).collect())
}
