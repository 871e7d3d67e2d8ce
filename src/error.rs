use std::path::PathBuf;
use thiserror::Error;

/// Capture configuration rejected before any device is touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid interface: capture_interface is missing or empty")]
    InvalidInterface,
    #[error("Invalid filter: capture_filter is missing or empty")]
    InvalidFilter,
}

/// Failures of the capture device itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("Could not open capture on '{interface}': {reason}")]
    Open { interface: String, reason: String },
    #[error("Capture on '{interface}' failed: {reason}")]
    Stream { interface: String, reason: String },
    #[error("Could not release capture on '{interface}': {reason}")]
    Release { interface: String, reason: String },
}

/// Anything that can go wrong while starting or stopping a session.
/// This is the payload of the `error` event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("Configuration could not be loaded: {0}")]
    Settings(String),
}

/// A handler script the parser refused. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Malformed handler script '{script}': {reason}")]
pub struct ParseFailure {
    pub script: String,
    pub reason: String,
}

impl ParseFailure {
    pub fn new(script: impl Into<String>, reason: impl Into<String>) -> Self {
        ParseFailure {
            script: script.into(),
            reason: reason.into(),
        }
    }
}

/// A handler's extraction or matching logic failed on a packet.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Handler '{handler}' faulted: {reason}")]
pub struct HandlerFault {
    pub handler: String,
    pub reason: String,
}

impl HandlerFault {
    pub fn new(handler: impl Into<String>, reason: impl Into<String>) -> Self {
        HandlerFault {
            handler: handler.into(),
            reason: reason.into(),
        }
    }
}

/// Errors of the file-backed configuration store.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Configuration parsing error: {0}")]
    Parsing(#[from] config::ConfigError),
    #[error("Could not read handler directory {path}: {source}")]
    HandlerDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors while writing the result list to disk.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Could not serialize results: {0}")]
    Serialize(#[from] serde_yaml::Error),
    #[error("Could not write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
