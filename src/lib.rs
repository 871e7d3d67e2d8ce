// In src/lib.rs
mod capture;
mod controller;
mod dispatch;
mod error;
mod events;
mod handler;
mod parser;
mod registry;
mod results;
mod script;
mod settings;
#[cfg(test)]
mod testing;

pub use capture::{
    CaptureConfig, CaptureSession, CaptureState, PacketSink, PacketSource, PcapOpener,
    SourceEvent, SourceOpener, list_devices,
};
pub use controller::{Command, SessionController};
pub use dispatch::{DispatchStats, PacketDispatcher};
pub use error::{
    CaptureError, ConfigError, ExportError, HandlerFault, ParseFailure, SessionError,
    SettingsError,
};
pub use events::{Event, EventBus, EventKind};
pub use handler::{
    Capability, DynamicMatcher, Extractor, HandlerDescriptor, Identity, Script, ScriptParser,
};
pub use parser::{Packet, RequestHead, decode_frame, parse_cookies, parse_request_head};
pub use registry::{HandlerRegistry, Snapshot};
pub use results::{Extraction, ResultStore, SessionResult};
pub use script::YamlScriptParser;
pub use settings::{ConfigSource, DEFAULT_CONFIG_PATH, Settings, SettingsStore, read_handler_dir};
