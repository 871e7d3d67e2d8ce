use crate::error::SettingsError;
use crate::handler::Script;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// The application's configuration, deserialized by `config` from
/// `config/default.toml` with `SESSIONWATCH_*` environment overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub capture_interface: Option<String>,
    #[serde(default = "default_capture_filter")]
    pub capture_filter: String,
    #[serde(default = "default_handlers_dir")]
    pub handlers_dir: PathBuf,
    pub user_handlers_dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_capture_filter() -> String {
    "tcp port 80".to_string()
}

fn default_handlers_dir() -> PathBuf {
    PathBuf::from("handlers")
}

impl Settings {
    pub fn new() -> Result<Self, config::ConfigError> {
        Self::from_path(DEFAULT_CONFIG_PATH)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, config::ConfigError> {
        let builder = Config::builder()
            // 1. Configuration file
            .add_source(File::from(path.as_ref()))
            // 2. Environment overrides, e.g. SESSIONWATCH_CAPTURE_INTERFACE=eth0
            .add_source(Environment::with_prefix("SESSIONWATCH"));

        builder.build()?.try_deserialize()
    }
}

/// Where the controller reads capture parameters and handler scripts from.
pub trait ConfigSource: Send {
    /// Re-reads the backing configuration.
    fn load(&mut self) -> Result<(), SettingsError>;
    fn capture_interface(&self) -> Option<String>;
    fn capture_filter(&self) -> Option<String>;
    /// Builtin handler scripts, in the order they must be indexed.
    fn builtin_scripts(&self) -> Result<Vec<Script>, SettingsError>;
    /// User handler scripts, indexed after the builtin ones.
    fn user_scripts(&self) -> Result<Vec<Script>, SettingsError>;
}

/// File-backed configuration store used by the binary.
///
/// Command-line overrides for the capture parameters take precedence over
/// the file and survive `load()`.
pub struct SettingsStore {
    path: PathBuf,
    settings: Settings,
    interface_override: Option<String>,
    filter_override: Option<String>,
}

impl SettingsStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, config::ConfigError> {
        let path = path.into();
        let settings = Settings::from_path(&path)?;
        Ok(SettingsStore {
            path,
            settings,
            interface_override: None,
            filter_override: None,
        })
    }

    pub fn with_overrides(mut self, interface: Option<String>, filter: Option<String>) -> Self {
        self.interface_override = interface;
        self.filter_override = filter;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

impl ConfigSource for SettingsStore {
    fn load(&mut self) -> Result<(), SettingsError> {
        self.settings = Settings::from_path(&self.path)?;
        Ok(())
    }

    fn capture_interface(&self) -> Option<String> {
        self.interface_override
            .clone()
            .or_else(|| self.settings.capture_interface.clone())
    }

    fn capture_filter(&self) -> Option<String> {
        self.filter_override
            .clone()
            .or_else(|| Some(self.settings.capture_filter.clone()))
    }

    fn builtin_scripts(&self) -> Result<Vec<Script>, SettingsError> {
        read_handler_dir(&self.settings.handlers_dir, "")
    }

    fn user_scripts(&self) -> Result<Vec<Script>, SettingsError> {
        match &self.settings.user_handlers_dir {
            Some(dir) => read_handler_dir(dir, "user/"),
            None => Ok(Vec::new()),
        }
    }
}

/// Reads every `*.yaml` / `*.yml` file in `dir`, sorted by file name.
/// Script ids are the file names with `prefix` prepended.
pub fn read_handler_dir(dir: &Path, prefix: &str) -> Result<Vec<Script>, SettingsError> {
    let dir_error = |source| SettingsError::HandlerDir {
        path: dir.to_path_buf(),
        source,
    };
    let mut files: Vec<(String, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir).map_err(dir_error)? {
        let path = entry.map_err(dir_error)?.path();
        let is_script = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        if !is_script || !path.is_file() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            files.push((name.to_string(), path.clone()));
        }
    }
    files.sort();

    let mut scripts = Vec::with_capacity(files.len());
    for (name, path) in files {
        let text = fs::read_to_string(&path).map_err(|source| SettingsError::HandlerDir {
            path: path.clone(),
            source,
        })?;
        scripts.push(Script::new(format!("{}{}", prefix, name), text));
    }
    Ok(scripts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_handler_dir_is_read_in_lexical_order() {
        // ARRANGE
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.yaml"), "name: B").unwrap();
        fs::write(dir.path().join("a.yml"), "name: A").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        fs::create_dir(dir.path().join("nested.yaml")).unwrap();
        // ACT
        let scripts = read_handler_dir(dir.path(), "user/").unwrap();
        // ASSERT
        let ids: Vec<_> = scripts.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["user/a.yml", "user/b.yaml"]);
        assert_eq!(scripts[1].text, "name: B");
    }

    #[test]
    fn test_missing_handler_dir_is_an_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing");
        assert!(matches!(
            read_handler_dir(&missing, ""),
            Err(SettingsError::HandlerDir { .. })
        ));
    }

    #[test]
    fn test_settings_store_reads_file_and_reloads() {
        // ARRANGE
        let dir = tempdir().unwrap();
        let handlers = dir.path().join("handlers");
        fs::create_dir(&handlers).unwrap();
        fs::write(handlers.join("bank.yaml"), "name: Bank").unwrap();
        let path = dir.path().join("sessionwatch.toml");
        let write_config = |interface: &str| {
            let body = format!(
                "capture_interface = \"{}\"\nhandlers_dir = \"{}\"\n",
                interface,
                handlers.display()
            );
            fs::write(&path, body).unwrap();
        };
        write_config("eth0");
        // ACT
        let mut store = SettingsStore::open(&path).unwrap();
        write_config("wlan0");
        let before = store.capture_interface();
        store.load().unwrap();
        // ASSERT
        assert_eq!(before.as_deref(), Some("eth0"));
        assert_eq!(store.capture_interface().as_deref(), Some("wlan0"));
        assert_eq!(store.capture_filter().as_deref(), Some("tcp port 80"));
        assert_eq!(store.settings().log_level, "info");
        assert_eq!(store.builtin_scripts().unwrap().len(), 1);
        assert!(store.user_scripts().unwrap().is_empty());
    }

    #[test]
    fn test_overrides_win_over_file_and_survive_reload() {
        // ARRANGE
        let dir = tempdir().unwrap();
        let path = dir.path().join("sessionwatch.toml");
        fs::write(&path, "capture_interface = \"eth0\"\n").unwrap();
        let mut store = SettingsStore::open(&path)
            .unwrap()
            .with_overrides(Some("wlan0".to_string()), Some("tcp port 8080".to_string()));
        // ACT
        fs::write(&path, "capture_interface = \"eth1\"\n").unwrap();
        store.load().unwrap();
        // ASSERT
        assert_eq!(store.capture_interface().as_deref(), Some("wlan0"));
        assert_eq!(store.capture_filter().as_deref(), Some("tcp port 8080"));
        assert_eq!(store.settings().capture_interface.as_deref(), Some("eth1"));
    }

    #[test]
    fn test_no_overrides_falls_back_to_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sessionwatch.toml");
        fs::write(&path, "capture_filter = \"tcp\"\n").unwrap();
        let store = SettingsStore::open(&path).unwrap().with_overrides(None, None);
        assert_eq!(store.capture_interface(), None);
        assert_eq!(store.capture_filter().as_deref(), Some("tcp"));
    }
}
