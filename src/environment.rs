//! Settings and process environment
//!
//! Handles loading, validation and saving of filter settings from a TOML
//! file, and bootstraps the tracing subscriber (optionally into a log
//! file). Settings cover the script path, which input formats may be
//! offered to the upstream, the extra source buffer depth and whether the
//! remote status API is served.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::format::PIXEL_FORMATS;

/// Upper bound on the configurable source queue headroom; past this the
/// memory cost of decoded frames dwarfs any scheduling benefit.
pub const MAXIMUM_EXTRA_SOURCE_BUFFER: usize = 14;

const DEFAULT_EXTRA_SOURCE_BUFFER: usize = 8;

#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("failed to read settings file {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },

    #[error("failed to write settings file {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },

    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid settings: {0}")]
    Validation(String),
}

/// Persistent filter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Path of the frame-processing script.
    pub script_path: PathBuf,

    /// When set, tracing output is also written to this file.
    pub log_path: Option<PathBuf>,

    /// Input formats the filter may accept from the upstream, by symbolic
    /// name. Defaults to every format in the table.
    pub enabled_input_formats: BTreeSet<String>,

    /// Extra source frames buffered beyond the processing minimum, trading
    /// memory for fewer receive-thread stalls.
    pub extra_source_buffer: usize,

    /// Whether the remote status/control API is served.
    pub remote_control_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            script_path: PathBuf::new(),
            log_path: None,
            enabled_input_formats: PIXEL_FORMATS
                .iter()
                .map(|format| format.name.to_owned())
                .collect(),
            extra_source_buffer: DEFAULT_EXTRA_SOURCE_BUFFER,
            remote_control_enabled: false,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self, EnvironmentError> {
        let content = std::fs::read_to_string(path)
            .map_err(|source| EnvironmentError::Read { path: path.to_owned(), source })?;
        let settings: Settings = toml::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Write settings to a TOML file.
    pub fn save(&self, path: &Path) -> Result<(), EnvironmentError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)
            .map_err(|source| EnvironmentError::Write { path: path.to_owned(), source })
    }

    fn validate(&self) -> Result<(), EnvironmentError> {
        if self.extra_source_buffer > MAXIMUM_EXTRA_SOURCE_BUFFER {
            return Err(EnvironmentError::Validation(format!(
                "extra_source_buffer {} exceeds the maximum of {}",
                self.extra_source_buffer, MAXIMUM_EXTRA_SOURCE_BUFFER
            )));
        }

        for name in &self.enabled_input_formats {
            if crate::format::lookup_name(name).is_none() {
                return Err(EnvironmentError::Validation(format!(
                    "unknown input format name: {name}"
                )));
            }
        }

        Ok(())
    }
}

/// Shared, mutable settings handle injected into the filter components.
/// There is no process-wide instance; embedders create one per filter
/// graph and pass it by handle.
pub struct Environment {
    settings: RwLock<Settings>,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

impl Environment {
    pub fn new(settings: Settings) -> Self {
        Self { settings: RwLock::new(settings) }
    }

    pub fn from_file(path: &Path) -> Result<Self, EnvironmentError> {
        Ok(Self::new(Settings::load(path)?))
    }

    /// Install the global tracing subscriber according to the settings.
    /// Returns a guard that must be kept alive for file logging to flush;
    /// `None` when another subscriber is already installed.
    pub fn init_logging(&self) -> Option<tracing_appender::non_blocking::WorkerGuard> {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("framescript=debug"));

        let log_path = self.settings.read().log_path.clone();
        match log_path {
            Some(path) => {
                let directory = path.parent().unwrap_or(Path::new(".")).to_owned();
                let file_name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "framescript.log".to_owned());
                let appender = tracing_appender::rolling::never(directory, file_name);
                let (writer, guard) = tracing_appender::non_blocking(appender);

                let installed = tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(writer)
                    .with_ansi(false)
                    .try_init()
                    .is_ok();

                if installed {
                    info!("Logging to {}", path.display());
                    Some(guard)
                } else {
                    None
                }
            }
            None => {
                let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
                None
            }
        }
    }

    pub fn settings(&self) -> Settings {
        self.settings.read().clone()
    }

    pub fn script_path(&self) -> PathBuf {
        self.settings.read().script_path.clone()
    }

    pub fn set_script_path(&self, path: PathBuf) {
        self.settings.write().script_path = path;
    }

    pub fn is_input_format_enabled(&self, name: &str) -> bool {
        self.settings.read().enabled_input_formats.contains(name)
    }

    pub fn set_input_format_enabled(&self, name: &str, enabled: bool) {
        let mut settings = self.settings.write();
        if enabled {
            settings.enabled_input_formats.insert(name.to_owned());
        } else {
            settings.enabled_input_formats.remove(name);
        }
    }

    pub fn extra_source_buffer(&self) -> usize {
        self.settings.read().extra_source_buffer
    }

    pub fn is_remote_control_enabled(&self) -> bool {
        self.settings.read().remote_control_enabled
    }
}
