//! Persisted user settings and the per-run configuration derived from them.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::media::{RecompressMode, RecompressOptions, DEFAULT_JPEG_QUALITY, DEFAULT_MAX_IMAGE_EDGE};
use crate::prune::{DefinedNamesStrategy, PruneOptions};

pub const SETTINGS_FILE_NAME: &str = "settings.json";

pub const MIN_IMAGE_EDGE: u32 = 200;
pub const MAX_IMAGE_EDGE: u32 = 10_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogVerbosity {
    /// Stage boundaries, results and errors only.
    Minimal,
    /// Also per-asset and per-part detail.
    #[default]
    Verbose,
}

/// The settings file, as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub aggressive: bool,
    pub do_xml_cleanup: bool,
    pub force_custom_xml_removal: bool,
    pub no_backup: bool,
    pub keep_backup: bool,
    pub output_directory: Option<PathBuf>,
    pub max_image_edge: u32,
    pub jpeg_quality: u32,
    pub log_verbosity: LogVerbosity,
    pub open_log_on_error: bool,
    pub last_run_log_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            aggressive: false,
            do_xml_cleanup: false,
            force_custom_xml_removal: false,
            no_backup: false,
            keep_backup: false,
            output_directory: None,
            max_image_edge: DEFAULT_MAX_IMAGE_EDGE,
            jpeg_quality: DEFAULT_JPEG_QUALITY as u32,
            log_verbosity: LogVerbosity::Verbose,
            open_log_on_error: false,
            last_run_log_file: None,
        }
    }
}

impl Settings {
    /// Overlay the known keys of a JSON document onto the defaults.
    ///
    /// Unknown keys are ignored; a key whose value has the wrong type keeps its default without
    /// discarding the rest. Anything that is not a JSON object yields the defaults.
    pub fn merged_over_defaults(doc: &Value) -> Self {
        let Some(overrides) = doc.as_object() else {
            return Self::default();
        };
        let mut merged = match serde_json::to_value(Self::default()) {
            Ok(Value::Object(map)) => map,
            _ => return Self::default(),
        };

        for (key, value) in overrides {
            let Some(previous) = merged.get(key).cloned() else {
                continue;
            };
            merged.insert(key.clone(), value.clone());
            if Self::from_map(&merged).is_none() {
                log::warn!("ignoring invalid value for setting `{key}`");
                merged.insert(key.clone(), previous);
            }
        }
        Self::from_map(&merged).unwrap_or_default().normalized()
    }

    fn from_map(map: &Map<String, Value>) -> Option<Self> {
        serde_json::from_value(Value::Object(map.clone())).ok()
    }

    /// Clamp numeric settings into their supported ranges.
    pub fn normalized(mut self) -> Self {
        self.max_image_edge = self.max_image_edge.clamp(MIN_IMAGE_EDGE, MAX_IMAGE_EDGE);
        self.jpeg_quality = self.jpeg_quality.clamp(1, 100);
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("no per-user configuration directory is available")]
    NoConfigDir,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to write settings: {0}")]
    Write(#[from] slim_fs::AtomicWriteError<serde_json::Error>),
}

/// Location of the settings file; loads once per run and saves atomically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    /// `settings.json` in the platform's per-user config directory.
    pub fn default_location() -> Result<Self, SettingsError> {
        let dirs = directories::ProjectDirs::from("com", "xlsx-slim", "xlsx-slim")
            .ok_or(SettingsError::NoConfigDir)?;
        Ok(Self::at(dirs.config_dir().join(SETTINGS_FILE_NAME)))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or unreadable files load as defaults.
    pub fn load(&self) -> Settings {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Settings::default(),
            Err(err) => {
                log::warn!("failed to read {}: {err}; using defaults", self.path.display());
                return Settings::default();
            }
        };
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(doc) => Settings::merged_over_defaults(&doc),
            Err(err) => {
                log::warn!("corrupt settings file {}: {err}; using defaults", self.path.display());
                Settings::default()
            }
        }
    }

    pub fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        slim_fs::atomic_write(&self.path, |file| {
            serde_json::to_writer_pretty(file, settings)
        })?;
        Ok(())
    }
}

/// Which pipeline stages run, in fixed order: name cleanup, image optimization, precision slim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageSelection {
    pub clean: bool,
    pub images: bool,
    pub precision: bool,
}

impl Default for StageSelection {
    fn default() -> Self {
        Self {
            clean: true,
            images: true,
            precision: false,
        }
    }
}

/// Capabilities compiled into this build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub images: bool,
}

impl Capabilities {
    pub fn detect() -> Self {
        Self {
            images: cfg!(feature = "images"),
        }
    }
}

/// Everything one pipeline run needs. Built from [`Settings`] plus front-end overrides and passed
/// explicitly to [`crate::run_pipeline`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlimConfig {
    pub stages: StageSelection,
    pub aggressive: bool,
    pub do_xml_cleanup: bool,
    pub force_custom_xml_removal: bool,
    pub no_backup: bool,
    pub keep_backup: bool,
    pub output_directory: Option<PathBuf>,
    pub max_image_edge: u32,
    pub jpeg_quality: u8,
    pub log_verbosity: LogVerbosity,
    pub open_log_on_error: bool,
    pub defined_names_strategy: DefinedNamesStrategy,
}

impl Default for SlimConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default(), StageSelection::default())
    }
}

impl SlimConfig {
    pub fn from_settings(settings: &Settings, stages: StageSelection) -> Self {
        let settings = settings.clone().normalized();
        Self {
            stages,
            aggressive: settings.aggressive,
            do_xml_cleanup: settings.do_xml_cleanup,
            force_custom_xml_removal: settings.force_custom_xml_removal,
            no_backup: settings.no_backup,
            keep_backup: settings.keep_backup,
            output_directory: settings.output_directory,
            max_image_edge: settings.max_image_edge,
            jpeg_quality: settings.jpeg_quality as u8,
            log_verbosity: settings.log_verbosity,
            open_log_on_error: settings.open_log_on_error,
            defined_names_strategy: DefinedNamesStrategy::default(),
        }
    }

    pub fn recompress_options(&self) -> RecompressOptions {
        RecompressOptions {
            mode: if self.aggressive {
                RecompressMode::Aggressive
            } else {
                RecompressMode::Safe
            },
            max_image_edge: self.max_image_edge.clamp(MIN_IMAGE_EDGE, MAX_IMAGE_EDGE),
            jpeg_quality: self.jpeg_quality.clamp(1, 100),
        }
    }

    pub fn prune_options(&self) -> PruneOptions {
        PruneOptions::from_flags(self.do_xml_cleanup, self.force_custom_xml_removal)
    }
}
