use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::constants::{DEFAULT_READ_AHEAD, DEFAULT_SOCKET};
use super::error::ConfigError;

/// Which backend the stream is read from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Online,
    Offline,
}

/// Parameters of the lit pixel hitfinder run by the processing loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitfindingConfig {
    pub enabled: bool,
    pub detector_key: String,
    pub detector_name: String,
    pub adu_threshold: f64,
    pub hitscore_threshold: usize,
    pub history: usize,
}

impl Default for HitfindingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            detector_key: String::from("photonPixelDetectors"),
            detector_name: String::from("AGIPD00"),
            adu_threshold: 20.0,
            hitscore_threshold: 200,
            history: 100,
        }
    }
}

/// Structure representing the application configuration. Contains the source selection,
/// the connection endpoint and the stream pacing.
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub backend: BackendKind,
    pub socket: String,
    pub read_ahead: usize,
    pub data_path: Option<PathBuf>,
    pub key_schema_path: Option<PathBuf>,
    pub n_events: Option<u64>,
    pub status_interval: u64,
    pub hitfinding: HitfindingConfig,
}

impl Default for Config {
    /// Generate a new Config object pointing at a local online source
    fn default() -> Self {
        Self {
            backend: BackendKind::Online,
            socket: String::from(DEFAULT_SOCKET),
            read_ahead: DEFAULT_READ_AHEAD,
            data_path: None,
            key_schema_path: None,
            n_events: None,
            status_interval: 100,
            hitfinding: HitfindingConfig::default(),
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        let config = serde_yaml::from_str::<Self>(&yaml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values serde cannot check for us
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend == BackendKind::Offline && !self.has_data_path() {
            return Err(ConfigError::MissingDataPath);
        }
        if self.status_interval == 0 {
            return Err(ConfigError::BadStatusInterval);
        }
        Ok(())
    }

    /// Get the recorded data directory, which must exist
    pub fn get_data_directory(&self) -> Result<&Path, ConfigError> {
        match self.data_path.as_deref() {
            Some(path) if path.exists() => Ok(path),
            Some(path) => Err(ConfigError::BadFilePath(path.to_path_buf())),
            None => Err(ConfigError::MissingDataPath),
        }
    }

    pub fn has_data_path(&self) -> bool {
        self.data_path.is_some()
    }

    pub fn is_event_limit_reached(&self, events_processed: u64) -> bool {
        self.n_events.is_some_and(|n| events_processed >= n)
    }
}
