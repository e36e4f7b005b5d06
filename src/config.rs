//! Strongly-typed application configuration.
//!
//! Settings load from an optional TOML file plus environment-variable
//! overrides with the `OPTOPLATE_` prefix, e.g.
//!
//! ```text
//! OPTOPLATE_EXPERIMENT__SAMPLE_INTERVAL_SECS=60
//! OPTOPLATE_LINK__PORT=/dev/ttyACM0
//! ```
//!
//! Every field carries a serde default, so a missing file yields a fully
//! usable configuration.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::AppResult;

/// Top-level application settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Persisted protocol store settings
    #[serde(default)]
    pub store: StoreSettings,
    /// Experiment logging and sampling settings
    #[serde(default)]
    pub experiment: ExperimentSettings,
    /// Device link settings
    #[serde(default)]
    pub link: LinkSettings,
}

/// Location of the persisted protocol store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Path of the combined protocol/assignment store file
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

/// Experiment logging and sampling cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentSettings {
    /// Directory receiving one CSV log per experiment
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,
    /// Free-running interval between sampling cycles, in seconds
    #[serde(default = "default_sample_interval_secs")]
    pub sample_interval_secs: u64,
    /// Bounded wait for the device to answer a telemetry request, in ms
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

/// Serial link parameters and replay pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSettings {
    /// Serial port to open at startup (none = start disconnected)
    #[serde(default)]
    pub port: Option<String>,
    /// Baud rate for the serial link
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Pacing delay between replayed definition/assignment frames, in ms
    #[serde(default = "default_replay_delay_ms")]
    pub replay_delay_ms: u64,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("protocols/protocols.json")
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("experiments")
}

fn default_sample_interval_secs() -> u64 {
    180
}

fn default_settle_ms() -> u64 {
    500
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_replay_delay_ms() -> u64 {
    100
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl Default for ExperimentSettings {
    fn default() -> Self {
        Self {
            logs_dir: default_logs_dir(),
            sample_interval_secs: default_sample_interval_secs(),
            settle_ms: default_settle_ms(),
        }
    }
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: default_baud_rate(),
            replay_delay_ms: default_replay_delay_ms(),
        }
    }
}

impl Settings {
    /// Loads settings from the given TOML file (optional) and the
    /// environment.
    pub fn new(config_path: Option<&str>) -> AppResult<Self> {
        let mut builder = Config::builder();
        builder = match config_path {
            Some(path) => builder.add_source(File::with_name(path)),
            None => builder.add_source(File::with_name("optoplate").required(false)),
        };
        let settings = builder
            .add_source(Environment::with_prefix("OPTOPLATE").separator("__"))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }
}

impl ExperimentSettings {
    /// Sampling interval as a [`Duration`].
    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }

    /// Telemetry settle window as a [`Duration`].
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

impl LinkSettings {
    /// Replay pacing delay as a [`Duration`].
    pub fn replay_delay(&self) -> Duration {
        Duration::from_millis(self.replay_delay_ms)
    }
}
