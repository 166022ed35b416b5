use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::PipelineError;

// CONFIGURATION STRUCTS
// Every section has defaults so a partial config.json still loads.

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct DataSettings {
    pub period: String,   // e.g., "1y", "6mo"
    pub interval: String, // e.g., "1d"
    pub batch_size: usize,
    pub request_timeout_secs: u64,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            period: "1y".to_string(),
            interval: "1d".to_string(),
            batch_size: 8,
            request_timeout_secs: 30,
        }
    }
}

/// Directories, relative to the storage root.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PathSettings {
    pub data_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            processed_dir: PathBuf::from("data/processed"),
            reports_dir: PathBuf::from("reports"),
            logs_dir: PathBuf::from("logs"),
        }
    }
}

/// Thresholds used by the market aggregator.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AlertSettings {
    /// Volume ratio above which a symbol counts as high volume.
    pub volume_multiplier: f64,
    /// Absolute daily move, in percent, that raises an alert.
    pub price_change_threshold: f64,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            volume_multiplier: 2.0,
            price_change_threshold: 5.0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub symbols: Vec<String>,
    pub data_settings: DataSettings,
    pub paths: PathSettings,
    pub alerts: AlertSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            symbols: ["AAPL", "MSFT", "GOOGL", "AMZN", "NVDA", "META", "TSLA", "SPY", "QQQ"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            data_settings: DataSettings::default(),
            paths: PathSettings::default(),
            alerts: AlertSettings::default(),
        }
    }
}

impl AppConfig {
    /// Parses a JSON config. A malformed file is fatal for the run.
    pub fn from_json(path: &Path, bytes: &[u8]) -> Result<Self, PipelineError> {
        serde_json::from_slice(bytes).map_err(|e| PipelineError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}
