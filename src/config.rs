use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ReplayError;

const CONFIG_FILE_NAME: &str = "config.json";
const APP_DIR: &str = "f1-replay";

pub const DEFAULT_FRAME_RATE_HZ: f64 = 25.0;
pub const DEFAULT_MAX_HOLD_S: f64 = 5.0;
pub const DEFAULT_RETIREMENT_THRESHOLD_S: f64 = 10.0;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ReplayConfig {
    /// Frames per second of session time, Δt = 1 / frame_rate_hz
    pub frame_rate_hz: f64,
    /// How long a driver's first sample is held for ticks before it
    pub max_hold_s: f64,
    /// Time without fresh samples after which a driver is marked out
    pub retirement_threshold_s: f64,
    /// Frame cache location, the platform data directory when unset
    pub cache_dir: Option<PathBuf>,
}

/// Settings that shape a synthesized frame sequence. Cached frames are only
/// reused when these match exactly.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct SynthesisParams {
    pub dt: f64,
    pub max_hold_s: f64,
    pub retirement_threshold_s: f64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            frame_rate_hz: DEFAULT_FRAME_RATE_HZ,
            max_hold_s: DEFAULT_MAX_HOLD_S,
            retirement_threshold_s: DEFAULT_RETIREMENT_THRESHOLD_S,
            cache_dir: None,
        }
    }
}

impl ReplayConfig {
    pub fn dt(&self) -> f64 {
        1.0 / self.frame_rate_hz
    }

    pub fn synthesis_params(&self) -> SynthesisParams {
        SynthesisParams {
            dt: self.dt(),
            max_hold_s: self.max_hold_s,
            retirement_threshold_s: self.retirement_threshold_s,
        }
    }

    pub fn validate(&self) -> Result<(), ReplayError> {
        if !(self.frame_rate_hz.is_finite() && self.frame_rate_hz > 0.0) {
            return Err(ReplayError::InvalidConfig {
                reason: format!("frame rate must be positive, got {}", self.frame_rate_hz),
            });
        }
        for (name, value) in [
            ("max_hold_s", self.max_hold_s),
            ("retirement_threshold_s", self.retirement_threshold_s),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ReplayError::InvalidConfig {
                    reason: format!("{name} must be non-negative, got {value}"),
                });
            }
        }
        Ok(())
    }

    pub fn config_path() -> Option<PathBuf> {
        Some(dirs::config_dir()?.join(APP_DIR).join(CONFIG_FILE_NAME))
    }

    /// Config saved in the user's config directory, if there is one
    pub fn from_local_file() -> Result<Option<Self>, ReplayError> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::from_file(&path).map(Some),
            _ => Ok(None),
        }
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, ReplayError> {
        let file =
            std::fs::File::open(path).map_err(|e| ReplayError::ConfigIOError { source: e })?;
        let config: Self = serde_json::from_reader(file)
            .map_err(|e| ReplayError::ConfigSerializeError { source: e })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<(), ReplayError> {
        let config_path = Self::config_path().ok_or(ReplayError::NoConfigDir)?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, config_path: &std::path::Path) -> Result<(), ReplayError> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ReplayError::ConfigIOError { source: e })?;
        }

        let file = std::fs::File::create(config_path)
            .map_err(|e| ReplayError::ConfigIOError { source: e })?;
        serde_json::to_writer_pretty(file, self)
            .map_err(|e| ReplayError::ConfigSerializeError { source: e })
    }
}
