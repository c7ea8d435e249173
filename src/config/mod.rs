//! Runtime configuration: every tunable of the forecaster as an explicit record.
//!
//! Load with [`RuntimeConfig::load()`] which searches:
//! 1. `$TTSAM_CONFIG` env var
//! 2. `./ttsam.toml`
//! 3. Built-in defaults
//!
//! After file loading, the `TTSAM_*` environment variables override single
//! fields. Precedence for each field: env var > TOML > default.

pub mod defaults;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::types::IntensityLabel;

// ============================================================================
// Sub-records
// ============================================================================

/// Wave buffer and bandpass filter tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveConfig {
    /// Retained window per channel (seconds).
    pub window_seconds: f64,
    /// Expected packet sampling rate (Hz). Other rates are rejected.
    pub sample_rate_hz: f64,
    /// Bandpass low corner (Hz).
    pub bandpass_low_hz: f64,
    /// Bandpass high corner (Hz).
    pub bandpass_high_hz: f64,
    /// Bandpass order (even; order/2 biquad sections).
    pub bandpass_order: usize,
}

impl Default for WaveConfig {
    fn default() -> Self {
        Self {
            window_seconds: defaults::WINDOW_SECONDS,
            sample_rate_hz: defaults::SAMPLE_RATE_HZ,
            bandpass_low_hz: defaults::BANDPASS_LOW_HZ,
            bandpass_high_hz: defaults::BANDPASS_HIGH_HZ,
            bandpass_order: defaults::BANDPASS_ORDER,
        }
    }
}

impl WaveConfig {
    /// Samples in one retained window.
    pub fn window_samples(&self) -> usize {
        (self.window_seconds * self.sample_rate_hz).round() as usize
    }
}

/// Event trigger and pick handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Minimum co-picking stations.
    pub min_stations: usize,
    /// Qualifying picks must lie within this span of each other (seconds).
    pub window_seconds: f64,
    /// Pairwise great-circle distance cap between qualifying stations (km).
    pub spatial_km: f64,
    /// Same-station duplicate window (seconds).
    pub epsilon_pick_seconds: f64,
    /// Picks accepted while within this span of the latest accepted (seconds).
    pub event_linger_seconds: f64,
    /// Event drains this long after the last accepted pick (seconds).
    pub event_drain_seconds: f64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            min_stations: defaults::TRIGGER_MIN_STATIONS,
            window_seconds: defaults::TRIGGER_WINDOW_SECONDS,
            spatial_km: defaults::TRIGGER_SPATIAL_KM,
            epsilon_pick_seconds: defaults::EPSILON_PICK_SECONDS,
            event_linger_seconds: defaults::EVENT_LINGER_SECONDS,
            event_drain_seconds: defaults::EVENT_DRAIN_SECONDS,
        }
    }
}

/// Inference cadence, tensor shape, and alarm policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Maximum station rows in the input tensor.
    pub n_stations_max: usize,
    /// Tick cadence during an active event (seconds).
    pub tick_interval_seconds: f64,
    /// Delay before the first tick of an event (seconds).
    pub initial_delay_seconds: f64,
    /// Exceedance-probability cutoff for intensity labelling.
    pub intensity_cutoff: f64,
    /// Minimum label that raises an alarm.
    pub alarm_min_intensity: IntensityLabel,
    /// Soft timeout on one predictor call (seconds).
    pub predict_timeout_seconds: f64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            n_stations_max: defaults::N_STATIONS_MAX,
            tick_interval_seconds: defaults::TICK_INTERVAL_SECONDS,
            initial_delay_seconds: defaults::INITIAL_DELAY_SECONDS,
            intensity_cutoff: defaults::INTENSITY_PROB_CUTOFF,
            alarm_min_intensity: IntensityLabel::Four,
            predict_timeout_seconds: defaults::PREDICT_TIMEOUT_SECONDS,
        }
    }
}

/// Filesystem and server locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Site catalog directory (stations.csv, targets.csv, vs30.csv).
    pub site_dir: PathBuf,
    /// Log root; `report/` and `pick/` live beneath it.
    pub log_dir: PathBuf,
    /// HTTP bind address for the report view channel.
    pub server_addr: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            site_dir: PathBuf::from(defaults::SITE_DIR),
            log_dir: PathBuf::from(defaults::LOG_DIR),
            server_addr: defaults::SERVER_ADDR.to_string(),
        }
    }
}

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration record for one forecaster process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub wave: WaveConfig,
    pub trigger: TriggerConfig,
    pub inference: InferenceConfig,
    pub paths: PathsConfig,
}

impl RuntimeConfig {
    /// Load configuration using the standard search order, then apply
    /// `TTSAM_*` environment overrides.
    pub fn load() -> Self {
        let mut config = Self::load_file();
        config.apply_env_overrides();
        config
    }

    fn load_file() -> Self {
        if let Ok(path) = std::env::var("TTSAM_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded config from TTSAM_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load TTSAM_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "TTSAM_CONFIG points to non-existent file, falling back");
            }
        }

        let local = Path::new("ttsam.toml");
        if local.exists() {
            match Self::load_from_file(local) {
                Ok(config) => {
                    info!(path = %local.display(), "Loaded config from ./ttsam.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to parse ./ttsam.toml, using defaults");
                }
            }
        }

        info!("No config file found, using built-in defaults");
        Self::default()
    }

    /// Parse a TOML config file.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Apply single-field `TTSAM_*` environment overrides.
    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse::<f64>("TTSAM_WINDOW_SECONDS") {
            self.wave.window_seconds = v;
        }
        if let Some(v) = env_parse::<usize>("TTSAM_N_STATIONS_MAX") {
            self.inference.n_stations_max = v;
        }
        if let Some(v) = env_parse::<f64>("TTSAM_TICK_INTERVAL") {
            self.inference.tick_interval_seconds = v;
        }
        if let Some(v) = env_parse::<f64>("TTSAM_INTENSITY_CUTOFF") {
            self.inference.intensity_cutoff = v;
        }
        if let Ok(raw) = std::env::var("TTSAM_ALARM_MIN_INTENSITY") {
            match raw.parse::<IntensityLabel>() {
                Ok(label) => self.inference.alarm_min_intensity = label,
                Err(_) => warn!(value = %raw, "TTSAM_ALARM_MIN_INTENSITY is not an intensity label, ignoring"),
            }
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var = key, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}
