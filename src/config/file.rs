//! TOML configuration file loading
//!
//! Supports `~/.config/earshot/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.
//! Durations are written in milliseconds (`*_ms`).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct EarshotConfigFile {
    /// Audio capture configuration
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Signal conditioning configuration
    #[serde(default)]
    pub conditioner: ConditionerFileConfig,

    /// Classifier adapter configuration
    #[serde(default)]
    pub classifier: ClassifierFileConfig,

    /// Debounce thresholds and windows
    #[serde(default)]
    pub detection: DetectionFileConfig,

    /// Alert arbitration timing
    #[serde(default)]
    pub alerts: AlertsFileConfig,

    /// Per-label rules, merged over the built-in label table
    #[serde(default)]
    pub labels: BTreeMap<String, LabelFileConfig>,

    /// Speech-to-text alerting
    #[serde(default)]
    pub speech: SpeechFileConfig,

    /// Output channels
    #[serde(default)]
    pub channels: ChannelsFileConfig,

    /// Pipeline lifecycle
    #[serde(default)]
    pub pipeline: PipelineFileConfig,
}

/// Audio capture configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    pub sample_rate: Option<u32>,
    pub frame_size: Option<usize>,
    pub queue_capacity: Option<usize>,
    /// Input device name (default input device when absent)
    pub device: Option<String>,
}

/// Signal conditioning configuration
#[derive(Debug, Default, Deserialize)]
pub struct ConditionerFileConfig {
    pub pre_emphasis: Option<f32>,
    pub ambient_smoothing: Option<f32>,
    pub initial_ambient: Option<f32>,
    pub calibration_frames: Option<usize>,
}

/// Classifier adapter configuration
#[derive(Debug, Default, Deserialize)]
pub struct ClassifierFileConfig {
    /// Model input length in samples (engine default when absent)
    pub input_len: Option<usize>,
}

/// Debounce configuration
#[derive(Debug, Default, Deserialize)]
pub struct DetectionFileConfig {
    pub min_confidence: Option<f32>,
    pub ambient_adjustment_factor: Option<f32>,
    pub confirm_hits: Option<u32>,
    pub confirm_window_frames: Option<u32>,
    pub silence_timeout_ms: Option<u64>,
    pub energy_gate: Option<bool>,
    pub sensitivity: Option<f32>,
}

/// Alert arbitration timing
#[derive(Debug, Default, Deserialize)]
pub struct AlertsFileConfig {
    pub min_display_ms: Option<u64>,
    pub display_high_ms: Option<u64>,
    pub display_medium_ms: Option<u64>,
    pub display_low_ms: Option<u64>,
    pub repeat_suppression_ms: Option<u64>,
}

/// Per-label rule
#[derive(Debug, Default, Deserialize)]
pub struct LabelFileConfig {
    pub display_name: Option<String>,
    /// `high`, `medium` or `low`
    pub tier: Option<String>,
    pub min_confidence: Option<f32>,
    pub haptic_pattern: Option<String>,
    pub visual_pattern: Option<String>,
    pub color: Option<String>,
    /// Model class-name fragments that map onto this label
    pub keywords: Option<Vec<String>>,
}

/// Speech alerting configuration
#[derive(Debug, Default, Deserialize)]
pub struct SpeechFileConfig {
    pub enabled: Option<bool>,
    pub tier: Option<String>,
    pub display_timeout_ms: Option<u64>,
    pub haptic_pattern: Option<String>,
    pub visual_pattern: Option<String>,
}

/// Output channel configuration
#[derive(Debug, Default, Deserialize)]
pub struct ChannelsFileConfig {
    pub failure_threshold: Option<u32>,
    pub ack_timeout_ms: Option<u64>,
    pub probe_interval_ms: Option<u64>,
    pub queue_capacity: Option<usize>,
    pub shutdown_grace_ms: Option<u64>,
    pub log_capacity: Option<usize>,

    #[serde(default)]
    pub haptic: Option<HapticFileConfig>,

    #[serde(default)]
    pub visual: Option<ChannelToggle>,

    #[serde(default)]
    pub smart_home: Option<SmartHomeFileConfig>,
}

/// Simple channel toggle
#[derive(Debug, Default, Deserialize)]
pub struct ChannelToggle {
    pub enabled: Option<bool>,
}

/// Haptic wearable configuration
#[derive(Debug, Default, Deserialize)]
pub struct HapticFileConfig {
    pub enabled: Option<bool>,
    /// `host:port` of the wearable bridge
    pub address: Option<String>,
}

/// Smart-home (MQTT) configuration
#[derive(Debug, Default, Deserialize)]
pub struct SmartHomeFileConfig {
    pub enabled: Option<bool>,
    pub broker: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub light_topic: Option<String>,
    pub topic_prefix: Option<String>,
}

/// Pipeline lifecycle configuration
#[derive(Debug, Default, Deserialize)]
pub struct PipelineFileConfig {
    /// Process frames still queued at stop (`true`) or discard them
    pub drain_on_stop: Option<bool>,
}

/// Parse a configuration file
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn read_config_file(path: &Path) -> Result<EarshotConfigFile> {
    let content = std::fs::read_to_string(path)?;
    let file = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(file)
}

/// Return the config file path: `~/.config/earshot/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("earshot").join("config.toml"))
}
