//! Configuration management for earshot
//!
//! [`Config`] is the validated, read-only configuration consumed by the
//! pipeline. It is built from defaults overlaid with the TOML file schema in
//! [`file`] and validated eagerly: the first malformed field is reported with
//! its dotted path and the configuration is rejected before anything starts.

pub mod file;

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::alert::Tier;
use crate::{Error, Result};

use file::{EarshotConfigFile, LabelFileConfig};

/// Label reserved for speech-to-text alerts
pub const SPEECH_LABEL: &str = "speech";

/// Earshot configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Audio capture
    pub audio: AudioConfig,

    /// Signal conditioning
    pub conditioner: ConditionerConfig,

    /// Classifier adapter
    pub classifier: ClassifierConfig,

    /// Debounce thresholds and windows
    pub detection: DetectionConfig,

    /// Alert arbitration timing
    pub alerts: AlertConfig,

    /// Label rules keyed by label
    pub labels: LabelTableConfig,

    /// Speech alerting
    pub speech: SpeechConfig,

    /// Output channels
    pub channels: ChannelsConfig,

    /// Pipeline lifecycle
    pub pipeline: PipelineConfig,
}

/// Audio capture configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Samples per frame
    pub frame_size: usize,

    /// Bounded frame queue capacity
    pub queue_capacity: usize,

    /// Input device name; default input device when `None`
    pub device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            frame_size: 1024,
            queue_capacity: 32,
            device: None,
        }
    }
}

impl AudioConfig {
    /// Wall-clock duration of one frame
    #[must_use]
    pub fn frame_period(&self) -> Duration {
        let nanos = self.frame_size as u64 * 1_000_000_000 / u64::from(self.sample_rate.max(1));
        Duration::from_nanos(nanos)
    }
}

/// Signal conditioning configuration
#[derive(Debug, Clone)]
pub struct ConditionerConfig {
    /// Pre-emphasis coefficient α
    pub pre_emphasis: f32,

    /// EWMA smoothing factor for the ambient estimate
    pub ambient_smoothing: f32,

    /// Ambient estimate before any audio was seen
    pub initial_ambient: f32,

    /// Frames used to seed the ambient estimate (0 disables calibration)
    pub calibration_frames: usize,
}

impl Default for ConditionerConfig {
    fn default() -> Self {
        Self {
            pre_emphasis: 0.97,
            ambient_smoothing: 0.05,
            initial_ambient: 0.01,
            calibration_frames: 0,
        }
    }
}

/// Classifier adapter configuration
#[derive(Debug, Clone, Default)]
pub struct ClassifierConfig {
    /// Model input length override
    pub input_len: Option<usize>,
}

/// Debounce configuration
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// Default minimum confidence before ambient adjustment
    pub min_confidence: f32,

    /// How much the ambient estimate raises the threshold
    pub ambient_adjustment_factor: f32,

    /// Qualifying frames needed to confirm an event
    pub confirm_hits: u32,

    /// Frames, counted from the first hit, within which confirmation must happen
    pub confirm_window_frames: u32,

    /// Silence after which an active event resolves
    pub silence_timeout: Duration,

    /// Skip inference on frames quieter than the ambient-relative gate
    pub energy_gate: bool,

    /// Gate sensitivity in [0, 1]
    pub sensitivity: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
            ambient_adjustment_factor: 0.5,
            confirm_hits: 2,
            confirm_window_frames: 2,
            silence_timeout: Duration::from_millis(1500),
            energy_gate: false,
            sensitivity: 0.7,
        }
    }
}

/// Alert arbitration timing
#[derive(Debug, Clone)]
pub struct AlertConfig {
    /// Time a presentation is protected from preemption
    pub min_display: Duration,

    /// Presentation length for high-tier alerts
    pub display_high: Duration,

    /// Presentation length for medium-tier alerts
    pub display_medium: Duration,

    /// Presentation length for low-tier alerts
    pub display_low: Duration,

    /// Suppress re-alerting the same non-high label within this window
    pub repeat_suppression: Duration,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            min_display: Duration::from_secs(1),
            display_high: Duration::from_secs(5),
            display_medium: Duration::from_secs(3),
            display_low: Duration::from_secs(2),
            repeat_suppression: Duration::ZERO,
        }
    }
}

impl AlertConfig {
    /// How long a presentation of `tier` occupies the alert slot
    #[must_use]
    pub const fn display_duration(&self, tier: Tier) -> Duration {
        match tier {
            Tier::High => self.display_high,
            Tier::Medium => self.display_medium,
            Tier::Low => self.display_low,
        }
    }
}

/// Rules for one sound label
#[derive(Debug, Clone, PartialEq)]
pub struct LabelConfig {
    /// Human-readable name shown to the user
    pub display_name: String,

    /// Priority tier
    pub tier: Tier,

    /// Per-label override of the minimum confidence
    pub min_confidence: Option<f32>,

    /// Haptic pattern identifier
    pub haptic_pattern: String,

    /// Visual pattern identifier
    pub visual_pattern: String,

    /// Light colour for smart-home and visual cues
    pub color: Option<String>,

    /// Model class-name fragments mapping onto this label
    pub keywords: Vec<String>,
}

/// Label table keyed by label
pub type LabelTableConfig = BTreeMap<String, LabelConfig>;

/// Speech alerting configuration
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    /// Turn recognised speech into alerts
    pub enabled: bool,

    /// Tier of speech alerts
    pub tier: Tier,

    /// Speech alerts not shown within this window are dropped
    pub display_timeout: Duration,

    /// Haptic pattern for speech
    pub haptic_pattern: String,

    /// Visual pattern for speech
    pub visual_pattern: String,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tier: Tier::Low,
            display_timeout: Duration::from_secs(30),
            haptic_pattern: "short_single".to_string(),
            visual_pattern: "gentle_pulse".to_string(),
        }
    }
}

/// Output channel configuration
#[derive(Debug, Clone)]
pub struct ChannelsConfig {
    /// Consecutive failures before a channel is degraded
    pub failure_threshold: u32,

    /// Delivery acknowledgement timeout
    pub ack_timeout: Duration,

    /// Health probe interval while degraded
    pub probe_interval: Duration,

    /// Per-channel pending delivery capacity
    pub queue_capacity: usize,

    /// Grace period for in-flight deliveries at shutdown
    pub shutdown_grace: Duration,

    /// Dispatch records retained for observability
    pub log_capacity: usize,

    /// Haptic wearable
    pub haptic: HapticConfig,

    /// Visual display
    pub visual_enabled: bool,

    /// Smart-home bridge
    pub smart_home: SmartHomeConfig,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            ack_timeout: Duration::from_secs(2),
            probe_interval: Duration::from_secs(10),
            queue_capacity: 16,
            shutdown_grace: Duration::from_secs(2),
            log_capacity: 256,
            haptic: HapticConfig::default(),
            visual_enabled: true,
            smart_home: SmartHomeConfig::default(),
        }
    }
}

/// Haptic wearable configuration
#[derive(Debug, Clone)]
pub struct HapticConfig {
    /// Enable haptic alerts
    pub enabled: bool,

    /// `host:port` of the wearable bridge
    pub address: String,
}

impl Default for HapticConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: "127.0.0.1:7878".to_string(),
        }
    }
}

/// Smart-home (MQTT) configuration
#[derive(Debug, Clone)]
pub struct SmartHomeConfig {
    /// Enable smart-home alerts
    pub enabled: bool,

    /// Broker host
    pub broker: Option<String>,

    /// Broker port
    pub port: u16,

    /// Broker username
    pub username: Option<String>,

    /// Broker password
    pub password: Option<String>,

    /// Topic receiving light commands
    pub light_topic: String,

    /// Prefix for per-event topics (`<prefix>/events/<label>`)
    pub topic_prefix: String,
}

impl Default for SmartHomeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            broker: None,
            port: 1883,
            username: None,
            password: None,
            light_topic: "earshot/lights".to_string(),
            topic_prefix: "earshot".to_string(),
        }
    }
}

/// Pipeline lifecycle configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Process frames still queued at stop instead of discarding them
    pub drain_on_stop: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            drain_on_stop: true,
        }
    }
}

/// Built-in label table
#[must_use]
pub fn default_labels() -> LabelTableConfig {
    let entries = [
        (
            "doorbell",
            "Doorbell",
            Tier::High,
            "long_double",
            "flash_bright",
            "blue",
            &["doorbell", "ding-dong"][..],
        ),
        (
            "knock",
            "Knock, knock",
            Tier::High,
            "short_triple",
            "flash_medium",
            "green",
            &["knock", "tap"][..],
        ),
        (
            "alarm",
            "Alarm",
            Tier::High,
            "continuous",
            "flash_urgent",
            "red",
            &["alarm", "siren", "smoke detector"][..],
        ),
        (
            "microwave_beep",
            "Microwave",
            Tier::Medium,
            "short_double",
            "flash_low",
            "yellow",
            &["microwave", "beep"][..],
        ),
    ];

    entries
        .into_iter()
        .map(|(label, name, tier, haptic, visual, color, keywords)| {
            (
                label.to_string(),
                LabelConfig {
                    display_name: name.to_string(),
                    tier,
                    min_confidence: None,
                    haptic_pattern: haptic.to_string(),
                    visual_pattern: visual.to_string(),
                    color: Some(color.to_string()),
                    keywords: keywords.iter().map(ToString::to_string).collect(),
                },
            )
        })
        .collect()
}

impl Config {
    /// Defaults with the built-in label table
    #[must_use]
    pub fn with_default_labels() -> Self {
        Self {
            labels: default_labels(),
            ..Self::default()
        }
    }

    /// Load configuration
    ///
    /// An explicit `path` must exist. Without one, the standard config file is
    /// used when present and built-in defaults otherwise.
    ///
    /// # Errors
    ///
    /// Returns error if the file is unreadable, not valid TOML, or fails
    /// validation
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        match file::config_file_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => {
                tracing::info!("no config file found, using defaults");
                let config = Self::with_default_labels();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Load and validate a configuration file
    ///
    /// # Errors
    ///
    /// Returns error if the file is unreadable, not valid TOML, or fails
    /// validation
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_file_config(file::read_config_file(path)?)
    }

    /// Parse and validate configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns error if the text is not valid TOML or fails validation
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: EarshotConfigFile = toml::from_str(content)?;
        Self::from_file_config(file)
    }

    /// Overlay a parsed file over the defaults and validate the result
    ///
    /// # Errors
    ///
    /// Returns error on the first invalid field
    #[allow(clippy::too_many_lines)]
    pub fn from_file_config(file: EarshotConfigFile) -> Result<Self> {
        let mut config = Self::with_default_labels();

        let a = file.audio;
        set(&mut config.audio.sample_rate, a.sample_rate);
        set(&mut config.audio.frame_size, a.frame_size);
        set(&mut config.audio.queue_capacity, a.queue_capacity);
        if a.device.is_some() {
            config.audio.device = a.device;
        }

        let c = file.conditioner;
        set(&mut config.conditioner.pre_emphasis, c.pre_emphasis);
        set(&mut config.conditioner.ambient_smoothing, c.ambient_smoothing);
        set(&mut config.conditioner.initial_ambient, c.initial_ambient);
        set(&mut config.conditioner.calibration_frames, c.calibration_frames);

        if file.classifier.input_len.is_some() {
            config.classifier.input_len = file.classifier.input_len;
        }

        let d = file.detection;
        set(&mut config.detection.min_confidence, d.min_confidence);
        set(
            &mut config.detection.ambient_adjustment_factor,
            d.ambient_adjustment_factor,
        );
        set(&mut config.detection.confirm_hits, d.confirm_hits);
        set(
            &mut config.detection.confirm_window_frames,
            d.confirm_window_frames,
        );
        set_ms(&mut config.detection.silence_timeout, d.silence_timeout_ms);
        set(&mut config.detection.energy_gate, d.energy_gate);
        set(&mut config.detection.sensitivity, d.sensitivity);

        let al = file.alerts;
        set_ms(&mut config.alerts.min_display, al.min_display_ms);
        set_ms(&mut config.alerts.display_high, al.display_high_ms);
        set_ms(&mut config.alerts.display_medium, al.display_medium_ms);
        set_ms(&mut config.alerts.display_low, al.display_low_ms);
        set_ms(
            &mut config.alerts.repeat_suppression,
            al.repeat_suppression_ms,
        );

        for (label, overlay) in file.labels {
            let merged = merge_label(&label, config.labels.remove(&label), overlay)?;
            config.labels.insert(label, merged);
        }

        let s = file.speech;
        set(&mut config.speech.enabled, s.enabled);
        if let Some(tier) = s.tier {
            config.speech.tier = parse_tier("speech.tier", &tier)?;
        }
        set_ms(&mut config.speech.display_timeout, s.display_timeout_ms);
        set(&mut config.speech.haptic_pattern, s.haptic_pattern);
        set(&mut config.speech.visual_pattern, s.visual_pattern);

        let ch = file.channels;
        set(&mut config.channels.failure_threshold, ch.failure_threshold);
        set_ms(&mut config.channels.ack_timeout, ch.ack_timeout_ms);
        set_ms(&mut config.channels.probe_interval, ch.probe_interval_ms);
        set(&mut config.channels.queue_capacity, ch.queue_capacity);
        set_ms(&mut config.channels.shutdown_grace, ch.shutdown_grace_ms);
        set(&mut config.channels.log_capacity, ch.log_capacity);
        if let Some(haptic) = ch.haptic {
            set(&mut config.channels.haptic.enabled, haptic.enabled);
            set(&mut config.channels.haptic.address, haptic.address);
        }
        if let Some(visual) = ch.visual {
            set(&mut config.channels.visual_enabled, visual.enabled);
        }
        if let Some(sh) = ch.smart_home {
            let target = &mut config.channels.smart_home;
            set(&mut target.enabled, sh.enabled);
            if sh.broker.is_some() {
                target.broker = sh.broker;
            }
            set(&mut target.port, sh.port);
            if sh.username.is_some() {
                target.username = sh.username;
            }
            if sh.password.is_some() {
                target.password = sh.password;
            }
            set(&mut target.light_topic, sh.light_topic);
            set(&mut target.topic_prefix, sh.topic_prefix);
        }

        set(&mut config.pipeline.drain_on_stop, file.pipeline.drain_on_stop);

        config.validate()?;
        Ok(config)
    }

    /// Check every field, reporting the first invalid one
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the offending field
    pub fn validate(&self) -> Result<()> {
        let audio = &self.audio;
        if !(8_000..=192_000).contains(&audio.sample_rate) {
            return Err(Error::config(
                "audio.sample_rate",
                format!("{} Hz is outside 8000..=192000", audio.sample_rate),
            ));
        }
        if audio.frame_size == 0 {
            return Err(Error::config("audio.frame_size", "must be greater than 0"));
        }
        if audio.queue_capacity == 0 {
            return Err(Error::config(
                "audio.queue_capacity",
                "must be greater than 0",
            ));
        }

        let cond = &self.conditioner;
        check_range("conditioner.pre_emphasis", cond.pre_emphasis, 0.0, 0.999_9)?;
        check_range(
            "conditioner.ambient_smoothing",
            cond.ambient_smoothing,
            f32::EPSILON,
            1.0,
        )?;
        check_range("conditioner.initial_ambient", cond.initial_ambient, 0.0, 1.0)?;

        if self.classifier.input_len == Some(0) {
            return Err(Error::config(
                "classifier.input_len",
                "must be greater than 0",
            ));
        }

        let det = &self.detection;
        check_range("detection.min_confidence", det.min_confidence, 0.0, 1.0)?;
        check_range(
            "detection.ambient_adjustment_factor",
            det.ambient_adjustment_factor,
            0.0,
            100.0,
        )?;
        if det.confirm_hits == 0 {
            return Err(Error::config(
                "detection.confirm_hits",
                "must be at least 1",
            ));
        }
        if det.confirm_window_frames < det.confirm_hits {
            return Err(Error::config(
                "detection.confirm_window_frames",
                format!(
                    "window of {} frames cannot hold {} confirming hits",
                    det.confirm_window_frames, det.confirm_hits
                ),
            ));
        }
        if det.silence_timeout.is_zero() {
            return Err(Error::config(
                "detection.silence_timeout_ms",
                "must be greater than 0",
            ));
        }
        check_range("detection.sensitivity", det.sensitivity, 0.0, 1.0)?;

        let alerts = &self.alerts;
        for tier in [Tier::High, Tier::Medium, Tier::Low] {
            if alerts.display_duration(tier) < alerts.min_display {
                return Err(Error::config(
                    format!("alerts.display_{tier}_ms"),
                    "must not be shorter than alerts.min_display_ms",
                ));
            }
        }

        for (label, rule) in &self.labels {
            validate_label(label, rule)?;
        }

        if self.speech.display_timeout.is_zero() {
            return Err(Error::config(
                "speech.display_timeout_ms",
                "must be greater than 0",
            ));
        }

        let ch = &self.channels;
        if ch.failure_threshold == 0 {
            return Err(Error::config(
                "channels.failure_threshold",
                "must be at least 1",
            ));
        }
        if ch.ack_timeout.is_zero() {
            return Err(Error::config(
                "channels.ack_timeout_ms",
                "must be greater than 0",
            ));
        }
        if ch.probe_interval.is_zero() {
            return Err(Error::config(
                "channels.probe_interval_ms",
                "must be greater than 0",
            ));
        }
        if ch.queue_capacity == 0 {
            return Err(Error::config(
                "channels.queue_capacity",
                "must be greater than 0",
            ));
        }
        if ch.haptic.enabled && ch.haptic.address.trim().is_empty() {
            return Err(Error::config(
                "channels.haptic.address",
                "required when the haptic channel is enabled",
            ));
        }
        let sh = &ch.smart_home;
        if sh.enabled && sh.broker.as_deref().is_none_or(|b| b.trim().is_empty()) {
            return Err(Error::config(
                "channels.smart_home.broker",
                "required when the smart-home channel is enabled",
            ));
        }

        Ok(())
    }

    /// Rules for `label`, if configured
    #[must_use]
    pub fn label(&self, label: &str) -> Option<&LabelConfig> {
        self.labels.get(label)
    }
}

fn merge_label(
    label: &str,
    base: Option<LabelConfig>,
    overlay: LabelFileConfig,
) -> Result<LabelConfig> {
    let field = |name: &str| format!("labels.{label}.{name}");

    let tier = match (overlay.tier, &base) {
        (Some(tier), _) => parse_tier(&field("tier"), &tier)?,
        (None, Some(base)) => base.tier,
        (None, None) => {
            return Err(Error::config(
                field("tier"),
                "required for labels without a built-in default",
            ));
        }
    };

    let base = base.unwrap_or_else(|| LabelConfig {
        display_name: humanize(label),
        tier,
        min_confidence: None,
        haptic_pattern: "short_double".to_string(),
        visual_pattern: "flash_medium".to_string(),
        color: None,
        keywords: vec![label.replace('_', " ")],
    });

    Ok(LabelConfig {
        display_name: overlay.display_name.unwrap_or(base.display_name),
        tier,
        min_confidence: overlay.min_confidence.or(base.min_confidence),
        haptic_pattern: overlay.haptic_pattern.unwrap_or(base.haptic_pattern),
        visual_pattern: overlay.visual_pattern.unwrap_or(base.visual_pattern),
        color: overlay.color.or(base.color),
        keywords: overlay.keywords.unwrap_or(base.keywords),
    })
}

fn validate_label(label: &str, rule: &LabelConfig) -> Result<()> {
    if label.trim().is_empty() {
        return Err(Error::config("labels", "label names must not be empty"));
    }
    if label == SPEECH_LABEL {
        return Err(Error::config(
            format!("labels.{label}"),
            "`speech` is reserved; configure it under [speech]",
        ));
    }
    if let Some(min) = rule.min_confidence {
        check_range(&format!("labels.{label}.min_confidence"), min, 0.0, 1.0)?;
    }
    if rule.haptic_pattern.trim().is_empty() {
        return Err(Error::config(
            format!("labels.{label}.haptic_pattern"),
            "must not be empty",
        ));
    }
    if rule.visual_pattern.trim().is_empty() {
        return Err(Error::config(
            format!("labels.{label}.visual_pattern"),
            "must not be empty",
        ));
    }
    if rule.keywords.iter().any(|k| k.trim().is_empty()) {
        return Err(Error::config(
            format!("labels.{label}.keywords"),
            "keywords must not be empty strings",
        ));
    }
    Ok(())
}

fn parse_tier(field: &str, value: &str) -> Result<Tier> {
    value.parse().map_err(|reason: String| Error::config(field, reason))
}

fn check_range(field: &str, value: f32, min: f32, max: f32) -> Result<()> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(Error::config(
            field,
            format!("{value} is outside [{min}, {max}]"),
        ))
    }
}

pub(crate) fn humanize(label: &str) -> String {
    let spaced = label.replace('_', " ");
    let mut chars = spaced.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

fn set<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

fn set_ms(target: &mut Duration, value: Option<u64>) {
    if let Some(ms) = value {
        *target = Duration::from_millis(ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::with_default_labels();
        config.validate().unwrap();
        assert_eq!(config.labels.len(), 4);
        assert_eq!(config.label("alarm").unwrap().tier, Tier::High);
        assert_eq!(config.label("microwave_beep").unwrap().tier, Tier::Medium);
    }

    #[test]
    fn frame_period_matches_rate() {
        let audio = AudioConfig::default();
        assert_eq!(audio.frame_period(), Duration::from_millis(64));
    }

    #[test]
    fn overlay_keeps_unspecified_defaults() {
        let config = Config::from_toml_str(
            r#"
            [detection]
            min_confidence = 0.7

            [labels.doorbell]
            tier = "medium"
            "#,
        )
        .unwrap();

        assert!((config.detection.min_confidence - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.detection.confirm_hits, 2);
        let doorbell = config.label("doorbell").unwrap();
        assert_eq!(doorbell.tier, Tier::Medium);
        assert_eq!(doorbell.haptic_pattern, "long_double");
    }

    #[test]
    fn new_label_requires_tier() {
        let err = Config::from_toml_str("[labels.dog_bark]\nmin_confidence = 0.5\n").unwrap_err();
        assert!(err.to_string().contains("labels.dog_bark.tier"), "{err}");
    }

    #[test]
    fn new_label_gets_readable_name() {
        let config = Config::from_toml_str("[labels.dog_bark]\ntier = \"low\"\n").unwrap();
        let rule = config.label("dog_bark").unwrap();
        assert_eq!(rule.display_name, "Dog bark");
        assert_eq!(rule.keywords, vec!["dog bark".to_string()]);
    }

    #[test]
    fn unknown_tier_is_rejected_with_field() {
        let err = Config::from_toml_str("[labels.alarm]\ntier = \"urgent\"\n").unwrap_err();
        match err {
            Error::Config { field, .. } => assert_eq!(field, "labels.alarm.tier"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn confirmation_window_must_hold_hits() {
        let err = Config::from_toml_str(
            "[detection]\nconfirm_hits = 3\nconfirm_window_frames = 2\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("detection.confirm_window_frames"));
    }

    #[test]
    fn speech_label_is_reserved() {
        let err = Config::from_toml_str("[labels.speech]\ntier = \"low\"\n").unwrap_err();
        assert!(err.to_string().contains("labels.speech"));
    }

    #[test]
    fn smart_home_requires_broker() {
        let err = Config::from_toml_str("[channels.smart_home]\nenabled = true\n").unwrap_err();
        assert!(err.to_string().contains("channels.smart_home.broker"));
    }

    #[test]
    fn out_of_range_confidence_is_rejected() {
        let err = Config::from_toml_str("[labels.knock]\nmin_confidence = 1.5\n").unwrap_err();
        assert!(err.to_string().contains("labels.knock.min_confidence"));
    }
}
