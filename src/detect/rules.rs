//! Thresholds and windows for confirming sound events

use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::Config;

/// Detection rules, rebuilt from configuration on reload
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionRules {
    /// Default minimum confidence
    pub min_confidence: f32,
    /// Per-label minimum confidence overrides
    pub label_min_confidence: BTreeMap<String, f32>,
    /// Threshold increase per unit of ambient energy
    pub ambient_adjustment_factor: f32,
    /// Qualifying frames needed to confirm an event
    pub confirm_hits: u32,
    /// Frames, counted from the first hit, in which confirmation must happen
    pub confirm_window_frames: u32,
    /// Silence after which an active event resolves
    pub silence_timeout: Duration,
}

impl Default for DetectionRules {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl DetectionRules {
    /// Extract detection rules from `config`
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let det = &config.detection;
        Self {
            min_confidence: det.min_confidence,
            label_min_confidence: config
                .labels
                .iter()
                .filter_map(|(label, rule)| rule.min_confidence.map(|c| (label.clone(), c)))
                .collect(),
            ambient_adjustment_factor: det.ambient_adjustment_factor,
            confirm_hits: det.confirm_hits.max(1),
            confirm_window_frames: det.confirm_window_frames.max(det.confirm_hits.max(1)),
            silence_timeout: det.silence_timeout,
        }
    }

    /// Minimum confidence for `label` before ambient adjustment
    #[must_use]
    pub fn min_confidence(&self, label: &str) -> f32 {
        self.label_min_confidence
            .get(label)
            .copied()
            .unwrap_or(self.min_confidence)
    }

    /// Confidence a score for `label` must reach at the given ambient level
    ///
    /// Non-decreasing in `ambient` and capped at 1.
    #[must_use]
    pub fn effective_threshold(&self, label: &str, ambient: f32) -> f32 {
        let ambient = if ambient.is_finite() { ambient.max(0.0) } else { 0.0 };
        (self.min_confidence(label) + self.ambient_adjustment_factor * ambient).min(1.0)
    }
}
