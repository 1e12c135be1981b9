//! Signal conditioning
//!
//! Turns raw [`AudioFrame`]s into normalized, pre-emphasized
//! [`ConditionedFrame`]s and keeps the running ambient-noise estimate that
//! detection thresholds adapt to.

pub mod ambient;

use std::time::Instant;

pub use ambient::{AmbientReader, AmbientWriter};

use crate::audio::AudioFrame;
use crate::config::ConditionerConfig;

/// A frame ready for classification
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionedFrame {
    /// Sequence number of the source frame
    pub seq: u64,
    /// Capture time of the source frame
    pub captured_at: Instant,
    /// Pre-emphasized samples in [-1, 1]
    pub samples: Vec<f32>,
    /// RMS energy of the scaled samples
    pub energy: f32,
    /// Ambient estimate after this frame
    pub ambient: f32,
    /// Whether the ambient estimate is still being calibrated
    pub calibrating: bool,
}

/// Frame-by-frame normalizer, pre-emphasis filter and ambient tracker
///
/// Owns the only [`AmbientWriter`]; filter memory carries across frames.
#[derive(Debug)]
pub struct SignalConditioner {
    pre_emphasis: f32,
    smoothing: f32,
    calibration_frames: usize,
    calibration: Vec<f32>,
    previous: f32,
    ambient: AmbientWriter,
}

impl SignalConditioner {
    /// Create a conditioner publishing into `ambient`
    #[must_use]
    pub fn new(config: &ConditionerConfig, ambient: AmbientWriter) -> Self {
        ambient.set(config.initial_ambient);
        Self {
            pre_emphasis: config.pre_emphasis,
            smoothing: config.ambient_smoothing,
            calibration_frames: config.calibration_frames,
            calibration: Vec::with_capacity(config.calibration_frames),
            previous: 0.0,
            ambient,
        }
    }

    /// Apply new coefficients; filter memory and the estimate are kept
    pub fn update(&mut self, config: &ConditionerConfig) {
        self.pre_emphasis = config.pre_emphasis;
        self.smoothing = config.ambient_smoothing;
    }

    /// Reader for the ambient estimate
    #[must_use]
    pub fn ambient(&self) -> AmbientReader {
        self.ambient.reader()
    }

    /// Whether the calibration window is still open
    #[must_use]
    pub fn is_calibrating(&self) -> bool {
        self.calibration.len() < self.calibration_frames
    }

    /// Condition one frame
    pub fn condition(&mut self, frame: AudioFrame) -> ConditionedFrame {
        let scaled: Vec<f32> = frame
            .samples
            .iter()
            .map(|&s| f32::from(s) / 32768.0)
            .collect();

        let energy = rms(&scaled);

        let mut samples = Vec::with_capacity(scaled.len());
        for &x in &scaled {
            samples.push((x - self.pre_emphasis * self.previous).clamp(-1.0, 1.0));
            self.previous = x;
        }

        let calibrating = self.is_calibrating();
        let ambient = if calibrating {
            self.calibration.push(energy);
            if self.is_calibrating() {
                self.ambient.get()
            } else {
                let seed = median(&mut self.calibration);
                tracing::debug!(ambient = seed, frames = self.calibration_frames, "ambient calibrated");
                seed
            }
        } else {
            let a = self.ambient.get();
            a + self.smoothing * (energy - a)
        };
        self.ambient.set(ambient);

        ConditionedFrame {
            seq: frame.seq,
            captured_at: frame.captured_at,
            samples,
            energy,
            ambient,
            calibrating,
        }
    }
}

/// Root-mean-square energy of normalized samples
#[must_use]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    #[allow(clippy::cast_precision_loss)]
    let mean = sum_squares / samples.len() as f32;
    mean.sqrt()
}

fn median(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f32::total_cmp);
    let mid = values.len() / 2;
    if values.len().is_multiple_of(2) {
        f32::midpoint(values[mid - 1], values[mid])
    } else {
        values[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(seq: u64, samples: &[i16]) -> AudioFrame {
        AudioFrame {
            seq,
            captured_at: Instant::now(),
            samples: samples.into(),
        }
    }

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-6
    }

    fn conditioner(config: &ConditionerConfig) -> (SignalConditioner, AmbientReader) {
        let (writer, reader) = ambient::channel(0.0);
        (SignalConditioner::new(config, writer), reader)
    }

    #[test]
    fn samples_are_scaled_into_unit_range() {
        let config = ConditionerConfig {
            pre_emphasis: 0.0,
            ..ConditionerConfig::default()
        };
        let (mut c, _) = conditioner(&config);

        let out = c.condition(frame(0, &[i16::MIN, 0, 16384, i16::MAX]));
        assert!(close(out.samples[0], -1.0));
        assert!(close(out.samples[1], 0.0));
        assert!(close(out.samples[2], 0.5));
        assert!(out.samples[3] < 1.0);
    }

    #[test]
    fn pre_emphasis_carries_across_frames() {
        let config = ConditionerConfig {
            pre_emphasis: 0.5,
            ..ConditionerConfig::default()
        };
        let (mut c, _) = conditioner(&config);

        c.condition(frame(0, &[0, 16384]));
        let out = c.condition(frame(1, &[16384]));
        // 0.5 - 0.5 * 0.5
        assert!((out.samples[0] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn emphasized_output_is_clamped() {
        let config = ConditionerConfig {
            pre_emphasis: 0.97,
            ..ConditionerConfig::default()
        };
        let (mut c, _) = conditioner(&config);

        let out = c.condition(frame(0, &[i16::MAX, i16::MIN]));
        assert!(out.samples.iter().all(|s| (-1.0..=1.0).contains(s)));
    }

    #[test]
    fn ambient_follows_ewma() {
        let config = ConditionerConfig {
            ambient_smoothing: 0.5,
            initial_ambient: 0.0,
            ..ConditionerConfig::default()
        };
        let (mut c, reader) = conditioner(&config);

        let out = c.condition(frame(0, &[16384; 8]));
        assert!((out.energy - 0.5).abs() < 1e-6);
        assert!((out.ambient - 0.25).abs() < 1e-6);
        assert!((reader.get() - 0.25).abs() < 1e-6);

        let out = c.condition(frame(1, &[16384; 8]));
        assert!((out.ambient - 0.375).abs() < 1e-6);
    }

    #[test]
    fn calibration_seeds_median() {
        let config = ConditionerConfig {
            calibration_frames: 3,
            initial_ambient: 0.0,
            ..ConditionerConfig::default()
        };
        let (mut c, reader) = conditioner(&config);

        assert!(c.condition(frame(0, &[3277; 4])).calibrating);
        assert!(c.condition(frame(1, &[32767; 4])).calibrating);
        let last = c.condition(frame(2, &[6554; 4]));
        assert!(last.calibrating);
        assert!((reader.get() - 0.2).abs() < 1e-3);

        assert!(!c.condition(frame(3, &[6554; 4])).calibrating);
    }

    #[test]
    fn rms_of_silence_is_zero() {
        assert!(close(rms(&[]), 0.0));
        assert!(close(rms(&[0.0; 16]), 0.0));
        assert!(close(rms(&[0.5, -0.5]), 0.5));
    }
}
