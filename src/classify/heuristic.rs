//! Model-free fallback classifier

use super::InferenceEngine;
use crate::Result;

const CLASSES: [&str; 3] = ["doorbell", "knock", "unknown"];

/// Classifies frames from mean level and zero-crossing rate
///
/// Loud, high-frequency frames read as a doorbell; loud, low-frequency frames
/// as a knock. Used when no trained model is plugged in.
#[derive(Debug, Clone, Default)]
pub struct HeuristicEngine {
    input_len: usize,
}

impl HeuristicEngine {
    /// Engine expecting frames of `input_len` samples
    #[must_use]
    pub const fn new(input_len: usize) -> Self {
        Self { input_len }
    }
}

impl InferenceEngine for HeuristicEngine {
    fn input_len(&self) -> usize {
        self.input_len
    }

    fn class_names(&self) -> Vec<String> {
        CLASSES.iter().map(ToString::to_string).collect()
    }

    fn infer(&mut self, samples: &[f32]) -> Result<Vec<(usize, f32)>> {
        if samples.is_empty() {
            return Ok(Vec::new());
        }

        #[allow(clippy::cast_precision_loss)]
        let n = samples.len() as f32;
        let level = samples.iter().map(|s| s.abs()).sum::<f32>() / n;

        let crossings = samples
            .windows(2)
            .filter(|w| w[0].is_sign_negative() != w[1].is_sign_negative())
            .count();
        #[allow(clippy::cast_precision_loss)]
        let zcr = crossings as f32 / n;

        let scores = if level > 0.4 && zcr > 0.1 {
            vec![(0, 0.6), (2, 0.1)]
        } else if level > 0.3 && zcr < 0.05 {
            vec![(1, 0.6), (2, 0.1)]
        } else if level > 0.2 {
            vec![(2, 0.4)]
        } else {
            vec![(2, 0.1)]
        };

        tracing::trace!(level, zcr, "heuristic classification");
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loud_high_frequency_is_doorbell() {
        let mut engine = HeuristicEngine::new(8);
        let samples = [0.5, -0.5, 0.5, -0.5, 0.5, -0.5, 0.5, -0.5];
        assert_eq!(engine.infer(&samples).unwrap()[0], (0, 0.6));
    }

    #[test]
    fn loud_low_frequency_is_knock() {
        let mut engine = HeuristicEngine::new(32);
        let samples = [0.35; 32];
        assert_eq!(engine.infer(&samples).unwrap()[0], (1, 0.6));
    }

    #[test]
    fn quiet_is_unknown() {
        let mut engine = HeuristicEngine::new(4);
        let scores = engine.infer(&[0.01, -0.01, 0.0, 0.0]).unwrap();
        assert_eq!(scores, vec![(2, 0.1)]);
    }
}
