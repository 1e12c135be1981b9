//! Sound classification
//!
//! [`ClassifierAdapter`] fits conditioned frames to an [`InferenceEngine`]'s
//! input, runs it and maps class indices to configured labels. Inference
//! failures degrade to an empty result and are never fatal.

mod heuristic;
mod labels;

use std::collections::BTreeMap;
use std::time::Instant;

pub use heuristic::HeuristicEngine;
pub use labels::LabelTable;

use crate::signal::ConditionedFrame;
use crate::{Error, Result};

/// Sound classification model
///
/// Implementations must be cheap relative to a frame period; the pipeline
/// calls [`infer`](Self::infer) once per frame on its own thread.
pub trait InferenceEngine: Send {
    /// Number of samples the model expects
    fn input_len(&self) -> usize;

    /// Class names, indexed by class id
    fn class_names(&self) -> Vec<String>;

    /// Score `samples`, returning `(class index, score)` pairs
    ///
    /// # Errors
    ///
    /// Returns error if inference fails
    fn infer(&mut self, samples: &[f32]) -> Result<Vec<(usize, f32)>>;
}

/// Confidence for one label
#[derive(Debug, Clone, PartialEq)]
pub struct Score {
    /// Configured label
    pub label: String,
    /// Confidence in [0, 1]
    pub confidence: f32,
}

/// Scores for one frame, highest confidence first
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    /// Capture time of the classified frame
    pub at: Instant,
    /// Scores sorted by descending confidence
    pub scores: Vec<Score>,
}

impl ClassificationResult {
    /// Result with no scores
    #[must_use]
    pub const fn empty(at: Instant) -> Self {
        Self {
            at,
            scores: Vec::new(),
        }
    }

    /// Highest-scoring label, if any
    #[must_use]
    pub fn top(&self) -> Option<&Score> {
        self.scores.first()
    }
}

/// Runs an [`InferenceEngine`] on conditioned frames
pub struct ClassifierAdapter {
    engine: Box<dyn InferenceEngine>,
    table: LabelTable,
    input_len: usize,
    class_count: usize,
    failures: u64,
    buffer: Vec<f32>,
}

impl ClassifierAdapter {
    /// Wrap `engine`, mapping its classes through `table`
    ///
    /// `input_len` overrides the engine's declared input length.
    #[must_use]
    pub fn new(engine: Box<dyn InferenceEngine>, table: LabelTable, input_len: Option<usize>) -> Self {
        let input_len = input_len.unwrap_or_else(|| engine.input_len()).max(1);
        let class_count = engine.class_names().len();

        tracing::debug!(
            input_len,
            classes = class_count,
            mapped = table.mapped(),
            "classifier ready"
        );

        Self {
            engine,
            table,
            input_len,
            class_count,
            failures: 0,
            buffer: Vec::with_capacity(input_len),
        }
    }

    /// Class names of the wrapped engine
    #[must_use]
    pub fn class_names(&self) -> Vec<String> {
        self.engine.class_names()
    }

    /// Replace the label mapping
    pub fn set_table(&mut self, table: LabelTable) {
        self.table = table;
    }

    /// Inferences that failed so far
    #[must_use]
    pub const fn inference_failures(&self) -> u64 {
        self.failures
    }

    /// Classify one frame
    ///
    /// Never fails: an engine error or malformed output yields an empty result.
    pub fn classify(&mut self, frame: &ConditionedFrame) -> ClassificationResult {
        fit(&frame.samples, self.input_len, &mut self.buffer);

        let raw = match self
            .engine
            .infer(&self.buffer)
            .and_then(|raw| self.check(raw))
        {
            Ok(raw) => raw,
            Err(e) => {
                self.failures += 1;
                tracing::warn!(seq = frame.seq, error = %e, failures = self.failures, "inference failed");
                return ClassificationResult::empty(frame.captured_at);
            }
        };

        let mut best: BTreeMap<&str, f32> = BTreeMap::new();
        for (index, score) in raw {
            if let Some(label) = self.table.label(index) {
                let score = score.clamp(0.0, 1.0);
                best.entry(label)
                    .and_modify(|s| *s = s.max(score))
                    .or_insert(score);
            }
        }

        let mut scores: Vec<Score> = best
            .into_iter()
            .map(|(label, confidence)| Score {
                label: label.to_string(),
                confidence,
            })
            .collect();
        scores.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        ClassificationResult {
            at: frame.captured_at,
            scores,
        }
    }

    fn check(&self, raw: Vec<(usize, f32)>) -> Result<Vec<(usize, f32)>> {
        if let Some((index, score)) = raw
            .iter()
            .find(|(index, score)| *index >= self.class_count || !score.is_finite())
        {
            return Err(Error::Inference(format!(
                "malformed output: class {index} score {score} ({} classes)",
                self.class_count
            )));
        }
        Ok(raw)
    }
}

/// Fit `samples` into `out` with exactly `len` samples
///
/// Short frames are zero-padded at the end; long frames keep the centred
/// window.
fn fit(samples: &[f32], len: usize, out: &mut Vec<f32>) {
    out.clear();
    if samples.len() >= len {
        let start = (samples.len() - len) / 2;
        out.extend_from_slice(&samples[start..start + len]);
    } else {
        out.extend_from_slice(samples);
        out.resize(len, 0.0);
    }
}
