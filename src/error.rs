//! Error types for earshot

use thiserror::Error;

/// Result type alias for earshot operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the sound-event pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed configuration, rejected before the pipeline starts
    #[error("configuration error at `{field}`: {reason}")]
    Config {
        /// Dotted path of the offending field
        field: String,
        /// What is wrong with it
        reason: String,
    },

    /// Microphone unavailable or the capture stream failed
    #[error("capture error: {0}")]
    Capture(String),

    /// Inference collaborator failed or returned malformed output
    #[error("inference error: {0}")]
    Inference(String),

    /// An output channel could not deliver an alert
    #[error("{channel} delivery failed: {reason}")]
    Delivery {
        /// Channel name
        channel: &'static str,
        /// Failure description
        reason: String,
    },

    /// Pipeline could not be assembled or one of its threads failed
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// A collaborator did not acknowledge in time
    #[error("timed out: {0}")]
    Timeout(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// WAV encoding/decoding error
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
}

impl Error {
    /// Build a configuration error for `field`
    #[must_use]
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Build a delivery error for `channel`
    #[must_use]
    pub fn delivery(channel: &'static str, reason: impl Into<String>) -> Self {
        Self::Delivery {
            channel,
            reason: reason.into(),
        }
    }
}
