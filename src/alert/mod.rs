//! Alert intents and arbitration
//!
//! Confirmed sound events and speech segments become [`AlertIntent`]s. The
//! [`AlertArbiter`] decides which one holds the single presentation slot.

mod arbiter;

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use arbiter::{AlertArbiter, ArbiterAction, ArbiterRules, DropReason};

use crate::detect::EventId;

/// Alert priority, ordered `Low < Medium < High`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Informational
    Low,
    /// Needs attention soon
    Medium,
    /// Needs attention now; never dropped
    High,
}

impl Tier {
    /// Lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown tier `{other}`, expected high, medium or low")),
        }
    }
}

/// Identifier of an alert intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IntentId(pub u64);

impl fmt::Display for IntentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "alert-{}", self.0)
    }
}

/// What an alert was raised for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSource {
    /// A confirmed sound event
    Sound(EventId),
    /// A recognised speech segment
    Speech(u64),
    /// Raised by hand (test button)
    Manual,
}

impl fmt::Display for AlertSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sound(id) => write!(f, "{id}"),
            Self::Speech(id) => write!(f, "speech-{id}"),
            Self::Manual => f.write_str("manual"),
        }
    }
}

/// A request to notify the user
#[derive(Debug, Clone, PartialEq)]
pub struct AlertIntent {
    /// Unique id
    pub id: IntentId,
    /// Origin of the alert
    pub source: AlertSource,
    /// Label, `speech` for speech alerts
    pub label: String,
    /// Name shown to the user
    pub display_name: String,
    /// Priority
    pub tier: Tier,
    /// Haptic pattern name
    pub haptic_pattern: String,
    /// Visual pattern name
    pub visual_pattern: String,
    /// Colour for lights and the visual cue
    pub color: Option<String>,
    /// Detection confidence (1.0 for speech and manual alerts)
    pub confidence: f32,
    /// Transcript for speech alerts
    pub text: Option<String>,
    /// When the intent was created
    pub created_at: Instant,
    /// Wall-clock creation time, for external consumers
    pub timestamp: DateTime<Utc>,
}

impl AlertIntent {
    /// Sound event the intent was raised for, if any
    #[must_use]
    pub const fn event(&self) -> Option<EventId> {
        match self.source {
            AlertSource::Sound(id) => Some(id),
            AlertSource::Speech(_) | AlertSource::Manual => None,
        }
    }

    /// Text to show: the transcript for speech, the display name otherwise
    #[must_use]
    pub fn message(&self) -> &str {
        self.text.as_deref().unwrap_or(&self.display_name)
    }
}
