//! Bounded record of dispatch attempts

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::ChannelKind;
use crate::alert::IntentId;

/// Why a channel did not attempt delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Channel is degraded
    Degraded,
    /// Channel is disabled by configuration
    Disabled,
    /// Channel's queue was full
    Overloaded,
}

/// Result of one dispatch attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "detail")]
pub enum AttemptOutcome {
    /// Channel acknowledged delivery
    Delivered,
    /// Delivery failed
    Failed(String),
    /// Delivery was not attempted
    Skipped(SkipReason),
    /// Delivery was cut short because the alert left the display
    Cancelled,
}

/// One dispatch attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchRecord {
    /// Intent id
    #[serde(serialize_with = "serialize_intent")]
    pub intent: IntentId,
    /// Intent label
    pub label: String,
    /// Channel attempted
    pub channel: ChannelKind,
    /// What happened
    pub outcome: AttemptOutcome,
    /// When
    pub at: DateTime<Utc>,
}

fn serialize_intent<S: serde::Serializer>(id: &IntentId, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(id)
}

/// Shared ring buffer of the most recent dispatch attempts
#[derive(Debug, Clone)]
pub struct DispatchLog {
    records: Arc<Mutex<VecDeque<DispatchRecord>>>,
    capacity: usize,
}

impl DispatchLog {
    /// Log keeping the last `capacity` attempts
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.max(1)))),
            capacity: capacity.max(1),
        }
    }

    /// Append a record, evicting the oldest when full
    pub fn record(&self, intent: IntentId, label: &str, channel: ChannelKind, outcome: AttemptOutcome) {
        let record = DispatchRecord {
            intent,
            label: label.to_string(),
            channel,
            outcome,
            at: Utc::now(),
        };

        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// All records, oldest first
    #[must_use]
    pub fn snapshot(&self) -> Vec<DispatchRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Records for one intent, oldest first
    #[must_use]
    pub fn for_intent(&self, intent: IntentId) -> Vec<DispatchRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.intent == intent)
            .cloned()
            .collect()
    }

    /// Number of records held
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the log is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
