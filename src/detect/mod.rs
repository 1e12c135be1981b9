//! Sound-event confirmation
//!
//! [`EventDebouncer`] turns per-frame classification scores into discrete
//! [`SoundEvent`]s. Each label runs its own state machine:
//!
//! ```text
//!   Idle ──hit──▶ Pending ──confirm_hits within window──▶ Active
//!    ▲              │                                       │
//!    └──window lapses┘◀───────────silence_timeout───────────┘
//! ```
//!
//! At most one event is live per label; event ids are never reused.

mod rules;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Instant;

pub use rules::DetectionRules;

use crate::classify::ClassificationResult;

/// Identifier of a confirmed sound event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "evt-{}", self.0)
    }
}

/// A confirmed, live occurrence of a labelled sound
#[derive(Debug, Clone, PartialEq)]
pub struct SoundEvent {
    /// Unique id
    pub id: EventId,
    /// Label that was detected
    pub label: String,
    /// Time of the first qualifying frame
    pub first_detected: Instant,
    /// Time of the latest qualifying frame
    pub last_refreshed: Instant,
    /// Highest confidence seen
    pub peak_confidence: f32,
}

/// Output of the debouncer
#[derive(Debug, Clone, PartialEq)]
pub enum DebounceSignal {
    /// A label was confirmed
    Created(SoundEvent),
    /// An active event saw another qualifying frame
    StillActive {
        /// Event that was refreshed
        id: EventId,
        /// Its label
        label: String,
        /// Confidence of the refreshing frame
        confidence: f32,
    },
    /// An active event went silent
    Resolved(SoundEvent),
}

/// Observable phase of one label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelState {
    /// Nothing detected
    Idle,
    /// Qualifying frames seen but not yet confirmed
    Pending {
        /// Qualifying frames so far
        hits: u32,
        /// Frames elapsed since the first hit, inclusive
        frames: u32,
    },
    /// Confirmed and live
    Active(EventId),
}

#[derive(Debug)]
enum Slot {
    Pending {
        first_seen: Instant,
        last_hit: Instant,
        hits: u32,
        frames: u32,
        peak: f32,
    },
    Active(SoundEvent),
}

/// Per-label debounce state machines
#[derive(Debug)]
pub struct EventDebouncer {
    rules: DetectionRules,
    slots: BTreeMap<String, Slot>,
    next_id: u64,
}

impl EventDebouncer {
    /// Create a debouncer with `rules`
    #[must_use]
    pub const fn new(rules: DetectionRules) -> Self {
        Self {
            rules,
            slots: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Current rules
    #[must_use]
    pub const fn rules(&self) -> &DetectionRules {
        &self.rules
    }

    /// Replace the rules; live events and pending windows are kept
    pub fn update_rules(&mut self, rules: DetectionRules) {
        self.rules = rules;
    }

    /// Phase of `label`
    #[must_use]
    pub fn state(&self, label: &str) -> LabelState {
        match self.slots.get(label) {
            None => LabelState::Idle,
            Some(Slot::Pending { hits, frames, .. }) => LabelState::Pending {
                hits: *hits,
                frames: *frames,
            },
            Some(Slot::Active(event)) => LabelState::Active(event.id),
        }
    }

    /// Live events, by label
    pub fn active_events(&self) -> impl Iterator<Item = &SoundEvent> {
        self.slots.values().filter_map(|slot| match slot {
            Slot::Active(event) => Some(event),
            Slot::Pending { .. } => None,
        })
    }

    /// Feed one frame's classification
    ///
    /// Call exactly once per frame, including frames with no scores, so
    /// confirmation windows advance.
    pub fn observe(&mut self, result: &ClassificationResult, ambient: f32) -> Vec<DebounceSignal> {
        let now = result.at;
        let mut signals = self.expire(now);
        let mut hit = BTreeSet::new();

        for score in &result.scores {
            if hit.contains(score.label.as_str()) {
                continue;
            }
            if score.confidence < self.rules.effective_threshold(&score.label, ambient) {
                continue;
            }
            hit.insert(score.label.as_str());

            if let Some(signal) = self.hit(&score.label, score.confidence, now) {
                signals.push(signal);
            }
        }

        // windows advance for pending labels that missed this frame
        let confirm_hits = self.rules.confirm_hits;
        let window = self.rules.confirm_window_frames;
        self.slots.retain(|label, slot| match slot {
            Slot::Pending { hits, frames, .. } => {
                if !hit.contains(label.as_str()) {
                    *frames += 1;
                }
                let remaining = window.saturating_sub(*frames);
                let feasible = *hits + remaining >= confirm_hits;
                if !feasible {
                    tracing::trace!(label = %label, hits = *hits, "confirmation window lapsed");
                }
                feasible
            }
            Slot::Active(_) => true,
        });

        signals
    }

    fn hit(&mut self, label: &str, confidence: f32, now: Instant) -> Option<DebounceSignal> {
        let confirm_hits = self.rules.confirm_hits;

        match self.slots.get_mut(label) {
            Some(Slot::Active(event)) => {
                event.last_refreshed = now;
                event.peak_confidence = event.peak_confidence.max(confidence);
                Some(DebounceSignal::StillActive {
                    id: event.id,
                    label: event.label.clone(),
                    confidence,
                })
            }
            Some(Slot::Pending {
                first_seen,
                last_hit,
                hits,
                frames,
                peak,
            }) => {
                *hits += 1;
                *frames += 1;
                *last_hit = now;
                *peak = peak.max(confidence);
                if *hits >= confirm_hits {
                    let (first_seen, peak) = (*first_seen, *peak);
                    Some(self.activate(label, first_seen, now, peak))
                } else {
                    None
                }
            }
            None => {
                if confirm_hits <= 1 {
                    Some(self.activate(label, now, now, confidence))
                } else {
                    self.slots.insert(
                        label.to_string(),
                        Slot::Pending {
                            first_seen: now,
                            last_hit: now,
                            hits: 1,
                            frames: 1,
                            peak: confidence,
                        },
                    );
                    None
                }
            }
        }
    }

    fn activate(&mut self, label: &str, first: Instant, now: Instant, peak: f32) -> DebounceSignal {
        let event = SoundEvent {
            id: EventId(self.next_id),
            label: label.to_string(),
            first_detected: first,
            last_refreshed: now,
            peak_confidence: peak,
        };
        self.next_id += 1;

        tracing::info!(
            label,
            event_id = %event.id,
            confidence = peak,
            "sound event confirmed"
        );

        self.slots
            .insert(label.to_string(), Slot::Active(event.clone()));
        DebounceSignal::Created(event)
    }

    /// Resolve events silent for longer than the silence timeout
    ///
    /// Also abandons pending windows whose last hit is that old, so a stalled
    /// audio stream cannot leave a label pending forever.
    pub fn expire(&mut self, now: Instant) -> Vec<DebounceSignal> {
        let timeout = self.rules.silence_timeout;
        let mut resolved = Vec::new();

        self.slots.retain(|_, slot| {
            let last = match slot {
                Slot::Active(event) => event.last_refreshed,
                Slot::Pending { last_hit, .. } => *last_hit,
            };
            if now.saturating_duration_since(last) <= timeout {
                return true;
            }
            if let Slot::Active(event) = slot {
                resolved.push(event.clone());
            }
            false
        });

        resolved
            .into_iter()
            .map(|event| {
                tracing::info!(label = %event.label, event_id = %event.id, "sound event resolved");
                DebounceSignal::Resolved(event)
            })
            .collect()
    }
}
