//! Single-slot alert arbitration
//!
//! One intent is presented at a time. A presentation is protected for
//! `min_display` and holds the slot for its tier's display duration. Higher
//! tiers preempt once the protection has passed; everything else waits in a
//! queue ordered by tier, then by creation.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use chrono::Utc;

use super::{AlertIntent, AlertSource, IntentId, Tier};
use crate::config::{AlertConfig, Config, LabelTableConfig, SPEECH_LABEL, SpeechConfig, humanize};
use crate::detect::{EventId, SoundEvent};
use crate::speech::SpeechSegment;

const FALLBACK_HAPTIC: &str = "short_double";
const FALLBACK_VISUAL: &str = "flash_medium";

/// Why an intent was dropped without being presented (again)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Its sound event resolved before it was presented
    Resolved,
    /// A speech intent waited longer than the speech display timeout
    Expired,
    /// Same label was presented within the repeat-suppression window
    Suppressed,
}

/// Decision of the arbiter
#[derive(Debug, Clone, PartialEq)]
pub enum ArbiterAction {
    /// Intent takes the presentation slot and must be dispatched
    Present(AlertIntent),
    /// Intent lost the slot to a higher tier
    Preempted {
        /// Preempted intent (re-queued unless a `Dropped` follows)
        intent: AlertIntent,
        /// Intent that took the slot
        by: IntentId,
    },
    /// Intent discarded
    Dropped {
        /// Discarded intent
        intent: AlertIntent,
        /// Why
        reason: DropReason,
    },
    /// Presentation ran its full display duration
    Completed(AlertIntent),
}

/// Arbitration rules, rebuilt from configuration on reload
#[derive(Debug, Clone)]
pub struct ArbiterRules {
    /// Display timing
    pub alerts: AlertConfig,
    /// Speech alert settings
    pub speech: SpeechConfig,
    /// Label table for intent creation
    pub labels: LabelTableConfig,
}

impl Default for ArbiterRules {
    fn default() -> Self {
        Self::from_config(&Config::with_default_labels())
    }
}

impl ArbiterRules {
    /// Extract arbitration rules from `config`
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            alerts: config.alerts.clone(),
            speech: config.speech.clone(),
            labels: config.labels.clone(),
        }
    }

    fn display_duration(&self, tier: Tier) -> Duration {
        self.alerts.display_duration(tier)
    }
}

#[derive(Debug)]
struct Presentation {
    intent: AlertIntent,
    seq: u64,
    started: Instant,
    /// The intent's sound event resolved while it was on display
    event_resolved: bool,
}

/// Decides which alert is presented
#[derive(Debug)]
pub struct AlertArbiter {
    rules: ArbiterRules,
    queue: BTreeMap<(Reverse<Tier>, u64), AlertIntent>,
    current: Option<Presentation>,
    last_presented: HashMap<String, Instant>,
    next_seq: u64,
    next_intent: u64,
}

impl AlertArbiter {
    /// Create an arbiter with `rules`
    #[must_use]
    pub fn new(rules: ArbiterRules) -> Self {
        Self {
            rules,
            queue: BTreeMap::new(),
            current: None,
            last_presented: HashMap::new(),
            next_seq: 0,
            next_intent: 1,
        }
    }

    /// Replace the rules; the presentation and queue are kept
    pub fn update_rules(&mut self, rules: ArbiterRules) {
        self.rules = rules;
    }

    /// Intent currently holding the slot
    #[must_use]
    pub fn presenting(&self) -> Option<&AlertIntent> {
        self.current.as_ref().map(|p| &p.intent)
    }

    /// Waiting intents, next to be presented first
    pub fn queued(&self) -> impl Iterator<Item = &AlertIntent> {
        self.queue.values()
    }

    fn next_intent_id(&mut self) -> IntentId {
        let id = IntentId(self.next_intent);
        self.next_intent += 1;
        id
    }

    /// Build the intent for a confirmed sound event
    pub fn intent_for_event(&mut self, event: &SoundEvent, now: Instant) -> AlertIntent {
        self.intent_for_label(&event.label, AlertSource::Sound(event.id), event.peak_confidence, now)
    }

    /// Build an intent for `label` without a sound event behind it
    pub fn intent_for_label(
        &mut self,
        label: &str,
        source: AlertSource,
        confidence: f32,
        now: Instant,
    ) -> AlertIntent {
        let id = self.next_intent_id();
        let rule = self.rules.labels.get(label);

        AlertIntent {
            id,
            source,
            label: label.to_string(),
            display_name: rule.map_or_else(|| humanize(label), |r| r.display_name.clone()),
            tier: rule.map_or(Tier::Low, |r| r.tier),
            haptic_pattern: rule.map_or_else(|| FALLBACK_HAPTIC.to_string(), |r| r.haptic_pattern.clone()),
            visual_pattern: rule.map_or_else(|| FALLBACK_VISUAL.to_string(), |r| r.visual_pattern.clone()),
            color: rule.and_then(|r| r.color.clone()),
            confidence,
            text: None,
            created_at: now,
            timestamp: Utc::now(),
        }
    }

    /// Raise an alert for a newly confirmed sound event
    pub fn on_event_created(&mut self, event: &SoundEvent, now: Instant) -> (AlertIntent, Vec<ArbiterAction>) {
        let intent = self.intent_for_event(event, now);
        let actions = self.submit(intent.clone(), now);
        (intent, actions)
    }

    /// Raise an alert for a speech segment
    pub fn on_speech(&mut self, segment: SpeechSegment, now: Instant) -> (AlertIntent, Vec<ArbiterAction>) {
        let speech = &self.rules.speech;
        let (tier, haptic, visual) = (speech.tier, speech.haptic_pattern.clone(), speech.visual_pattern.clone());
        let id = self.next_intent_id();

        let intent = AlertIntent {
            id,
            source: AlertSource::Speech(segment.id),
            label: SPEECH_LABEL.to_string(),
            display_name: "Speech".to_string(),
            tier,
            haptic_pattern: haptic,
            visual_pattern: visual,
            color: None,
            confidence: 1.0,
            text: Some(segment.text),
            created_at: now,
            timestamp: Utc::now(),
        };

        let actions = self.submit(intent.clone(), now);
        (intent, actions)
    }

    /// Offer an intent for presentation
    pub fn submit(&mut self, intent: AlertIntent, now: Instant) -> Vec<ArbiterAction> {
        let mut actions = self.poll(now);

        if self.is_suppressed(&intent, now) {
            tracing::debug!(label = %intent.label, intent = %intent.id, "repeat alert suppressed");
            actions.push(ArbiterAction::Dropped {
                intent,
                reason: DropReason::Suppressed,
            });
            return actions;
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        let preempts = self
            .current
            .as_ref()
            .map(|current| intent.tier > current.intent.tier && self.protection_passed(current, now));

        match preempts {
            None => actions.push(self.present(intent, seq, now)),
            Some(true) => self.preempt(intent, seq, now, &mut actions),
            Some(false) => {
                tracing::debug!(
                    label = %intent.label,
                    intent = %intent.id,
                    tier = %intent.tier,
                    "alert queued"
                );
                self.queue.insert((Reverse(intent.tier), seq), intent);
            }
        }

        actions
    }

    /// A sound event went silent
    ///
    /// Queued medium and low intents for it are dropped; high-tier intents are
    /// always presented.
    pub fn on_event_resolved(&mut self, event: EventId, now: Instant) -> Vec<ArbiterAction> {
        if let Some(current) = self.current.as_mut()
            && current.intent.event() == Some(event)
        {
            current.event_resolved = true;
        }

        let stale: Vec<_> = self
            .queue
            .iter()
            .filter(|(_, intent)| intent.event() == Some(event) && intent.tier < Tier::High)
            .map(|(key, _)| *key)
            .collect();

        let mut actions: Vec<ArbiterAction> = stale
            .into_iter()
            .filter_map(|key| self.queue.remove(&key))
            .map(|intent| {
                tracing::debug!(label = %intent.label, intent = %intent.id, "stale alert dropped");
                ArbiterAction::Dropped {
                    intent,
                    reason: DropReason::Resolved,
                }
            })
            .collect();

        actions.extend(self.poll(now));
        actions
    }

    /// Advance display timing
    ///
    /// Completes finished presentations, expires waiting speech, lets a
    /// queued higher tier preempt and fills a free slot.
    pub fn poll(&mut self, now: Instant) -> Vec<ArbiterAction> {
        let mut actions = Vec::new();

        let timeout = self.rules.speech.display_timeout;
        let expired: Vec<_> = self
            .queue
            .iter()
            .filter(|(_, i)| {
                matches!(i.source, AlertSource::Speech(_))
                    && now.saturating_duration_since(i.created_at) >= timeout
            })
            .map(|(key, _)| *key)
            .collect();
        for key in expired {
            if let Some(intent) = self.queue.remove(&key) {
                tracing::debug!(intent = %intent.id, "speech alert expired");
                actions.push(ArbiterAction::Dropped {
                    intent,
                    reason: DropReason::Expired,
                });
            }
        }

        let finished = self.current.as_ref().is_some_and(|current| {
            now.saturating_duration_since(current.started)
                >= self.rules.display_duration(current.intent.tier)
        });
        if finished && let Some(done) = self.current.take() {
            tracing::debug!(intent = %done.intent.id, "alert presentation completed");
            actions.push(ArbiterAction::Completed(done.intent));
        }

        let head = self.queue.first_key_value().map(|((Reverse(tier), _), _)| *tier);
        let preempts = self.current.as_ref().is_some_and(|current| {
            head.is_some_and(|tier| tier > current.intent.tier) && self.protection_passed(current, now)
        });
        if preempts && let Some(((_, seq), intent)) = self.queue.pop_first() {
            self.preempt(intent, seq, now, &mut actions);
        }

        if self.current.is_none()
            && let Some(((_, seq), intent)) = self.queue.pop_first()
        {
            actions.push(self.present(intent, seq, now));
        }

        actions
    }

    fn protection_passed(&self, current: &Presentation, now: Instant) -> bool {
        now.saturating_duration_since(current.started) >= self.rules.alerts.min_display
    }

    fn is_suppressed(&self, intent: &AlertIntent, now: Instant) -> bool {
        let window = self.rules.alerts.repeat_suppression;
        if window.is_zero() || intent.tier == Tier::High || intent.event().is_none() {
            return false;
        }
        self.last_presented
            .get(&intent.label)
            .is_some_and(|at| now.saturating_duration_since(*at) < window)
    }

    fn present(&mut self, intent: AlertIntent, seq: u64, now: Instant) -> ArbiterAction {
        tracing::info!(
            label = %intent.label,
            intent = %intent.id,
            source = %intent.source,
            tier = %intent.tier,
            "presenting alert"
        );

        self.last_presented.insert(intent.label.clone(), now);
        self.current = Some(Presentation {
            intent: intent.clone(),
            seq,
            started: now,
            event_resolved: false,
        });
        ArbiterAction::Present(intent)
    }

    fn preempt(&mut self, intent: AlertIntent, seq: u64, now: Instant, actions: &mut Vec<ArbiterAction>) {
        if let Some(old) = self.current.take() {
            tracing::info!(
                preempted = %old.intent.id,
                by = %intent.id,
                "alert preempted by higher tier"
            );
            actions.push(ArbiterAction::Preempted {
                intent: old.intent.clone(),
                by: intent.id,
            });

            if old.event_resolved && old.intent.tier < Tier::High {
                actions.push(ArbiterAction::Dropped {
                    intent: old.intent,
                    reason: DropReason::Resolved,
                });
            } else {
                self.queue.insert((Reverse(old.intent.tier), old.seq), old.intent);
            }
        }

        actions.push(self.present(intent, seq, now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: u64, label: &str, at: Instant) -> SoundEvent {
        SoundEvent {
            id: EventId(id),
            label: label.to_string(),
            first_detected: at,
            last_refreshed: at,
            peak_confidence: 0.8,
        }
    }

    fn presented(actions: &[ArbiterAction]) -> Vec<&str> {
        actions
            .iter()
            .filter_map(|a| match a {
                ArbiterAction::Present(i) => Some(i.label.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn free_slot_presents_immediately() {
        let mut arbiter = AlertArbiter::new(ArbiterRules::default());
        let t0 = Instant::now();

        let (intent, actions) = arbiter.on_event_created(&event(1, "doorbell", t0), t0);
        assert_eq!(intent.tier, Tier::High);
        assert_eq!(intent.display_name, "Doorbell");
        assert_eq!(presented(&actions), vec!["doorbell"]);
    }

    #[test]
    fn higher_tier_waits_for_min_display() {
        let mut arbiter = AlertArbiter::new(ArbiterRules::default());
        let t0 = Instant::now();

        arbiter.on_event_created(&event(1, "microwave_beep", t0), t0);
        let (_, actions) = arbiter.on_event_created(
            &event(2, "alarm", t0),
            t0 + Duration::from_millis(500),
        );
        assert!(presented(&actions).is_empty());
        assert_eq!(arbiter.queued().count(), 1);

        let actions = arbiter.poll(t0 + Duration::from_secs(1));
        assert!(matches!(&actions[0], ArbiterAction::Preempted { intent, .. } if intent.label == "microwave_beep"));
        assert_eq!(presented(&actions), vec!["alarm"]);
        assert_eq!(arbiter.queued().next().unwrap().label, "microwave_beep");
    }

    #[test]
    fn queue_orders_by_tier_then_fifo() {
        let mut arbiter = AlertArbiter::new(ArbiterRules::default());
        let t0 = Instant::now();

        arbiter.on_event_created(&event(1, "doorbell", t0), t0);
        arbiter.on_event_created(&event(2, "microwave_beep", t0), t0);
        arbiter.on_event_created(&event(3, "knock", t0), t0);
        arbiter.on_event_created(&event(4, "alarm", t0), t0);

        let order: Vec<_> = arbiter.queued().map(|i| i.label.as_str()).collect();
        assert_eq!(order, vec!["knock", "alarm", "microwave_beep"]);
    }

    #[test]
    fn completion_frees_slot_for_next() {
        let mut arbiter = AlertArbiter::new(ArbiterRules::default());
        let t0 = Instant::now();

        arbiter.on_event_created(&event(1, "doorbell", t0), t0);
        arbiter.on_event_created(&event(2, "microwave_beep", t0), t0);

        assert!(arbiter.poll(t0 + Duration::from_millis(4999)).is_empty());

        let actions = arbiter.poll(t0 + Duration::from_secs(5));
        assert!(matches!(&actions[0], ArbiterAction::Completed(i) if i.label == "doorbell"));
        assert_eq!(presented(&actions), vec!["microwave_beep"]);
    }

    #[test]
    fn resolved_event_drops_queued_medium_but_not_high() {
        let mut arbiter = AlertArbiter::new(ArbiterRules::default());
        let t0 = Instant::now();

        arbiter.on_event_created(&event(1, "doorbell", t0), t0);
        arbiter.on_event_created(&event(2, "microwave_beep", t0), t0);
        arbiter.on_event_created(&event(3, "knock", t0), t0);

        let actions = arbiter.on_event_resolved(EventId(2), t0);
        assert!(matches!(
            &actions[..],
            [ArbiterAction::Dropped { reason: DropReason::Resolved, intent }] if intent.label == "microwave_beep"
        ));

        assert!(arbiter.on_event_resolved(EventId(3), t0).is_empty());
        assert_eq!(arbiter.queued().count(), 1);
    }

    #[test]
    fn preempted_resolved_intent_is_not_requeued() {
        let mut arbiter = AlertArbiter::new(ArbiterRules::default());
        let t0 = Instant::now();

        arbiter.on_event_created(&event(1, "microwave_beep", t0), t0);
        arbiter.on_event_resolved(EventId(1), t0);

        let (_, actions) = arbiter.on_event_created(&event(2, "alarm", t0), t0 + Duration::from_secs(1));
        assert!(actions.iter().any(|a| matches!(
            a,
            ArbiterAction::Dropped { reason: DropReason::Resolved, .. }
        )));
        assert_eq!(arbiter.queued().count(), 0);
    }

    #[test]
    fn waiting_speech_expires() {
        let mut arbiter = AlertArbiter::new(ArbiterRules::default());
        let t0 = Instant::now();

        arbiter.on_event_created(&event(1, "alarm", t0), t0);
        let (intent, _) = arbiter.on_speech(
            SpeechSegment {
                id: 1,
                text: "hello".into(),
                received_at: t0,
            },
            t0,
        );
        assert_eq!(intent.message(), "hello");
        assert_eq!(intent.tier, Tier::Low);

        let mut rules = ArbiterRules::default();
        rules.alerts.display_high = Duration::from_secs(60);
        arbiter.update_rules(rules);

        let actions = arbiter.poll(t0 + Duration::from_secs(30));
        assert!(matches!(
            &actions[..],
            [ArbiterAction::Dropped { reason: DropReason::Expired, .. }]
        ));
    }

    #[test]
    fn repeat_suppression_skips_recent_label() {
        let mut rules = ArbiterRules::default();
        rules.alerts.repeat_suppression = Duration::from_secs(10);
        let mut arbiter = AlertArbiter::new(rules);
        let t0 = Instant::now();

        arbiter.on_event_created(&event(1, "microwave_beep", t0), t0);
        let (_, actions) = arbiter.on_event_created(
            &event(2, "microwave_beep", t0),
            t0 + Duration::from_secs(4),
        );
        assert!(actions.iter().any(|a| matches!(
            a,
            ArbiterAction::Dropped { reason: DropReason::Suppressed, .. }
        )));

        // high tier is never suppressed
        arbiter.on_event_created(&event(3, "alarm", t0), t0 + Duration::from_secs(5));
        let (_, actions) = arbiter.on_event_created(&event(4, "alarm", t0), t0 + Duration::from_secs(6));
        assert!(!actions.iter().any(|a| matches!(a, ArbiterAction::Dropped { .. })));
    }

    #[test]
    fn long_run_keeps_no_per_event_state() {
        let mut arbiter = AlertArbiter::new(ArbiterRules::default());
        let t0 = Instant::now();

        for id in 1..=10_000u64 {
            let at = t0 + Duration::from_millis(id);
            arbiter.on_event_created(&event(id, "microwave_beep", at), at);
            arbiter.on_event_resolved(EventId(id), at);
        }

        assert_eq!(arbiter.queue.len(), 0);
        assert_eq!(arbiter.last_presented.len(), 1);
        assert!(arbiter.current.as_ref().is_some_and(|p| p.event_resolved));
    }

    #[test]
    fn unknown_label_gets_fallback_presentation() {
        let mut arbiter = AlertArbiter::new(ArbiterRules::default());
        let intent = arbiter.intent_for_event(&event(1, "dog_bark", Instant::now()), Instant::now());

        assert_eq!(intent.display_name, "Dog bark");
        assert_eq!(intent.tier, Tier::Low);
        assert_eq!(intent.haptic_pattern, "short_double");
    }
}
