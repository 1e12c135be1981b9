//! Debounce and arbitration behaviour, driven the way the pipeline drives it

use std::time::{Duration, Instant};

use earshot::alert::{AlertArbiter, AlertSource, ArbiterAction, ArbiterRules, Tier};
use earshot::classify::{ClassificationResult, Score};
use earshot::config::Config;
use earshot::detect::{DebounceSignal, DetectionRules, EventDebouncer, LabelState};

const FRAME: Duration = Duration::from_millis(64);

fn frame(at: Instant, scores: &[(&str, f32)]) -> ClassificationResult {
    ClassificationResult {
        at,
        scores: scores
            .iter()
            .map(|(label, confidence)| Score {
                label: (*label).to_string(),
                confidence: *confidence,
            })
            .collect(),
    }
}

fn created(signals: &[DebounceSignal]) -> Vec<&str> {
    signals
        .iter()
        .filter_map(|s| match s {
            DebounceSignal::Created(e) => Some(e.label.as_str()),
            _ => None,
        })
        .collect()
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
fn doorbell_confirms_on_second_frame_then_resolves() {
    let rules = DetectionRules::from_config(&Config::with_default_labels());
    let timeout = rules.silence_timeout;
    let mut debouncer = EventDebouncer::new(rules);
    let t0 = Instant::now();

    let first = debouncer.observe(&frame(t0, &[("doorbell", 0.8)]), 0.0);
    assert!(first.is_empty());

    let second = debouncer.observe(&frame(t0 + FRAME, &[("doorbell", 0.8)]), 0.0);
    assert_eq!(created(&second), vec!["doorbell"]);

    let quiet = t0 + FRAME;
    assert!(debouncer.expire(quiet + timeout).is_empty());
    let resolved = debouncer.expire(quiet + timeout + Duration::from_millis(1));
    assert!(matches!(&resolved[..], [DebounceSignal::Resolved(e)] if e.label == "doorbell"));
}

#[test]
fn sustained_sound_creates_one_event() {
    let mut debouncer = EventDebouncer::new(DetectionRules::default());
    let t0 = Instant::now();

    let mut events = 0;
    for i in 0..200 {
        let signals = debouncer.observe(&frame(t0 + FRAME * i, &[("alarm", 0.9)]), 0.0);
        events += created(&signals).len();
        assert!(debouncer.active_events().filter(|e| e.label == "alarm").count() <= 1);
    }

    assert_eq!(events, 1);
}

#[test]
fn isolated_spikes_never_confirm() {
    let mut debouncer = EventDebouncer::new(DetectionRules::default());
    let t0 = Instant::now();

    for i in 0..40u32 {
        let scores: &[(&str, f32)] = if i.is_multiple_of(3) { &[("knock", 0.99)] } else { &[] };
        let signals = debouncer.observe(&frame(t0 + FRAME * i, scores), 0.0);
        assert!(created(&signals).is_empty(), "spike at frame {i} confirmed");
    }
    assert!(!matches!(debouncer.state("knock"), LabelState::Active(_)));
}

#[test]
fn threshold_never_falls_as_ambient_rises() {
    let mut config = Config::with_default_labels();
    if let Some(rule) = config.labels.get_mut("knock") {
        rule.min_confidence = Some(0.4);
    }
    let rules = DetectionRules::from_config(&config);

    for label in ["doorbell", "knock", "unknown"] {
        let mut previous = rules.effective_threshold(label, 0.0);
        for step in 1..=200u16 {
            let ambient = f32::from(step) * 0.01;
            let threshold = rules.effective_threshold(label, ambient);
            assert!(threshold >= previous, "{label}: {threshold} < {previous} at {ambient}");
            assert!(threshold <= 1.0);
            previous = threshold;
        }
    }
}

#[test]
fn alarm_preempts_microwave_after_min_display() {
    let config = Config::with_default_labels();
    let min_display = config.alerts.min_display;
    let mut debouncer = EventDebouncer::new(DetectionRules::from_config(&config));
    let mut arbiter = AlertArbiter::new(ArbiterRules::from_config(&config));
    let t0 = Instant::now();

    debouncer.observe(&frame(t0, &[("microwave_beep", 0.9)]), 0.0);
    let signals = debouncer.observe(&frame(t0 + FRAME, &[("microwave_beep", 0.9)]), 0.0);
    let DebounceSignal::Created(microwave) = &signals[0] else {
        panic!("microwave not confirmed: {signals:?}");
    };
    let (_, actions) = arbiter.on_event_created(microwave, t0 + FRAME);
    assert_eq!(presented(&actions), vec!["microwave_beep"]);

    let later = t0 + FRAME + min_display + Duration::from_millis(200);
    debouncer.observe(&frame(later, &[("alarm", 0.95)]), 0.0);
    let signals = debouncer.observe(&frame(later + FRAME, &[("alarm", 0.95)]), 0.0);
    let alarm = signals
        .iter()
        .find_map(|s| match s {
            DebounceSignal::Created(e) if e.label == "alarm" => Some(e.clone()),
            _ => None,
        })
        .unwrap();

    let (_, actions) = arbiter.on_event_created(&alarm, later + FRAME);
    assert!(matches!(
        &actions[0],
        ArbiterAction::Preempted { intent, .. } if intent.label == "microwave_beep"
    ));
    assert_eq!(presented(&actions), vec!["alarm"]);
    assert_eq!(arbiter.presenting().unwrap().tier, Tier::High);
    assert_eq!(
        arbiter.queued().map(|i| i.label.as_str()).collect::<Vec<_>>(),
        vec!["microwave_beep"]
    );
}

#[test]
fn protected_presentation_finishes_min_display_first() {
    let config = Config::with_default_labels();
    let mut arbiter = AlertArbiter::new(ArbiterRules::from_config(&config));
    let t0 = Instant::now();

    let low = arbiter.intent_for_label("dog_bark", AlertSource::Manual, 0.9, t0);
    assert_eq!(low.tier, Tier::Low);
    assert_eq!(presented(&arbiter.submit(low, t0)), vec!["dog_bark"]);

    let high_at = t0 + Duration::from_millis(100);
    let high = arbiter.intent_for_label("alarm", AlertSource::Manual, 0.9, high_at);
    assert!(presented(&arbiter.submit(high, high_at)).is_empty());

    let actions = arbiter.poll(t0 + config.alerts.min_display);
    assert_eq!(presented(&actions), vec!["alarm"]);
}

#[test]
fn high_tier_is_presented_before_earlier_low_tier() {
    let config = Config::with_default_labels();
    let mut arbiter = AlertArbiter::new(ArbiterRules::from_config(&config));
    let source = AlertSource::Manual;
    let t0 = Instant::now();

    let first = arbiter.intent_for_label("knock", source, 0.9, t0);
    arbiter.submit(first, t0);

    let low = arbiter.intent_for_label("dog_bark", source, 0.9, t0);
    arbiter.submit(low, t0);
    let medium = arbiter.intent_for_label("microwave_beep", source, 0.9, t0);
    arbiter.submit(medium, t0);
    let high = arbiter.intent_for_label("doorbell", source, 0.9, t0);
    arbiter.submit(high, t0);

    let mut order = Vec::new();
    let mut at = t0;
    for _ in 0..4 {
        at += config.alerts.display_high;
        order.extend(
            presented(&arbiter.poll(at))
                .into_iter()
                .map(ToString::to_string),
        );
    }

    assert_eq!(order, vec!["doorbell", "microwave_beep", "dog_bark"]);
}

#[test]
fn concurrent_labels_are_active_together() {
    let mut debouncer = EventDebouncer::new(DetectionRules::default());
    let t0 = Instant::now();

    debouncer.observe(&frame(t0, &[("doorbell", 0.9), ("alarm", 0.8)]), 0.0);
    let signals = debouncer.observe(&frame(t0 + FRAME, &[("alarm", 0.8), ("doorbell", 0.9)]), 0.0);

    let mut labels = created(&signals);
    labels.sort_unstable();
    assert_eq!(labels, vec!["alarm", "doorbell"]);
    assert_eq!(debouncer.active_events().count(), 2);
}
