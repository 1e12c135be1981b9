//! The pipeline thread

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::watch;

use super::Counters;
use crate::alert::{AlertArbiter, ArbiterAction, ArbiterRules};
use crate::audio::{AudioFrame, FrameQueue, Wait};
use crate::classify::{ClassificationResult, ClassifierAdapter, LabelTable};
use crate::config::Config;
use crate::detect::{DebounceSignal, DetectionRules, EventDebouncer};
use crate::notify::{DispatchSettings, NotificationDispatcher};
use crate::signal::{ConditionedFrame, SignalConditioner};
use crate::speech::SpeechReceiver;

/// Step past the silence timeout when resolving everything at once
const SETTLE_MARGIN: Duration = Duration::from_millis(1);

/// Time as seen by detection and arbitration
///
/// Follows the capture time of the newest processed frame, so a backlog of
/// queued frames never looks like silence. Only when the queue is empty does
/// it advance with the wall clock. Never goes backwards.
#[derive(Debug, Default)]
pub(super) struct CaptureClock {
    newest: Option<(Instant, Instant)>,
    last: Option<Instant>,
}

impl CaptureClock {
    /// A frame captured at `captured_at` was just dequeued
    pub(super) fn observe(&mut self, captured_at: Instant) {
        if self.newest.is_none_or(|(newest, _)| captured_at > newest) {
            self.newest = Some((captured_at, Instant::now()));
        }
    }

    /// Current time; `backlog` holds the clock at the newest frame
    pub(super) fn now(&mut self, backlog: bool) -> Instant {
        let candidate = match self.newest {
            None => Instant::now(),
            Some((newest, _)) if backlog => newest,
            Some((newest, seen)) => newest + seen.elapsed(),
        };
        let now = self.last.map_or(candidate, |last| last.max(candidate));
        self.last = Some(now);
        now
    }
}

pub(super) struct Worker {
    pub(super) config: Arc<Config>,
    pub(super) updates: watch::Receiver<Arc<Config>>,
    pub(super) queue: Arc<FrameQueue>,
    pub(super) conditioner: SignalConditioner,
    pub(super) classifier: ClassifierAdapter,
    pub(super) debouncer: EventDebouncer,
    pub(super) arbiter: AlertArbiter,
    pub(super) speech: Option<SpeechReceiver>,
    pub(super) dispatcher: NotificationDispatcher,
    pub(super) stop: Arc<AtomicBool>,
    pub(super) counters: Arc<Counters>,
    pub(super) clock: CaptureClock,
}

impl Worker {
    /// Process frames until stopped or the input ends; hands the dispatcher
    /// back for shutdown
    pub(super) fn run(mut self) -> NotificationDispatcher {
        let frame_period = self.config.audio.frame_period();

        loop {
            if self.stop.load(Ordering::Acquire) {
                self.stopping();
                break;
            }

            self.reload();

            match self.queue.next_frame(Wait::Timeout(frame_period)) {
                Some(frame) => self.process(frame),
                None if self.queue.is_finished() => {
                    tracing::info!("audio input ended");
                    let now = self.clock.now(false);
                    self.tick(now);
                    self.settle(now);
                    break;
                }
                None => {}
            }

            let now = self.clock.now(!self.queue.is_empty());
            self.tick(now);
        }

        self.dispatcher
    }

    fn stopping(&mut self) {
        if self.config.pipeline.drain_on_stop {
            let pending = self.queue.drain();
            tracing::debug!(frames = pending.len(), "draining queued frames");
            for frame in pending {
                self.process(frame);
            }
            let now = self.clock.now(false);
            self.settle(now);
        } else {
            let discarded = self.queue.clear();
            tracing::debug!(frames = discarded, "discarding queued frames");
        }
    }

    fn process(&mut self, frame: AudioFrame) {
        self.clock.observe(frame.captured_at);
        let frame = self.conditioner.condition(frame);
        Counters::bump(&self.counters.frames_processed);

        let result = if self.gated(&frame) {
            Counters::bump(&self.counters.frames_gated);
            ClassificationResult::empty(frame.captured_at)
        } else {
            self.classifier.classify(&frame)
        };

        if let Some(top) = result.top() {
            tracing::trace!(seq = frame.seq, label = %top.label, confidence = top.confidence, "frame classified");
        }

        let now = self.clock.now(true);
        for signal in self.debouncer.observe(&result, frame.ambient) {
            self.on_signal(signal, now);
        }
    }

    /// Calibration frames and frames under the energy gate are not classified
    fn gated(&self, frame: &ConditionedFrame) -> bool {
        if frame.calibrating {
            return true;
        }

        let detection = &self.config.detection;
        detection.energy_gate && frame.energy < frame.ambient * 5.0f32.mul_add(detection.sensitivity, 1.0)
    }

    fn on_signal(&mut self, signal: DebounceSignal, now: Instant) {
        match signal {
            DebounceSignal::Created(event) => {
                Counters::bump(&self.counters.events_created);
                let (_, actions) = self.arbiter.on_event_created(&event, now);
                self.act(actions);
            }
            DebounceSignal::StillActive { id, label, confidence } => {
                tracing::trace!(event_id = %id, label = %label, confidence, "sound event refreshed");
            }
            DebounceSignal::Resolved(event) => {
                Counters::bump(&self.counters.events_resolved);
                let actions = self.arbiter.on_event_resolved(event.id, now);
                self.act(actions);
            }
        }
    }

    /// Between frames: resolve silent events, advance display timing and pick
    /// up speech
    fn tick(&mut self, now: Instant) {
        for signal in self.debouncer.expire(now) {
            self.on_signal(signal, now);
        }

        let actions = self.arbiter.poll(now);
        self.act(actions);

        let Some(speech) = self.speech.as_mut() else {
            return;
        };
        let mut segments = Vec::new();
        while let Some(segment) = speech.try_next() {
            segments.push(segment);
        }

        for segment in segments {
            if !self.config.speech.enabled {
                tracing::debug!(segment = segment.id, "speech alerts disabled, segment ignored");
                continue;
            }
            let (_, actions) = self.arbiter.on_speech(segment, now);
            self.act(actions);
        }
    }

    /// Resolve every event and play out the alert queue without waiting
    fn settle(&mut self, now: Instant) {
        let timeout = self.debouncer.rules().silence_timeout;
        let alerts = &self.config.alerts;
        let horizon = alerts
            .display_high
            .max(alerts.display_medium)
            .max(alerts.display_low)
            .max(alerts.min_display);

        let mut at = now;
        if let Some(later) = at.checked_add(timeout).and_then(|t| t.checked_add(SETTLE_MARGIN)) {
            at = later;
            for signal in self.debouncer.expire(at) {
                self.on_signal(signal, at);
            }
        }

        let pending = self.arbiter.queued().count() + 1;
        for _ in 0..pending {
            if self.arbiter.presenting().is_none() && self.arbiter.queued().next().is_none() {
                break;
            }
            let Some(later) = at.checked_add(horizon) else {
                break;
            };
            at = later;
            let actions = self.arbiter.poll(at);
            self.act(actions);
        }
    }

    fn act(&mut self, actions: Vec<ArbiterAction>) {
        for action in actions {
            match action {
                ArbiterAction::Present(intent) => {
                    Counters::bump(&self.counters.alerts_presented);
                    let outcomes = self.dispatcher.dispatch(&intent);
                    tracing::debug!(
                        intent = %intent.id,
                        label = %intent.label,
                        outcomes = ?outcomes,
                        "alert dispatched"
                    );
                }
                ArbiterAction::Preempted { intent, by } => {
                    tracing::debug!(intent = %intent.id, by = %by, "presentation interrupted");
                    self.dispatcher.cancel(intent.id);
                }
                ArbiterAction::Dropped { intent, reason } => {
                    Counters::bump(&self.counters.alerts_dropped);
                    tracing::debug!(intent = %intent.id, label = %intent.label, reason = ?reason, "alert dropped");
                }
                ArbiterAction::Completed(intent) => {
                    tracing::trace!(intent = %intent.id, "alert completed");
                }
            }
        }
    }

    /// Apply a newer configuration, if one was published
    fn reload(&mut self) {
        if !self.updates.has_changed().unwrap_or(false) {
            return;
        }
        let config = Arc::clone(&*self.updates.borrow_and_update());

        self.conditioner.update(&config.conditioner);
        self.classifier
            .set_table(LabelTable::from_keywords(&self.classifier.class_names(), &config.labels));
        self.debouncer.update_rules(DetectionRules::from_config(&config));
        self.arbiter.update_rules(ArbiterRules::from_config(&config));
        self.dispatcher
            .apply_settings(&DispatchSettings::from_config(&config.channels));

        if config.audio.frame_size != self.config.audio.frame_size
            || config.audio.sample_rate != self.config.audio.sample_rate
        {
            tracing::warn!("audio format changes take effect after restart");
        }

        self.config = config;
        Counters::bump(&self.counters.reloads);
        tracing::info!(labels = self.config.labels.len(), "configuration reloaded");
    }
}
