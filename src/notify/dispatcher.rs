//! Fan-out of alert intents to per-channel workers

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{AttemptOutcome, Availability, Channel, ChannelKind, ChannelState, DispatchLog, SkipReason};
use crate::alert::{AlertIntent, IntentId};
use crate::config::ChannelsConfig;
use crate::health::HealthReporter;

/// Immediate result of handing an intent to one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOutcome {
    /// Accepted by the channel's worker
    Queued,
    /// Channel is degraded; fast no-op
    Skipped,
    /// Channel is disabled by configuration
    Disabled,
    /// Channel's worker queue is full
    Overloaded,
}

/// Dispatcher tuning
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Consecutive failures before a channel is degraded
    pub failure_threshold: u32,
    /// Time a channel gets to acknowledge a delivery
    pub ack_timeout: Duration,
    /// Interval between probes of a degraded channel
    pub probe_interval: Duration,
    /// Pending deliveries per channel
    pub queue_capacity: usize,
    /// Time in-flight deliveries get on shutdown
    pub shutdown_grace: Duration,
    /// Dispatch attempts kept in the log
    pub log_capacity: usize,
    /// Configured enable flag per channel
    pub enabled: BTreeMap<ChannelKind, bool>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from_config(&ChannelsConfig::default())
    }
}

impl DispatchSettings {
    /// Extract dispatcher settings from `config`
    #[must_use]
    pub fn from_config(config: &ChannelsConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            ack_timeout: config.ack_timeout,
            probe_interval: config.probe_interval,
            queue_capacity: config.queue_capacity.max(1),
            shutdown_grace: config.shutdown_grace,
            log_capacity: config.log_capacity,
            enabled: enabled_flags(config),
        }
    }

    /// Whether `kind` is enabled; channels without a flag are enabled
    #[must_use]
    pub fn is_enabled(&self, kind: ChannelKind) -> bool {
        self.enabled.get(&kind).copied().unwrap_or(true)
    }
}

/// Configured enable flag of every channel kind
#[must_use]
fn enabled_flags(config: &ChannelsConfig) -> BTreeMap<ChannelKind, bool> {
    BTreeMap::from([
        (ChannelKind::Haptic, config.haptic.enabled),
        (ChannelKind::Visual, config.visual_enabled),
        (ChannelKind::SmartHome, config.smart_home.enabled),
    ])
}

enum Control {
    SetEnabled(bool),
    ProbeResult(bool),
}

struct Worker {
    deliveries: mpsc::Sender<AlertIntent>,
    control: mpsc::UnboundedSender<Control>,
    cancel: watch::Sender<Option<IntentId>>,
    state: watch::Receiver<ChannelState>,
    task: JoinHandle<()>,
}

impl Worker {
    fn send(&self, kind: ChannelKind, control: Control) {
        if self.control.send(control).is_err() {
            tracing::debug!(channel = %kind, "channel worker stopped, control message dropped");
        }
    }
}

/// Routes alert intents to channel workers
///
/// [`dispatch`](Self::dispatch) never blocks: it is called from the pipeline
/// thread and only enqueues.
pub struct NotificationDispatcher {
    workers: BTreeMap<ChannelKind, Worker>,
    log: DispatchLog,
    shutdown_grace: Duration,
}

impl NotificationDispatcher {
    /// Spawn one worker per channel on `handle`
    #[must_use]
    pub fn start(
        settings: &DispatchSettings,
        channels: Vec<Box<dyn Channel>>,
        handle: &Handle,
        health: &HealthReporter,
    ) -> Self {
        let log = DispatchLog::new(settings.log_capacity);
        let mut workers = BTreeMap::new();

        for channel in channels {
            let kind = channel.kind();
            let state = ChannelState::new(settings.is_enabled(kind));
            health.set_channel(kind, state.availability);

            let (delivery_tx, delivery_rx) = mpsc::channel(settings.queue_capacity);
            let (control_tx, control_rx) = mpsc::unbounded_channel();
            let (state_tx, state_rx) = watch::channel(state.clone());
            let (cancel_tx, cancel_rx) = watch::channel(None);

            let task = handle.spawn(
                ChannelWorker {
                    kind,
                    channel,
                    state,
                    state_tx,
                    deliveries: delivery_rx,
                    control: control_rx,
                    cancel: cancel_rx,
                    log: log.clone(),
                    health: health.clone(),
                    failure_threshold: settings.failure_threshold,
                    ack_timeout: settings.ack_timeout,
                    probe_interval: settings.probe_interval,
                }
                .run(),
            );

            let worker = Worker {
                deliveries: delivery_tx,
                control: control_tx,
                cancel: cancel_tx,
                state: state_rx,
                task,
            };

            if let Some(replaced) = workers.insert(kind, worker) {
                tracing::warn!(channel = %kind, "duplicate channel registered, replacing");
                replaced.task.abort();
            }
        }

        tracing::info!(channels = workers.len(), "notification dispatcher started");

        Self {
            workers,
            log,
            shutdown_grace: settings.shutdown_grace,
        }
    }

    /// Hand `intent` to every channel
    pub fn dispatch(&self, intent: &AlertIntent) -> Vec<(ChannelKind, ChannelOutcome)> {
        self.workers
            .iter()
            .map(|(&kind, worker)| {
                worker
                    .cancel
                    .send_if_modified(|c| c.take_if(|id| *id == intent.id).is_some());
                let availability = worker.state.borrow().availability;
                let outcome = match availability {
                    Availability::Disabled => {
                        self.skip(intent, kind, SkipReason::Disabled);
                        ChannelOutcome::Disabled
                    }
                    Availability::Degraded => {
                        self.skip(intent, kind, SkipReason::Degraded);
                        ChannelOutcome::Skipped
                    }
                    Availability::Enabled => match worker.deliveries.try_send(intent.clone()) {
                        Ok(()) => ChannelOutcome::Queued,
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            tracing::warn!(channel = %kind, intent = %intent.id, "channel overloaded, alert skipped");
                            self.skip(intent, kind, SkipReason::Overloaded);
                            ChannelOutcome::Overloaded
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            self.log.record(
                                intent.id,
                                &intent.label,
                                kind,
                                AttemptOutcome::Failed("channel worker stopped".to_string()),
                            );
                            ChannelOutcome::Disabled
                        }
                    },
                };
                (kind, outcome)
            })
            .collect()
    }

    fn skip(&self, intent: &AlertIntent, kind: ChannelKind, reason: SkipReason) {
        tracing::debug!(channel = %kind, intent = %intent.id, reason = ?reason, "delivery skipped");
        self.log
            .record(intent.id, &intent.label, kind, AttemptOutcome::Skipped(reason));
    }

    /// Report the result of an external health probe
    ///
    /// A healthy probe returns a degraded channel to service.
    pub fn report_probe(&self, kind: ChannelKind, healthy: bool) {
        if let Some(worker) = self.workers.get(&kind) {
            worker.send(kind, Control::ProbeResult(healthy));
        }
    }

    /// Enable or disable a channel
    pub fn set_enabled(&self, kind: ChannelKind, enabled: bool) {
        if let Some(worker) = self.workers.get(&kind) {
            worker.send(kind, Control::SetEnabled(enabled));
        }
    }

    /// Cut short every channel's delivery of `intent`
    ///
    /// A delivery in flight stops at its next await point; one still queued
    /// is recorded as cancelled without being attempted. Dispatching the same
    /// intent again clears the cancellation.
    pub fn cancel(&self, intent: IntentId) {
        for worker in self.workers.values() {
            worker.cancel.send_replace(Some(intent));
        }
    }

    /// Apply configured enable flags to every registered channel
    pub fn apply_settings(&self, settings: &DispatchSettings) {
        for &kind in self.workers.keys() {
            self.set_enabled(kind, settings.is_enabled(kind));
        }
    }

    /// Latest state of a channel
    #[must_use]
    pub fn channel_state(&self, kind: ChannelKind) -> Option<ChannelState> {
        self.workers.get(&kind).map(|w| w.state.borrow().clone())
    }

    /// Watch a channel's state
    #[must_use]
    pub fn subscribe(&self, kind: ChannelKind) -> Option<watch::Receiver<ChannelState>> {
        self.workers.get(&kind).map(|w| w.state.clone())
    }

    /// Registered channels
    pub fn channels(&self) -> impl Iterator<Item = ChannelKind> + '_ {
        self.workers.keys().copied()
    }

    /// Dispatch attempt log
    #[must_use]
    pub fn log(&self) -> DispatchLog {
        self.log.clone()
    }

    /// Stop accepting intents and let workers finish
    ///
    /// Queued and in-flight deliveries get the shutdown grace period; workers
    /// still busy after it are aborted.
    pub async fn shutdown(self) {
        let grace = self.shutdown_grace;
        let mut tasks = Vec::with_capacity(self.workers.len());

        for (kind, worker) in self.workers {
            drop(worker.deliveries);
            drop(worker.control);
            tasks.push((kind, worker.task));
        }

        let deadline = tokio::time::Instant::now() + grace;
        futures::future::join_all(tasks.into_iter().map(|(kind, mut task)| async move {
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                tracing::warn!(channel = %kind, "channel did not finish within grace period, aborting");
                task.abort();
            }
        }))
        .await;

        tracing::info!("notification dispatcher stopped");
    }
}

struct ChannelWorker {
    kind: ChannelKind,
    channel: Box<dyn Channel>,
    state: ChannelState,
    state_tx: watch::Sender<ChannelState>,
    deliveries: mpsc::Receiver<AlertIntent>,
    control: mpsc::UnboundedReceiver<Control>,
    cancel: watch::Receiver<Option<IntentId>>,
    log: DispatchLog,
    health: HealthReporter,
    failure_threshold: u32,
    ack_timeout: Duration,
    probe_interval: Duration,
}

impl ChannelWorker {
    async fn run(mut self) {
        let mut probe = tokio::time::interval_at(
            tokio::time::Instant::now() + self.probe_interval,
            self.probe_interval,
        );
        probe.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!(channel = %self.kind, "channel worker started");

        loop {
            let degraded = self.state.availability == Availability::Degraded;

            tokio::select! {
                biased;

                Some(control) = self.control.recv() => self.apply(control),

                intent = self.deliveries.recv() => match intent {
                    Some(intent) => self.deliver(&intent).await,
                    None => break,
                },

                _ = probe.tick(), if degraded => self.probe().await,
            }
        }

        tracing::debug!(channel = %self.kind, "channel worker stopped");
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.state.clone());
        self.health.set_channel(self.kind, self.state.availability);
    }

    fn apply(&mut self, control: Control) {
        match control {
            Control::SetEnabled(enabled) => {
                let before = self.state.availability;
                self.state.set_enabled(enabled);
                if self.state.availability != before {
                    tracing::info!(
                        channel = %self.kind,
                        availability = self.state.availability.as_str(),
                        "channel availability changed by configuration"
                    );
                }
            }
            Control::ProbeResult(healthy) => {
                if healthy && self.state.recover() {
                    tracing::info!(channel = %self.kind, "channel re-enabled by probe");
                }
            }
        }
        self.publish();
    }

    async fn deliver(&mut self, intent: &AlertIntent) {
        match self.state.availability {
            Availability::Disabled => {
                self.record(intent, AttemptOutcome::Skipped(SkipReason::Disabled));
                return;
            }
            Availability::Degraded => {
                self.record(intent, AttemptOutcome::Skipped(SkipReason::Degraded));
                return;
            }
            Availability::Enabled => {}
        }

        let budget = self.channel.delivery_budget(intent, self.ack_timeout);
        let result = tokio::select! {
            biased;

            () = cancelled(&mut self.cancel, intent.id) => {
                tracing::info!(channel = %self.kind, intent = %intent.id, label = %intent.label, "alert delivery cancelled");
                self.record(intent, AttemptOutcome::Cancelled);
                return;
            }

            outcome = tokio::time::timeout(budget, self.channel.deliver(intent)) => match outcome {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("no acknowledgement within {budget:?}")),
            },
        };

        match result {
            Ok(()) => {
                self.state.record_success(Utc::now());
                tracing::info!(channel = %self.kind, intent = %intent.id, label = %intent.label, "alert delivered");
                self.record(intent, AttemptOutcome::Delivered);
            }
            Err(reason) => {
                let degraded = self.state.record_failure(self.failure_threshold);
                tracing::warn!(
                    channel = %self.kind,
                    intent = %intent.id,
                    failures = self.state.consecutive_failures,
                    error = %reason,
                    "alert delivery failed"
                );
                self.record(intent, AttemptOutcome::Failed(reason));
                if degraded {
                    tracing::error!(
                        channel = %self.kind,
                        failures = self.state.consecutive_failures,
                        "channel degraded"
                    );
                }
            }
        }

        self.publish();
    }

    async fn probe(&mut self) {
        let healthy = matches!(
            tokio::time::timeout(self.ack_timeout, self.channel.probe()).await,
            Ok(Ok(()))
        );

        if healthy && self.state.recover() {
            tracing::info!(channel = %self.kind, "channel recovered");
            self.publish();
        } else {
            tracing::debug!(channel = %self.kind, "channel still unavailable");
        }
    }

    fn record(&self, intent: &AlertIntent, outcome: AttemptOutcome) {
        self.log.record(intent.id, &intent.label, self.kind, outcome);
    }
}

/// Resolves once `intent` is cancelled; never if the dispatcher is gone
async fn cancelled(cancel: &mut watch::Receiver<Option<IntentId>>, intent: IntentId) {
    if cancel.wait_for(|c| *c == Some(intent)).await.is_err() {
        std::future::pending::<()>().await;
    }
}
