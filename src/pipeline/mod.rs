//! End-to-end pipeline: capture, conditioning, classification, debounce,
//! arbitration and dispatch
//!
//! Audio capture and the processing loop each run on a dedicated thread; the
//! processing thread hands alerts to the [`NotificationDispatcher`], whose
//! channel workers run on the tokio runtime. Configuration reloads arrive
//! through a `watch` channel and are applied at frame boundaries.

mod worker;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;

use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::alert::{AlertArbiter, ArbiterRules};
use crate::audio::{AudioSource, DeviceOpener, RetryPolicy};
use crate::classify::{ClassifierAdapter, InferenceEngine, LabelTable};
use crate::config::Config;
use crate::detect::{DetectionRules, EventDebouncer};
use crate::health::{HealthReporter, SystemHealth};
use crate::notify::{Channel, DispatchLog, DispatchSettings, NotificationDispatcher};
use crate::signal::{AmbientReader, SignalConditioner, ambient};
use crate::speech::SpeechReceiver;
use crate::{Error, Result};

use worker::{CaptureClock, Worker};

/// Counters published by the pipeline thread
#[derive(Debug, Default)]
pub(crate) struct Counters {
    frames_processed: AtomicU64,
    frames_gated: AtomicU64,
    events_created: AtomicU64,
    events_resolved: AtomicU64,
    alerts_presented: AtomicU64,
    alerts_dropped: AtomicU64,
    reloads: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of pipeline activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Frames taken off the queue and conditioned
    pub frames_processed: u64,
    /// Frames skipped by calibration or the energy gate
    pub frames_gated: u64,
    /// Frames the capture thread had to discard
    pub frames_dropped: u64,
    /// Sound events confirmed
    pub events_created: u64,
    /// Sound events resolved
    pub events_resolved: u64,
    /// Intents presented and dispatched
    pub alerts_presented: u64,
    /// Intents dropped by the arbiter
    pub alerts_dropped: u64,
    /// Configuration reloads applied
    pub reloads: u64,
}

/// Entry point for assembling a pipeline
pub struct Pipeline;

impl Pipeline {
    /// Start describing a pipeline
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }
}

/// Collects the pipeline's collaborators
#[derive(Default)]
pub struct PipelineBuilder {
    opener: Option<Box<dyn DeviceOpener>>,
    engine: Option<Box<dyn InferenceEngine>>,
    channels: Vec<Box<dyn Channel>>,
    speech: Option<SpeechReceiver>,
    config: Option<watch::Receiver<Arc<Config>>>,
    health: Option<HealthReporter>,
    retry: RetryPolicy,
}

impl PipelineBuilder {
    /// Audio input
    #[must_use]
    pub fn opener(mut self, opener: Box<dyn DeviceOpener>) -> Self {
        self.opener = Some(opener);
        self
    }

    /// Sound classifier
    #[must_use]
    pub fn engine(mut self, engine: Box<dyn InferenceEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Add an output channel
    #[must_use]
    pub fn channel(mut self, channel: Box<dyn Channel>) -> Self {
        self.channels.push(channel);
        self
    }

    /// Recognised speech to alert on
    #[must_use]
    pub fn speech(mut self, speech: SpeechReceiver) -> Self {
        self.speech = Some(speech);
        self
    }

    /// Configuration updates; the current value is used at start
    #[must_use]
    pub fn config_updates(mut self, config: watch::Receiver<Arc<Config>>) -> Self {
        self.config = Some(config);
        self
    }

    /// Fixed configuration
    #[must_use]
    pub fn config(self, config: Config) -> Self {
        let (_tx, rx) = watch::channel(Arc::new(config));
        self.config_updates(rx)
    }

    /// Shared health reporter
    #[must_use]
    pub fn health(mut self, health: HealthReporter) -> Self {
        self.health = Some(health);
        self
    }

    /// Microphone reconnection policy
    #[must_use]
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Spawn the capture and pipeline threads; channel workers run on `handle`
    ///
    /// # Errors
    ///
    /// Returns error if the audio input or classifier is missing, or a thread
    /// cannot be spawned
    pub fn start(self, handle: &Handle) -> Result<PipelineHandle> {
        let opener = self
            .opener
            .ok_or_else(|| Error::Pipeline("no audio input configured".to_string()))?;
        let engine = self
            .engine
            .ok_or_else(|| Error::Pipeline("no classifier configured".to_string()))?;
        let mut updates = self
            .config
            .unwrap_or_else(|| watch::channel(Arc::new(Config::with_default_labels())).1);
        let config = Arc::clone(&*updates.borrow_and_update());
        let health = self.health.unwrap_or_else(|| HealthReporter::channel().0);

        let dispatcher = NotificationDispatcher::start(
            &DispatchSettings::from_config(&config.channels),
            self.channels,
            handle,
            &health,
        );
        let log = dispatcher.log();

        let (ambient_writer, ambient) = ambient::channel(config.conditioner.initial_ambient);
        let conditioner = SignalConditioner::new(&config.conditioner, ambient_writer);

        let table = LabelTable::from_keywords(&engine.class_names(), &config.labels);
        let classifier = ClassifierAdapter::new(engine, table, config.classifier.input_len);

        let source = AudioSource::spawn_with_policy(opener, &config.audio, health.clone(), self.retry)?;
        let stop = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());

        let worker = Worker {
            debouncer: EventDebouncer::new(DetectionRules::from_config(&config)),
            arbiter: AlertArbiter::new(ArbiterRules::from_config(&config)),
            config: Arc::clone(&config),
            updates,
            queue: source.queue(),
            conditioner,
            classifier,
            speech: self.speech,
            dispatcher,
            stop: Arc::clone(&stop),
            counters: Arc::clone(&counters),
            clock: CaptureClock::default(),
        };

        let thread = std::thread::Builder::new()
            .name("earshot-pipeline".to_string())
            .spawn(move || worker.run())?;

        tracing::info!(
            sample_rate = config.audio.sample_rate,
            frame_size = config.audio.frame_size,
            labels = config.labels.len(),
            "pipeline started"
        );

        Ok(PipelineHandle {
            source: Some(source),
            thread: Some(thread),
            stop,
            counters,
            health,
            log,
            ambient,
        })
    }
}

/// Control handle for a running pipeline
///
/// Dropping the handle stops both threads without waiting for deliveries.
pub struct PipelineHandle {
    source: Option<AudioSource>,
    thread: Option<JoinHandle<NotificationDispatcher>>,
    stop: Arc<AtomicBool>,
    counters: Arc<Counters>,
    health: HealthReporter,
    log: DispatchLog,
    ambient: AmbientReader,
}

impl PipelineHandle {
    /// Watch system health
    #[must_use]
    pub fn health(&self) -> watch::Receiver<SystemHealth> {
        self.health.subscribe()
    }

    /// Dispatch attempt log
    #[must_use]
    pub fn log(&self) -> DispatchLog {
        self.log.clone()
    }

    /// Current ambient noise estimate
    #[must_use]
    pub fn ambient(&self) -> f32 {
        self.ambient.get()
    }

    /// Frames discarded because processing fell behind
    #[must_use]
    pub fn frames_dropped(&self) -> u64 {
        self.source.as_ref().map_or(0, AudioSource::frames_dropped)
    }

    /// Activity counters
    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let c = &self.counters;
        PipelineStats {
            frames_processed: load(&c.frames_processed),
            frames_gated: load(&c.frames_gated),
            frames_dropped: self.frames_dropped(),
            events_created: load(&c.events_created),
            events_resolved: load(&c.events_resolved),
            alerts_presented: load(&c.alerts_presented),
            alerts_dropped: load(&c.alerts_dropped),
            reloads: load(&c.reloads),
        }
    }

    /// Whether the pipeline thread has exited
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Stop capture, finish queued frames per `pipeline.drain_on_stop` and
    /// give in-flight deliveries the shutdown grace period
    ///
    /// # Errors
    ///
    /// Returns error if a pipeline thread panicked
    pub async fn shutdown(mut self) -> Result<PipelineStats> {
        tracing::info!("stopping pipeline");
        if let Some(source) = &self.source {
            source.stop();
        }
        self.stop.store(true, Ordering::Release);
        self.finish().await
    }

    /// Wait for a finite input to run out, then shut down
    ///
    /// # Errors
    ///
    /// Returns error if a pipeline thread panicked
    pub async fn wait(mut self) -> Result<PipelineStats> {
        self.finish().await
    }

    async fn finish(&mut self) -> Result<PipelineStats> {
        let thread = self
            .thread
            .take()
            .ok_or_else(|| Error::Pipeline("pipeline already stopped".to_string()))?;

        let dispatcher = tokio::task::spawn_blocking(move || thread.join())
            .await
            .map_err(|e| Error::Pipeline(format!("join failed: {e}")))?
            .map_err(|_| Error::Pipeline("pipeline thread panicked".to_string()))?;

        let stats = self.stats();

        if let Some(source) = self.source.take() {
            source.stop();
            tokio::task::spawn_blocking(move || source.join())
                .await
                .map_err(|e| Error::Pipeline(format!("join failed: {e}")))?;
        }

        dispatcher.shutdown().await;

        tracing::info!(
            frames = stats.frames_processed,
            dropped = stats.frames_dropped,
            events = stats.events_created,
            alerts = stats.alerts_presented,
            "pipeline stopped"
        );
        Ok(stats)
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop.store(true, Ordering::Release);
        }
        if let Some(source) = &self.source {
            source.stop();
        }
    }
}
