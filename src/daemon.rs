//! Daemon - the main earshot service
//!
//! Builds the real collaborators (microphone, classifier, output channels),
//! runs the pipeline, reloads configuration on `SIGHUP` and mirrors system
//! health onto the visual degradation indicator.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::alert::{AlertArbiter, AlertSource, ArbiterAction, ArbiterRules};
use crate::audio::{CpalOpener, DeviceOpener, WavOpener};
use crate::classify::HeuristicEngine;
use crate::health::{HealthReporter, SystemHealth};
use crate::notify::{
    Channel, DispatchRecord, DispatchSettings, HapticChannel, MqttPublisher, NotificationDispatcher,
    SmartHomeChannel, TcpHapticLink, TracingSurface, VisualChannel, VisualSurface,
};
use crate::pipeline::{Pipeline, PipelineHandle, PipelineStats};
use crate::speech::SpeechReceiver;
use crate::{Config, Result};

/// How often a finite input is checked for completion
const FINISH_POLL: Duration = Duration::from_millis(100);

/// The earshot daemon
pub struct Daemon {
    config: Config,
    config_path: Option<PathBuf>,
    speech: Option<SpeechReceiver>,
    surface: Arc<TracingSurface>,
}

impl Daemon {
    /// Create a daemon
    ///
    /// `config_path` is re-read on reload; without it the standard location
    /// is used.
    #[must_use]
    pub fn new(config: Config, config_path: Option<PathBuf>) -> Self {
        Self {
            config,
            config_path,
            speech: None,
            surface: Arc::new(TracingSurface::new()),
        }
    }

    /// Raise alerts for speech from an external recogniser
    #[must_use]
    pub fn with_speech(mut self, speech: SpeechReceiver) -> Self {
        self.speech = Some(speech);
        self
    }

    /// Listen to the microphone until interrupted or `timeout` elapses
    ///
    /// # Errors
    ///
    /// Returns error if the pipeline cannot start or a thread panics
    pub async fn run(self, timeout: Option<Duration>) -> Result<PipelineStats> {
        tracing::info!(
            device = self.config.audio.device.as_deref().unwrap_or("default"),
            sample_rate = self.config.audio.sample_rate,
            "daemon running"
        );

        let opener = Box::new(CpalOpener::new(&self.config.audio));
        self.supervise(opener, timeout).await
    }

    /// Run the whole pipeline on a WAV file instead of the microphone
    ///
    /// Returns once the file is processed and queued alerts are delivered.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be decoded or does not match the
    /// configured sample rate
    pub async fn simulate(self, wav: &Path, realtime: bool) -> Result<PipelineStats> {
        let opener = WavOpener::new(wav, self.config.audio.sample_rate, realtime)?;
        tracing::info!(file = %wav.display(), samples = opener.samples().len(), realtime, "simulating");
        self.supervise(Box::new(opener), None).await
    }

    /// Push a synthetic alert for `label` through arbitration and dispatch
    ///
    /// Returns the dispatch attempts made for it.
    pub async fn test_alert(&self, label: &str) -> Vec<DispatchRecord> {
        let handle = Handle::current();
        let (health, _rx) = HealthReporter::channel();
        let channels = build_channels(&self.config, &handle, self.surface.clone());

        let dispatcher = NotificationDispatcher::start(
            &DispatchSettings::from_config(&self.config.channels),
            channels,
            &handle,
            &health,
        );
        let log = dispatcher.log();

        let mut arbiter = AlertArbiter::new(ArbiterRules::from_config(&self.config));
        let now = Instant::now();
        let intent = arbiter.intent_for_label(label, AlertSource::Manual, 1.0, now);
        tracing::info!(label, tier = %intent.tier, "sending test alert");

        for action in arbiter.submit(intent.clone(), now) {
            if let ArbiterAction::Present(intent) = action {
                dispatcher.dispatch(&intent);
            }
        }

        dispatcher.shutdown().await;
        log.for_intent(intent.id)
    }

    async fn supervise(self, opener: Box<dyn DeviceOpener>, timeout: Option<Duration>) -> Result<PipelineStats> {
        let handle = Handle::current();
        let (health, health_rx) = HealthReporter::channel();
        let (config_tx, config_rx) = watch::channel(Arc::new(self.config.clone()));

        let input_len = self
            .config
            .classifier
            .input_len
            .unwrap_or(self.config.audio.frame_size);
        let mut builder = Pipeline::builder()
            .opener(opener)
            .engine(Box::new(HeuristicEngine::new(input_len)))
            .config_updates(config_rx)
            .health(health);
        for channel in build_channels(&self.config, &handle, self.surface.clone()) {
            builder = builder.channel(channel);
        }
        if let Some(speech) = self.speech {
            builder = builder.speech(speech);
        }
        let pipeline = builder.start(&handle)?;

        let indicator = tokio::spawn(mirror_health(health_rx, self.surface.clone()));

        let stats = wait_for_exit(pipeline, timeout, || reload(self.config_path.as_deref(), &config_tx)).await;

        indicator.abort();
        stats
    }
}

/// Wait for a signal, the timeout or the end of input, then stop the pipeline
async fn wait_for_exit(
    pipeline: PipelineHandle,
    timeout: Option<Duration>,
    mut on_hangup: impl FnMut(),
) -> Result<PipelineStats> {
    let mut terminate = SignalListener::terminate()?;
    let mut hangup = SignalListener::hangup()?;
    let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
    let mut finished = tokio::time::interval(FINISH_POLL);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
            () = terminate.recv() => {
                tracing::info!("terminated");
                break;
            }
            () = hangup.recv() => on_hangup(),
            () = sleep_until(deadline) => {
                tracing::info!("timeout reached");
                break;
            }
            _ = finished.tick() => {
                if pipeline.is_finished() {
                    return pipeline.wait().await;
                }
            }
        }
    }

    pipeline.shutdown().await
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Re-read the configuration file and publish it if valid
fn reload(path: Option<&Path>, tx: &watch::Sender<Arc<Config>>) {
    tracing::info!("reloading configuration");
    match Config::load(path) {
        Ok(config) => {
            tx.send_replace(Arc::new(config));
        }
        Err(e) => {
            tracing::warn!(error = %e, "invalid configuration, keeping previous");
        }
    }
}

/// Show the degradation indicator whenever health requires it
async fn mirror_health(mut rx: watch::Receiver<SystemHealth>, surface: Arc<TracingSurface>) {
    loop {
        let reason = rx.borrow_and_update().degradation_reason();
        surface.set_degraded(reason.as_deref());
        if rx.changed().await.is_err() {
            break;
        }
    }
}

/// Output channels for `config`
///
/// The smart-home channel exists only when a broker is configured.
fn build_channels(config: &Config, handle: &Handle, surface: Arc<dyn VisualSurface>) -> Vec<Box<dyn Channel>> {
    let channels_config = &config.channels;

    let link = TcpHapticLink::new(channels_config.haptic.address.clone(), channels_config.ack_timeout);
    let mut channels: Vec<Box<dyn Channel>> = vec![
        Box::new(HapticChannel::new(Box::new(link))),
        Box::new(VisualChannel::new(surface)),
    ];

    if channels_config.smart_home.broker.is_some() {
        match MqttPublisher::connect(&channels_config.smart_home, handle) {
            Ok(publisher) => channels.push(Box::new(SmartHomeChannel::new(
                Box::new(publisher),
                &channels_config.smart_home,
            ))),
            Err(e) => tracing::warn!(error = %e, "smart-home channel unavailable"),
        }
    }

    channels
}

/// A process signal other than Ctrl-C that can be awaited repeatedly
struct SignalListener {
    #[cfg(unix)]
    signal: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl SignalListener {
    fn terminate() -> Result<Self> {
        Self::listen(tokio::signal::unix::SignalKind::terminate())
    }

    fn hangup() -> Result<Self> {
        Self::listen(tokio::signal::unix::SignalKind::hangup())
    }

    fn listen(kind: tokio::signal::unix::SignalKind) -> Result<Self> {
        Ok(Self {
            signal: tokio::signal::unix::signal(kind)?,
        })
    }

    async fn recv(&mut self) {
        if self.signal.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
impl SignalListener {
    #[allow(clippy::unnecessary_wraps)]
    const fn terminate() -> Result<Self> {
        Ok(Self {})
    }

    #[allow(clippy::unnecessary_wraps)]
    const fn hangup() -> Result<Self> {
        Ok(Self {})
    }

    async fn recv(&mut self) {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{AttemptOutcome, ChannelKind};

    #[tokio::test]
    async fn test_alert_reaches_every_channel() {
        let mut config = Config::with_default_labels();
        config.channels.haptic.address = "127.0.0.1:1".to_string();
        config.channels.shutdown_grace = Duration::from_secs(5);
        let daemon = Daemon::new(config, None);

        let records = daemon.test_alert("doorbell").await;

        let visual = records
            .iter()
            .find(|r| r.channel == ChannelKind::Visual)
            .unwrap();
        assert_eq!(visual.outcome, AttemptOutcome::Delivered);

        let haptic = records
            .iter()
            .find(|r| r.channel == ChannelKind::Haptic)
            .unwrap();
        assert!(matches!(haptic.outcome, AttemptOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn indicator_follows_health() {
        let (reporter, rx) = HealthReporter::channel();
        let surface = Arc::new(TracingSurface::new());
        let task = tokio::spawn(mirror_health(rx, surface.clone()));

        reporter.set_audio(crate::health::AudioStatus::NoAudio {
            attempts: 1,
            reason: "unplugged".to_string(),
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(surface.degraded().unwrap().contains("unplugged"));

        reporter.set_audio(crate::health::AudioStatus::Ok);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(surface.degraded(), None);

        task.abort();
    }
}
