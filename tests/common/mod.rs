//! Shared test utilities
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use earshot::alert::{AlertIntent, AlertSource, IntentId, Tier};
use earshot::audio::{CaptureDevice, DeviceOpener};
use earshot::classify::InferenceEngine;
use earshot::config::Config;
use earshot::notify::{Channel, ChannelKind};
use earshot::{Error, Result};

/// Configuration for pipeline tests: tiny frames, a roomy queue, no
/// calibration and fast channel timing
#[must_use]
pub fn test_config() -> Config {
    let mut config = Config::with_default_labels();
    config.audio.frame_size = 4;
    config.audio.queue_capacity = 256;
    config.classifier.input_len = Some(4);
    config.channels.ack_timeout = Duration::from_millis(200);
    config.channels.probe_interval = Duration::from_millis(50);
    config.channels.shutdown_grace = Duration::from_secs(2);
    config
}

/// Intent with the given label and tier
#[must_use]
pub fn intent(id: u64, label: &str, tier: Tier) -> AlertIntent {
    AlertIntent {
        id: IntentId(id),
        source: AlertSource::Manual,
        label: label.to_string(),
        display_name: label.to_string(),
        tier,
        haptic_pattern: "short_single".to_string(),
        visual_pattern: "flash_low".to_string(),
        color: None,
        confidence: 0.9,
        text: None,
        created_at: Instant::now(),
        timestamp: chrono::Utc::now(),
    }
}

/// Inference engine replaying scripted outputs, one per frame
pub struct ScriptedEngine {
    classes: Vec<String>,
    script: VecDeque<Vec<(usize, f32)>>,
    repeat: Option<Vec<(usize, f32)>>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedEngine {
    /// Engine with `classes` answering `script` in order, then nothing
    #[must_use]
    pub fn new(classes: &[&str], script: Vec<Vec<(usize, f32)>>) -> Self {
        Self {
            classes: classes.iter().map(ToString::to_string).collect(),
            script: script.into(),
            repeat: None,
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Engine answering `output` for every frame
    #[must_use]
    pub fn always(classes: &[&str], output: Vec<(usize, f32)>) -> Self {
        Self {
            repeat: Some(output),
            ..Self::new(classes, Vec::new())
        }
    }

    /// Spend `delay` on every inference
    #[must_use]
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Counter of inference calls
    #[must_use]
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl InferenceEngine for ScriptedEngine {
    fn input_len(&self) -> usize {
        4
    }

    fn class_names(&self) -> Vec<String> {
        self.classes.clone()
    }

    fn infer(&mut self, _samples: &[f32]) -> Result<Vec<(usize, f32)>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        Ok(self
            .script
            .pop_front()
            .or_else(|| self.repeat.clone())
            .unwrap_or_default())
    }
}

/// Capture device yielding a fixed number of constant-level frames
pub struct ScriptedDevice {
    remaining: usize,
    level: i16,
    pace: Option<Duration>,
}

impl CaptureDevice for ScriptedDevice {
    fn read(&mut self, buf: &mut [i16], _timeout: Duration) -> Result<usize> {
        if let Some(pace) = self.pace {
            std::thread::sleep(pace);
        }
        let n = buf.len().min(self.remaining);
        buf[..n].fill(self.level);
        self.remaining -= n;
        Ok(n)
    }

    fn is_finished(&self) -> bool {
        self.remaining == 0
    }
}

/// Opens one [`ScriptedDevice`]; later opens fail
pub struct ScriptedOpener {
    device: Option<ScriptedDevice>,
}

impl ScriptedOpener {
    /// `frames` frames of `frame_size` samples at `level`
    #[must_use]
    pub fn frames(frames: usize, frame_size: usize, level: i16) -> Self {
        Self {
            device: Some(ScriptedDevice {
                remaining: frames * frame_size,
                level,
                pace: None,
            }),
        }
    }

    /// Sleep `pace` before every read
    #[must_use]
    pub fn paced(mut self, pace: Duration) -> Self {
        if let Some(device) = self.device.as_mut() {
            device.pace = Some(pace);
        }
        self
    }

    /// Endless input of silence, read at `pace`
    #[must_use]
    pub fn endless(pace: Duration) -> Self {
        Self {
            device: Some(ScriptedDevice {
                remaining: usize::MAX,
                level: 0,
                pace: Some(pace),
            }),
        }
    }
}

impl DeviceOpener for ScriptedOpener {
    fn open(&mut self) -> Result<Box<dyn CaptureDevice>> {
        self.device
            .take()
            .map(|d| Box::new(d) as Box<dyn CaptureDevice>)
            .ok_or_else(|| Error::Capture("device gone".to_string()))
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

/// Channel recording every intent it delivers
#[derive(Clone)]
pub struct RecordingChannel {
    kind: ChannelKind,
    delivered: Arc<Mutex<Vec<AlertIntent>>>,
    delay: Duration,
}

impl RecordingChannel {
    /// Recording channel posing as `kind`
    #[must_use]
    pub fn new(kind: ChannelKind) -> Self {
        Self {
            kind,
            delivered: Arc::new(Mutex::new(Vec::new())),
            delay: Duration::ZERO,
        }
    }

    /// Take `delay` for every delivery
    #[must_use]
    pub fn slow(kind: ChannelKind, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new(kind)
        }
    }

    /// Labels delivered so far, in order
    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .map(|i| i.label.clone())
            .collect()
    }

    /// Intents delivered so far, in order
    #[must_use]
    pub fn delivered(&self) -> Vec<AlertIntent> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn deliver(&mut self, intent: &AlertIntent) -> Result<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.delivered.lock().unwrap().push(intent.clone());
        Ok(())
    }
}

/// Channel that fails until healed; probes succeed once healed
#[derive(Clone)]
pub struct FlakyChannel {
    kind: ChannelKind,
    healthy: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
}

impl FlakyChannel {
    /// Failing channel posing as `kind`
    #[must_use]
    pub fn new(kind: ChannelKind) -> Self {
        Self {
            kind,
            healthy: Arc::new(AtomicBool::new(false)),
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make deliveries and probes succeed
    pub fn heal(&self) {
        self.healthy.store(true, Ordering::SeqCst);
    }

    /// Delivery attempts so far
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Channel for FlakyChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn deliver(&mut self, _intent: &AlertIntent) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::delivery("flaky", "device unreachable"))
        }
    }

    async fn probe(&mut self) -> Result<()> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::delivery("flaky", "still unreachable"))
        }
    }
}
