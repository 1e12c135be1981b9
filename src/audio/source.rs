//! Capture thread driving a [`CaptureDevice`] into the frame queue

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::{Framer, FrameQueue, MediaClock, RetryPolicy, delay_for_attempt};
use crate::Result;
use crate::config::AudioConfig;
use crate::health::{AudioStatus, HealthReporter};

/// Granularity of interruptible sleeps on the capture thread
const STOP_POLL: Duration = Duration::from_millis(50);

/// A blocking source of mono i16 samples
///
/// Implementations live on the capture thread only, so they need not be
/// `Send` (cpal streams are not).
pub trait CaptureDevice {
    /// Read up to `buf.len()` samples, waiting at most `timeout`
    ///
    /// Returns the number of samples written; 0 means nothing arrived yet.
    ///
    /// # Errors
    ///
    /// Returns error if the device failed and must be reopened
    fn read(&mut self, buf: &mut [i16], timeout: Duration) -> Result<usize>;

    /// Whether a finite source has been fully read
    fn is_finished(&self) -> bool {
        false
    }

    /// Whether the source produces samples faster than real time
    ///
    /// Such a source waits for the consumer when the frame queue is full
    /// instead of losing frames, and its frames are stamped by sample
    /// position.
    fn waits_for_consumer(&self) -> bool {
        false
    }
}

/// Opens capture devices on the capture thread
pub trait DeviceOpener: Send {
    /// Open (or reopen) the device
    ///
    /// # Errors
    ///
    /// Returns error if the device is unavailable
    fn open(&mut self) -> Result<Box<dyn CaptureDevice>>;

    /// Human-readable device description for logs
    fn describe(&self) -> String;
}

/// Handle to the running capture thread
///
/// Dropping the handle stops the thread and waits for it.
pub struct AudioSource {
    queue: Arc<FrameQueue>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl AudioSource {
    /// Start capturing on a dedicated thread
    ///
    /// # Errors
    ///
    /// Returns error if the thread cannot be spawned
    pub fn spawn(
        opener: Box<dyn DeviceOpener>,
        config: &AudioConfig,
        health: HealthReporter,
    ) -> Result<Self> {
        Self::spawn_with_policy(opener, config, health, RetryPolicy::default())
    }

    /// Start capturing with a custom reconnection policy
    ///
    /// # Errors
    ///
    /// Returns error if the thread cannot be spawned
    pub fn spawn_with_policy(
        opener: Box<dyn DeviceOpener>,
        config: &AudioConfig,
        health: HealthReporter,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let queue = Arc::new(FrameQueue::new(config.queue_capacity));
        let stop = Arc::new(AtomicBool::new(false));

        let worker = CaptureLoop {
            opener,
            queue: Arc::clone(&queue),
            stop: Arc::clone(&stop),
            health,
            policy,
            frame_size: config.frame_size,
            sample_rate: config.sample_rate,
            read_timeout: config.frame_period(),
        };

        let thread = std::thread::Builder::new()
            .name("earshot-capture".to_string())
            .spawn(move || worker.run())?;

        Ok(Self {
            queue,
            stop,
            thread: Some(thread),
        })
    }

    /// Queue the capture thread feeds
    #[must_use]
    pub fn queue(&self) -> Arc<FrameQueue> {
        Arc::clone(&self.queue)
    }

    /// Frames produced by the device so far
    #[must_use]
    pub fn frames_captured(&self) -> u64 {
        self.queue.frames_pushed()
    }

    /// Frames discarded because the consumer fell behind
    #[must_use]
    pub fn frames_dropped(&self) -> u64 {
        self.queue.frames_dropped()
    }

    /// Ask the capture thread to exit
    ///
    /// Observed within one frame period.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Whether the capture thread has exited
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Stop the capture thread and wait for it
    pub fn join(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::error!("capture thread panicked");
        }
    }
}

impl Drop for AudioSource {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct CaptureLoop {
    opener: Box<dyn DeviceOpener>,
    queue: Arc<FrameQueue>,
    stop: Arc<AtomicBool>,
    health: HealthReporter,
    policy: RetryPolicy,
    frame_size: usize,
    sample_rate: u32,
    read_timeout: Duration,
}

impl CaptureLoop {
    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn run(mut self) {
        let mut framer = Framer::new(self.frame_size, 0);
        let mut buf = vec![0i16; self.frame_size];
        let mut attempts: u32 = 0;

        tracing::debug!(device = %self.opener.describe(), "capture thread started");

        while !self.stopped() {
            match self.opener.open() {
                Ok(mut device) => {
                    if attempts > 0 {
                        tracing::info!(attempts, "audio input recovered");
                    }
                    attempts = 0;
                    self.health.set_audio(AudioStatus::Ok);

                    // partial frames from a previous connection are discarded
                    framer = Framer::new(self.frame_size, framer.next_seq());
                    if device.waits_for_consumer() {
                        framer = framer.with_clock(MediaClock::new(Instant::now(), self.sample_rate));
                    }

                    match self.pump(device.as_mut(), &mut framer, &mut buf) {
                        Pump::Stopped => break,
                        Pump::Ended => {
                            tracing::info!("audio source ended");
                            self.health.set_audio(AudioStatus::Ended);
                            break;
                        }
                        Pump::Failed(reason) => {
                            attempts = 1;
                            tracing::warn!(error = %reason, "audio capture failed, reconnecting");
                            self.health.set_audio(AudioStatus::NoAudio { attempts, reason });
                        }
                    }
                }
                Err(e) => {
                    attempts = attempts.saturating_add(1);
                    tracing::warn!(attempts, error = %e, "audio input unavailable");
                    self.health.set_audio(AudioStatus::NoAudio {
                        attempts,
                        reason: e.to_string(),
                    });
                }
            }

            let delay = delay_for_attempt(&self.policy, attempts.saturating_sub(1));
            tracing::debug!(delay = ?delay, "waiting before reopening audio input");
            self.sleep(delay);
        }

        self.queue.close();
        tracing::debug!(
            captured = self.queue.frames_pushed(),
            dropped = self.queue.frames_dropped(),
            "capture thread stopped"
        );
    }

    fn pump(&self, device: &mut dyn CaptureDevice, framer: &mut Framer, buf: &mut [i16]) -> Pump {
        let wait = device.waits_for_consumer();

        loop {
            if self.stopped() {
                return Pump::Stopped;
            }

            match device.read(buf, self.read_timeout) {
                Ok(0) => {
                    if device.is_finished() {
                        return Pump::Ended;
                    }
                }
                Ok(n) => {
                    for frame in framer.push(&buf[..n]) {
                        if wait {
                            self.queue.push_waiting(frame, &self.stop);
                        } else {
                            self.queue.push(frame);
                        }
                    }
                }
                Err(e) => return Pump::Failed(e.to_string()),
            }
        }
    }

    fn sleep(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.stopped() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep((deadline - now).min(STOP_POLL));
        }
    }
}

enum Pump {
    Stopped,
    Ended,
    Failed(String),
}
