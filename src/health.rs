//! System health shared between the capture thread, channel workers and the
//! degradation indicator

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::watch;

use crate::notify::{Availability, ChannelKind};

/// State of audio input
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AudioStatus {
    /// Capture not opened yet
    #[default]
    Starting,
    /// Frames are flowing
    Ok,
    /// Microphone unavailable; reconnecting with backoff
    NoAudio {
        /// Failed attempts since audio was last available
        attempts: u32,
        /// Last failure
        reason: String,
    },
    /// A finite source reached its end
    Ended,
}

/// Aggregate health snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemHealth {
    /// Audio input state
    pub audio: AudioStatus,
    /// Availability of each registered channel
    pub channels: BTreeMap<ChannelKind, Availability>,
}

impl SystemHealth {
    /// Whether the persistent degradation indicator must be shown
    #[must_use]
    pub fn needs_indicator(&self) -> bool {
        self.degradation_reason().is_some()
    }

    /// Why the persistent degradation indicator must be shown, if it must
    ///
    /// Audio loss or every enabled channel being degraded both qualify.
    #[must_use]
    pub fn degradation_reason(&self) -> Option<String> {
        if let AudioStatus::NoAudio { reason, .. } = &self.audio {
            return Some(format!("no audio input: {reason}"));
        }

        let mut enabled = self
            .channels
            .values()
            .filter(|a| **a != Availability::Disabled)
            .peekable();
        if enabled.peek().is_some() && enabled.all(|a| *a == Availability::Degraded) {
            return Some("all alert channels unavailable".to_string());
        }

        None
    }
}

/// Cloneable writer for [`SystemHealth`]
#[derive(Debug, Clone)]
pub struct HealthReporter {
    tx: Arc<watch::Sender<SystemHealth>>,
}

impl HealthReporter {
    /// Create a reporter and a receiver for health snapshots
    #[must_use]
    pub fn channel() -> (Self, watch::Receiver<SystemHealth>) {
        let (tx, rx) = watch::channel(SystemHealth::default());
        (Self { tx: Arc::new(tx) }, rx)
    }

    /// Record the audio input state
    pub fn set_audio(&self, status: AudioStatus) {
        self.tx.send_if_modified(|health| {
            if health.audio == status {
                false
            } else {
                health.audio = status;
                true
            }
        });
    }

    /// Record a channel's availability
    pub fn set_channel(&self, kind: ChannelKind, availability: Availability) {
        self.tx.send_if_modified(|health| {
            health.channels.insert(kind, availability) != Some(availability)
        });
    }

    /// Another receiver for health snapshots
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SystemHealth> {
        self.tx.subscribe()
    }

    /// Current snapshot
    #[must_use]
    pub fn snapshot(&self) -> SystemHealth {
        self.tx.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_system_needs_no_indicator() {
        let (reporter, _rx) = HealthReporter::channel();
        reporter.set_audio(AudioStatus::Ok);
        reporter.set_channel(ChannelKind::Haptic, Availability::Enabled);
        reporter.set_channel(ChannelKind::Visual, Availability::Degraded);
        assert_eq!(reporter.snapshot().degradation_reason(), None);
        assert!(!reporter.snapshot().needs_indicator());
    }

    #[test]
    fn audio_loss_raises_indicator() {
        let (reporter, rx) = HealthReporter::channel();
        reporter.set_audio(AudioStatus::NoAudio {
            attempts: 2,
            reason: "device unplugged".to_string(),
        });
        let reason = rx.borrow().degradation_reason().unwrap();
        assert!(reason.contains("device unplugged"));
    }

    #[test]
    fn all_enabled_channels_degraded_raises_indicator() {
        let (reporter, _rx) = HealthReporter::channel();
        reporter.set_audio(AudioStatus::Ok);
        reporter.set_channel(ChannelKind::Haptic, Availability::Degraded);
        reporter.set_channel(ChannelKind::Visual, Availability::Degraded);
        reporter.set_channel(ChannelKind::SmartHome, Availability::Disabled);
        assert_eq!(
            reporter.snapshot().degradation_reason().as_deref(),
            Some("all alert channels unavailable")
        );
    }

    #[test]
    fn no_channels_is_not_a_channel_failure() {
        let (reporter, _rx) = HealthReporter::channel();
        reporter.set_audio(AudioStatus::Ok);
        assert_eq!(reporter.snapshot().degradation_reason(), None);
    }
}
