//! Per-channel availability

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Whether a channel receives alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    /// Delivering normally
    Enabled,
    /// Turned off by configuration
    Disabled,
    /// Failed repeatedly; skipped until a probe succeeds
    Degraded,
}

impl Availability {
    /// Lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::Degraded => "degraded",
        }
    }
}

/// Health of one output channel
///
/// Owned and mutated by the channel's worker; everyone else reads snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelState {
    /// Current availability
    pub availability: Availability,
    /// Time of the last successful delivery
    pub last_success: Option<DateTime<Utc>>,
    /// Failures since the last success
    pub consecutive_failures: u32,
}

impl ChannelState {
    /// State of a freshly started channel
    #[must_use]
    pub const fn new(enabled: bool) -> Self {
        Self {
            availability: if enabled {
                Availability::Enabled
            } else {
                Availability::Disabled
            },
            last_success: None,
            consecutive_failures: 0,
        }
    }

    /// Record a delivery that succeeded
    pub fn record_success(&mut self, at: DateTime<Utc>) {
        self.last_success = Some(at);
        self.consecutive_failures = 0;
    }

    /// Record a delivery that failed
    ///
    /// Returns `true` if this failure degraded the channel.
    pub fn record_failure(&mut self, threshold: u32) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.availability == Availability::Enabled && self.consecutive_failures >= threshold {
            self.availability = Availability::Degraded;
            return true;
        }
        false
    }

    /// Return a degraded channel to service
    ///
    /// Returns `true` if the channel was degraded.
    pub fn recover(&mut self) -> bool {
        if self.availability == Availability::Degraded {
            self.availability = Availability::Enabled;
            self.consecutive_failures = 0;
            return true;
        }
        false
    }

    /// Apply the configured enable flag
    ///
    /// A degraded channel stays degraded while enabled.
    pub fn set_enabled(&mut self, enabled: bool) {
        match (enabled, self.availability) {
            (false, _) => self.availability = Availability::Disabled,
            (true, Availability::Disabled) => {
                self.availability = Availability::Enabled;
                self.consecutive_failures = 0;
            }
            (true, Availability::Enabled | Availability::Degraded) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degrades_at_threshold() {
        let mut state = ChannelState::new(true);
        assert!(!state.record_failure(3));
        assert!(!state.record_failure(3));
        assert!(state.record_failure(3));
        assert_eq!(state.availability, Availability::Degraded);
        assert!(!state.record_failure(3));
    }

    #[test]
    fn success_resets_failures() {
        let mut state = ChannelState::new(true);
        state.record_failure(3);
        state.record_failure(3);
        state.record_success(Utc::now());
        assert_eq!(state.consecutive_failures, 0);
        assert!(!state.record_failure(3));
    }

    #[test]
    fn recovery_only_from_degraded() {
        let mut state = ChannelState::new(false);
        assert!(!state.recover());
        assert_eq!(state.availability, Availability::Disabled);

        state.set_enabled(true);
        for _ in 0..3 {
            state.record_failure(3);
        }
        assert!(state.recover());
        assert_eq!(state.availability, Availability::Enabled);
    }

    #[test]
    fn disabled_channel_never_degrades() {
        let mut state = ChannelState::new(false);
        for _ in 0..10 {
            assert!(!state.record_failure(3));
        }
        assert_eq!(state.availability, Availability::Disabled);
    }
}
