//! Alert delivery to output channels
//!
//! Each channel implements [`Channel`] and is driven by its own worker task
//! inside the [`NotificationDispatcher`], so a slow or failing channel never
//! holds up the others or the pipeline thread.

mod dispatcher;
mod haptic;
mod log;
mod smart_home;
mod state;
mod visual;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

pub use dispatcher::{ChannelOutcome, DispatchSettings, NotificationDispatcher};
pub use haptic::{HapticChannel, HapticLink, HapticPulse, TcpHapticLink, haptic_pattern};
pub use log::{AttemptOutcome, DispatchLog, DispatchRecord, SkipReason};
pub use smart_home::{LightCommand, MqttPublisher, Publisher, SmartHomeChannel, light_command};
pub use state::{Availability, ChannelState};
pub use visual::{TracingSurface, VisualChannel, VisualCue, VisualStep, VisualSurface, visual_pattern};

use crate::Result;
use crate::alert::AlertIntent;

/// Output channel type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Wearable vibration
    Haptic,
    /// Screen and indicator light
    Visual,
    /// Smart-home lights over MQTT
    SmartHome,
}

impl ChannelKind {
    /// Every channel kind
    pub const ALL: [Self; 3] = [Self::Haptic, Self::Visual, Self::SmartHome];

    /// Lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Haptic => "haptic",
            Self::Visual => "visual",
            Self::SmartHome => "smart_home",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An alert output
///
/// Owned by a single worker task; calls never overlap.
#[async_trait]
pub trait Channel: Send {
    /// Which channel this is
    fn kind(&self) -> ChannelKind;

    /// Deliver an alert, returning once the device acknowledged it
    async fn deliver(&mut self, intent: &AlertIntent) -> Result<()>;

    /// Check whether a degraded channel can be used again
    ///
    /// Default implementation reports healthy
    async fn probe(&mut self) -> Result<()> {
        Ok(())
    }

    /// Time allowed for delivering `intent`
    ///
    /// Default implementation allows one acknowledgement timeout
    fn delivery_budget(&self, _intent: &AlertIntent, ack_timeout: Duration) -> Duration {
        ack_timeout
    }
}
