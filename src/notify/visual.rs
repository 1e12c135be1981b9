//! Screen and indicator-light channel

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{Channel, ChannelKind};
use crate::Result;
use crate::alert::AlertIntent;

/// One step of a light pattern
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisualStep {
    /// How long the step lasts
    pub duration: Duration,
    /// Brightness in [0, 1]
    pub brightness: f32,
}

const fn step(ms: u64, brightness: f32) -> VisualStep {
    VisualStep {
        duration: Duration::from_millis(ms),
        brightness,
    }
}

/// Light steps for a named pattern
///
/// Unknown names fall back to `flash_medium`.
#[must_use]
pub fn visual_pattern(name: &str) -> Vec<VisualStep> {
    match name {
        "flash_low" => vec![step(500, 0.3), step(500, 0.0)],
        "flash_bright" => vec![step(500, 1.0), step(500, 0.0)],
        "flash_urgent" => vec![
            step(200, 1.0),
            step(200, 0.0),
            step(200, 1.0),
            step(200, 0.0),
            step(200, 1.0),
        ],
        "constant" => vec![step(2000, 1.0)],
        "gentle_pulse" => vec![step(500, 0.3), step(500, 0.1), step(500, 0.3), step(500, 0.0)],
        _ => vec![step(500, 0.6), step(500, 0.0)],
    }
}

/// What the surface should show for one alert
#[derive(Debug, Clone, PartialEq)]
pub struct VisualCue {
    /// Pattern name as configured
    pub pattern: String,
    /// Light colour
    pub color: String,
    /// Peak brightness of the pattern
    pub intensity: f32,
    /// Text to display
    pub text: String,
    /// Resolved pattern steps
    pub steps: Vec<VisualStep>,
}

impl VisualCue {
    /// Cue for `intent`; speech shows its transcript, sounds their name
    #[must_use]
    pub fn for_intent(intent: &AlertIntent) -> Self {
        let steps = visual_pattern(&intent.visual_pattern);
        let intensity = steps.iter().map(|s| s.brightness).fold(0.0, f32::max);

        Self {
            pattern: intent.visual_pattern.clone(),
            color: intent.color.clone().unwrap_or_else(|| "white".to_string()),
            intensity,
            text: intent.message().to_string(),
            steps,
        }
    }
}

/// Something that can show visual cues
///
/// Shared between the visual channel and the degradation indicator.
pub trait VisualSurface: Send + Sync {
    /// Show a cue
    ///
    /// # Errors
    ///
    /// Returns error if the surface cannot display it
    fn render(&self, cue: &VisualCue) -> Result<()>;

    /// Show or clear the persistent degradation indicator
    fn set_degraded(&self, reason: Option<&str>);
}

/// Surface that writes cues to the log, for headless operation
#[derive(Debug, Default)]
pub struct TracingSurface {
    degraded: Mutex<Option<String>>,
}

impl TracingSurface {
    /// Create a new surface
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reason currently shown by the degradation indicator
    #[must_use]
    pub fn degraded(&self) -> Option<String> {
        self.degraded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl VisualSurface for TracingSurface {
    fn render(&self, cue: &VisualCue) -> Result<()> {
        tracing::info!(
            pattern = %cue.pattern,
            color = %cue.color,
            intensity = cue.intensity,
            "[ALERT] {}",
            cue.text
        );
        Ok(())
    }

    fn set_degraded(&self, reason: Option<&str>) {
        let mut current = self.degraded.lock().unwrap_or_else(PoisonError::into_inner);
        if current.as_deref() == reason {
            return;
        }

        match reason {
            Some(reason) => tracing::warn!(reason, "degradation indicator on"),
            None => tracing::info!("degradation indicator off"),
        }
        *current = reason.map(ToString::to_string);
    }
}

/// Shows alerts on a [`VisualSurface`]
pub struct VisualChannel {
    surface: Arc<dyn VisualSurface>,
}

impl VisualChannel {
    /// Channel rendering to `surface`
    #[must_use]
    pub fn new(surface: Arc<dyn VisualSurface>) -> Self {
        Self { surface }
    }
}

#[async_trait]
impl Channel for VisualChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Visual
    }

    async fn deliver(&mut self, intent: &AlertIntent) -> Result<()> {
        self.surface.render(&VisualCue::for_intent(intent))
    }
}
