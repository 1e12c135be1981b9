//! Smart-home lights over MQTT

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::{Channel, ChannelKind};
use crate::alert::{AlertIntent, Tier};
use crate::config::SmartHomeConfig;
use crate::{Error, Result};

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Light command understood by common smart-home bridges
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LightCommand {
    /// Always `ON`
    pub state: &'static str,
    /// Colour name
    pub color: String,
    /// Brightness 0-255
    pub brightness: u8,
    /// Number of flashes
    pub flash: u8,
    /// Transition time in seconds
    pub transition: f32,
}

/// Light command for `intent`: colour from its label, strength from its tier
#[must_use]
pub fn light_command(intent: &AlertIntent) -> LightCommand {
    let (brightness, flash) = match intent.tier {
        Tier::Low => (150, 1),
        Tier::Medium => (200, 2),
        Tier::High => (255, 3),
    };

    LightCommand {
        state: "ON",
        color: intent.color.clone().unwrap_or_else(|| "white".to_string()),
        brightness,
        flash,
        transition: 0.5,
    }
}

#[derive(Serialize)]
struct EventMessage<'a> {
    event: &'a str,
    priority: &'a str,
    timestamp: String,
}

/// Message transport for the smart-home channel
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `payload` on `topic`
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Whether the transport is currently usable
    fn is_connected(&self) -> bool;
}

/// MQTT publisher backed by a rumqttc event loop task
pub struct MqttPublisher {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    event_loop: JoinHandle<()>,
}

impl MqttPublisher {
    /// Connect to the broker in `config`; the event loop runs on `handle`
    ///
    /// # Errors
    ///
    /// Returns error if no broker is configured
    pub fn connect(config: &SmartHomeConfig, handle: &Handle) -> Result<Self> {
        let broker = config
            .broker
            .as_deref()
            .ok_or_else(|| Error::config("channels.smart_home.broker", "not set"))?;

        let client_id = format!("earshot-{}", uuid::Uuid::new_v4().simple());
        let mut options = MqttOptions::new(client_id, broker, config.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let Some(username) = &config.username {
            options.set_credentials(username, config.password.as_deref().unwrap_or_default());
        }

        let (client, mut event_loop) = AsyncClient::new(options, 16);
        let connected = Arc::new(AtomicBool::new(false));
        let flag = connected.clone();
        let broker = format!("{broker}:{}", config.port);

        let event_loop = handle.spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        tracing::info!(%broker, "connected to MQTT broker");
                        flag.store(true, Ordering::Release);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if flag.swap(false, Ordering::AcqRel) {
                            tracing::warn!(%broker, error = %e, "MQTT connection lost");
                        } else {
                            tracing::debug!(%broker, error = %e, "MQTT broker unreachable");
                        }
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        });

        Ok(Self {
            client,
            connected,
            event_loop,
        })
    }
}

impl Drop for MqttPublisher {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::delivery("smart_home", "broker not connected"));
        }
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| Error::delivery("smart_home", e.to_string()))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

/// Publishes alert events and light commands
pub struct SmartHomeChannel {
    publisher: Box<dyn Publisher>,
    light_topic: String,
    topic_prefix: String,
}

impl SmartHomeChannel {
    /// Channel publishing through `publisher` on the topics in `config`
    #[must_use]
    pub fn new(publisher: Box<dyn Publisher>, config: &SmartHomeConfig) -> Self {
        Self {
            publisher,
            light_topic: config.light_topic.clone(),
            topic_prefix: config.topic_prefix.trim_end_matches('/').to_string(),
        }
    }

    fn event_topic(&self, label: &str) -> String {
        format!("{}/events/{label}", self.topic_prefix)
    }
}

#[async_trait]
impl Channel for SmartHomeChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::SmartHome
    }

    async fn deliver(&mut self, intent: &AlertIntent) -> Result<()> {
        let event = serde_json::to_vec(&EventMessage {
            event: &intent.label,
            priority: intent.tier.as_str(),
            timestamp: intent.timestamp.to_rfc3339(),
        })?;
        self.publisher
            .publish(&self.event_topic(&intent.label), event)
            .await?;

        let light = serde_json::to_vec(&light_command(intent))?;
        self.publisher.publish(&self.light_topic, light).await
    }

    async fn probe(&mut self) -> Result<()> {
        if self.publisher.is_connected() {
            Ok(())
        } else {
            Err(Error::delivery("smart_home", "broker not connected"))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::alert::{AlertSource, IntentId};

    #[derive(Clone, Default)]
    struct Broker {
        messages: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
    }

    #[async_trait]
    impl Publisher for Broker {
        async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
            let value = serde_json::from_slice(&payload)?;
            self.messages.lock().unwrap().push((topic.to_string(), value));
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    fn intent(tier: Tier, color: Option<&str>) -> AlertIntent {
        AlertIntent {
            id: IntentId(2),
            source: AlertSource::Manual,
            label: "alarm".into(),
            display_name: "Alarm".into(),
            tier,
            haptic_pattern: "continuous".into(),
            visual_pattern: "flash_urgent".into(),
            color: color.map(Into::into),
            confidence: 0.95,
            text: None,
            created_at: std::time::Instant::now(),
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn light_strength_follows_tier() {
        let high = light_command(&intent(Tier::High, Some("red")));
        assert_eq!((high.brightness, high.flash), (255, 3));
        assert_eq!(high.color, "red");

        let low = light_command(&intent(Tier::Low, None));
        assert_eq!((low.brightness, low.flash), (150, 1));
        assert_eq!(low.color, "white");
    }

    #[tokio::test]
    async fn publishes_event_then_light_command() {
        let broker = Broker::default();
        let config = SmartHomeConfig {
            topic_prefix: "home/".to_string(),
            ..SmartHomeConfig::default()
        };
        let mut channel = SmartHomeChannel::new(Box::new(broker.clone()), &config);

        channel.deliver(&intent(Tier::High, Some("red"))).await.unwrap();

        let messages = broker.messages.lock().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].0, "home/events/alarm");
        assert_eq!(messages[0].1["event"], "alarm");
        assert_eq!(messages[0].1["priority"], "high");
        assert_eq!(messages[1].0, "earshot/lights");
        assert_eq!(messages[1].1["state"], "ON");
        assert_eq!(messages[1].1["brightness"], 255);
    }
}
