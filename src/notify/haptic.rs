//! Wearable vibration channel

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::{Channel, ChannelKind};
use crate::alert::AlertIntent;
use crate::{Error, Result};

/// One step of a vibration pattern; zero intensity is a pause
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HapticPulse {
    /// How long the step lasts
    pub duration: Duration,
    /// Motor intensity in [0, 1]
    pub intensity: f32,
}

const fn pulse(ms: u64, intensity: f32) -> HapticPulse {
    HapticPulse {
        duration: Duration::from_millis(ms),
        intensity,
    }
}

/// Vibration steps for a named pattern
///
/// Unknown names fall back to `short_double`.
#[must_use]
pub fn haptic_pattern(name: &str) -> Vec<HapticPulse> {
    match name {
        "short_single" => vec![pulse(200, 1.0)],
        "short_triple" => vec![
            pulse(200, 1.0),
            pulse(100, 0.0),
            pulse(200, 1.0),
            pulse(100, 0.0),
            pulse(200, 1.0),
        ],
        "long_single" => vec![pulse(800, 1.0)],
        "long_double" => vec![pulse(800, 1.0), pulse(200, 0.0), pulse(800, 1.0)],
        "continuous" => vec![pulse(3000, 1.0)],
        "escalating" => vec![
            pulse(200, 0.3),
            pulse(100, 0.0),
            pulse(200, 0.6),
            pulse(100, 0.0),
            pulse(300, 1.0),
        ],
        _ => vec![pulse(200, 1.0), pulse(100, 0.0), pulse(200, 1.0)],
    }
}

/// Connection to the wearable
#[async_trait]
pub trait HapticLink: Send {
    /// Send one command and wait for the device's acknowledgement
    async fn send(&mut self, command: &Value) -> Result<()>;

    /// Check that the device answers
    async fn ping(&mut self) -> Result<()> {
        self.send(&json!({ "cmd": "ping" })).await
    }
}

/// JSON-lines link over TCP
///
/// Every command is one line; the device answers each with an `ok` line. The
/// connection is opened lazily and reopened after any error.
pub struct TcpHapticLink {
    address: String,
    ack_timeout: Duration,
    stream: Option<BufReader<TcpStream>>,
}

impl TcpHapticLink {
    /// Link to the device at `address` (`host:port`)
    #[must_use]
    pub fn new(address: impl Into<String>, ack_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            ack_timeout,
            stream: None,
        }
    }

    async fn connect(&self) -> Result<BufReader<TcpStream>> {
        let stream = tokio::time::timeout(self.ack_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| Error::Timeout(format!("connecting to {}", self.address)))??;
        stream.set_nodelay(true)?;
        tracing::info!(address = %self.address, "connected to wearable");
        Ok(BufReader::new(stream))
    }
}

async fn exchange(stream: &mut BufReader<TcpStream>, line: &str, ack_timeout: Duration) -> Result<()> {
    stream.get_mut().write_all(line.as_bytes()).await?;
    stream.get_mut().write_all(b"\n").await?;
    stream.get_mut().flush().await?;

    let mut ack = String::new();
    let read = tokio::time::timeout(ack_timeout, stream.read_line(&mut ack))
        .await
        .map_err(|_| Error::Timeout("wearable acknowledgement".to_string()))??;

    if read == 0 {
        return Err(Error::delivery("haptic", "wearable closed the connection"));
    }
    if ack.trim() != "ok" {
        return Err(Error::delivery(
            "haptic",
            format!("unexpected acknowledgement `{}`", ack.trim()),
        ));
    }
    Ok(())
}

#[async_trait]
impl HapticLink for TcpHapticLink {
    async fn send(&mut self, command: &Value) -> Result<()> {
        let line = serde_json::to_string(command)?;

        // Held outside `self` while the exchange runs, so a cancelled send
        // never leaves an unread acknowledgement on a kept connection.
        let mut stream = match self.stream.take() {
            Some(stream) => stream,
            None => self.connect().await?,
        };

        let result = exchange(&mut stream, &line, self.ack_timeout).await;
        if result.is_ok() {
            self.stream = Some(stream);
        } else {
            tracing::debug!(address = %self.address, "dropping wearable connection");
        }
        result
    }
}

/// Plays vibration patterns on the wearable
pub struct HapticChannel {
    link: Box<dyn HapticLink>,
}

impl HapticChannel {
    /// Channel driving `link`
    #[must_use]
    pub fn new(link: Box<dyn HapticLink>) -> Self {
        Self { link }
    }
}

#[async_trait]
impl Channel for HapticChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Haptic
    }

    async fn deliver(&mut self, intent: &AlertIntent) -> Result<()> {
        let pattern = haptic_pattern(&intent.haptic_pattern);
        tracing::debug!(pattern = %intent.haptic_pattern, steps = pattern.len(), "playing haptic pattern");

        for step in pattern {
            if step.intensity > 0.0 {
                let duration_ms = u64::try_from(step.duration.as_millis()).unwrap_or(u64::MAX);
                self.link
                    .send(&json!({
                        "cmd": "vibrate",
                        "params": { "intensity": step.intensity, "duration_ms": duration_ms },
                    }))
                    .await?;
            }
            tokio::time::sleep(step.duration).await;
        }

        Ok(())
    }

    async fn probe(&mut self) -> Result<()> {
        self.link.ping().await
    }

    fn delivery_budget(&self, intent: &AlertIntent, ack_timeout: Duration) -> Duration {
        let pattern = haptic_pattern(&intent.haptic_pattern);
        let pulses = pattern.iter().filter(|p| p.intensity > 0.0).count();
        let playing: Duration = pattern.iter().map(|p| p.duration).sum();
        ack_timeout.saturating_mul(u32::try_from(pulses).unwrap_or(u32::MAX)) + playing
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tokio::net::TcpListener;

    use super::*;

    #[derive(Clone, Default)]
    struct Recorder {
        sent: Arc<Mutex<Vec<Value>>>,
    }

    #[async_trait]
    impl HapticLink for Recorder {
        async fn send(&mut self, command: &Value) -> Result<()> {
            self.sent.lock().unwrap().push(command.clone());
            Ok(())
        }
    }

    fn intent(pattern: &str) -> AlertIntent {
        AlertIntent {
            id: crate::alert::IntentId(1),
            source: crate::alert::AlertSource::Manual,
            label: "doorbell".into(),
            display_name: "Doorbell".into(),
            tier: crate::alert::Tier::High,
            haptic_pattern: pattern.into(),
            visual_pattern: "flash_bright".into(),
            color: None,
            confidence: 1.0,
            text: None,
            created_at: std::time::Instant::now(),
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn unknown_pattern_falls_back_to_short_double() {
        assert_eq!(haptic_pattern("wobble"), haptic_pattern("short_double"));
        assert_eq!(haptic_pattern("short_double").len(), 3);
    }

    #[tokio::test]
    async fn pulses_become_vibrate_commands() {
        let recorder = Recorder::default();
        let mut channel = HapticChannel::new(Box::new(recorder.clone()));

        channel.deliver(&intent("short_double")).await.unwrap();

        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0]["cmd"], "vibrate");
        assert_eq!(sent[0]["params"]["duration_ms"], 200);
    }

    #[tokio::test]
    async fn dropped_delivery_stops_between_pulses() {
        let recorder = Recorder::default();
        let mut channel = HapticChannel::new(Box::new(recorder.clone()));

        let cut = tokio::time::timeout(Duration::from_millis(100), channel.deliver(&intent("long_double"))).await;
        assert!(cut.is_err());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(recorder.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn budget_covers_pattern_and_acks() {
        let channel = HapticChannel::new(Box::new(Recorder::default()));
        let budget = channel.delivery_budget(&intent("long_double"), Duration::from_secs(1));
        assert_eq!(budget, Duration::from_millis(2000 + 1800));
    }

    #[tokio::test]
    async fn tcp_link_waits_for_ok() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let device = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut socket = BufReader::new(socket);
            let mut line = String::new();
            socket.read_line(&mut line).await.unwrap();
            socket.get_mut().write_all(b"ok\n").await.unwrap();
            line
        });

        let mut link = TcpHapticLink::new(address, Duration::from_secs(2));
        link.send(&json!({ "cmd": "ping" })).await.unwrap();

        let line = device.await.unwrap();
        assert_eq!(line.trim(), r#"{"cmd":"ping"}"#);
    }

    #[tokio::test]
    async fn tcp_link_rejects_bad_ack() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut socket = BufReader::new(socket);
            let mut line = String::new();
            socket.read_line(&mut line).await.unwrap();
            socket.get_mut().write_all(b"busy\n").await.unwrap();
        });

        let mut link = TcpHapticLink::new(address, Duration::from_secs(2));
        let err = link.send(&json!({ "cmd": "ping" })).await.unwrap_err();
        assert!(err.to_string().contains("busy"));
    }
}
