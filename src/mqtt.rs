use std::time::Duration;

use log::{debug, error, info, warn};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::watch;

use crate::config::MqttConfig;
use crate::messages::Reading;

/// How many times a drain cycle waits for the broker session to come back
/// before giving up until the next cycle.
pub const SESSION_ATTEMPTS: u32 = 5;
pub const SESSION_RETRY_PAUSE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct MqttClient {
    client: AsyncClient,
    topic: String,
    session_up: watch::Receiver<bool>,
}

/// Drives the rumqttc event loop and reports session state back to the
/// publisher. Spawned once at startup.
pub struct SessionTask {
    eventloop: EventLoop,
    session_up: watch::Sender<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    Failed(String),
}

impl MqttClient {
    pub fn new(config: &MqttConfig) -> (Self, SessionTask) {
        let publisher_id = config
            .publisher_id
            .clone()
            .unwrap_or_else(|| "rapt-gateway".to_string());

        let mut mqttoptions = MqttOptions::new(
            publisher_id,
            config.host.clone(),
            config.port.unwrap_or(1883),
        );
        mqttoptions.set_keep_alive(Duration::from_secs(config.keep_alive_seconds.unwrap_or(5)));

        if let (Some(username), Some(password)) =
            (config.username.as_ref(), config.password.as_ref())
        {
            mqttoptions.set_credentials(username.clone(), password.clone());
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 10);
        let (tx, rx) = watch::channel(false);

        (
            MqttClient {
                client,
                topic: config
                    .topic
                    .clone()
                    .unwrap_or_else(|| "rapt/readings".to_string()),
                session_up: rx,
            },
            SessionTask {
                eventloop,
                session_up: tx,
            },
        )
    }

    pub fn session_up(&self) -> bool {
        *self.session_up.borrow()
    }

    /// Bounded wait for the broker session before a drain cycle: up to
    /// [`SESSION_ATTEMPTS`] waits of [`SESSION_RETRY_PAUSE`] each. Returns
    /// false when the session is still down; the caller keeps scanning and
    /// readings are dropped until the next cycle.
    pub async fn ensure_session(&self) -> bool {
        if self.session_up() {
            return true;
        }
        for attempt in 1..=SESSION_ATTEMPTS {
            warn!("MQTT session down, waiting (attempt {attempt}/{SESSION_ATTEMPTS})");
            tokio::time::sleep(SESSION_RETRY_PAUSE).await;
            if self.session_up() {
                info!("MQTT session re-established");
                return true;
            }
        }
        warn!("MQTT session still down after {SESSION_ATTEMPTS} attempts, continuing degraded");
        false
    }

    /// Single publish attempt; the reading is dropped on failure. With the
    /// session down nothing is enqueued, and `try_publish` keeps a full
    /// request queue from ever stalling the control loop.
    pub fn publish_reading(&self, name: &str, reading: &Reading) -> PublishOutcome {
        if !self.session_up() {
            return PublishOutcome::Failed("broker session down".to_string());
        }
        let payload = match reading_message(name, reading) {
            Ok(payload) => payload,
            Err(err) => return PublishOutcome::Failed(format!("serialize: {err}")),
        };
        match self
            .client
            .try_publish(self.topic.as_str(), QoS::AtMostOnce, false, payload)
        {
            Ok(()) => PublishOutcome::Published,
            Err(err) => PublishOutcome::Failed(err.to_string()),
        }
    }
}

impl SessionTask {
    pub async fn run(mut self) {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("MQTT session established");
                    self.session_up.send_replace(true);
                }
                Ok(_) => {}
                Err(err) => {
                    if self.session_up.send_replace(false) {
                        error!("MQTT connection lost: {err}");
                    } else {
                        debug!("MQTT connect attempt failed: {err}");
                    }
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}

/// Wire message: `{"device": <name>, <name>: {..fields..}}`, one per reading.
fn reading_message(name: &str, reading: &Reading) -> serde_json::Result<String> {
    let mut doc = serde_json::Map::new();
    doc.insert("device".to_string(), serde_json::Value::from(name));
    doc.insert(name.to_string(), serde_json::to_value(reading)?);
    serde_json::to_string(&serde_json::Value::Object(doc))
}
