use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info};
use rumqttc::{MqttOptions, QoS};
use serde_derive::Serialize;
use tokio::sync::broadcast;

use crate::config;
use crate::messages::{PresenceEvent, ScanRequest};
use crate::notify::{Indicator, Notifier};

#[derive(Debug, Clone)]
pub struct MqttClient {
    client: rumqttc::AsyncClient,
    publisher_id: String,
    topic_path: String,
    device: String,
}

#[derive(Debug, Serialize)]
struct PresenceMqttMessage<'a> {
    device: &'a str,
    previous: Option<&'a str>,
    location: Option<&'a str>,
    message: String,
    retained: bool,
}

impl<'a> PresenceMqttMessage<'a> {
    fn from_event(event: &'a PresenceEvent) -> Self {
        PresenceMqttMessage {
            device: &event.device,
            previous: event.previous.label(),
            location: event.current.label(),
            message: event.message(),
            retained: false,
        }
    }
}

impl MqttClient {
    pub fn new(config: &config::MqttConfig, device: &str) -> (Self, rumqttc::EventLoop) {
        let publisher_id = config
            .publisher_id
            .clone()
            .unwrap_or_else(|| "locator-rs".to_string());

        let mut mqttoptions = MqttOptions::new(
            publisher_id.clone(),
            config.host.clone(),
            config.port.unwrap_or(1883),
        );

        mqttoptions.set_keep_alive(Duration::from_secs(config.keep_alive_seconds.unwrap_or(5)));

        if let (Some(username), Some(password)) =
            (config.username.as_ref(), config.password.as_ref())
        {
            mqttoptions.set_credentials(username.clone(), password.clone());
        }

        let (client, eventloop) = rumqttc::AsyncClient::new(mqttoptions, 10);

        (
            MqttClient {
                client,
                publisher_id,
                topic_path: config
                    .topic_path
                    .clone()
                    .unwrap_or_else(|| "locator".to_string()),
                device: device.to_string(),
            },
            eventloop,
        )
    }

    fn scan_topic(&self) -> String {
        format!("{}/scan", self.topic_path)
    }

    fn device_topic(&self) -> String {
        format!(
            "{}/{}/{}",
            self.topic_path,
            self.publisher_id,
            sanitize_name(&self.device)
        )
    }

    pub async fn subscribe(&self) -> Result<(), rumqttc::ClientError> {
        self.client
            .subscribe(self.scan_topic(), QoS::AtMostOnce)
            .await
    }

    /// Drives the connection. Publishes on the scan topic become scan requests.
    pub async fn event_loop(
        &self,
        eventloop: &mut rumqttc::EventLoop,
        tx: broadcast::Sender<ScanRequest>,
    ) {
        loop {
            match eventloop.poll().await {
                Ok(notification) => match notification {
                    rumqttc::Event::Incoming(rumqttc::Packet::Publish(p)) => {
                        debug!("Received MQTT message on topic {}: {:?}", p.topic, p.payload);

                        if p.topic == self.scan_topic() {
                            if let Err(err) = tx.send(ScanRequest) {
                                error!("Error announcing scan request: {:?}", err);
                            }
                        }
                    }
                    rumqttc::Event::Incoming(rumqttc::Packet::SubAck(_)) => {
                        debug!("Subscription acknowledged");
                    }
                    rumqttc::Event::Incoming(rumqttc::Packet::ConnAck(_)) => {
                        debug!("Connection acknowledged");
                        if let Err(err) = self.subscribe().await {
                            error!("Error subscribing to MQTT topics: {:?}", err);
                        }
                    }
                    _ => {}
                },
                Err(e) => {
                    error!("Error polling MQTT event loop: {:?}", e);
                    // rumqttc reconnects on the next poll
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    pub async fn disconnect(&self) -> Result<(), rumqttc::ClientError> {
        debug!("Disconnecting MQTT client");
        self.client.disconnect().await
    }
}

#[async_trait]
impl Notifier for MqttClient {
    async fn notify(&self, event: &PresenceEvent) -> anyhow::Result<()> {
        info!("Announcing {} ({}) on MQTT", event.device, event.message());
        let payload = serde_json::to_string(&PresenceMqttMessage::from_event(event))?;
        self.client
            .publish(self.device_topic(), QoS::AtMostOnce, false, payload)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Indicator for MqttClient {
    async fn set_away(&self, away: bool) -> anyhow::Result<()> {
        self.client
            .publish(
                format!("{}/away", self.device_topic()),
                QoS::AtLeastOnce,
                true,
                away.to_string(),
            )
            .await?;
        Ok(())
    }
}

fn sanitize_name(name: &str) -> String {
    // Remove any non-alphanumeric characters and replace spaces with underscores
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::LocationDecision;

    fn mqtt_config() -> config::MqttConfig {
        config::MqttConfig {
            host: "localhost".to_string(),
            port: None,
            username: None,
            password: None,
            publisher_id: Some("hallway-pi".to_string()),
            topic_path: None,
            keep_alive_seconds: None,
        }
    }

    #[test]
    fn test_sanitize_name() {
        let name = "Test's Device 123";
        let sanitized = super::sanitize_name(name);
        assert_eq!(sanitized, "test_s_device_123");
    }

    #[test]
    fn test_topics() {
        let (client, _eventloop) = MqttClient::new(&mqtt_config(), "Erin's Phone");
        assert_eq!(client.scan_topic(), "locator/scan");
        assert_eq!(client.device_topic(), "locator/hallway-pi/erin_s_phone");
    }

    #[test]
    fn test_presence_message() {
        let event = PresenceEvent::new(
            "phone",
            LocationDecision::Located("kitchen".to_string()),
            LocationDecision::NotFound,
        );
        assert_eq!(
            serde_json::to_string(&PresenceMqttMessage::from_event(&event)).unwrap(),
            r#"{"device":"phone","previous":"kitchen","location":null,"message":"became inaccessible","retained":false}"#
        );
    }
}
