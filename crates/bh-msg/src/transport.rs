//! ---
//! bh_section: "02-messaging-ipc-data-model"
//! bh_subsection: "module"
//! bh_type: "source"
//! bh_scope: "code"
//! bh_description: "Pub/sub transports carrying telemetry payloads."
//! bh_version: "v0.1.0"
//! bh_owner: "tbd"
//! ---
use std::time::Duration;

use async_trait::async_trait;
use bh_common::config::BrokerConfig;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{MessagingError, Result};

const REQUEST_CHANNEL_CAPACITY: usize = 64;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const DISCONNECT_GRACE: Duration = Duration::from_secs(5);

/// Receiving half of a telemetry channel.
#[async_trait]
pub trait Subscriber: Send {
    /// Wait for the next raw payload. `Ok(None)` means the source is exhausted.
    async fn next_payload(&mut self) -> Result<Option<Vec<u8>>>;
    /// Human-readable transport name for logging.
    fn name(&self) -> &'static str;
}

/// Sending half of a telemetry channel.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish one payload onto the telemetry topic.
    async fn publish(&self, payload: String) -> Result<()>;
    /// Human-readable transport name for logging.
    fn name(&self) -> &'static str;
}

/// Create a bounded in-process channel, used by tests and single-process runs.
pub fn in_memory_channel(capacity: usize) -> (InMemoryPublisher, InMemorySubscriber) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (InMemoryPublisher { tx }, InMemorySubscriber { rx })
}

/// In-memory publisher backed by a tokio mpsc sender.
#[derive(Clone, Debug)]
pub struct InMemoryPublisher {
    tx: mpsc::Sender<Vec<u8>>,
}

#[async_trait]
impl Publisher for InMemoryPublisher {
    async fn publish(&self, payload: String) -> Result<()> {
        self.tx
            .send(payload.into_bytes())
            .await
            .map_err(|_| MessagingError::Closed("in_memory"))
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

/// In-memory subscriber; exhausted once every publisher is dropped.
#[derive(Debug)]
pub struct InMemorySubscriber {
    rx: mpsc::Receiver<Vec<u8>>,
}

#[async_trait]
impl Subscriber for InMemorySubscriber {
    async fn next_payload(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.rx.recv().await)
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

fn mqtt_options(broker: &BrokerConfig, client_id: &str) -> MqttOptions {
    let mut options = MqttOptions::new(client_id, broker.host.clone(), broker.port);
    options.set_keep_alive(broker.keep_alive);
    options.set_clean_session(true);
    options
}

/// MQTT subscriber delivering payloads published on a single topic.
///
/// The subscription is (re)issued on every CONNACK so a clean-session
/// reconnect keeps receiving telemetry. Connection errors are logged and
/// retried; they never surface to the caller.
pub struct MqttSubscriber {
    client: AsyncClient,
    eventloop: EventLoop,
    topic: String,
}

impl MqttSubscriber {
    /// Prepare a subscriber; the connection is established lazily on first poll.
    pub fn new(broker: &BrokerConfig) -> Self {
        let options = mqtt_options(broker, &broker.client_id);
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        info!(host = %broker.host, port = broker.port, topic = %broker.topic, "mqtt subscriber configured");
        Self {
            client,
            eventloop,
            topic: broker.topic.clone(),
        }
    }
}

#[async_trait]
impl Subscriber for MqttSubscriber {
    async fn next_payload(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!(topic = %self.topic, "connected to mqtt broker");
                    if let Err(err) = self.client.try_subscribe(&self.topic, QoS::AtMostOnce) {
                        warn!(topic = %self.topic, error = %err, "failed to queue subscription");
                    }
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    debug!(topic = %self.topic, pkid = ack.pkid, "subscription acknowledged");
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if publish.topic == self.topic {
                        return Ok(Some(publish.payload.to_vec()));
                    }
                    debug!(topic = %publish.topic, "ignoring message on unexpected topic");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(error = %err, "mqtt connection lost; retrying");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "mqtt"
    }
}

/// MQTT publisher with a background task driving the connection.
pub struct MqttPublisher {
    client: AsyncClient,
    topic: String,
    driver: JoinHandle<()>,
}

impl MqttPublisher {
    /// Configure a publisher and spawn its event loop driver.
    pub fn spawn(broker: &BrokerConfig, client_id: &str) -> Self {
        let options = mqtt_options(broker, client_id);
        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        let driver = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("publisher connected to mqtt broker");
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        debug!("publisher disconnect sent");
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(error = %err, "mqtt publisher connection error; retrying");
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        });
        Self {
            client,
            topic: broker.topic.clone(),
            driver,
        }
    }

    /// Flush queued publishes, disconnect and wait for the driver to stop.
    pub async fn close(self) -> Result<()> {
        self.client.disconnect().await?;
        let mut driver = self.driver;
        if tokio::time::timeout(DISCONNECT_GRACE, &mut driver)
            .await
            .is_err()
        {
            warn!("mqtt publisher did not disconnect in time; aborting driver");
            driver.abort();
        }
        Ok(())
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, payload: String) -> Result<()> {
        self.client
            .publish(&self.topic, QoS::AtMostOnce, false, payload)
            .await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mqtt"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_channel_delivers_in_order_then_ends() {
        let (publisher, mut subscriber) = in_memory_channel(4);
        publisher.publish("a".into()).await.unwrap();
        publisher.publish("b".into()).await.unwrap();
        drop(publisher);

        assert_eq!(subscriber.next_payload().await.unwrap(), Some(b"a".to_vec()));
        assert_eq!(subscriber.next_payload().await.unwrap(), Some(b"b".to_vec()));
        assert_eq!(subscriber.next_payload().await.unwrap(), None);
    }

    #[tokio::test]
    async fn publishing_after_subscriber_drop_reports_closed() {
        let (publisher, subscriber) = in_memory_channel(1);
        drop(subscriber);
        assert!(matches!(
            publisher.publish("x".into()).await,
            Err(MessagingError::Closed("in_memory"))
        ));
    }
}
