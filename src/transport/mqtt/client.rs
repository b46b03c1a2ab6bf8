//! rumqttc-backed pub/sub client
//!
//! The event loop is never spawned onto a background task: it is driven
//! only from `handshake`, `flush`, `next_events` and `disconnect`, so all
//! network activity happens inside the engine's poll.

use super::events::{classify_error, route_mqtt_event};
use super::options::configure_mqtt_options;
use crate::config::BrokerSection;
use crate::transport::{
    BrokerEvent, ClientError, ClientFactory, PubSubClient, ServiceError, SessionOptions,
};
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, Event, EventLoop};
use rumqttc::Outgoing;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, trace, warn};

/// Request queue depth between the client handle and its event loop
const REQUEST_CAPACITY: usize = 10;
/// Events drained after the first one within a single service call
const MAX_EVENTS_PER_SERVICE: usize = 32;
/// Wait for follow-up events once traffic has started flowing
const DRAIN_WINDOW: Duration = Duration::from_millis(5);
/// Time allowed to flush GOODBYE and DISCONNECT
const DISCONNECT_FLUSH: Duration = Duration::from_millis(500);

pub struct MqttClient {
    client: AsyncClient,
    event_loop: EventLoop,
    client_id: String,
    /// Publishes and subscribes handed to the queue but not yet written out
    queued: usize,
    /// Inbound events seen while flushing, returned by the next service call
    backlog: Vec<BrokerEvent>,
    /// Failure seen while draining a batch that already held events
    pending_error: Option<ServiceError>,
}

impl MqttClient {
    pub fn new(broker: &BrokerSection, session: &SessionOptions) -> Result<Self, ClientError> {
        let mqtt_options = configure_mqtt_options(broker, session)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);

        Ok(Self {
            client,
            event_loop,
            client_id: session.client_id.clone(),
            queued: 0,
            backlog: Vec::new(),
            pending_error: None,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Requests still waiting in the outbound queue
    pub fn queued(&self) -> usize {
        self.queued
    }

    fn collect(&mut self, event: &Event, events: &mut Vec<BrokerEvent>) {
        match event {
            Event::Outgoing(Outgoing::Publish(_) | Outgoing::Subscribe(_)) => {
                self.queued = self.queued.saturating_sub(1);
            }
            _ => match route_mqtt_event(event) {
                Some(routed) => events.push(routed),
                None => trace!("Infrastructure event: {:?}", event),
            },
        }
    }
}

#[async_trait]
impl PubSubClient for MqttClient {
    async fn handshake(&mut self, limit: Duration) -> Result<(), ClientError> {
        let event_loop = &mut self.event_loop;
        let result = timeout(limit, async {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                    Ok(other) => trace!("Pre-ConnAck event: {:?}", other),
                    Err(e) => return Err(ClientError::Handshake(e.to_string())),
                }
            }
        })
        .await;

        match result {
            Ok(Ok(())) => {
                debug!(client_id = %self.client_id, "ConnAck received");
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ClientError::Handshake(
                "ConnAck timeout - no connection confirmation received".to_string(),
            )),
        }
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), ClientError> {
        if self.queued >= REQUEST_CAPACITY {
            self.flush(DISCONNECT_FLUSH).await?;
        }
        self.client
            .try_subscribe(topic, QoS::AtLeastOnce)
            .map_err(|e| ClientError::Subscribe(e.to_string()))?;
        self.queued += 1;
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &str) -> Result<(), ClientError> {
        if self.queued >= REQUEST_CAPACITY {
            return Err(ClientError::QueueFull);
        }
        // the event loop is owned here, so a rejected send means a full channel
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
            .map_err(|_| ClientError::QueueFull)?;
        self.queued += 1;
        Ok(())
    }

    async fn flush(&mut self, limit: Duration) -> Result<(), ClientError> {
        let deadline = Instant::now() + limit;
        while self.queued > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ClientError::Flush(format!(
                    "{} requests still queued",
                    self.queued
                )));
            }
            match timeout(remaining, self.event_loop.poll()).await {
                Err(_) => continue,
                Ok(Ok(event)) => {
                    let mut inbound = Vec::new();
                    self.collect(&event, &mut inbound);
                    self.backlog.extend(inbound);
                }
                Ok(Err(e)) => {
                    let failure = classify_error(&e);
                    let reason = failure.to_string();
                    self.pending_error = Some(failure);
                    return Err(ClientError::Flush(reason));
                }
            }
        }
        trace!(client_id = %self.client_id, "Request queue flushed");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ClientError> {
        self.client
            .try_disconnect()
            .map_err(|e| ClientError::Disconnect(e.to_string()))?;

        // Drive the loop until the queued frames are flushed and it closes
        let deadline = Instant::now() + DISCONNECT_FLUSH;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(client_id = %self.client_id, "Disconnect flush timed out");
                break;
            }
            match timeout(remaining, self.event_loop.poll()).await {
                Ok(Ok(event)) => trace!("Flushing: {:?}", event),
                Ok(Err(_)) | Err(_) => break,
            }
        }

        Ok(())
    }

    async fn next_events(&mut self, limit: Duration) -> Result<Vec<BrokerEvent>, ServiceError> {
        let mut events = std::mem::take(&mut self.backlog);
        if let Some(error) = self.pending_error.take() {
            if events.is_empty() {
                return Err(error);
            }
            self.pending_error = Some(error);
            return Ok(events);
        }

        let first_wait = if events.is_empty() { limit } else { DRAIN_WINDOW };
        let first = match timeout(first_wait, self.event_loop.poll()).await {
            Err(_) => return Ok(events),
            Ok(Ok(event)) => event,
            Ok(Err(e)) if events.is_empty() => return Err(classify_error(&e)),
            Ok(Err(e)) => {
                self.pending_error = Some(classify_error(&e));
                return Ok(events);
            }
        };
        self.collect(&first, &mut events);

        for _ in 0..MAX_EVENTS_PER_SERVICE {
            match timeout(DRAIN_WINDOW, self.event_loop.poll()).await {
                Err(_) => break,
                Ok(Ok(event)) => self.collect(&event, &mut events),
                Ok(Err(e)) => {
                    self.pending_error = Some(classify_error(&e));
                    break;
                }
            }
        }

        Ok(events)
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        // Async disconnect is impossible here; queue one and let the socket close
        let _ = self.client.try_disconnect();
    }
}

/// Builds one [`MqttClient`] per session from the broker configuration
#[derive(Debug, Clone)]
pub struct MqttClientFactory {
    broker: BrokerSection,
}

impl MqttClientFactory {
    pub fn new(broker: BrokerSection) -> Self {
        Self { broker }
    }
}

impl ClientFactory for MqttClientFactory {
    type Client = MqttClient;

    fn create(&self, options: &SessionOptions) -> Result<MqttClient, ClientError> {
        MqttClient::new(&self.broker, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker(url: &str) -> BrokerSection {
        BrokerSection {
            url: url.to_string(),
            username_env: None,
            password_env: None,
            keep_alive_secs: 15,
        }
    }

    fn session() -> SessionOptions {
        SessionOptions {
            client_id: "synapsepod-test".to_string(),
            topic: "synapsepod-test".to_string(),
            last_will: Some("!1:,:1".to_string()),
        }
    }

    #[tokio::test]
    async fn test_factory_builds_client_without_connecting() {
        let factory = MqttClientFactory::new(broker("mqtt://localhost:1883"));
        let client = factory.create(&session()).unwrap();
        assert_eq!(client.client_id(), "synapsepod-test");
    }

    #[tokio::test]
    async fn test_factory_rejects_bad_url() {
        let factory = MqttClientFactory::new(broker("ftp://localhost"));
        assert!(matches!(
            factory.create(&session()),
            Err(ClientError::InvalidBrokerUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_handshake_times_out_against_unreachable_broker() {
        // TEST-NET-1 address; nothing answers there
        let mut client = MqttClient::new(&broker("mqtt://192.0.2.1:1883"), &session()).unwrap();
        let result = client.handshake(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(ClientError::Handshake(_))));
    }

    #[tokio::test]
    async fn test_publish_is_queued_without_network() {
        let mut client = MqttClient::new(&broker("mqtt://localhost:1883"), &session()).unwrap();
        assert!(client.publish("synapsepod-test", "!3:,:2").await.is_ok());
        assert_eq!(client.queued(), 1);
    }

    #[tokio::test]
    async fn test_full_queue_is_reported_not_dropped() {
        let mut client = MqttClient::new(&broker("mqtt://localhost:1883"), &session()).unwrap();
        for i in 0..REQUEST_CAPACITY {
            let payload = format!("!4:,:3:,:{i}");
            assert!(client.publish("synapsepod-test", &payload).await.is_ok());
        }

        let overflow = client.publish("synapsepod-test", "!4:,:3:,:99").await;
        assert!(matches!(overflow, Err(ClientError::QueueFull)));
        assert_eq!(client.queued(), REQUEST_CAPACITY);
    }

    #[tokio::test]
    async fn test_flush_with_empty_queue_returns_immediately() {
        let mut client = MqttClient::new(&broker("mqtt://192.0.2.1:1883"), &session()).unwrap();
        assert!(client.flush(Duration::ZERO).await.is_ok());
    }
}
