//! Transport session
//!
//! Owns the pub/sub client for one device topic and tracks network-layer and
//! broker-layer connectivity independently. Reconnecting is not its job: a
//! lost session only flips `broker_connected`, and the engine's caller
//! decides when to connect again.

use super::{
    BrokerEvent, ClientError, ConnectError, Connected, NetworkLink, PubSubClient, ServiceError,
    SessionCallbacks, TransportError,
};
use crate::engine::EventCounter;
use crate::protocol::{encode, CommandCode};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct TransportSession<C: PubSubClient> {
    client: C,
    topic: String,
    link: Arc<dyn NetworkLink>,
    broker_connected: bool,
    handshake_timeout: Duration,
    flush_timeout: Duration,
}

impl<C: PubSubClient> TransportSession<C> {
    pub fn new(
        client: C,
        topic: impl Into<String>,
        link: Arc<dyn NetworkLink>,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            client,
            topic: topic.into(),
            link,
            broker_connected: false,
            handshake_timeout,
            flush_timeout: handshake_timeout,
        }
    }

    /// Bound on each flush of the client's outbound queue
    pub fn with_flush_timeout(mut self, flush_timeout: Duration) -> Self {
        self.flush_timeout = flush_timeout;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn network_connected(&self) -> bool {
        self.link.is_up()
    }

    pub fn broker_connected(&self) -> bool {
        self.broker_connected
    }

    pub fn connected(&self) -> bool {
        self.network_connected() && self.broker_connected
    }

    /// Establish the broker session
    ///
    /// Requires the network link; no handshake is attempted while it is down.
    pub async fn connect(
        &mut self,
        force: bool,
        ids: &mut EventCounter,
    ) -> Result<Connected, ConnectError> {
        if self.broker_connected && !force {
            return Ok(Connected::AlreadyConnected);
        }

        if !self.network_connected() {
            debug!(topic = %self.topic, "Network link down, skipping broker handshake");
            return Err(ConnectError::NoNetwork);
        }

        self.client
            .handshake(self.handshake_timeout)
            .await
            .map_err(ConnectError::HandshakeFailed)?;

        self.on_session_established(ids).await.map_err(|e| {
            self.broker_connected = false;
            ConnectError::HandshakeFailed(match e {
                TransportError::Publish(inner) => inner,
                other => ClientError::Handshake(other.to_string()),
            })
        })?;

        Ok(Connected::Established)
    }

    /// Graceful, best-effort disconnect
    ///
    /// Announces GOODBYE first. Calling this on a disconnected session is a no-op.
    pub async fn disconnect(&mut self, ids: &mut EventCounter) {
        if !self.connected() {
            return;
        }

        if let Err(e) = self
            .publish_frame::<&str>(CommandCode::GOODBYE, &[], ids)
            .await
        {
            warn!(topic = %self.topic, "Failed to announce GOODBYE: {}", e);
        }

        if let Err(e) = self.client.disconnect().await {
            warn!(topic = %self.topic, "Broker disconnect failed: {}", e);
        }

        self.broker_connected = false;
        info!(topic = %self.topic, "Disconnected from broker");
    }

    /// Publish a raw payload; fails while the broker session is down
    ///
    /// A full outbound queue is flushed once and the publish retried.
    pub async fn publish(&mut self, topic: &str, payload: &str) -> Result<(), TransportError> {
        if !self.broker_connected {
            return Err(TransportError::NotConnected);
        }

        match self.client.publish(topic, payload).await {
            Err(ClientError::QueueFull) => {
                debug!(topic = %self.topic, "Outbound queue full, flushing");
                self.flush().await?;
                self.client
                    .publish(topic, payload)
                    .await
                    .map_err(TransportError::Publish)
            }
            other => other.map_err(TransportError::Publish),
        }
    }

    /// Push everything queued so far onto the network
    pub async fn flush(&mut self) -> Result<(), TransportError> {
        if !self.broker_connected {
            return Err(TransportError::NotConnected);
        }
        self.client
            .flush(self.flush_timeout)
            .await
            .map_err(TransportError::Publish)
    }

    /// Encode and publish a self-originated frame on the device topic
    ///
    /// Takes the next event id only once the session is known to be up, so a
    /// rejected publish leaves the counter untouched.
    pub async fn publish_frame<S: AsRef<str> + Sync>(
        &mut self,
        command: CommandCode,
        parameters: &[S],
        ids: &mut EventCounter,
    ) -> Result<u64, TransportError> {
        if !self.broker_connected {
            return Err(TransportError::NotConnected);
        }

        let event_id = ids.next();
        let payload = encode(command, parameters, event_id)?;
        let topic = self.topic.clone();
        self.publish(&topic, &payload).await?;

        debug!(topic = %topic, event_id, command = %command, "Published frame");
        Ok(event_id)
    }

    /// Service the client once, bounded by `timeout`
    ///
    /// Lifecycle events are routed to the session callbacks; payloads of
    /// messages on the device topic are returned in arrival order.
    pub async fn service(
        &mut self,
        timeout: Duration,
        ids: &mut EventCounter,
    ) -> Result<Vec<String>, ServiceError> {
        let events = match self.client.next_events(timeout).await {
            Ok(events) => events,
            Err(ServiceError::Network(reason)) => {
                self.on_session_lost(&reason);
                return Err(ServiceError::Network(reason));
            }
            Err(other) => return Err(other),
        };

        let mut inbound = Vec::new();
        for event in events {
            match event {
                BrokerEvent::SessionEstablished => {
                    if let Err(e) = self.on_session_established(ids).await {
                        warn!(topic = %self.topic, "Session re-establishment incomplete: {}", e);
                    }
                }
                BrokerEvent::SessionLost(reason) => self.on_session_lost(&reason),
                BrokerEvent::Message {
                    topic,
                    payload,
                    retain,
                } => {
                    if let Some(text) = self.on_message(&topic, &payload, retain) {
                        inbound.push(text);
                    }
                }
            }
        }

        Ok(inbound)
    }
}

#[async_trait]
impl<C: PubSubClient> SessionCallbacks for TransportSession<C> {
    async fn on_session_established(
        &mut self,
        ids: &mut EventCounter,
    ) -> Result<(), TransportError> {
        self.broker_connected = true;

        let topic = self.topic.clone();
        if let Err(e) = self.client.subscribe(&topic).await {
            warn!(topic = %topic, "Failed to subscribe to device topic: {}", e);
            return Err(TransportError::Publish(e));
        }

        let event_id = self
            .publish_frame::<&str>(CommandCode::HELLO, &[], ids)
            .await?;
        info!(topic = %topic, event_id, "Broker session established");
        Ok(())
    }

    fn on_session_lost(&mut self, reason: &str) {
        if self.broker_connected {
            warn!(topic = %self.topic, "Broker session lost: {}", reason);
        }
        self.broker_connected = false;
    }

    fn on_message(&mut self, topic: &str, payload: &[u8], retain: bool) -> Option<String> {
        if retain {
            debug!("Ignoring retained message on topic: {}", topic);
            return None;
        }
        if topic != self.topic {
            debug!("Topic mismatch: expected {}, got {}", self.topic, topic);
            return None;
        }
        Some(String::from_utf8_lossy(payload).into_owned())
    }
}
