//! Transport layer for SynapseLink
//!
//! This module provides the publish/subscribe client abstraction the
//! [`TransportSession`] owns, the network-link probe, and the MQTT
//! implementation used in production.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::engine::EventCounter;
use crate::protocol::EncodeError;

pub mod mqtt;
pub mod session;

pub use session::TransportSession;

/// Link-layer reachability probe
pub trait NetworkLink: Send + Sync {
    fn is_up(&self) -> bool;
}

/// Shared link flag flipped by whoever owns the network interface
#[derive(Debug, Clone)]
pub struct LinkFlag(Arc<AtomicBool>);

impl LinkFlag {
    pub fn new(up: bool) -> Self {
        Self(Arc::new(AtomicBool::new(up)))
    }

    pub fn set_up(&self, up: bool) {
        self.0.store(up, Ordering::SeqCst);
    }
}

impl Default for LinkFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NetworkLink for LinkFlag {
    fn is_up(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Parameters for building one broker session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub client_id: String,
    /// Device topic, used for both subscribe and publish
    pub topic: String,
    /// Encoded GOODBYE frame registered as the broker last will
    pub last_will: Option<String>,
}

/// Events surfaced by the pub/sub client while it is serviced
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    /// Session handshake completed (including transparent client reconnects)
    SessionEstablished,
    /// Broker closed the session
    SessionLost(String),
    Message {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    },
}

/// Failure classes of a bounded service call
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ServiceError {
    /// Protocol-level failure; the connection is presumed nominally alive
    #[error("Protocol error: {0}")]
    Protocol(String),
    /// OS/network failure; the socket may be unusable
    #[error("Network error: {0}")]
    Network(String),
}

/// Pub/sub client operation failures
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Session handshake failed: {0}")]
    Handshake(String),
    #[error("Subscription failed: {0}")]
    Subscribe(String),
    #[error("Publishing failed: {0}")]
    Publish(String),
    /// The outbound request queue is full until the client is flushed
    #[error("Request queue full")]
    QueueFull,
    #[error("Flush incomplete: {0}")]
    Flush(String),
    #[error("Disconnect failed: {0}")]
    Disconnect(String),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
}

/// Outcome of a successful connect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connected {
    Established,
    AlreadyConnected,
}

/// Recoverable connection failures; never abort the process
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Network link is down")]
    NoNetwork,
    #[error("Broker handshake failed")]
    HandshakeFailed(#[source] ClientError),
    #[error("Could not build broker session")]
    Session(#[source] ClientError),
    #[error("Last-will frame could not be encoded")]
    LastWill(#[from] EncodeError),
    #[error("Engine halted after reboot")]
    Halted,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Not connected to broker")]
    NotConnected,
    #[error("Publishing failed")]
    Publish(#[source] ClientError),
    #[error("Frame encoding failed: {0}")]
    Encode(#[from] EncodeError),
}

/// Publish/subscribe client owned exclusively by a [`TransportSession`]
#[async_trait]
pub trait PubSubClient: Send {
    /// Establish the broker session, bounded by `timeout`
    async fn handshake(&mut self, timeout: Duration) -> Result<(), ClientError>;

    async fn subscribe(&mut self, topic: &str) -> Result<(), ClientError>;

    /// Queue a publish without blocking on the network
    ///
    /// Fails with [`ClientError::QueueFull`] once the outbound queue is full.
    async fn publish(&mut self, topic: &str, payload: &str) -> Result<(), ClientError>;

    /// Hand every queued request to the network, bounded by `timeout`
    async fn flush(&mut self, timeout: Duration) -> Result<(), ClientError>;

    async fn disconnect(&mut self) -> Result<(), ClientError>;

    /// Service inbound/outbound traffic for at most `timeout`
    async fn next_events(&mut self, timeout: Duration) -> Result<Vec<BrokerEvent>, ServiceError>;
}

/// Builds fresh clients; forced re-initialization calls this
pub trait ClientFactory: Send {
    type Client: PubSubClient;

    fn create(&self, options: &SessionOptions) -> Result<Self::Client, ClientError>;
}

/// Lifecycle callbacks the serviced client drives on its session
#[async_trait]
pub trait SessionCallbacks {
    async fn on_session_established(&mut self, ids: &mut EventCounter)
        -> Result<(), TransportError>;

    fn on_session_lost(&mut self, reason: &str);

    /// Accept or drop one inbound message; accepted payloads come back as text
    fn on_message(&mut self, topic: &str, payload: &[u8], retain: bool) -> Option<String>;
}
