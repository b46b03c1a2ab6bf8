//! MQTT implementation of the SynapseLink transport
//!
//! Pure functions are kept apart from I/O so they can be tested without a
//! broker:
//!
//! - [`options`] - broker URL parsing and client option construction
//! - [`events`] - event routing and error classification
//! - [`client`] - the rumqttc-driven client and its factory
//!
//! # Usage
//!
//! ```rust,no_run
//! use synapselink::config::BrokerSection;
//! use synapselink::transport::mqtt::MqttClientFactory;
//! use synapselink::transport::{ClientFactory, SessionOptions};
//!
//! let broker = BrokerSection {
//!     url: "mqtt://localhost:1883".to_string(),
//!     username_env: None,
//!     password_env: None,
//!     keep_alive_secs: 15,
//! };
//!
//! let factory = MqttClientFactory::new(broker);
//! let client = factory.create(&SessionOptions {
//!     client_id: "synapsepod-crystal".to_string(),
//!     topic: "synapsepod-crystal".to_string(),
//!     last_will: Some("!1:,:1".to_string()),
//! })?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod client;
pub mod events;
pub mod options;

pub use client::{MqttClient, MqttClientFactory};
pub use events::{classify_error, route_mqtt_event};
pub use options::configure_mqtt_options;
