//! SynapseLink - Rust Implementation
//!
//! A remote-command protocol that lets a controller drive a pin-level device
//! (digital and analog I/O, PWM, a text display, reboot) over a pub/sub
//! broker.
//!
//! # Overview
//!
//! - Text frames of the form `[!]command:,:p1:,:...:,:event_id`, where the
//!   `!` marker flags self-originated frames so a device can ignore the echo
//!   of its own publishes
//! - A command table mapping numeric codes to handlers with declared arity
//! - A transport session tracking network-layer and broker-layer
//!   connectivity independently, with an MQTT implementation
//! - A protocol engine driven by the caller's tick: bounded poll, decode,
//!   acknowledge, dispatch
//!
//! # Quick Start
//!
//! ```rust
//! use synapselink::protocol::{decode, encode, CommandCode, EchoPolicy, DecodeError};
//!
//! let wire = encode(CommandCode::DIGITAL_WRITE, &["7", "1"], 9).unwrap();
//! assert_eq!(wire, "!7:,:7:,:1:,:9");
//!
//! // The device drops its own frames when they come back from the broker
//! assert_eq!(decode(&wire, EchoPolicy::Suppress), Err(DecodeError::SelfEcho));
//!
//! let frame = decode("7:,:7:,:1:,:9", EchoPolicy::Suppress).unwrap();
//! assert_eq!(frame.command, CommandCode::DIGITAL_WRITE);
//! assert_eq!(frame.parameters, vec!["7", "1"]);
//! ```

pub mod commands;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use config::*;
pub use device::{Device, DeviceError, SimulatedDevice};
pub use engine::{EngineSettings, EngineState, PollOutcome, ProtocolEngine, ReconnectPolicy};
pub use error::{LinkError, LinkResult};
pub use protocol::*;
pub use transport::mqtt::{MqttClient, MqttClientFactory};
