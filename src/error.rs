//! Crate-level error type for SynapseLink
//!
//! Component errors stay specific to their layer; `LinkError` gathers them
//! for the binaries and for callers that drive the engine end to end.

use crate::commands::CommandError;
use crate::config::ConfigError;
use crate::device::DeviceError;
use crate::protocol::{DecodeError, EncodeError, ValidationError};
use crate::transport::{ClientError, ConnectError, TransportError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid device identity: {0}")]
    Identity(#[from] ValidationError),

    #[error("Connection error: {0}")]
    Connect(#[from] ConnectError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Frame decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Frame encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Configuration serialization failed: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
}

impl LinkError {
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Whether retrying on a later tick can succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            LinkError::Connect(ConnectError::Halted) => false,
            LinkError::Connect(_) | LinkError::Transport(_) | LinkError::Client(_) => true,
            LinkError::Command(_) | LinkError::Device(_) | LinkError::Decode(_) => true,
            _ => false,
        }
    }
}

pub type LinkResult<T> = Result<T, LinkError>;
