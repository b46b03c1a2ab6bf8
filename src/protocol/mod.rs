//! SynapseLink wire protocol
//!
//! This module implements the delimited frame format, the command code space
//! and device topic rules shared by the device engine and controllers.

pub mod commands;
pub mod frame;
pub mod topics;

pub use commands::CommandCode;
pub use frame::{
    decode, encode, encode_peer, sanitize_text, DecodeError, EchoPolicy, EncodeError, Frame,
    Origin, DELIMITER, ECHO_MARKER,
};
pub use topics::{device_topic, validate_device_id, ValidationError};
