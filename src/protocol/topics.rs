//! Device topic validation for SynapseLink
//!
//! A device uses exactly one topic for both directions: it subscribes to it
//! for inbound commands and publishes replies on it. The topic is the device id.

use thiserror::Error;

/// Validate a device id and return it as the device topic
///
/// Ids must match `[a-zA-Z0-9._-]+`, which also keeps MQTT wildcards and
/// level separators out of the topic.
pub fn device_topic(device_id: &str) -> Result<String, ValidationError> {
    validate_device_id(device_id)?;
    Ok(device_id.to_string())
}

pub fn validate_device_id(device_id: &str) -> Result<(), ValidationError> {
    if device_id.is_empty() {
        return Err(ValidationError::EmptyDeviceId);
    }

    for ch in device_id.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '.' && ch != '_' && ch != '-' {
            return Err(ValidationError::InvalidDeviceIdChar(ch));
        }
    }

    Ok(())
}

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Device ID cannot be empty")]
    EmptyDeviceId,
    #[error("Device ID contains invalid character: '{0}'")]
    InvalidDeviceIdChar(char),
}
