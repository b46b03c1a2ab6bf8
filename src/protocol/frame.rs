//! SynapseLink wire framing
//!
//! A frame is a single line of text:
//!
//! ```text
//! frame  := [marker] command delim (param delim)* event_id
//! marker := "!"      -- present only on self-originated frames
//! delim  := ":,:"
//! ```
//!
//! Publish/subscribe brokers deliver a client's own publishes back to it when
//! it is subscribed to the same topic, so every frame this side emits carries
//! the marker and the receiving side drops marked frames before dispatch.
//!
//! The codec is pure: no I/O, no counters. Event ids are supplied by the caller.

use super::commands::CommandCode;
use thiserror::Error;

/// Leading marker on frames published by this engine
pub const ECHO_MARKER: char = '!';

/// Token separating command, parameters and event id
pub const DELIMITER: &str = ":,:";

/// Who produced a decoded frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Published by this engine (carries the echo marker)
    SelfOrigin,
    /// Published by a remote peer
    Peer,
}

/// How the decoder treats marked frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoPolicy {
    /// Reject marked frames with [`DecodeError::SelfEcho`] (device side)
    Suppress,
    /// Decode marked frames as [`Origin::SelfOrigin`] (controller side)
    Accept,
}

/// One decoded protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: CommandCode,
    pub parameters: Vec<String>,
    pub event_id: u64,
    pub origin: Origin,
}

impl Frame {
    pub fn new(command: CommandCode, parameters: Vec<String>, event_id: u64) -> Self {
        Self {
            command,
            parameters,
            event_id,
            origin: Origin::Peer,
        }
    }

    /// Parameter at `index`, if present
    pub fn param(&self, index: usize) -> Option<&str> {
        self.parameters.get(index).map(String::as_str)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Frame carries the self-origin marker")]
    SelfEcho,
    #[error("Malformed frame: {0}")]
    Malformed(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Parameter {index} would merge with the frame delimiter")]
    DelimiterInParameter { index: usize },
}

/// Encode a self-originated frame
pub fn encode<S: AsRef<str>>(
    command: CommandCode,
    parameters: &[S],
    event_id: u64,
) -> Result<String, EncodeError> {
    encode_frame(true, command, parameters, event_id)
}

/// Encode a frame as a remote peer would send it (no marker)
pub fn encode_peer<S: AsRef<str>>(
    command: CommandCode,
    parameters: &[S],
    event_id: u64,
) -> Result<String, EncodeError> {
    encode_frame(false, command, parameters, event_id)
}

fn encode_frame<S: AsRef<str>>(
    marked: bool,
    command: CommandCode,
    parameters: &[S],
    event_id: u64,
) -> Result<String, EncodeError> {
    let mut out = String::new();
    if marked {
        out.push(ECHO_MARKER);
    }
    out.push_str(&command.value().to_string());

    for (index, param) in parameters.iter().enumerate() {
        let param = param.as_ref();
        if collides_with_delimiter(param) {
            return Err(EncodeError::DelimiterInParameter { index });
        }
        out.push_str(DELIMITER);
        out.push_str(param);
    }

    out.push_str(DELIMITER);
    out.push_str(&event_id.to_string());
    Ok(out)
}

/// Decode a raw payload into a [`Frame`]
///
/// Tokens are matched exactly; surrounding whitespace is not trimmed.
pub fn decode(raw: &str, policy: EchoPolicy) -> Result<Frame, DecodeError> {
    let (origin, body) = match raw.strip_prefix(ECHO_MARKER) {
        Some(_) if policy == EchoPolicy::Suppress => return Err(DecodeError::SelfEcho),
        Some(rest) => (Origin::SelfOrigin, rest),
        None => (Origin::Peer, raw),
    };

    let tokens: Vec<&str> = body.split(DELIMITER).collect();
    if tokens.len() < 2 {
        return Err(DecodeError::Malformed(format!(
            "expected command and event id, got {} token(s)",
            tokens.len()
        )));
    }

    let command = tokens[0]
        .parse::<u16>()
        .map(CommandCode::from)
        .map_err(|_| DecodeError::Malformed(format!("invalid command code '{}'", tokens[0])))?;

    let last = tokens[tokens.len() - 1];
    let event_id = last
        .parse::<u64>()
        .map_err(|_| DecodeError::Malformed(format!("invalid event id '{last}'")))?;

    let parameters = tokens[1..tokens.len() - 1]
        .iter()
        .map(|t| t.to_string())
        .collect();

    Ok(Frame {
        command,
        parameters,
        event_id,
        origin,
    })
}

/// Remove delimiter occurrences from free-form text so it can travel as a parameter
pub fn sanitize_text(text: &str) -> String {
    let mut sanitized = text.to_string();
    while collides_with_delimiter(&sanitized) {
        sanitized = sanitized.replace(DELIMITER, "");
        if let Some(rest) = sanitized.strip_suffix(":,") {
            sanitized = rest.to_string();
        }
        if let Some(rest) = sanitized.strip_prefix(",:") {
            sanitized = rest.to_string();
        }
    }
    sanitized
}

/// A trailing `:,` or leading `,:` overlaps the adjacent delimiter and
/// shifts the token boundary, same as an embedded delimiter.
fn collides_with_delimiter(param: &str) -> bool {
    param.contains(DELIMITER) || param.ends_with(":,") || param.starts_with(",:")
}
