//! Command table for SynapseLink
//!
//! Maps each dispatchable command code to its handler and declared parameter
//! count. The table is built once and never mutated; the engine validates
//! arity here before a handler ever touches the device.

use crate::device::{Device, DeviceError};
use crate::protocol::{CommandCode, Frame};
use std::collections::HashMap;
use thiserror::Error;

pub mod handlers;

/// A frame the handler wants published in answer to the command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub command: CommandCode,
    pub parameters: Vec<String>,
}

impl Reply {
    pub fn new(command: CommandCode, parameters: Vec<String>) -> Self {
        Self {
            command,
            parameters,
        }
    }

    pub fn empty(command: CommandCode) -> Self {
        Self::new(command, Vec::new())
    }
}

/// Result of running a handler
///
/// Replies are published in order, then the reboot (if requested) is performed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct HandlerOutput {
    pub replies: Vec<Reply>,
    pub reboot: bool,
}

impl HandlerOutput {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn reply(reply: Reply) -> Self {
        Self {
            replies: vec![reply],
            reboot: false,
        }
    }
}

/// Static context handlers may read
#[derive(Debug, Clone)]
pub struct CommandContext {
    /// Protocol version advertised by MAXVERSION
    pub max_version: u32,
}

impl Default for CommandContext {
    fn default() -> Self {
        Self { max_version: 1 }
    }
}

pub type Handler =
    fn(&Frame, &mut dyn Device, &CommandContext) -> Result<HandlerOutput, CommandError>;

#[derive(Clone)]
pub struct CommandEntry {
    pub code: CommandCode,
    /// Exact number of parameters the command takes
    pub arity: usize,
    pub handler: Handler,
}

impl std::fmt::Debug for CommandEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandEntry")
            .field("code", &self.code)
            .field("arity", &self.arity)
            .finish()
    }
}

/// Command execution failures; reported by the engine, never propagated out of dispatch
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{command} expects {expected} parameter(s), got {actual}")]
    Arity {
        command: CommandCode,
        expected: usize,
        actual: usize,
    },
    #[error("{command} parameter {index} ('{value}') is not a valid {expected}")]
    Parameter {
        command: CommandCode,
        index: usize,
        value: String,
        expected: &'static str,
    },
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),
}

#[derive(Debug)]
pub struct CommandTable {
    entries: HashMap<CommandCode, CommandEntry>,
}

impl CommandTable {
    /// Table with every dispatchable SynapseLink command
    pub fn standard() -> Self {
        let table: [(CommandCode, usize, Handler); 11] = [
            (CommandCode::MAXVERSION, 0, handlers::max_version),
            (CommandCode::HEARTBEAT, 0, handlers::heartbeat),
            (CommandCode::REBOOT, 0, handlers::reboot),
            (CommandCode::DIGITAL_READ, 1, handlers::digital_read),
            (CommandCode::DIGITAL_WRITE, 2, handlers::digital_write),
            (CommandCode::ANALOG_READ, 1, handlers::analog_read),
            (CommandCode::ANALOG_WRITE, 2, handlers::analog_write),
            (CommandCode::DISPLAY_READ, 0, handlers::display_read),
            (CommandCode::DISPLAY_WRITE, 1, handlers::display_write),
            (CommandCode::PWM_READ, 1, handlers::pwm_read),
            (CommandCode::PWM_WRITE, 2, handlers::pwm_write),
        ];

        let entries = table
            .into_iter()
            .map(|(code, arity, handler)| {
                (
                    code,
                    CommandEntry {
                        code,
                        arity,
                        handler,
                    },
                )
            })
            .collect();

        Self { entries }
    }

    pub fn get(&self, code: CommandCode) -> Option<&CommandEntry> {
        self.entries.get(&code)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validate arity and run the handler for `frame`
    ///
    /// Codes without an entry are a no-op.
    pub fn execute(
        &self,
        frame: &Frame,
        device: &mut dyn Device,
        context: &CommandContext,
    ) -> Result<HandlerOutput, CommandError> {
        let Some(entry) = self.get(frame.command) else {
            return Ok(HandlerOutput::none());
        };

        if frame.parameters.len() != entry.arity {
            return Err(CommandError::Arity {
                command: entry.code,
                expected: entry.arity,
                actual: frame.parameters.len(),
            });
        }

        (entry.handler)(frame, device, context)
    }
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::standard()
    }
}
