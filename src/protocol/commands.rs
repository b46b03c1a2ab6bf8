//! SynapseLink command code space
//!
//! Numbering follows the SynapsePod firmware table. Codes 0x09, 0x0C and 0x0D
//! fill the gap and tail of that table for analog output and PWM.

use std::fmt;

/// Wire command code
///
/// Any integer that fits in `u16` decodes; codes outside the table are
/// reported as unknown and dispatch to a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandCode(u16);

impl CommandCode {
    /// Device announces itself online
    pub const HELLO: CommandCode = CommandCode(0x00);
    /// Device announces itself offline (also the broker last will)
    pub const GOODBYE: CommandCode = CommandCode(0x01);
    pub const MAXVERSION: CommandCode = CommandCode(0x02);
    pub const HEARTBEAT: CommandCode = CommandCode(0x03);
    pub const ACKNOWLEDGE: CommandCode = CommandCode(0x04);
    pub const REBOOT: CommandCode = CommandCode(0x05);
    pub const DIGITAL_READ: CommandCode = CommandCode(0x06);
    pub const DIGITAL_WRITE: CommandCode = CommandCode(0x07);
    pub const ANALOG_READ: CommandCode = CommandCode(0x08);
    pub const ANALOG_WRITE: CommandCode = CommandCode(0x09);
    pub const DISPLAY_READ: CommandCode = CommandCode(0x0A);
    pub const DISPLAY_WRITE: CommandCode = CommandCode(0x0B);
    pub const PWM_READ: CommandCode = CommandCode(0x0C);
    pub const PWM_WRITE: CommandCode = CommandCode(0x0D);

    pub const ALL: [CommandCode; 14] = [
        Self::HELLO,
        Self::GOODBYE,
        Self::MAXVERSION,
        Self::HEARTBEAT,
        Self::ACKNOWLEDGE,
        Self::REBOOT,
        Self::DIGITAL_READ,
        Self::DIGITAL_WRITE,
        Self::ANALOG_READ,
        Self::ANALOG_WRITE,
        Self::DISPLAY_READ,
        Self::DISPLAY_WRITE,
        Self::PWM_READ,
        Self::PWM_WRITE,
    ];

    pub const fn value(self) -> u16 {
        self.0
    }

    pub fn is_known(self) -> bool {
        self.name().is_some()
    }

    /// Lifecycle announcements and acknowledgments are observed, never dispatched
    pub fn is_observational(self) -> bool {
        matches!(self, Self::HELLO | Self::GOODBYE | Self::ACKNOWLEDGE)
    }

    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::HELLO => "HELLO",
            Self::GOODBYE => "GOODBYE",
            Self::MAXVERSION => "MAXVERSION",
            Self::HEARTBEAT => "HEARTBEAT",
            Self::ACKNOWLEDGE => "ACKNOWLEDGE",
            Self::REBOOT => "REBOOT",
            Self::DIGITAL_READ => "DIGITAL_READ",
            Self::DIGITAL_WRITE => "DIGITAL_WRITE",
            Self::ANALOG_READ => "ANALOG_READ",
            Self::ANALOG_WRITE => "ANALOG_WRITE",
            Self::DISPLAY_READ => "DISPLAY_READ",
            Self::DISPLAY_WRITE => "DISPLAY_WRITE",
            Self::PWM_READ => "PWM_READ",
            Self::PWM_WRITE => "PWM_WRITE",
            _ => return None,
        };
        Some(name)
    }

    /// Look up a code by its name, case-insensitively
    pub fn from_name(name: &str) -> Option<CommandCode> {
        Self::ALL
            .into_iter()
            .find(|code| code.name().is_some_and(|n| n.eq_ignore_ascii_case(name)))
    }
}

impl From<u16> for CommandCode {
    fn from(value: u16) -> Self {
        CommandCode(value)
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}({})", self.0),
            None => write!(f, "UNKNOWN({})", self.0),
        }
    }
}
