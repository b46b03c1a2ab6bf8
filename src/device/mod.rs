//! Device facade consumed by the protocol engine
//!
//! The engine never touches pins or displays directly. Drivers (or the
//! [`SimulatedDevice`]) implement [`Device`] and are handed to the engine by
//! ownership, so there is no ambient pin state.

use thiserror::Error;

pub mod simulated;

pub use simulated::SimulatedDevice;

/// Hardware capability failures
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DeviceError {
    #[error("Invalid pin {pin}: {reason}")]
    InvalidPin { pin: u8, reason: String },
    #[error("Capability not supported: {0}")]
    Unsupported(&'static str),
    #[error("Hardware error: {0}")]
    Hardware(String),
}

impl DeviceError {
    pub fn invalid_pin<S: Into<String>>(pin: u8, reason: S) -> Self {
        Self::InvalidPin {
            pin,
            reason: reason.into(),
        }
    }
}

/// Narrow hardware capability surface
///
/// All calls are synchronous and their effects are visible as soon as they return.
pub trait Device: Send {
    fn read_digital(&mut self, pin: u8) -> Result<bool, DeviceError>;

    fn write_digital(&mut self, pin: u8, value: bool) -> Result<(), DeviceError>;

    fn read_analog(&mut self, pin: u8) -> Result<u16, DeviceError>;

    fn write_analog(&mut self, _pin: u8, _value: u16) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported("analog write"))
    }

    /// PWM duty cycle of a pin
    fn read_pwm(&mut self, _pin: u8) -> Result<u16, DeviceError> {
        Err(DeviceError::Unsupported("pwm read"))
    }

    fn write_pwm(&mut self, _pin: u8, _duty: u16) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported("pwm write"))
    }

    fn write_display(&mut self, text: &str) -> Result<(), DeviceError>;

    fn read_display(&self) -> Result<String, DeviceError>;

    /// Restart the device
    ///
    /// Real hardware does not return from this call. Implementations that do
    /// return (simulators, mocks) leave the engine halted.
    fn reboot(&mut self);
}

impl<D: Device + ?Sized> Device for Box<D> {
    fn read_digital(&mut self, pin: u8) -> Result<bool, DeviceError> {
        (**self).read_digital(pin)
    }

    fn write_digital(&mut self, pin: u8, value: bool) -> Result<(), DeviceError> {
        (**self).write_digital(pin, value)
    }

    fn read_analog(&mut self, pin: u8) -> Result<u16, DeviceError> {
        (**self).read_analog(pin)
    }

    fn write_analog(&mut self, pin: u8, value: u16) -> Result<(), DeviceError> {
        (**self).write_analog(pin, value)
    }

    fn read_pwm(&mut self, pin: u8) -> Result<u16, DeviceError> {
        (**self).read_pwm(pin)
    }

    fn write_pwm(&mut self, pin: u8, duty: u16) -> Result<(), DeviceError> {
        (**self).write_pwm(pin, duty)
    }

    fn write_display(&mut self, text: &str) -> Result<(), DeviceError> {
        (**self).write_display(text)
    }

    fn read_display(&self) -> Result<String, DeviceError> {
        (**self).read_display()
    }

    fn reboot(&mut self) {
        (**self).reboot()
    }
}
