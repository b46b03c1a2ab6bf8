//! In-memory device mirroring the SynapsePod pin layout
//!
//! Pins 0..=7 are digital GPIO (with PWM), pins 8 and 9 are analog inputs.
//! Used by the `synapselink` binary on hosts without hardware.

use super::{Device, DeviceError};
use tracing::{debug, info, warn};

pub const DIGITAL_PINS: u8 = 8;
const ANALOG_PIN_COUNT: usize = 2;
pub const ANALOG_PINS: [u8; ANALOG_PIN_COUNT] = [8, 9];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    /// Input with pull-up
    Input,
    Output,
}

#[derive(Debug, Clone, Copy)]
struct DigitalPin {
    mode: PinMode,
    /// Level driven while in output mode
    driven: bool,
    /// External level seen while in input mode; `None` floats to the pull-up
    external: Option<bool>,
    duty: u16,
}

impl Default for DigitalPin {
    fn default() -> Self {
        Self {
            mode: PinMode::Input,
            driven: false,
            external: None,
            duty: 0,
        }
    }
}

#[derive(Debug, Default)]
pub struct SimulatedDevice {
    digital: [DigitalPin; DIGITAL_PINS as usize],
    analog: [u16; ANALOG_PIN_COUNT],
    display: String,
    reboots: u32,
}

impl SimulatedDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drive an external level onto a digital input
    pub fn set_external_level(&mut self, pin: u8, level: Option<bool>) -> Result<(), DeviceError> {
        self.digital_pin_mut(pin)?.external = level;
        Ok(())
    }

    pub fn set_analog_input(&mut self, pin: u8, value: u16) -> Result<(), DeviceError> {
        let index = Self::analog_index(pin)?;
        self.analog[index] = value;
        Ok(())
    }

    pub fn pin_mode(&self, pin: u8) -> Option<PinMode> {
        self.digital.get(pin as usize).map(|p| p.mode)
    }

    /// Level driven on an output pin; `None` for inputs and unknown pins
    pub fn output_level(&self, pin: u8) -> Option<bool> {
        self.digital
            .get(pin as usize)
            .filter(|p| p.mode == PinMode::Output)
            .map(|p| p.driven)
    }

    pub fn reboot_count(&self) -> u32 {
        self.reboots
    }

    fn digital_pin_mut(&mut self, pin: u8) -> Result<&mut DigitalPin, DeviceError> {
        self.digital
            .get_mut(pin as usize)
            .ok_or_else(|| DeviceError::invalid_pin(pin, "not a digital pin"))
    }

    fn analog_index(pin: u8) -> Result<usize, DeviceError> {
        ANALOG_PINS
            .iter()
            .position(|&p| p == pin)
            .ok_or_else(|| DeviceError::invalid_pin(pin, "not an analog input"))
    }
}

impl Device for SimulatedDevice {
    fn read_digital(&mut self, pin: u8) -> Result<bool, DeviceError> {
        let state = self.digital_pin_mut(pin)?;
        state.mode = PinMode::Input;
        let level = state.external.unwrap_or(true);
        debug!(pin, level, "Simulated digital read");
        Ok(level)
    }

    fn write_digital(&mut self, pin: u8, value: bool) -> Result<(), DeviceError> {
        let state = self.digital_pin_mut(pin)?;
        state.mode = PinMode::Output;
        state.driven = value;
        debug!(pin, value, "Simulated digital write");
        Ok(())
    }

    fn read_analog(&mut self, pin: u8) -> Result<u16, DeviceError> {
        let index = Self::analog_index(pin)?;
        Ok(self.analog[index])
    }

    fn read_pwm(&mut self, pin: u8) -> Result<u16, DeviceError> {
        Ok(self.digital_pin_mut(pin)?.duty)
    }

    fn write_pwm(&mut self, pin: u8, duty: u16) -> Result<(), DeviceError> {
        let state = self.digital_pin_mut(pin)?;
        state.mode = PinMode::Output;
        state.duty = duty;
        debug!(pin, duty, "Simulated PWM write");
        Ok(())
    }

    fn write_display(&mut self, text: &str) -> Result<(), DeviceError> {
        info!(text, "Display text updated");
        self.display = text.to_string();
        Ok(())
    }

    fn read_display(&self) -> Result<String, DeviceError> {
        Ok(self.display.clone())
    }

    fn reboot(&mut self) {
        self.reboots += 1;
        warn!(reboots = self.reboots, "Simulated device reboot requested");
    }
}
