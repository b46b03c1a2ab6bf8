//! Built-in SynapseLink command handlers
//!
//! Parameters arrive as opaque strings; coercion to pins and levels happens
//! here and fails with [`CommandError::Parameter`]. Every handler that acts on
//! the device answers with a reply frame of its own command code.

use super::{CommandContext, CommandError, HandlerOutput, Reply};
use crate::device::Device;
use crate::protocol::{sanitize_text, CommandCode, Frame};

fn param<'a>(frame: &'a Frame, index: usize) -> &'a str {
    frame.param(index).unwrap_or_default()
}

fn parameter_error(frame: &Frame, index: usize, expected: &'static str) -> CommandError {
    CommandError::Parameter {
        command: frame.command,
        index,
        value: param(frame, index).to_string(),
        expected,
    }
}

/// Pin number token
pub fn parse_pin(frame: &Frame, index: usize) -> Result<u8, CommandError> {
    param(frame, index)
        .parse::<u8>()
        .map_err(|_| parameter_error(frame, index, "pin number"))
}

/// Digital level token: any integer, non-zero is high
pub fn parse_level(frame: &Frame, index: usize) -> Result<bool, CommandError> {
    param(frame, index)
        .parse::<i64>()
        .map(|v| v != 0)
        .map_err(|_| parameter_error(frame, index, "digital level"))
}

/// 16-bit value token (analog level, PWM duty)
pub fn parse_value(frame: &Frame, index: usize) -> Result<u16, CommandError> {
    param(frame, index)
        .parse::<u16>()
        .map_err(|_| parameter_error(frame, index, "16-bit value"))
}

fn level_token(level: bool) -> String {
    u8::from(level).to_string()
}

pub fn max_version(
    _frame: &Frame,
    _device: &mut dyn Device,
    context: &CommandContext,
) -> Result<HandlerOutput, CommandError> {
    Ok(HandlerOutput::reply(Reply::new(
        CommandCode::MAXVERSION,
        vec![context.max_version.to_string()],
    )))
}

pub fn heartbeat(
    _frame: &Frame,
    _device: &mut dyn Device,
    _context: &CommandContext,
) -> Result<HandlerOutput, CommandError> {
    Ok(HandlerOutput::reply(Reply::empty(CommandCode::HEARTBEAT)))
}

/// Answers first; the engine reboots the device after publishing the reply
pub fn reboot(
    _frame: &Frame,
    _device: &mut dyn Device,
    _context: &CommandContext,
) -> Result<HandlerOutput, CommandError> {
    Ok(HandlerOutput {
        replies: vec![Reply::empty(CommandCode::REBOOT)],
        reboot: true,
    })
}

pub fn digital_read(
    frame: &Frame,
    device: &mut dyn Device,
    _context: &CommandContext,
) -> Result<HandlerOutput, CommandError> {
    let pin = parse_pin(frame, 0)?;
    let level = device.read_digital(pin)?;
    Ok(HandlerOutput::reply(Reply::new(
        CommandCode::DIGITAL_READ,
        vec![pin.to_string(), level_token(level)],
    )))
}

pub fn digital_write(
    frame: &Frame,
    device: &mut dyn Device,
    _context: &CommandContext,
) -> Result<HandlerOutput, CommandError> {
    let pin = parse_pin(frame, 0)?;
    let level = parse_level(frame, 1)?;
    device.write_digital(pin, level)?;
    Ok(HandlerOutput::reply(Reply::new(
        CommandCode::DIGITAL_WRITE,
        vec![pin.to_string(), level_token(level)],
    )))
}

pub fn analog_read(
    frame: &Frame,
    device: &mut dyn Device,
    _context: &CommandContext,
) -> Result<HandlerOutput, CommandError> {
    let pin = parse_pin(frame, 0)?;
    let value = device.read_analog(pin)?;
    Ok(HandlerOutput::reply(Reply::new(
        CommandCode::ANALOG_READ,
        vec![pin.to_string(), value.to_string()],
    )))
}

pub fn analog_write(
    frame: &Frame,
    device: &mut dyn Device,
    _context: &CommandContext,
) -> Result<HandlerOutput, CommandError> {
    let pin = parse_pin(frame, 0)?;
    let value = parse_value(frame, 1)?;
    device.write_analog(pin, value)?;
    Ok(HandlerOutput::reply(Reply::new(
        CommandCode::ANALOG_WRITE,
        vec![pin.to_string(), value.to_string()],
    )))
}

pub fn pwm_read(
    frame: &Frame,
    device: &mut dyn Device,
    _context: &CommandContext,
) -> Result<HandlerOutput, CommandError> {
    let pin = parse_pin(frame, 0)?;
    let duty = device.read_pwm(pin)?;
    Ok(HandlerOutput::reply(Reply::new(
        CommandCode::PWM_READ,
        vec![pin.to_string(), duty.to_string()],
    )))
}

pub fn pwm_write(
    frame: &Frame,
    device: &mut dyn Device,
    _context: &CommandContext,
) -> Result<HandlerOutput, CommandError> {
    let pin = parse_pin(frame, 0)?;
    let duty = parse_value(frame, 1)?;
    device.write_pwm(pin, duty)?;
    Ok(HandlerOutput::reply(Reply::new(
        CommandCode::PWM_WRITE,
        vec![pin.to_string(), duty.to_string()],
    )))
}

pub fn display_read(
    _frame: &Frame,
    device: &mut dyn Device,
    _context: &CommandContext,
) -> Result<HandlerOutput, CommandError> {
    let text = device.read_display()?;
    Ok(HandlerOutput::reply(Reply::new(
        CommandCode::DISPLAY_READ,
        vec![sanitize_text(&text)],
    )))
}

pub fn display_write(
    frame: &Frame,
    device: &mut dyn Device,
    _context: &CommandContext,
) -> Result<HandlerOutput, CommandError> {
    let text = sanitize_text(param(frame, 0));
    device.write_display(&text)?;
    Ok(HandlerOutput::reply(Reply::new(
        CommandCode::DISPLAY_WRITE,
        vec![text],
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceError;
    use crate::testing::mocks::{DeviceCall, MockDevice};

    fn frame(command: CommandCode, params: &[&str]) -> Frame {
        Frame::new(command, params.iter().map(|p| p.to_string()).collect(), 9)
    }

    fn ctx() -> CommandContext {
        CommandContext::default()
    }

    #[test]
    fn test_parse_level_accepts_any_integer() {
        let f = frame(CommandCode::DIGITAL_WRITE, &["1", "0"]);
        assert!(!parse_level(&f, 1).unwrap());
        let f = frame(CommandCode::DIGITAL_WRITE, &["1", "5"]);
        assert!(parse_level(&f, 1).unwrap());
        let f = frame(CommandCode::DIGITAL_WRITE, &["1", "high"]);
        assert!(matches!(
            parse_level(&f, 1),
            Err(CommandError::Parameter { index: 1, .. })
        ));
    }

    #[test]
    fn test_parse_pin_rejects_non_numeric() {
        let f = frame(CommandCode::DIGITAL_READ, &["GP16"]);
        let err = parse_pin(&f, 0).unwrap_err();
        assert!(err.to_string().contains("GP16"));
        assert!(err.to_string().contains("pin number"));
    }

    #[test]
    fn test_digital_read_reports_level() {
        let mut device = MockDevice::new().with_digital_level(true);
        let output = digital_read(&frame(CommandCode::DIGITAL_READ, &["3"]), &mut device, &ctx())
            .unwrap();
        assert_eq!(device.calls(), vec![DeviceCall::ReadDigital(3)]);
        assert_eq!(output.replies[0].parameters, vec!["3", "1"]);
    }

    #[test]
    fn test_digital_write_bad_value_skips_device() {
        let mut device = MockDevice::new();
        let result = digital_write(
            &frame(CommandCode::DIGITAL_WRITE, &["7", "on"]),
            &mut device,
            &ctx(),
        );
        assert!(matches!(result, Err(CommandError::Parameter { .. })));
        assert!(device.calls().is_empty());
    }

    #[test]
    fn test_analog_read_and_device_failure() {
        let mut device = MockDevice::new().with_analog_value(512);
        let output =
            analog_read(&frame(CommandCode::ANALOG_READ, &["8"]), &mut device, &ctx()).unwrap();
        assert_eq!(output.replies[0].parameters, vec!["8", "512"]);

        let mut failing = MockDevice::new().failing(DeviceError::invalid_pin(2, "not analog"));
        let result = analog_read(&frame(CommandCode::ANALOG_READ, &["2"]), &mut failing, &ctx());
        assert!(matches!(result, Err(CommandError::Device(_))));
    }

    #[test]
    fn test_pwm_round() {
        let mut device = MockDevice::new();
        let output = pwm_write(
            &frame(CommandCode::PWM_WRITE, &["4", "1000"]),
            &mut device,
            &ctx(),
        )
        .unwrap();
        assert_eq!(device.calls(), vec![DeviceCall::WritePwm(4, 1000)]);
        assert_eq!(output.replies[0].command, CommandCode::PWM_WRITE);

        let result = pwm_write(
            &frame(CommandCode::PWM_WRITE, &["4", "70000"]),
            &mut device,
            &ctx(),
        );
        assert!(matches!(result, Err(CommandError::Parameter { .. })));
    }

    #[test]
    fn test_display_write_and_read() {
        let mut device = MockDevice::new();
        let output = display_write(
            &frame(CommandCode::DISPLAY_WRITE, &["Hello, pod"]),
            &mut device,
            &ctx(),
        )
        .unwrap();
        assert_eq!(
            device.calls(),
            vec![DeviceCall::WriteDisplay("Hello, pod".to_string())]
        );
        assert_eq!(output.replies[0].parameters, vec!["Hello, pod"]);

        let output =
            display_read(&frame(CommandCode::DISPLAY_READ, &[]), &mut device, &ctx()).unwrap();
        assert_eq!(output.replies[0].parameters, vec!["Hello, pod"]);
    }

    #[test]
    fn test_display_read_sanitizes_delimiter() {
        let mut device = MockDevice::new();
        device.write_display("a:,:b").unwrap();
        let output =
            display_read(&frame(CommandCode::DISPLAY_READ, &[]), &mut device, &ctx()).unwrap();
        assert_eq!(output.replies[0].parameters, vec!["ab"]);
    }

    #[test]
    fn test_reboot_requests_reboot_after_reply() {
        let mut device = MockDevice::new();
        let output = reboot(&frame(CommandCode::REBOOT, &[]), &mut device, &ctx()).unwrap();
        assert!(output.reboot);
        assert_eq!(output.replies, vec![Reply::empty(CommandCode::REBOOT)]);
        // the handler itself never reboots
        assert!(device.calls().is_empty());
    }

    #[test]
    fn test_max_version_uses_context() {
        let mut device = MockDevice::new();
        let output = max_version(
            &frame(CommandCode::MAXVERSION, &[]),
            &mut device,
            &CommandContext { max_version: 3 },
        )
        .unwrap();
        assert_eq!(output.replies[0].parameters, vec!["3"]);
    }
}
