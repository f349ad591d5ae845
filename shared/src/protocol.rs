//! Device wire protocol
//!
//! Commands are short uppercase tokens terminated by a newline. The device
//! answers with one line per message: a readiness banner on boot, an
//! acknowledgement per command, and one decimal sample per line while
//! acquisition is running.

use bytes::Bytes;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::codec;

/// Banner sent by the device after boot
pub const READY: &str = "READY";

/// Errors that can occur while interpreting protocol tokens
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
}

/// Commands understood by the device firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Start ADC acquisition
    Start,
    /// Stop ADC acquisition
    Stop,
}

impl Command {
    /// The command token without delimiter
    pub fn token(&self) -> &'static str {
        match self {
            Command::Start => "START",
            Command::Stop => "STOP",
        }
    }

    /// The acknowledgement the device sends back
    pub fn ack_token(&self) -> &'static str {
        match self {
            Command::Start => "OK_START",
            Command::Stop => "OK_STOP",
        }
    }

    /// Newline-terminated bytes ready to write
    pub fn encode(&self) -> Bytes {
        codec::encode_line(self.token())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for Command {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "START" => Ok(Command::Start),
            "STOP" => Ok(Command::Stop),
            other => Err(ProtocolError::UnknownCommand(other.into())),
        }
    }
}

/// A frame received from the device, classified
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceMessage {
    /// Device finished booting
    Ready,
    /// Device acknowledged a command
    Ack(Command),
    /// Telemetry sample
    Sample(f64),
    /// Anything else (debug output, hex-rendered binary)
    Text(String),
}

impl DeviceMessage {
    /// Classify one frame produced by the [`FrameAssembler`](crate::FrameAssembler)
    pub fn parse(frame: &str) -> Self {
        let frame = frame.trim();
        match frame {
            READY => DeviceMessage::Ready,
            "OK_START" => DeviceMessage::Ack(Command::Start),
            "OK_STOP" => DeviceMessage::Ack(Command::Stop),
            _ => match frame.parse::<f64>() {
                Ok(value) if value.is_finite() => DeviceMessage::Sample(value),
                _ => DeviceMessage::Text(frame.to_owned()),
            },
        }
    }

    /// The sample value, if this is a sample
    pub fn sample(&self) -> Option<f64> {
        match self {
            DeviceMessage::Sample(value) => Some(*value),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_encoding() {
        assert_eq!(&Command::Start.encode()[..], b"START\n");
        assert_eq!(&Command::Stop.encode()[..], b"STOP\n");
    }

    #[test]
    fn test_command_from_str() {
        assert_eq!("start".parse::<Command>(), Ok(Command::Start));
        assert_eq!(" STOP ".parse::<Command>(), Ok(Command::Stop));
        assert!(matches!(
            "RESET".parse::<Command>(),
            Err(ProtocolError::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_parse_device_messages() {
        assert_eq!(DeviceMessage::parse("READY"), DeviceMessage::Ready);
        assert_eq!(
            DeviceMessage::parse("OK_START"),
            DeviceMessage::Ack(Command::Start)
        );
        assert_eq!(
            DeviceMessage::parse("OK_STOP"),
            DeviceMessage::Ack(Command::Stop)
        );
        assert_eq!(DeviceMessage::parse("1023"), DeviceMessage::Sample(1023.0));
        assert_eq!(DeviceMessage::parse("-7.25"), DeviceMessage::Sample(-7.25));
        assert_eq!(
            DeviceMessage::parse("deadbeef"),
            DeviceMessage::Text("deadbeef".into())
        );
    }

    #[test]
    fn test_non_finite_is_text() {
        assert_eq!(DeviceMessage::parse("NaN"), DeviceMessage::Text("NaN".into()));
        assert_eq!(DeviceMessage::parse("inf"), DeviceMessage::Text("inf".into()));
        assert_eq!(DeviceMessage::parse("12.5").sample(), Some(12.5));
    }
}
