//! Command codes for the pump protocol.
//!
//! Every frame carries a 16-bit command code that selects the message kind.
//! The same code space is used for requests, replies and pushed messages.

use std::fmt;

/// A 16-bit command code identifying a message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandCode(u16);

impl CommandCode {
    /// Keep-alive ping, echoed by the pump.
    pub const KEEP_CONNECTION: Self = Self(0x3001);
    /// Pump status summary.
    pub const STATUS: Self = Self(0x0201);
    /// Pump clock read.
    pub const PUMP_TIME: Self = Self(0x320A);
    /// Bolus start request.
    pub const BOLUS_START: Self = Self(0x0102);
    /// Acknowledgement for [`Self::BOLUS_START`].
    pub const BOLUS_START_ACK: Self = Self(0x0182);
    /// Bolus stop request.
    pub const BOLUS_STOP: Self = Self(0x0101);
    /// Alarm pushed by the pump.
    pub const ALARM_NOTICE: Self = Self(0x0601);
    /// One history record, either during a history download or pushed.
    pub const HISTORY_RECORD: Self = Self(0x41F0);

    pub const HISTORY_BOLUS: Self = Self(0x3101);
    pub const HISTORY_DAILY: Self = Self(0x3102);
    pub const HISTORY_PRIME: Self = Self(0x3103);
    pub const HISTORY_REFILL: Self = Self(0x3104);
    pub const HISTORY_GLUCOSE: Self = Self(0x3105);
    pub const HISTORY_CARBS: Self = Self(0x3106);
    pub const HISTORY_ERROR: Self = Self(0x3107);
    pub const HISTORY_ALARM: Self = Self(0x3108);
    pub const HISTORY_SUSPEND: Self = Self(0x3109);
    /// Full history download.
    pub const HISTORY_ALL: Self = Self(0x41F2);
    /// History recorded since the last download.
    pub const HISTORY_NEW: Self = Self(0x42F2);

    /// Creates a command code from its raw value.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Returns the raw 16-bit value.
    #[must_use]
    pub const fn value(self) -> u16 {
        self.0
    }
}

impl From<u16> for CommandCode {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

impl From<CommandCode> for u16 {
    fn from(code: CommandCode) -> Self {
        code.0
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_code_values() {
        assert_eq!(CommandCode::HISTORY_NEW.value(), 0x42F2);
        assert_eq!(CommandCode::HISTORY_ALL.value(), 0x41F2);
        assert_ne!(CommandCode::BOLUS_START, CommandCode::BOLUS_START_ACK);
    }

    #[test]
    fn test_command_code_display() {
        assert_eq!(CommandCode::HISTORY_NEW.to_string(), "0x42F2");
        assert_eq!(CommandCode::new(0x0201).to_string(), "0x0201");
    }

    #[test]
    fn test_command_from_conversion() {
        let code: CommandCode = 0x4201.into();
        let raw: u16 = code.into();
        assert_eq!(raw, 0x4201);
    }
}
