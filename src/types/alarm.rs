//! Pump alarm kinds.

use std::fmt;

/// Alarm condition reported by the pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlarmKind {
    /// Infusion line occluded.
    Occlusion,
    /// Pump battery nearly empty.
    LowBattery,
    /// Reservoir is empty.
    EmptyReservoir,
    /// No user interaction within the shutdown window.
    Shutdown,
    /// Basal rate exceeded its configured maximum.
    BasalMax,
    /// Daily insulin total exceeded its configured maximum.
    DailyMax,
    /// Blood glucose check reminder.
    GlucoseCheck,
    /// Alarm code not known to this library.
    Other(u8),
}

impl AlarmKind {
    /// Parses an alarm kind from its wire code.
    ///
    /// Returns `None` for code 0, which the pump uses for "no alarm".
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0x00 => return None,
            0x01 => Self::Occlusion,
            0x02 => Self::LowBattery,
            0x03 => Self::EmptyReservoir,
            0x04 => Self::Shutdown,
            0x05 => Self::BasalMax,
            0x06 => Self::DailyMax,
            0x07 => Self::GlucoseCheck,
            other => Self::Other(other),
        })
    }

    /// Returns the wire code.
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::Occlusion => 0x01,
            Self::LowBattery => 0x02,
            Self::EmptyReservoir => 0x03,
            Self::Shutdown => 0x04,
            Self::BasalMax => 0x05,
            Self::DailyMax => 0x06,
            Self::GlucoseCheck => 0x07,
            Self::Other(code) => code,
        }
    }
}

impl fmt::Display for AlarmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Occlusion => f.write_str("occlusion"),
            Self::LowBattery => f.write_str("low battery"),
            Self::EmptyReservoir => f.write_str("empty reservoir"),
            Self::Shutdown => f.write_str("shutdown"),
            Self::BasalMax => f.write_str("basal max"),
            Self::DailyMax => f.write_str("daily max"),
            Self::GlucoseCheck => f.write_str("glucose check"),
            Self::Other(code) => write!(f, "alarm 0x{code:02x}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alarm_kind_from_byte() {
        assert_eq!(AlarmKind::from_byte(0), None);
        assert_eq!(AlarmKind::from_byte(1), Some(AlarmKind::Occlusion));
        assert_eq!(AlarmKind::from_byte(0x42), Some(AlarmKind::Other(0x42)));
        assert_eq!(AlarmKind::EmptyReservoir.to_byte(), 3);
    }

    #[test]
    fn test_alarm_kind_display() {
        assert_eq!(AlarmKind::LowBattery.to_string(), "low battery");
        assert_eq!(AlarmKind::Other(0x42).to_string(), "alarm 0x42");
    }
}
