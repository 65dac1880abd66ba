//! Pump status types.

use chrono::NaiveDateTime;

use crate::protocol::parser::centi_to_units;
use crate::types::alarm::AlarmKind;

/// Status flags reported in the pump status summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusFlags(u8);

impl StatusFlags {
    const SUSPENDED: u8 = 0x01;
    const TEMP_BASAL: u8 = 0x02;
    const EXTENDED_BOLUS: u8 = 0x04;
    const BOLUS_RUNNING: u8 = 0x08;

    /// Creates flags from a raw byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Returns the raw byte.
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        self.0
    }

    /// Delivery is suspended.
    #[must_use]
    pub const fn is_suspended(self) -> bool {
        self.0 & Self::SUSPENDED != 0
    }

    /// A temporary basal rate is running.
    #[must_use]
    pub const fn temp_basal_running(self) -> bool {
        self.0 & Self::TEMP_BASAL != 0
    }

    /// An extended bolus is running.
    #[must_use]
    pub const fn extended_bolus_running(self) -> bool {
        self.0 & Self::EXTENDED_BOLUS != 0
    }

    /// A bolus is being delivered.
    #[must_use]
    pub const fn bolus_running(self) -> bool {
        self.0 & Self::BOLUS_RUNNING != 0
    }
}

/// Pump status summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpStatus {
    /// Delivery state flags.
    pub flags: StatusFlags,
    /// Active alarm, if any.
    pub alarm: Option<AlarmKind>,
    /// Reservoir content in hundredths of a unit.
    pub reservoir_centi: u16,
    /// Battery level in percent.
    pub battery_percent: u8,
    /// Current basal rate in hundredths of a unit per hour.
    pub basal_rate_centi: u16,
    /// Last bolus amount in hundredths of a unit.
    pub last_bolus_centi: u16,
}

impl PumpStatus {
    /// Reservoir content in units.
    #[must_use]
    pub fn reservoir_units(&self) -> f64 {
        centi_to_units(self.reservoir_centi)
    }

    /// Current basal rate in units per hour.
    #[must_use]
    pub fn basal_rate(&self) -> f64 {
        centi_to_units(self.basal_rate_centi)
    }

    /// Last bolus amount in units.
    #[must_use]
    pub fn last_bolus_units(&self) -> f64 {
        centi_to_units(self.last_bolus_centi)
    }
}

/// Bolus delivery speed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum BolusSpeed {
    /// 12 seconds per unit.
    #[default]
    Normal = 0,
    /// 30 seconds per unit.
    Slow = 1,
    /// 60 seconds per unit.
    VerySlow = 2,
}

impl From<BolusSpeed> for u8 {
    fn from(speed: BolusSpeed) -> Self {
        speed as Self
    }
}

/// Pump clock reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpTime {
    /// Pump local time.
    pub time: NaiveDateTime,
}
