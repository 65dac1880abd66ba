//! History record types.

use chrono::NaiveDateTime;

use crate::protocol::parser::centi_to_units;
use crate::types::alarm::AlarmKind;

/// Bolus delivery type recorded in history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BolusType {
    /// Immediate bolus.
    Normal,
    /// Bolus spread over a duration.
    Extended,
    /// Immediate part followed by an extended part.
    Dual,
}

impl BolusType {
    /// Parses a bolus type from its wire code.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Normal),
            1 => Some(Self::Extended),
            2 => Some(Self::Dual),
            _ => None,
        }
    }
}

/// Event carried by a history record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryEvent {
    /// Bolus delivered.
    Bolus { kind: BolusType, amount_centi: u16 },
    /// Total insulin delivered on the record's day.
    DailyTotal { amount_centi: u16 },
    /// Infusion line primed.
    Prime { amount_centi: u16 },
    /// Reservoir refilled.
    Refill { amount_centi: u16 },
    /// Blood glucose entered on the pump.
    Glucose { mg_dl: u16 },
    /// Carbohydrates entered on the pump.
    Carbs { grams: u16 },
    /// Pump error.
    Error { code: u8 },
    /// Alarm raised.
    Alarm { kind: AlarmKind },
    /// Delivery suspended or resumed.
    Suspend { active: bool },
}

impl HistoryEvent {
    /// Insulin amount in units, for events that carry one.
    #[must_use]
    pub fn units(&self) -> Option<f64> {
        match *self {
            Self::Bolus { amount_centi, .. }
            | Self::DailyTotal { amount_centi }
            | Self::Prime { amount_centi }
            | Self::Refill { amount_centi } => Some(centi_to_units(amount_centi)),
            _ => None,
        }
    }
}

/// One entry of the pump's event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryRecord {
    /// Sequence counter of the frame that carried the record.
    pub sequence: u8,
    /// Pump local time of the event.
    pub timestamp: NaiveDateTime,
    /// The event.
    pub event: HistoryEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bolus_type_from_byte() {
        assert_eq!(BolusType::from_byte(0), Some(BolusType::Normal));
        assert_eq!(BolusType::from_byte(2), Some(BolusType::Dual));
        assert_eq!(BolusType::from_byte(3), None);
    }

    #[test]
    fn test_event_units() {
        let bolus = HistoryEvent::Bolus {
            kind: BolusType::Normal,
            amount_centi: 250,
        };
        assert!((bolus.units().unwrap() - 2.5).abs() < 1e-9);
        assert_eq!(HistoryEvent::Carbs { grams: 40 }.units(), None);
    }
}
