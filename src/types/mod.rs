//! Data types for pump entities.
//!
//! This module contains the decoded data carried by protocol messages:
//! - Alarm kinds
//! - Status summary and pump clock
//! - History records

pub mod alarm;
pub mod history;
pub mod status;

pub use alarm::AlarmKind;
pub use history::{BolusType, HistoryEvent, HistoryRecord};
pub use status::{BolusSpeed, PumpStatus, PumpTime, StatusFlags};
