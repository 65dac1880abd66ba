//! Binary field helpers shared by the message decoders.

use bytes::BufMut;
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

use crate::error::{Error, Result};
use crate::protocol::CommandCode;
use crate::types::{AlarmKind, PumpStatus, PumpTime, StatusFlags};

/// Size of an encoded pump timestamp.
pub const DATETIME_SIZE: usize = 6;

/// Years on the wire are offsets from this base.
const YEAR_BASE: i32 = 2000;

/// Fails with `MalformedPayload` unless `data` is exactly `len` bytes.
pub fn expect_len(command: CommandCode, data: &[u8], len: usize) -> Result<()> {
    if data.len() == len {
        Ok(())
    } else {
        Err(Error::malformed(
            command,
            format!("expected {len} bytes, got {}", data.len()),
        ))
    }
}

/// Fails with `MalformedPayload` unless `data` has at least `len` bytes.
pub fn expect_min_len(command: CommandCode, data: &[u8], len: usize) -> Result<()> {
    if data.len() >= len {
        Ok(())
    } else {
        Err(Error::malformed(
            command,
            format!("expected at least {len} bytes, got {}", data.len()),
        ))
    }
}

/// Parses a pump timestamp.
///
/// Format:
/// ```text
/// [year-2000:1] [month:1] [day:1] [hour:1] [minute:1] [second:1]
/// ```
pub fn parse_datetime(command: CommandCode, data: &[u8]) -> Result<NaiveDateTime> {
    expect_min_len(command, data, DATETIME_SIZE)?;
    NaiveDate::from_ymd_opt(
        YEAR_BASE + i32::from(data[0]),
        u32::from(data[1]),
        u32::from(data[2]),
    )
    .and_then(|date| {
        date.and_hms_opt(u32::from(data[3]), u32::from(data[4]), u32::from(data[5]))
    })
    .ok_or_else(|| {
        Error::malformed(
            command,
            format!("invalid timestamp bytes {}", hex::encode(&data[..DATETIME_SIZE])),
        )
    })
}

/// Writes a pump timestamp.
///
/// Years outside 2000..=2255 are clamped into the representable range.
pub fn put_datetime(buf: &mut impl BufMut, timestamp: &NaiveDateTime) {
    let year = (timestamp.year() - YEAR_BASE).clamp(0, i32::from(u8::MAX));
    buf.put_u8(year as u8);
    buf.put_u8(timestamp.month() as u8);
    buf.put_u8(timestamp.day() as u8);
    buf.put_u8(timestamp.hour() as u8);
    buf.put_u8(timestamp.minute() as u8);
    buf.put_u8(timestamp.second() as u8);
}

/// Size of a status reply payload.
pub const STATUS_SIZE: usize = 9;

/// Parses a `PumpStatus` reply.
///
/// Format:
/// ```text
/// [flags:1] [alarm:1] [reservoir:2BE] [battery:1] [basal:2BE] [last_bolus:2BE]
/// ```
pub fn parse_status(data: &[u8]) -> Result<PumpStatus> {
    expect_len(CommandCode::STATUS, data, STATUS_SIZE)?;
    if data[4] > 100 {
        return Err(Error::malformed(
            CommandCode::STATUS,
            format!("battery level {}% out of range", data[4]),
        ));
    }

    Ok(PumpStatus {
        flags: StatusFlags::from_byte(data[0]),
        alarm: AlarmKind::from_byte(data[1]),
        reservoir_centi: u16::from_be_bytes([data[2], data[3]]),
        battery_percent: data[4],
        basal_rate_centi: u16::from_be_bytes([data[5], data[6]]),
        last_bolus_centi: u16::from_be_bytes([data[7], data[8]]),
    })
}

/// Parses a `PumpTime` reply.
pub fn parse_pump_time(data: &[u8]) -> Result<PumpTime> {
    expect_len(CommandCode::PUMP_TIME, data, DATETIME_SIZE)?;
    Ok(PumpTime {
        time: parse_datetime(CommandCode::PUMP_TIME, data)?,
    })
}

/// Converts a hundredths-of-a-unit wire value to insulin units.
#[must_use]
pub fn centi_to_units(value: u16) -> f64 {
    f64::from(value) / 100.0
}

/// Converts insulin units to the hundredths-of-a-unit wire value.
///
/// Returns `None` for negative, non-finite or unrepresentable amounts.
#[must_use]
pub fn units_to_centi(units: f64) -> Option<u16> {
    if !units.is_finite() || units < 0.0 {
        return None;
    }
    let centi = (units * 100.0).round();
    if centi > f64::from(u16::MAX) {
        None
    } else {
        Some(centi as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CODE: CommandCode = CommandCode::new(0x1234);

    #[test]
    fn test_parse_datetime() {
        let ts = parse_datetime(CODE, &[24, 10, 12, 8, 30, 15]).unwrap();
        assert_eq!(ts.to_string(), "2024-10-12 08:30:15");
    }

    #[test]
    fn test_parse_datetime_invalid() {
        let err = parse_datetime(CODE, &[24, 13, 12, 8, 30, 15]).unwrap_err();
        assert!(matches!(err, Error::MalformedPayload { .. }));
        let err = parse_datetime(CODE, &[24, 2, 30, 8, 30, 15]).unwrap_err();
        assert!(matches!(err, Error::MalformedPayload { .. }));
        let err = parse_datetime(CODE, &[24, 2]).unwrap_err();
        assert!(matches!(err, Error::MalformedPayload { .. }));
    }

    #[test]
    fn test_put_datetime() {
        let ts = parse_datetime(CODE, &[24, 10, 12, 8, 30, 15]).unwrap();
        let mut buf = Vec::new();
        put_datetime(&mut buf, &ts);
        assert_eq!(buf, vec![24, 10, 12, 8, 30, 15]);
    }

    #[test]
    fn test_units_conversion() {
        assert!((centi_to_units(150) - 1.5).abs() < f64::EPSILON);
        assert_eq!(units_to_centi(2.35), Some(235));
        assert_eq!(units_to_centi(-1.0), None);
        assert_eq!(units_to_centi(f64::NAN), None);
        assert_eq!(units_to_centi(1000.0), None);
    }

    #[test]
    fn test_parse_status() {
        let data = [0x03, 0x02, 0x3A, 0xC9, 64, 0x00, 0x55, 0x01, 0x40];
        let status = parse_status(&data).unwrap();
        assert!(status.flags.is_suspended());
        assert!(status.flags.temp_basal_running());
        assert_eq!(status.alarm, Some(AlarmKind::LowBattery));
        assert_eq!(status.reservoir_centi, 15_049);
        assert_eq!(status.battery_percent, 64);
        assert_eq!(status.basal_rate_centi, 85);
        assert_eq!(status.last_bolus_centi, 320);
    }

    #[test]
    fn test_parse_status_rejects_bad_payload() {
        assert!(matches!(
            parse_status(&[0x00; 8]),
            Err(Error::MalformedPayload { .. })
        ));
        let mut data = [0u8; STATUS_SIZE];
        data[4] = 101;
        assert!(matches!(
            parse_status(&data),
            Err(Error::MalformedPayload { .. })
        ));
    }

    #[test]
    fn test_parse_pump_time() {
        let time = parse_pump_time(&[25, 1, 31, 23, 59, 59]).unwrap();
        assert_eq!(time.time.to_string(), "2025-01-31 23:59:59");
        assert!(parse_pump_time(&[25, 1, 31, 23, 59]).is_err());
    }

    #[test]
    fn test_expect_len() {
        assert!(expect_len(CODE, &[1, 2], 2).is_ok());
        assert!(expect_len(CODE, &[1, 2, 3], 2).is_err());
        assert!(expect_min_len(CODE, &[1, 2, 3], 2).is_ok());
    }
}
