//! History download messages.
//!
//! A history download is the only exchange that spans several frames. The
//! request carries the command code of a [`HistoryKind`]; the pump answers with
//! a run of [`CommandCode::HISTORY_RECORD`] data frames and closes the run by
//! echoing the request's own command code. A record with event byte `0xFF`
//! also ends the run.
//!
//! ```text
//! Requesting ──record──▶ Receiving ──record──▶ Receiving
//!      │                     │
//!      └────end marker───────┴──▶ Complete
//!      └─gap / bad record / timeout──▶ Failed
//! ```
//!
//! Records of a failed download are discarded, never exposed.

use std::fmt;

use bytes::{Bytes, BytesMut};
use chrono::NaiveDateTime;

use crate::error::{Error, Result};
use crate::protocol::CommandCode;
use crate::protocol::parser::{DATETIME_SIZE, expect_len, expect_min_len, parse_datetime, put_datetime};
use crate::types::{AlarmKind, BolusType, HistoryEvent, HistoryRecord};

/// Size of a record data frame payload.
pub const RECORD_SIZE: usize = 2 + DATETIME_SIZE + 3;

/// Event byte marking the end of the log.
pub const END_OF_HISTORY: u8 = 0xFF;

/// Sequence counter of the first data frame of a download.
const FIRST_SEQUENCE: u8 = 1;

/// Which slice of the pump's event log to download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistoryKind {
    Bolus,
    DailyTotal,
    Prime,
    Refill,
    Glucose,
    Carbs,
    Error,
    Alarm,
    Suspend,
    /// The complete log.
    All,
    /// Events recorded since the previous download.
    New,
}

impl HistoryKind {
    /// Every history kind.
    pub const ALL_KINDS: [Self; 11] = [
        Self::Bolus,
        Self::DailyTotal,
        Self::Prime,
        Self::Refill,
        Self::Glucose,
        Self::Carbs,
        Self::Error,
        Self::Alarm,
        Self::Suspend,
        Self::All,
        Self::New,
    ];

    /// Command code that requests, and terminates, this download.
    #[must_use]
    pub const fn command(self) -> CommandCode {
        match self {
            Self::Bolus => CommandCode::HISTORY_BOLUS,
            Self::DailyTotal => CommandCode::HISTORY_DAILY,
            Self::Prime => CommandCode::HISTORY_PRIME,
            Self::Refill => CommandCode::HISTORY_REFILL,
            Self::Glucose => CommandCode::HISTORY_GLUCOSE,
            Self::Carbs => CommandCode::HISTORY_CARBS,
            Self::Error => CommandCode::HISTORY_ERROR,
            Self::Alarm => CommandCode::HISTORY_ALARM,
            Self::Suspend => CommandCode::HISTORY_SUSPEND,
            Self::All => CommandCode::HISTORY_ALL,
            Self::New => CommandCode::HISTORY_NEW,
        }
    }

    /// Looks up the kind for a command code.
    #[must_use]
    pub fn from_command(code: CommandCode) -> Option<Self> {
        Self::ALL_KINDS.into_iter().find(|kind| kind.command() == code)
    }

    /// Short name used in logs and registry entries.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bolus => "history bolus",
            Self::DailyTotal => "history daily",
            Self::Prime => "history prime",
            Self::Refill => "history refill",
            Self::Glucose => "history glucose",
            Self::Carbs => "history carbs",
            Self::Error => "history error",
            Self::Alarm => "history alarm",
            Self::Suspend => "history suspend",
            Self::All => "history all",
            Self::New => "history new",
        }
    }
}

impl fmt::Display for HistoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Progress of a history download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryState {
    /// Request sent, no data frame yet.
    Requesting,
    /// At least one data frame accepted.
    Receiving,
    /// End marker received.
    Complete,
    /// Download aborted; records discarded.
    Failed,
}

impl HistoryState {
    /// Returns true for `Complete` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// One decoded history data frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryFrame {
    /// A log entry.
    Record(HistoryRecord),
    /// End-of-log marker record.
    End { sequence: u8 },
}

impl HistoryFrame {
    /// Sequence counter of the frame.
    #[must_use]
    pub const fn sequence(&self) -> u8 {
        match self {
            Self::Record(record) => record.sequence,
            Self::End { sequence } => *sequence,
        }
    }
}

/// Parses a history data frame payload.
///
/// Format:
/// ```text
/// [seq:1] [event:1] [datetime:6] [param:1] [value:2BE]
/// ```
/// An end-of-log frame only needs the first two bytes.
pub fn parse_history_frame(data: &[u8]) -> Result<HistoryFrame> {
    let command = CommandCode::HISTORY_RECORD;
    expect_min_len(command, data, 2)?;
    let sequence = data[0];
    let event_code = data[1];
    if event_code == END_OF_HISTORY {
        return Ok(HistoryFrame::End { sequence });
    }

    expect_len(command, data, RECORD_SIZE)?;
    let timestamp = parse_datetime(command, &data[2..2 + DATETIME_SIZE])?;
    let param = data[8];
    let value = u16::from_be_bytes([data[9], data[10]]);

    let event = match event_code {
        0x01 => HistoryEvent::Bolus {
            kind: BolusType::from_byte(param).ok_or_else(|| {
                Error::malformed(command, format!("unknown bolus type {param}"))
            })?,
            amount_centi: value,
        },
        0x02 => HistoryEvent::DailyTotal { amount_centi: value },
        0x03 => HistoryEvent::Prime { amount_centi: value },
        0x04 => HistoryEvent::Refill { amount_centi: value },
        0x05 => HistoryEvent::Glucose { mg_dl: value },
        0x06 => HistoryEvent::Carbs { grams: value },
        0x07 => HistoryEvent::Error { code: param },
        0x08 => HistoryEvent::Alarm {
            kind: AlarmKind::from_byte(param)
                .ok_or_else(|| Error::malformed(command, "alarm record without alarm code"))?,
        },
        0x09 => HistoryEvent::Suspend { active: param != 0 },
        other => {
            return Err(Error::malformed(
                command,
                format!("unknown history event 0x{other:02x}"),
            ));
        }
    };

    Ok(HistoryFrame::Record(HistoryRecord {
        sequence,
        timestamp,
        event,
    }))
}

/// A history download in progress.
///
/// The message is fed every data frame of the download through
/// [`HistoryMessage::accept`]. Once complete, the records are handed out once
/// via [`HistoryMessage::into_records`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryMessage {
    kind: HistoryKind,
    since: Option<NaiveDateTime>,
    state: HistoryState,
    records: Vec<HistoryRecord>,
    next_sequence: u8,
}

impl HistoryMessage {
    /// Creates a history request.
    #[must_use]
    pub const fn new(kind: HistoryKind) -> Self {
        Self {
            kind,
            since: None,
            state: HistoryState::Requesting,
            records: Vec::new(),
            next_sequence: FIRST_SEQUENCE,
        }
    }

    /// Limits the download to events at or after `since`.
    #[must_use]
    pub const fn since(mut self, since: NaiveDateTime) -> Self {
        self.since = Some(since);
        self
    }

    /// Returns the history kind.
    #[must_use]
    pub const fn kind(&self) -> HistoryKind {
        self.kind
    }

    /// Returns the lower time bound of the download.
    #[must_use]
    pub const fn since_bound(&self) -> Option<NaiveDateTime> {
        self.since
    }

    /// Returns the download state.
    #[must_use]
    pub const fn state(&self) -> HistoryState {
        self.state
    }

    /// Sequence counter the next data frame must carry.
    #[must_use]
    pub const fn next_sequence(&self) -> u8 {
        self.next_sequence
    }

    /// Number of records accepted so far.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Returns true once the end marker was received.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state == HistoryState::Complete
    }

    /// Returns true if `code` is part of this download's reply stream.
    #[must_use]
    pub fn consumes(&self, code: CommandCode) -> bool {
        code == CommandCode::HISTORY_RECORD || code == self.kind.command()
    }

    /// Encodes the request payload.
    #[must_use]
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(DATETIME_SIZE);
        if let Some(since) = &self.since {
            put_datetime(&mut buf, since);
        }
        buf.freeze()
    }

    /// Feeds one frame of the reply stream.
    ///
    /// Any error moves the download to `Failed` and discards accepted records.
    pub fn accept(&mut self, code: CommandCode, data: &[u8]) -> Result<()> {
        if self.state.is_terminal() {
            return Err(Error::malformed(
                code,
                format!("{} download already finished", self.kind),
            ));
        }

        let result = if code == CommandCode::HISTORY_RECORD {
            parse_history_frame(data).and_then(|frame| self.accept_frame(frame))
        } else if code == self.kind.command() {
            self.state = HistoryState::Complete;
            Ok(())
        } else {
            Err(Error::malformed(
                code,
                format!("not part of a {} download", self.kind),
            ))
        };

        if result.is_err() {
            self.fail();
        }
        result
    }

    fn accept_frame(&mut self, frame: HistoryFrame) -> Result<()> {
        let got = frame.sequence();
        if got != self.next_sequence {
            return Err(Error::SequenceGap {
                expected: self.next_sequence,
                got,
            });
        }
        self.next_sequence = self.next_sequence.wrapping_add(1);

        let record = match frame {
            HistoryFrame::End { .. } => {
                self.state = HistoryState::Complete;
                return Ok(());
            }
            HistoryFrame::Record(record) => record,
        };

        if let Some(since) = self.since.filter(|since| record.timestamp < *since) {
            return Err(Error::malformed(
                CommandCode::HISTORY_RECORD,
                format!("record at {} predates {since}", record.timestamp),
            ));
        }
        if let Some(previous) = self
            .records
            .last()
            .filter(|previous| record.timestamp <= previous.timestamp)
        {
            return Err(Error::malformed(
                CommandCode::HISTORY_RECORD,
                format!(
                    "record at {} does not follow {}",
                    record.timestamp, previous.timestamp
                ),
            ));
        }

        self.records.push(record);
        self.state = HistoryState::Receiving;
        Ok(())
    }

    /// Aborts the download and discards accepted records.
    pub fn fail(&mut self) {
        self.records.clear();
        self.state = HistoryState::Failed;
    }

    /// Restarts the download from scratch, for a re-sent request.
    pub fn restart(&mut self) {
        self.records.clear();
        self.next_sequence = FIRST_SEQUENCE;
        self.state = HistoryState::Requesting;
    }

    /// Hands out the records of a complete download.
    ///
    /// Returns `None` unless the download is complete.
    #[must_use]
    pub fn into_records(self) -> Option<HistoryRecords> {
        self.is_complete()
            .then(|| HistoryRecords::new(self.kind, self.records))
    }
}

/// Records of a finished download, in the order the pump reported them.
///
/// The sequence is consumed by iteration; read history again to get a new one.
#[derive(Debug)]
pub struct HistoryRecords {
    kind: HistoryKind,
    last_timestamp: Option<NaiveDateTime>,
    suspended: Option<bool>,
    records: std::vec::IntoIter<HistoryRecord>,
}

impl HistoryRecords {
    fn new(kind: HistoryKind, records: Vec<HistoryRecord>) -> Self {
        let last_timestamp = records.last().map(|r| r.timestamp);
        let suspended = records.iter().rev().find_map(|r| match r.event {
            HistoryEvent::Suspend { active } => Some(active),
            _ => None,
        });
        Self {
            kind,
            last_timestamp,
            suspended,
            records: records.into_iter(),
        }
    }

    /// History kind the records were downloaded for.
    #[must_use]
    pub const fn kind(&self) -> HistoryKind {
        self.kind
    }

    /// Timestamp of the newest record in the download.
    #[must_use]
    pub const fn last_timestamp(&self) -> Option<NaiveDateTime> {
        self.last_timestamp
    }

    /// Delivery suspension state according to the last suspend record.
    #[must_use]
    pub const fn is_suspended(&self) -> Option<bool> {
        self.suspended
    }
}

impl Iterator for HistoryRecords {
    type Item = HistoryRecord;

    fn next(&mut self) -> Option<Self::Item> {
        self.records.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.records.size_hint()
    }
}

impl ExactSizeIterator for HistoryRecords {}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Builds a record data frame payload.
    pub(crate) fn record_payload(sequence: u8, event: u8, minute: u8, param: u8, value: u16) -> Vec<u8> {
        let mut data = vec![sequence, event, 24, 10, 12, 8, minute, 0, param];
        data.extend_from_slice(&value.to_be_bytes());
        data
    }

    fn feed(message: &mut HistoryMessage, frames: &[(CommandCode, Vec<u8>)]) -> Result<()> {
        for (code, data) in frames {
            message.accept(*code, data)?;
        }
        Ok(())
    }

    fn three_records_then_end() -> Vec<(CommandCode, Vec<u8>)> {
        vec![
            (CommandCode::HISTORY_RECORD, record_payload(1, 0x01, 10, 0, 250)),
            (CommandCode::HISTORY_RECORD, record_payload(2, 0x06, 11, 0, 45)),
            (CommandCode::HISTORY_RECORD, record_payload(3, 0x09, 12, 1, 0)),
            (CommandCode::HISTORY_NEW, Vec::new()),
        ]
    }

    #[test]
    fn test_three_records_then_end_marker() {
        let mut message = HistoryMessage::new(HistoryKind::New);
        assert_eq!(message.state(), HistoryState::Requesting);

        feed(&mut message, &three_records_then_end()).unwrap();
        assert!(message.is_complete());

        let records = message.into_records().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records.is_suspended(), Some(true));
        let events: Vec<_> = records.map(|r| r.event).collect();
        assert_eq!(
            events[0],
            HistoryEvent::Bolus {
                kind: BolusType::Normal,
                amount_centi: 250
            }
        );
        assert_eq!(events[1], HistoryEvent::Carbs { grams: 45 });
    }

    #[test]
    fn test_sequence_gap_fails_download() {
        let mut message = HistoryMessage::new(HistoryKind::New);
        message
            .accept(CommandCode::HISTORY_RECORD, &record_payload(1, 0x01, 10, 0, 100))
            .unwrap();
        assert_eq!(message.state(), HistoryState::Receiving);

        let err = message
            .accept(CommandCode::HISTORY_RECORD, &record_payload(3, 0x01, 11, 0, 100))
            .unwrap_err();
        assert!(matches!(err, Error::SequenceGap { expected: 2, got: 3 }));
        assert_eq!(message.state(), HistoryState::Failed);
        assert_eq!(message.record_count(), 0);
        assert!(message.into_records().is_none());
    }

    #[test]
    fn test_replay_is_idempotent() {
        let frames = three_records_then_end();
        let mut first = HistoryMessage::new(HistoryKind::New);
        let mut second = HistoryMessage::new(HistoryKind::New);
        feed(&mut first, &frames).unwrap();
        feed(&mut second, &frames).unwrap();

        let a: Vec<_> = first.into_records().unwrap().collect();
        let b: Vec<_> = second.into_records().unwrap().collect();
        assert_eq!(a, b);
    }

    fn timed_record(sequence: u8, offset: u32) -> Vec<u8> {
        let minute = (offset / 60) as u8;
        let second = (offset % 60) as u8;
        let mut data = vec![sequence, 0x05, 24, 10, 12, 8, minute, second, 0];
        data.extend_from_slice(&100u16.to_be_bytes());
        data
    }

    #[test]
    fn test_sequence_wraps_after_255() {
        let mut message = HistoryMessage::new(HistoryKind::Glucose);
        for offset in 0..300u32 {
            let sequence = (offset + 1) as u8;
            message
                .accept(CommandCode::HISTORY_RECORD, &timed_record(sequence, offset))
                .unwrap();
        }
        message.accept(CommandCode::HISTORY_GLUCOSE, &[]).unwrap();

        let sequences: Vec<_> = message.into_records().unwrap().map(|r| r.sequence).collect();
        assert_eq!(sequences.len(), 300);
        assert_eq!(sequences[254], 255);
        assert_eq!(sequences[255], 0);
        assert_eq!(sequences[256], 1);
    }

    #[test]
    fn test_sequence_255_then_1_is_gap() {
        let mut message = HistoryMessage::new(HistoryKind::Glucose);
        for sequence in 1..=255u8 {
            message
                .accept(
                    CommandCode::HISTORY_RECORD,
                    &timed_record(sequence, u32::from(sequence)),
                )
                .unwrap();
        }
        assert_eq!(message.next_sequence(), 0);

        let err = message
            .accept(CommandCode::HISTORY_RECORD, &timed_record(1, 256))
            .unwrap_err();
        assert!(matches!(err, Error::SequenceGap { expected: 0, got: 1 }));
        assert_eq!(message.state(), HistoryState::Failed);
    }

    #[test]
    fn test_end_of_history_record() {
        let mut message = HistoryMessage::new(HistoryKind::All);
        message
            .accept(CommandCode::HISTORY_RECORD, &record_payload(1, 0x02, 10, 0, 3200))
            .unwrap();
        message
            .accept(CommandCode::HISTORY_RECORD, &[2, END_OF_HISTORY])
            .unwrap();
        assert!(message.is_complete());
        assert_eq!(message.record_count(), 1);
    }

    #[test]
    fn test_empty_history() {
        let mut message = HistoryMessage::new(HistoryKind::Alarm);
        message.accept(CommandCode::HISTORY_ALARM, &[]).unwrap();
        let records = message.into_records().unwrap();
        assert_eq!(records.len(), 0);
        assert_eq!(records.last_timestamp(), None);
    }

    #[test]
    fn test_duplicate_timestamp_rejected() {
        let mut message = HistoryMessage::new(HistoryKind::New);
        message
            .accept(CommandCode::HISTORY_RECORD, &record_payload(1, 0x01, 10, 0, 100))
            .unwrap();
        let err = message
            .accept(CommandCode::HISTORY_RECORD, &record_payload(2, 0x06, 10, 0, 30))
            .unwrap_err();
        assert!(matches!(err, Error::MalformedPayload { .. }));
        assert_eq!(message.state(), HistoryState::Failed);
    }

    #[test]
    fn test_record_before_since_rejected() {
        let since = parse_datetime(CommandCode::HISTORY_NEW, &[24, 10, 12, 8, 30, 0]).unwrap();
        let mut message = HistoryMessage::new(HistoryKind::New).since(since);
        assert_eq!(message.serialize().as_ref(), &[24, 10, 12, 8, 30, 0]);

        let err = message
            .accept(CommandCode::HISTORY_RECORD, &record_payload(1, 0x01, 10, 0, 100))
            .unwrap_err();
        assert!(matches!(err, Error::MalformedPayload { .. }));
    }

    #[test]
    fn test_unknown_event_rejected() {
        let mut message = HistoryMessage::new(HistoryKind::All);
        let err = message
            .accept(CommandCode::HISTORY_RECORD, &record_payload(1, 0x3F, 10, 0, 0))
            .unwrap_err();
        assert!(matches!(err, Error::MalformedPayload { .. }));
    }

    #[test]
    fn test_accept_after_completion_rejected() {
        let mut message = HistoryMessage::new(HistoryKind::New);
        message.accept(CommandCode::HISTORY_NEW, &[]).unwrap();
        assert!(
            message
                .accept(CommandCode::HISTORY_RECORD, &record_payload(1, 0x01, 10, 0, 100))
                .is_err()
        );
    }

    #[test]
    fn test_restart_resets_sequence() {
        let mut message = HistoryMessage::new(HistoryKind::New);
        message
            .accept(CommandCode::HISTORY_RECORD, &record_payload(1, 0x01, 10, 0, 100))
            .unwrap();
        message.restart();
        assert_eq!(message.state(), HistoryState::Requesting);
        message
            .accept(CommandCode::HISTORY_RECORD, &record_payload(1, 0x01, 10, 0, 100))
            .unwrap();
        assert_eq!(message.record_count(), 1);
    }

    #[test]
    fn test_kind_lookup() {
        assert_eq!(
            HistoryKind::from_command(CommandCode::new(0x42F2)),
            Some(HistoryKind::New)
        );
        assert_eq!(HistoryKind::from_command(CommandCode::STATUS), None);
        for kind in HistoryKind::ALL_KINDS {
            assert_eq!(HistoryKind::from_command(kind.command()), Some(kind));
        }
    }
}
