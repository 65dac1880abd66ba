//! Protocol messages.
//!
//! A [`Message`] wraps one typed [`MessageBody`] variant together with the
//! raw bytes it has received. Outbound, the body is serialized into a frame
//! payload. Inbound, reply frames are fed back into the same message through
//! [`Message::deserialize`] until [`Message::is_complete`] reports true.

pub mod registry;

use bytes::{BufMut, Bytes, BytesMut};
use chrono::NaiveDateTime;

use crate::error::{Error, Result};
use crate::history::{HistoryFrame, HistoryKind, HistoryMessage, parse_history_frame};
use crate::protocol::CommandCode;
use crate::protocol::parser::{expect_len, parse_pump_time, parse_status, units_to_centi};
use crate::types::{AlarmKind, BolusSpeed, PumpStatus, PumpTime};

pub use registry::{MessageDefinition, MessageRegistry};

/// Bolus start request and its acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BolusStart {
    /// Requested amount in hundredths of a unit.
    pub amount_centi: u16,
    /// Delivery speed.
    pub speed: BolusSpeed,
    /// Acknowledgement status, 0 when accepted.
    pub status: Option<u8>,
}

/// Message with an opaque payload, for codes without a typed variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Request command code.
    pub command: CommandCode,
    /// Reply command code.
    pub response: CommandCode,
    /// Outbound payload.
    pub payload: Bytes,
    /// Reply payload, once received.
    pub reply: Option<Bytes>,
}

/// Typed message variants.
///
/// Reply fields are `None` until the matching frame has been decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    /// Keep-alive ping.
    KeepConnection,
    /// Status summary.
    Status(Option<PumpStatus>),
    /// Pump clock.
    PumpTime(Option<PumpTime>),
    /// Start a bolus.
    BolusStart(BolusStart),
    /// Stop a running bolus; carries the reply status.
    BolusStop(Option<u8>),
    /// Alarm pushed by the pump.
    AlarmNotice(Option<AlarmKind>),
    /// One history data frame outside of a download.
    HistoryFrame(Option<HistoryFrame>),
    /// Multi-frame history download.
    History(HistoryMessage),
    /// Opaque payload.
    Raw(RawMessage),
}

impl MessageBody {
    /// Command code the variant is sent or pushed with.
    #[must_use]
    pub const fn command(&self) -> CommandCode {
        match self {
            Self::KeepConnection => CommandCode::KEEP_CONNECTION,
            Self::Status(_) => CommandCode::STATUS,
            Self::PumpTime(_) => CommandCode::PUMP_TIME,
            Self::BolusStart(_) => CommandCode::BOLUS_START,
            Self::BolusStop(_) => CommandCode::BOLUS_STOP,
            Self::AlarmNotice(_) => CommandCode::ALARM_NOTICE,
            Self::HistoryFrame(_) => CommandCode::HISTORY_RECORD,
            Self::History(history) => history.kind().command(),
            Self::Raw(raw) => raw.command,
        }
    }

    /// Command code the pump answers the variant with.
    #[must_use]
    pub const fn response_command(&self) -> CommandCode {
        match self {
            Self::BolusStart(_) => CommandCode::BOLUS_START_ACK,
            Self::Raw(raw) => raw.response,
            _ => self.command(),
        }
    }
}

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    command: CommandCode,
    body: MessageBody,
    raw_payload: BytesMut,
    received: bool,
}

impl Message {
    /// Wraps a body into a message.
    #[must_use]
    pub fn new(body: MessageBody) -> Self {
        Self {
            command: body.command(),
            body,
            raw_payload: BytesMut::new(),
            received: false,
        }
    }

    /// Keep-alive ping.
    #[must_use]
    pub fn keep_connection() -> Self {
        Self::new(MessageBody::KeepConnection)
    }

    /// Status summary request.
    #[must_use]
    pub fn status() -> Self {
        Self::new(MessageBody::Status(None))
    }

    /// Pump clock request.
    #[must_use]
    pub fn pump_time() -> Self {
        Self::new(MessageBody::PumpTime(None))
    }

    /// Bolus start request.
    ///
    /// # Errors
    ///
    /// Fails if `units` is negative, not finite or too large for the wire field.
    pub fn bolus_start(units: f64, speed: BolusSpeed) -> Result<Self> {
        let amount_centi = units_to_centi(units).ok_or_else(|| {
            Error::malformed(
                CommandCode::BOLUS_START,
                format!("bolus amount {units} not representable"),
            )
        })?;
        Ok(Self::new(MessageBody::BolusStart(BolusStart {
            amount_centi,
            speed,
            status: None,
        })))
    }

    /// Bolus stop request.
    #[must_use]
    pub fn bolus_stop() -> Self {
        Self::new(MessageBody::BolusStop(None))
    }

    /// History download request.
    #[must_use]
    pub fn history(kind: HistoryKind) -> Self {
        Self::new(MessageBody::History(HistoryMessage::new(kind)))
    }

    /// History download request limited to events at or after `since`.
    #[must_use]
    pub fn history_since(kind: HistoryKind, since: NaiveDateTime) -> Self {
        Self::new(MessageBody::History(HistoryMessage::new(kind).since(since)))
    }

    /// Opaque request answered on `response`.
    pub fn raw(command: CommandCode, response: CommandCode, payload: impl Into<Bytes>) -> Self {
        Self::new(MessageBody::Raw(RawMessage {
            command,
            response,
            payload: payload.into(),
            reply: None,
        }))
    }

    /// Returns the command code.
    #[must_use]
    pub const fn command(&self) -> CommandCode {
        self.command
    }

    /// Returns the decoded body.
    #[must_use]
    pub const fn body(&self) -> &MessageBody {
        &self.body
    }

    /// Consumes the message, returning its body.
    #[must_use]
    pub fn into_body(self) -> MessageBody {
        self.body
    }

    /// All payload bytes received so far, in arrival order.
    #[must_use]
    pub fn raw_payload(&self) -> &[u8] {
        &self.raw_payload
    }

    /// Returns true once any reply bytes were decoded into the message.
    #[must_use]
    pub const fn is_received(&self) -> bool {
        self.received
    }

    /// Encodes the outbound payload.
    #[must_use]
    pub fn serialize(&self) -> Bytes {
        match &self.body {
            MessageBody::BolusStart(bolus) => {
                let mut buf = BytesMut::with_capacity(3);
                buf.put_u16(bolus.amount_centi);
                buf.put_u8(bolus.speed.into());
                buf.freeze()
            }
            MessageBody::History(history) => history.serialize(),
            MessageBody::Raw(raw) => raw.payload.clone(),
            _ => Bytes::new(),
        }
    }

    /// Returns true if a frame with `code` belongs to this message's reply.
    #[must_use]
    pub fn consumes(&self, code: CommandCode) -> bool {
        match &self.body {
            MessageBody::History(history) => history.consumes(code),
            body => code == body.response_command(),
        }
    }

    /// Decodes one reply frame into the message.
    ///
    /// Variants spanning several frames are called once per frame.
    pub fn deserialize(&mut self, code: CommandCode, data: &[u8]) -> Result<()> {
        if !self.consumes(code) {
            return Err(Error::malformed(
                code,
                format!("not a reply to {}", self.command),
            ));
        }
        let decoded = match &mut self.body {
            MessageBody::KeepConnection => expect_len(code, data, 0),
            MessageBody::Status(status) => {
                *status = Some(parse_status(data)?);
                Ok(())
            }
            MessageBody::PumpTime(time) => {
                *time = Some(parse_pump_time(data)?);
                Ok(())
            }
            MessageBody::BolusStart(bolus) => {
                expect_len(code, data, 1)?;
                bolus.status = Some(data[0]);
                Ok(())
            }
            MessageBody::BolusStop(status) => {
                expect_len(code, data, 1)?;
                *status = Some(data[0]);
                Ok(())
            }
            MessageBody::AlarmNotice(alarm) => {
                expect_len(code, data, 1)?;
                *alarm = Some(
                    AlarmKind::from_byte(data[0])
                        .ok_or_else(|| Error::malformed(code, "alarm notice without alarm code"))?,
                );
                Ok(())
            }
            MessageBody::HistoryFrame(frame) => {
                *frame = Some(parse_history_frame(data)?);
                Ok(())
            }
            MessageBody::History(history) => history.accept(code, data),
            MessageBody::Raw(raw) => {
                raw.reply = Some(Bytes::copy_from_slice(data));
                Ok(())
            }
        };
        decoded?;

        self.received = true;
        self.raw_payload.extend_from_slice(data);
        Ok(())
    }

    /// Returns true once enough frames were decoded to finalize the message.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        match &self.body {
            MessageBody::KeepConnection => self.received,
            MessageBody::Status(status) => status.is_some(),
            MessageBody::PumpTime(time) => time.is_some(),
            MessageBody::BolusStart(bolus) => bolus.status.is_some(),
            MessageBody::BolusStop(status) => status.is_some(),
            MessageBody::AlarmNotice(alarm) => alarm.is_some(),
            MessageBody::HistoryFrame(frame) => frame.is_some(),
            MessageBody::History(history) => history.is_complete(),
            MessageBody::Raw(raw) => raw.reply.is_some(),
        }
    }

    /// Drops partial reply state before the request is sent again.
    pub fn restart(&mut self) {
        self.raw_payload.clear();
        if let MessageBody::History(history) = &mut self.body {
            history.restart();
        }
    }

    /// Marks the message as failed, discarding partial reply state.
    pub fn fail(&mut self) {
        self.raw_payload.clear();
        if let MessageBody::History(history) = &mut self.body {
            history.fail();
        }
    }

    /// Returns true for variants whose reply spans several frames.
    #[must_use]
    pub fn is_multi_frame(&self) -> bool {
        matches!(self.body, MessageBody::History(_))
    }

    /// Alarm condition signalled by the decoded contents, if any.
    #[must_use]
    pub fn alarm(&self) -> Option<AlarmKind> {
        match &self.body {
            MessageBody::AlarmNotice(alarm) => *alarm,
            MessageBody::Status(Some(status)) => status.alarm,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryState;
    use crate::history::tests::record_payload;

    #[test]
    fn test_status_reply() {
        let mut message = Message::status();
        assert_eq!(message.command(), CommandCode::STATUS);
        assert!(message.serialize().is_empty());
        assert!(!message.is_complete());

        message
            .deserialize(
                CommandCode::STATUS,
                &[0x00, 0x00, 0x3A, 0x98, 90, 0x00, 0x64, 0x00, 0x00],
            )
            .unwrap();
        assert!(message.is_received());
        assert!(message.is_complete());
        assert_eq!(message.alarm(), None);
        let MessageBody::Status(Some(status)) = message.body() else {
            panic!("expected decoded status");
        };
        assert_eq!(status.reservoir_centi, 15_000);
    }

    #[test]
    fn test_bolus_start_uses_distinct_ack() {
        let mut message = Message::bolus_start(2.5, BolusSpeed::Slow).unwrap();
        assert_eq!(message.serialize().as_ref(), &[0x00, 0xFA, 0x01]);
        assert!(!message.consumes(CommandCode::BOLUS_START));
        assert!(message.consumes(CommandCode::BOLUS_START_ACK));

        message
            .deserialize(CommandCode::BOLUS_START_ACK, &[0x00])
            .unwrap();
        assert!(message.is_complete());
    }

    #[test]
    fn test_bolus_start_rejects_bad_amount() {
        assert!(Message::bolus_start(-0.5, BolusSpeed::Normal).is_err());
        assert!(Message::bolus_start(f64::INFINITY, BolusSpeed::Normal).is_err());
    }

    #[test]
    fn test_wrong_reply_code_rejected() {
        let mut message = Message::pump_time();
        let err = message
            .deserialize(CommandCode::STATUS, &[0u8; 9])
            .unwrap_err();
        assert!(matches!(err, Error::MalformedPayload { .. }));
        assert!(!message.is_received());
    }

    #[test]
    fn test_malformed_payload() {
        let mut message = Message::bolus_stop();
        let err = message
            .deserialize(CommandCode::BOLUS_STOP, &[0x00, 0x01])
            .unwrap_err();
        assert!(matches!(err, Error::MalformedPayload { .. }));
        assert!(!message.is_complete());
        assert!(!message.is_received());
        assert!(message.raw_payload().is_empty());
    }

    #[test]
    fn test_rejected_history_frame_leaves_payload_untouched() {
        let mut message = Message::history(HistoryKind::New);
        message
            .deserialize(CommandCode::HISTORY_RECORD, &record_payload(1, 0x01, 5, 0, 100))
            .unwrap();
        assert!(
            message
                .deserialize(CommandCode::HISTORY_RECORD, &[2, 0x01, 24])
                .is_err()
        );
        assert_eq!(message.raw_payload().len(), 11);
    }

    #[test]
    fn test_alarm_notice() {
        let mut message = Message::new(MessageBody::AlarmNotice(None));
        message
            .deserialize(CommandCode::ALARM_NOTICE, &[0x01])
            .unwrap();
        assert_eq!(message.alarm(), Some(AlarmKind::Occlusion));
        assert!(
            Message::new(MessageBody::AlarmNotice(None))
                .deserialize(CommandCode::ALARM_NOTICE, &[0x00])
                .is_err()
        );
    }

    #[test]
    fn test_history_spans_frames() {
        let mut message = Message::history(HistoryKind::New);
        assert!(message.is_multi_frame());
        message
            .deserialize(CommandCode::HISTORY_RECORD, &record_payload(1, 0x01, 5, 0, 100))
            .unwrap();
        assert!(!message.is_complete());
        message
            .deserialize(CommandCode::HISTORY_RECORD, &record_payload(2, 0x01, 6, 0, 100))
            .unwrap();
        message.deserialize(CommandCode::HISTORY_NEW, &[]).unwrap();
        assert!(message.is_complete());
        assert_eq!(message.raw_payload().len(), 22);
    }

    #[test]
    fn test_restart_and_fail() {
        let mut message = Message::history(HistoryKind::All);
        message
            .deserialize(CommandCode::HISTORY_RECORD, &record_payload(1, 0x01, 5, 0, 100))
            .unwrap();
        message.restart();
        assert!(message.raw_payload().is_empty());
        message.fail();
        let MessageBody::History(history) = message.body() else {
            panic!("expected history body");
        };
        assert_eq!(history.state(), HistoryState::Failed);
    }

    #[test]
    fn test_raw_message() {
        let mut message = Message::raw(
            CommandCode::new(0x4201),
            CommandCode::new(0x4201),
            Bytes::from_static(b"ping"),
        );
        assert_eq!(message.serialize().as_ref(), b"ping");
        message
            .deserialize(CommandCode::new(0x4201), b"pong")
            .unwrap();
        assert!(message.is_complete());
        assert_eq!(message.raw_payload(), b"pong");
    }
}
