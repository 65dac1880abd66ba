//! Command handlers for pump operations.
//!
//! This module wraps the generic request/response session into typed calls
//! that check the reply and hand back decoded values.

use bytes::Bytes;
use chrono::NaiveDateTime;

use crate::config::RequestOptions;
use crate::error::{Error, Result};
use crate::history::{HistoryKind, HistoryRecords};
use crate::message::{Message, MessageBody};
use crate::protocol::CommandCode;
use crate::session::SessionHandle;
use crate::types::{BolusSpeed, PumpStatus};

/// Acknowledgement status of an accepted command.
const STATUS_ACCEPTED: u8 = 0;

fn unexpected(command: CommandCode) -> Error {
    Error::malformed(command, "reply decoded into an unexpected variant")
}

/// Command handler for pump operations.
#[derive(Clone)]
pub struct CommandHandler {
    session: SessionHandle,
    options: RequestOptions,
}

impl CommandHandler {
    /// Creates a new command handler.
    #[must_use]
    pub fn new(session: SessionHandle) -> Self {
        let options = session.defaults();
        Self { session, options }
    }

    /// Sets the request timing used by every command.
    pub const fn set_options(&mut self, options: RequestOptions) {
        self.options = options;
    }

    /// Returns the session this handler sends on.
    #[must_use]
    pub const fn session(&self) -> &SessionHandle {
        &self.session
    }

    async fn request(&self, message: Message) -> Result<MessageBody> {
        let reply = self.session.send_with(message, self.options).await?;
        Ok(reply.into_body())
    }

    // ==================== Link ====================

    /// Pings the pump so it keeps the link open.
    pub async fn keep_connection(&self) -> Result<()> {
        match self.request(Message::keep_connection()).await? {
            MessageBody::KeepConnection => Ok(()),
            _ => Err(unexpected(CommandCode::KEEP_CONNECTION)),
        }
    }

    // ==================== Status ====================

    /// Reads the status summary.
    pub async fn status(&self) -> Result<PumpStatus> {
        match self.request(Message::status()).await? {
            MessageBody::Status(Some(status)) => Ok(status),
            _ => Err(unexpected(CommandCode::STATUS)),
        }
    }

    /// Reads the pump clock.
    pub async fn pump_time(&self) -> Result<NaiveDateTime> {
        match self.request(Message::pump_time()).await? {
            MessageBody::PumpTime(Some(time)) => Ok(time.time),
            _ => Err(unexpected(CommandCode::PUMP_TIME)),
        }
    }

    // ==================== Bolus ====================

    /// Starts a bolus of `units` insulin units.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rejected`] if the pump refuses the bolus.
    pub async fn start_bolus(&self, units: f64, speed: BolusSpeed) -> Result<()> {
        let message = Message::bolus_start(units, speed)?;
        tracing::info!(units, ?speed, "starting bolus");
        match self.request(message).await? {
            MessageBody::BolusStart(bolus) => {
                check_status(CommandCode::BOLUS_START, bolus.status)
            }
            _ => Err(unexpected(CommandCode::BOLUS_START)),
        }
    }

    /// Stops a running bolus.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rejected`] if the pump refuses the stop.
    pub async fn stop_bolus(&self) -> Result<()> {
        tracing::info!("stopping bolus");
        match self.request(Message::bolus_stop()).await? {
            MessageBody::BolusStop(status) => check_status(CommandCode::BOLUS_STOP, status),
            _ => Err(unexpected(CommandCode::BOLUS_STOP)),
        }
    }

    // ==================== History ====================

    /// Downloads one slice of the event log.
    ///
    /// With `since`, only events at or after that timestamp are requested.
    pub async fn read_history(
        &self,
        kind: HistoryKind,
        since: Option<NaiveDateTime>,
    ) -> Result<HistoryRecords> {
        let message = since.map_or_else(
            || Message::history(kind),
            |since| Message::history_since(kind, since),
        );
        match self.request(message).await? {
            MessageBody::History(history) => history
                .into_records()
                .ok_or_else(|| Error::malformed(kind.command(), "download did not complete")),
            _ => Err(unexpected(kind.command())),
        }
    }

    // ==================== Raw ====================

    /// Sends an opaque payload and returns the reply payload.
    pub async fn raw(
        &self,
        command: CommandCode,
        response: CommandCode,
        payload: impl Into<Bytes>,
    ) -> Result<Bytes> {
        match self.request(Message::raw(command, response, payload)).await? {
            MessageBody::Raw(raw) => raw.reply.ok_or_else(|| unexpected(command)),
            _ => Err(unexpected(command)),
        }
    }
}

fn check_status(command: CommandCode, status: Option<u8>) -> Result<()> {
    match status {
        Some(STATUS_ACCEPTED) => Ok(()),
        Some(status) => Err(Error::Rejected { command, status }),
        None => Err(unexpected(command)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::history::tests::record_payload;
    use crate::session::tests::{ECHO, Harness, STATUS_OK, wire};
    use crate::types::HistoryEvent;

    fn start() -> (Harness, CommandHandler) {
        let h = Harness::start(SessionConfig::default());
        let commands = CommandHandler::new(h.session.clone());
        (h, commands)
    }

    #[tokio::test(start_paused = true)]
    async fn test_status() {
        let (mut h, commands) = start();
        let call = tokio::spawn(async move { commands.status().await });

        assert_eq!(h.next_written().await, wire(CommandCode::STATUS, &[]));
        h.reply(CommandCode::STATUS, &STATUS_OK).await;

        let status = call.await.unwrap().unwrap();
        assert!((status.reservoir_units() - 150.0).abs() < f64::EPSILON);
        assert_eq!(status.battery_percent, 90);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_bolus_accepted() {
        let (mut h, commands) = start();
        let call = tokio::spawn(async move { commands.start_bolus(1.25, BolusSpeed::Normal).await });

        assert_eq!(
            h.next_written().await,
            wire(CommandCode::BOLUS_START, &[0x00, 0x7D, 0x00])
        );
        h.reply(CommandCode::BOLUS_START_ACK, &[0x00]).await;
        assert!(call.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_bolus_rejected() {
        let (mut h, commands) = start();
        let call = tokio::spawn(async move { commands.start_bolus(30.0, BolusSpeed::Slow).await });

        h.next_written().await;
        h.reply(CommandCode::BOLUS_START_ACK, &[0x05]).await;
        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            Error::Rejected { command, status: 0x05 } if command == CommandCode::BOLUS_START
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_bolus_and_keep_connection() {
        let (mut h, commands) = start();
        let call = tokio::spawn(async move {
            let ping = commands.keep_connection().await;
            let stop = commands.stop_bolus().await;
            (ping, stop)
        });

        assert_eq!(h.next_written().await, wire(CommandCode::KEEP_CONNECTION, &[]));
        h.reply(CommandCode::KEEP_CONNECTION, &[]).await;
        assert_eq!(h.next_written().await, wire(CommandCode::BOLUS_STOP, &[]));
        h.reply(CommandCode::BOLUS_STOP, &[0x00]).await;
        let (ping, stop) = call.await.unwrap();
        assert!(ping.is_ok());
        assert!(stop.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_history_since() {
        let (mut h, commands) = start();
        let since = crate::protocol::parser::parse_datetime(
            CommandCode::HISTORY_CARBS,
            &[24, 10, 12, 8, 0, 0],
        )
        .unwrap();
        let call =
            tokio::spawn(async move { commands.read_history(HistoryKind::Carbs, Some(since)).await });

        assert_eq!(
            h.next_written().await,
            wire(CommandCode::HISTORY_CARBS, &[24, 10, 12, 8, 0, 0])
        );
        h.reply(CommandCode::HISTORY_RECORD, &record_payload(1, 0x06, 5, 0, 40))
            .await;
        h.reply(CommandCode::HISTORY_RECORD, &record_payload(2, 0x06, 9, 0, 25))
            .await;
        h.reply(CommandCode::HISTORY_CARBS, &[]).await;

        let records = call.await.unwrap().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records.kind(), HistoryKind::Carbs);
        let grams: Vec<_> = records
            .map(|r| match r.event {
                HistoryEvent::Carbs { grams } => grams,
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(grams, vec![40, 25]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_raw() {
        let (mut h, commands) = start();
        let call = tokio::spawn(async move { commands.raw(ECHO, ECHO, vec![0xAA]).await });

        h.next_written().await;
        h.reply(ECHO, &[0xBB, 0xCC]).await;
        assert_eq!(call.await.unwrap().unwrap().as_ref(), &[0xBB, 0xCC]);
    }

    #[test]
    fn test_check_status() {
        assert!(check_status(CommandCode::BOLUS_STOP, Some(0)).is_ok());
        assert!(matches!(
            check_status(CommandCode::BOLUS_STOP, Some(1)),
            Err(Error::Rejected { status: 1, .. })
        ));
        assert!(check_status(CommandCode::BOLUS_STOP, None).is_err());
    }
}
