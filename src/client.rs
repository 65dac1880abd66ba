//! Main [`PumpClient`] implementation.
//!
//! This module combines the serial transport, the session and the typed
//! commands into one connect-and-use client.

use std::sync::Arc;

use chrono::{NaiveDateTime, TimeDelta};
use tokio::task::JoinHandle;

use crate::commands::CommandHandler;
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher, EventFilter, Subscription};
use crate::history::{HistoryKind, HistoryRecords};
use crate::host::{AlarmSink, KeepAlive, LogAlarms, NoKeepAlive};
use crate::session::Session;
use crate::transport::{SerialTransport, serial::SerialConfig};
use crate::types::{BolusSpeed, PumpStatus};

/// Position in the pump's event log reached by previous downloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryBookmark {
    last: Option<NaiveDateTime>,
    suspended: Option<bool>,
}

impl HistoryBookmark {
    /// Starts from a previously stored timestamp.
    #[must_use]
    pub const fn at(last: NaiveDateTime) -> Self {
        Self {
            last: Some(last),
            suspended: None,
        }
    }

    /// Timestamp of the newest record seen.
    #[must_use]
    pub const fn last(&self) -> Option<NaiveDateTime> {
        self.last
    }

    /// Suspension state according to the newest suspend record seen.
    #[must_use]
    pub const fn suspended(&self) -> Option<bool> {
        self.suspended
    }

    /// Lower bound for the next download.
    ///
    /// Records carry whole seconds, so the bound skips the newest record seen.
    #[must_use]
    pub fn since(&self) -> Option<NaiveDateTime> {
        self.last.map(|last| last + TimeDelta::seconds(1))
    }

    /// Moves past a finished download.
    pub fn advance(&mut self, records: &HistoryRecords) {
        if let Some(last) = records.last_timestamp() {
            self.last = Some(self.last.map_or(last, |known| known.max(last)));
        }
        if let Some(suspended) = records.is_suspended() {
            self.suspended = Some(suspended);
        }
    }
}

/// Client for communicating with a pump over a serial link.
pub struct PumpClient {
    serial: SerialConfig,
    session_config: SessionConfig,
    keep_alive: Arc<dyn KeepAlive>,
    alarms: Arc<dyn AlarmSink>,
    events: EventDispatcher,
    commands: Option<CommandHandler>,
    read_task: Option<JoinHandle<()>>,
    bookmark: HistoryBookmark,
}

impl PumpClient {
    /// Creates a new client for a serial port.
    ///
    /// # Arguments
    ///
    /// * `port` - Serial port path (e.g., "/dev/rfcomm0")
    #[must_use]
    pub fn serial(port: impl Into<String>) -> Self {
        Self::with_serial_config(SerialConfig::new(port))
    }

    /// Creates a new client with custom serial configuration.
    #[must_use]
    pub fn with_serial_config(serial: SerialConfig) -> Self {
        let session_config = SessionConfig::default();
        Self {
            serial,
            events: EventDispatcher::new(session_config.event_capacity_or_default()),
            session_config,
            keep_alive: Arc::new(NoKeepAlive),
            alarms: Arc::new(LogAlarms),
            commands: None,
            read_task: None,
            bookmark: HistoryBookmark::default(),
        }
    }

    /// Sets the session configuration used on the next connect.
    #[must_use]
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Sets the keep-alive collaborator.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: Arc<dyn KeepAlive>) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Sets the alarm collaborator.
    #[must_use]
    pub fn alarms(mut self, alarms: Arc<dyn AlarmSink>) -> Self {
        self.alarms = alarms;
        self
    }

    /// Resumes incremental history from a stored bookmark.
    #[must_use]
    pub const fn history_bookmark(mut self, bookmark: HistoryBookmark) -> Self {
        self.bookmark = bookmark;
        self
    }

    /// Connects to the pump and reads its status.
    ///
    /// This will:
    /// 1. Open the serial port
    /// 2. Start the session and the background read task
    /// 3. Read the status summary
    ///
    /// # Errors
    ///
    /// Returns an error if the port cannot be opened or the pump does not answer.
    pub async fn connect(&mut self) -> Result<PumpStatus> {
        if self.commands.is_some() {
            self.disconnect().await;
        }

        let mut transport = SerialTransport::new(self.serial.clone());
        transport.connect().await?;
        let reader = transport.take_reader().ok_or(Error::NotConnected)?;

        let (session, sink) = Session::builder()
            .config(self.session_config.clone())
            .keep_alive(Arc::clone(&self.keep_alive))
            .alarms(Arc::clone(&self.alarms))
            .events(self.events.clone())
            .spawn(transport);

        self.read_task = Some(tokio::spawn(async move {
            if let Err(e) = SerialTransport::run_read_loop(reader, sink).await {
                tracing::debug!(error = %e, "read loop ended");
            }
        }));
        let commands = CommandHandler::new(session);

        match commands.status().await {
            Ok(status) => {
                self.commands = Some(commands);
                self.events.dispatch(Event::Connected);
                tracing::info!(
                    reservoir = status.reservoir_units(),
                    battery = status.battery_percent,
                    "pump connected"
                );
                Ok(status)
            }
            Err(e) => {
                commands.session().shutdown().await;
                self.stop_read_task();
                Err(e)
            }
        }
    }

    /// Disconnects from the pump, cancelling outstanding requests.
    pub async fn disconnect(&mut self) {
        if let Some(commands) = self.commands.take() {
            commands.session().shutdown().await;
            self.events.dispatch(Event::Disconnected);
        }
        self.stop_read_task();
    }

    fn stop_read_task(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }

    /// Returns true if a session is running.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.commands
            .as_ref()
            .is_some_and(|c| !c.session().is_closed())
    }

    /// Returns the command handler for direct command access.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] before `connect` or after `disconnect`.
    pub fn commands(&self) -> Result<&CommandHandler> {
        self.commands.as_ref().ok_or(Error::NotConnected)
    }

    /// Subscribes to events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe(None)
    }

    /// Subscribes to alarm events.
    #[must_use]
    pub fn subscribe_alarms(&self) -> Subscription {
        self.events.subscribe(Some(EventFilter::alarms()))
    }

    /// Current history bookmark.
    #[must_use]
    pub const fn bookmark(&self) -> HistoryBookmark {
        self.bookmark
    }

    // ==================== High-Level Pump Methods ====================

    /// Reads the status summary.
    pub async fn status(&self) -> Result<PumpStatus> {
        self.commands()?.status().await
    }

    /// Reads the pump clock.
    pub async fn pump_time(&self) -> Result<NaiveDateTime> {
        self.commands()?.pump_time().await
    }

    /// Starts a bolus.
    pub async fn start_bolus(&self, units: f64, speed: BolusSpeed) -> Result<()> {
        self.commands()?.start_bolus(units, speed).await
    }

    /// Stops a running bolus.
    pub async fn stop_bolus(&self) -> Result<()> {
        self.commands()?.stop_bolus().await
    }

    /// Downloads the events recorded since the previous sync.
    ///
    /// The first sync of a client without a bookmark downloads the whole
    /// slice. A failed download leaves the bookmark unchanged.
    pub async fn sync_history(&mut self, kind: HistoryKind) -> Result<HistoryRecords> {
        let since = self.bookmark.since();
        let records = self.commands()?.read_history(kind, since).await?;
        self.bookmark.advance(&records);
        tracing::debug!(
            %kind,
            records = records.len(),
            last = ?self.bookmark.last(),
            "history synced"
        );
        Ok(records)
    }
}

impl Drop for PumpClient {
    fn drop(&mut self) {
        self.stop_read_task();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::tests::record_payload;
    use crate::message::{Message, MessageBody};
    use crate::protocol::CommandCode;

    fn finished(frames: &[Vec<u8>]) -> HistoryRecords {
        let mut message = Message::history(HistoryKind::All);
        for frame in frames {
            message
                .deserialize(CommandCode::HISTORY_RECORD, frame)
                .unwrap();
        }
        message.deserialize(CommandCode::HISTORY_ALL, &[]).unwrap();
        let MessageBody::History(history) = message.into_body() else {
            panic!("expected history body");
        };
        history.into_records().unwrap()
    }

    #[test]
    fn test_bookmark_advances() {
        let mut bookmark = HistoryBookmark::default();
        assert_eq!(bookmark.since(), None);

        let records = finished(&[
            record_payload(1, 0x01, 10, 0, 100),
            record_payload(2, 0x09, 20, 1, 0),
        ]);
        bookmark.advance(&records);
        assert_eq!(
            bookmark.last().map(|t| t.to_string()),
            Some("2024-10-12 08:20:00".to_owned())
        );
        assert_eq!(
            bookmark.since().map(|t| t.to_string()),
            Some("2024-10-12 08:20:01".to_owned())
        );
        assert_eq!(bookmark.suspended(), Some(true));

        // An empty download keeps what is known.
        bookmark.advance(&finished(&[]));
        assert_eq!(bookmark.suspended(), Some(true));
        assert!(bookmark.last().is_some());
    }

    #[test]
    fn test_bookmark_never_moves_back() {
        let mut bookmark = HistoryBookmark::default();
        bookmark.advance(&finished(&[record_payload(1, 0x05, 40, 0, 120)]));
        let newest = bookmark.last();
        bookmark.advance(&finished(&[record_payload(1, 0x05, 30, 0, 110)]));
        assert_eq!(bookmark.last(), newest);
    }

    #[tokio::test]
    async fn test_not_connected() {
        let client = PumpClient::serial("/dev/null-pump");
        assert!(!client.is_connected());
        assert!(matches!(client.status().await, Err(Error::NotConnected)));
        assert!(matches!(client.commands(), Err(Error::NotConnected)));
    }
}
