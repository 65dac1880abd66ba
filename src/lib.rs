//! # pumpcomm
//!
//! Protocol core for talking to insulin infusion pumps over serial links.
//!
//! The library frames and checksums command messages, pairs requests with
//! their replies over an unreliable byte link, and decodes status, bolus and
//! multi-frame history replies into typed values.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - One request in flight with timeout, retry and cancellation
//! - Typed message variants resolved through a command-code registry
//! - Multi-frame history downloads with sequence checking
//! - Event-driven handling of unsolicited pump messages and alarms
//!
//! ## Quick Start
//!
//! ```no_run
//! use pumpcomm::{BolusSpeed, HistoryKind, PumpClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), pumpcomm::Error> {
//!     // Connect to a pump behind a serial adapter
//!     let mut client = PumpClient::serial("/dev/rfcomm0");
//!     let status = client.connect().await?;
//!     println!("Reservoir: {:.2} U", status.reservoir_units());
//!
//!     // Deliver a bolus
//!     client.start_bolus(1.5, BolusSpeed::Normal).await?;
//!
//!     // Fetch what happened since the last sync
//!     for record in client.sync_history(HistoryKind::All).await? {
//!         println!("{} {:?}", record.timestamp, record.event);
//!     }
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`protocol`] - Wire format (frames, checksums, command codes)
//! - [`message`] - Typed messages and the command-code registry
//! - [`history`] - Multi-frame history downloads
//! - [`types`] - Decoded data (status, alarms, history records)
//! - [`session`] - Request/response dispatcher over a byte link
//! - [`transport`] - Transport trait and the serial implementation
//! - [`event`] - Async event system for unsolicited messages and alarms
//! - [`host`] - Keep-alive and alarm collaborators supplied by the host
//! - [`commands`] - Typed pump commands
//! - [`client`] - High-level [`PumpClient`]

pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod event;
pub mod history;
pub mod host;
pub mod message;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use client::{HistoryBookmark, PumpClient};
pub use commands::CommandHandler;
pub use config::{RequestOptions, SessionConfig, UnknownCommandPolicy};
pub use error::{Error, FrameError, Result};
pub use event::{Event, EventDispatcher, EventFilter, Subscription};
pub use history::{HistoryKind, HistoryMessage, HistoryRecords, HistoryState};
pub use host::{AlarmSink, KeepAlive, KeepAliveGuard};
pub use message::{Message, MessageBody, MessageDefinition, MessageRegistry};
pub use protocol::{Checksum, CommandCode, Frame, FrameConfig, FrameDecoder};
pub use session::{PendingReply, RequestId, Session, SessionBuilder, SessionHandle};
pub use transport::{LinkSink, SerialTransport, Transport, serial::list_ports};
pub use types::{
    AlarmKind, BolusSpeed, BolusType, HistoryEvent, HistoryRecord, PumpStatus, PumpTime,
    StatusFlags,
};
