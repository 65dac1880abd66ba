//! Transport layer for pump communication.
//!
//! A transport moves raw bytes. Outbound, the session hands it whole encoded
//! frames through [`Transport::write_bytes`]. Inbound, the transport pushes
//! whatever chunks it reads into a [`LinkSink`]; chunk boundaries need not
//! line up with frame boundaries.

pub mod serial;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Trait for transport implementations.
pub trait Transport: Send {
    /// Writes one encoded frame to the link.
    fn write_bytes(&mut self, data: Bytes) -> BoxFuture<'_, Result<()>>;

    /// Called after inbound bytes failed verification and were discarded.
    fn resync(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Returns true if connected.
    fn is_connected(&self) -> bool;
}

/// What a transport reports to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A chunk of inbound bytes.
    Bytes(Bytes),
    /// The link failed and will deliver nothing more.
    Error(String),
}

/// Inbound side of a session, handed to the transport's reader.
///
/// Dropping every sink of a session ends it as if the link was lost.
#[derive(Debug, Clone)]
pub struct LinkSink {
    tx: mpsc::Sender<LinkEvent>,
}

impl LinkSink {
    pub(crate) const fn new(tx: mpsc::Sender<LinkEvent>) -> Self {
        Self { tx }
    }

    /// Delivers a chunk of inbound bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session has ended.
    pub async fn bytes_received(&self, data: impl Into<Bytes>) -> Result<()> {
        self.tx
            .send(LinkEvent::Bytes(data.into()))
            .await
            .map_err(|_| Error::SessionClosed)
    }

    /// Reports that the link failed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session has already ended.
    pub async fn link_error(&self, reason: impl Into<String>) -> Result<()> {
        self.tx
            .send(LinkEvent::Error(reason.into()))
            .await
            .map_err(|_| Error::SessionClosed)
    }

    /// Returns true once the session stopped listening.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub use serial::SerialTransport;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_link_sink_forwards() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = LinkSink::new(tx);

        sink.bytes_received(vec![1u8, 2, 3]).await.unwrap();
        sink.link_error("unplugged").await.unwrap();

        assert_eq!(
            rx.recv().await,
            Some(LinkEvent::Bytes(Bytes::from_static(&[1, 2, 3])))
        );
        assert_eq!(rx.recv().await, Some(LinkEvent::Error("unplugged".into())));

        drop(rx);
        assert!(sink.is_closed());
        assert!(matches!(
            sink.bytes_received(vec![0u8]).await,
            Err(Error::SessionClosed)
        ));
    }
}
