//! Serial transport implementation.
//!
//! Pumps are reached over a USB or Bluetooth serial adapter. The transport
//! writes encoded frames and runs a read loop that forwards raw bytes to the
//! session through a [`LinkSink`].

use std::io;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::error::{Error, Result};
use crate::transport::{LinkSink, Transport};

/// Default baud rate for pump serial adapters.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default delay after opening the port.
pub const DEFAULT_CONNECTION_DELAY: Duration = Duration::from_millis(300);

/// Default window for draining stale bytes after opening the port.
pub const DEFAULT_DRAIN_WINDOW: Duration = Duration::from_millis(500);

/// Size of a single read from the port.
const READ_CHUNK: usize = 1024;

/// Configuration for serial transport.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Delay after opening before anything is sent.
    pub connection_delay: Duration,
    /// How long to discard bytes left over from a previous connection.
    pub drain_window: Duration,
}

impl SerialConfig {
    /// Creates a new serial configuration with default settings.
    #[must_use]
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            connection_delay: DEFAULT_CONNECTION_DELAY,
            drain_window: DEFAULT_DRAIN_WINDOW,
        }
    }

    /// Sets the baud rate.
    #[must_use]
    pub const fn baud_rate(mut self, rate: u32) -> Self {
        self.baud_rate = rate;
        self
    }

    /// Sets the connection delay.
    #[must_use]
    pub const fn connection_delay(mut self, delay: Duration) -> Self {
        self.connection_delay = delay;
        self
    }

    /// Sets the drain window.
    #[must_use]
    pub const fn drain_window(mut self, window: Duration) -> Self {
        self.drain_window = window;
        self
    }
}

/// Serial transport for pump communication.
pub struct SerialTransport {
    config: SerialConfig,
    writer: Option<WriteHalf<SerialStream>>,
    reader: Option<ReadHalf<SerialStream>>,
}

impl SerialTransport {
    /// Creates a new serial transport with the given configuration.
    #[must_use]
    pub const fn new(config: SerialConfig) -> Self {
        Self {
            config,
            writer: None,
            reader: None,
        }
    }

    /// Creates a new serial transport for the given port with default settings.
    #[must_use]
    pub fn with_port(port: impl Into<String>) -> Self {
        Self::new(SerialConfig::new(port))
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &SerialConfig {
        &self.config
    }

    /// Opens the port and discards stale inbound bytes.
    pub async fn connect(&mut self) -> Result<()> {
        if self.writer.is_some() {
            return Ok(());
        }

        tracing::info!(port = %self.config.port, baud = self.config.baud_rate, "opening serial port");

        let mut stream = tokio_serial::new(&self.config.port, self.config.baud_rate)
            .open_native_async()
            .map_err(Error::Serial)?;

        tokio::time::sleep(self.config.connection_delay).await;

        let mut buf = [0u8; READ_CHUNK];
        let mut drained = 0usize;
        let deadline = tokio::time::Instant::now() + self.config.drain_window;
        while tokio::time::Instant::now() < deadline {
            match tokio::time::timeout(Duration::from_millis(20), stream.read(&mut buf)).await {
                Ok(Ok(n)) if n > 0 => drained += n,
                _ => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
        if drained > 0 {
            tracing::debug!(drained, "discarded stale bytes");
        }

        let (reader, writer) = tokio::io::split(stream);
        self.reader = Some(reader);
        self.writer = Some(writer);

        tracing::info!("serial port open");
        Ok(())
    }

    /// Closes the port.
    pub fn disconnect(&mut self) {
        if self.writer.take().is_some() || self.reader.take().is_some() {
            tracing::info!(port = %self.config.port, "closing serial port");
        }
    }

    /// Takes the reader half for use in a background task.
    ///
    /// This can only be called once after connecting.
    pub fn take_reader(&mut self) -> Option<ReadHalf<SerialStream>> {
        self.reader.take()
    }

    /// Forwards everything read from `reader` into `sink`.
    ///
    /// Runs until the port fails or the session stops listening. A port
    /// failure is reported to the session before returning.
    pub async fn run_read_loop(mut reader: ReadHalf<SerialStream>, sink: LinkSink) -> Result<()> {
        let mut buf = [0u8; READ_CHUNK];

        loop {
            let error = match reader.read(&mut buf).await {
                Ok(0) => io::Error::new(io::ErrorKind::ConnectionReset, "serial port closed"),
                Ok(n) => {
                    tracing::trace!(bytes = %hex::encode(&buf[..n]), "serial rx");
                    if sink.bytes_received(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                        tracing::debug!("session stopped listening");
                        return Ok(());
                    }
                    continue;
                }
                Err(e) => e,
            };

            tracing::error!(%error, "serial read failed");
            // The session may already be gone.
            let _ = sink.link_error(error.to_string()).await;
            return Err(Error::Io(error));
        }
    }
}

impl Transport for SerialTransport {
    fn write_bytes(&mut self, data: Bytes) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let writer = self.writer.as_mut().ok_or(Error::NotConnected)?;
            tracing::trace!(bytes = %hex::encode(&data), "serial tx");
            writer.write_all(&data).await?;
            writer.flush().await?;
            Ok(())
        })
    }

    fn is_connected(&self) -> bool {
        self.writer.is_some()
    }
}

/// Lists available serial ports.
///
/// # Errors
///
/// Returns an error if the port list cannot be retrieved.
pub fn list_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports().map_err(Error::Serial)?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_config_defaults() {
        let config = SerialConfig::new("/dev/ttyUSB0");
        assert_eq!(config.port, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(config.drain_window, DEFAULT_DRAIN_WINDOW);
    }

    #[test]
    fn test_serial_config_builder() {
        let config = SerialConfig::new("/dev/rfcomm0")
            .baud_rate(9600)
            .connection_delay(Duration::from_secs(1))
            .drain_window(Duration::ZERO);
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.connection_delay, Duration::from_secs(1));
        assert_eq!(config.drain_window, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_write_requires_connection() {
        let mut transport = SerialTransport::with_port("/dev/null-pump");
        assert!(!transport.is_connected());
        let err = transport
            .write_bytes(Bytes::from_static(&[0x02]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }

    #[test]
    #[ignore = "Requires /sys/class/tty - not available in sandboxed builds"]
    fn test_list_ports() {
        let _ = list_ports();
    }
}
