//! Frame encoding and decoding for the pump protocol.
//!
//! The wire format is a length-delimited, checksum-protected frame:
//! ```text
//! ┌──────────────┬──────────────┬─────────────────┬──────────────┐
//! │   length     │   command    │    payload      │   checksum   │
//! │ 1 or 2 bytes │   2 bytes    │ length-2 bytes  │ 1 or 2 bytes │
//! └──────────────┴──────────────┴─────────────────┴──────────────┘
//! ```
//!
//! `length` counts the command code and payload. The checksum covers the same
//! bytes. Multi-byte fields use the configured byte order.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::FrameError;
use crate::protocol::checksum::Checksum;
use crate::protocol::command::CommandCode;

/// Size of the command code field.
pub const COMMAND_SIZE: usize = 2;

/// Byte order of multi-byte frame fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    Big,
    Little,
}

impl ByteOrder {
    fn read_u16(self, bytes: &[u8]) -> u16 {
        match self {
            Self::Big => u16::from_be_bytes([bytes[0], bytes[1]]),
            Self::Little => u16::from_le_bytes([bytes[0], bytes[1]]),
        }
    }

    fn put_u16(self, buf: &mut BytesMut, value: u16) {
        match self {
            Self::Big => buf.put_u16(value),
            Self::Little => buf.put_u16_le(value),
        }
    }
}

/// Width of the length field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LengthWidth {
    #[default]
    One,
    Two,
}

impl LengthWidth {
    /// Number of bytes the length field occupies.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::One => 1,
            Self::Two => 2,
        }
    }

    /// Largest value the length field can hold.
    #[must_use]
    pub const fn max_length(self) -> usize {
        match self {
            Self::One => u8::MAX as usize,
            Self::Two => u16::MAX as usize,
        }
    }
}

/// Wire layout parameters, fixed per pump firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameConfig {
    /// Checksum algorithm.
    pub checksum: Checksum,
    /// Width of the length field.
    pub length_width: LengthWidth,
    /// Byte order for length, command code and checksum.
    pub byte_order: ByteOrder,
}

impl FrameConfig {
    /// Sets the checksum algorithm.
    #[must_use]
    pub const fn checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = checksum;
        self
    }

    /// Sets the length field width.
    #[must_use]
    pub const fn length_width(mut self, width: LengthWidth) -> Self {
        self.length_width = width;
        self
    }

    /// Sets the byte order.
    #[must_use]
    pub const fn byte_order(mut self, order: ByteOrder) -> Self {
        self.byte_order = order;
        self
    }

    /// Largest payload a single frame can carry.
    #[must_use]
    pub const fn max_payload(&self) -> usize {
        self.length_width.max_length() - COMMAND_SIZE
    }

    /// Bytes a frame adds around its payload.
    #[must_use]
    pub const fn overhead(&self) -> usize {
        self.length_width.size() + COMMAND_SIZE + self.checksum.width()
    }
}

/// One deframed protocol unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    command: CommandCode,
    payload: Bytes,
}

impl Frame {
    /// Creates a frame.
    pub fn new(command: CommandCode, payload: impl Into<Bytes>) -> Self {
        Self {
            command,
            payload: payload.into(),
        }
    }

    /// Returns the command code.
    #[must_use]
    pub const fn command(&self) -> CommandCode {
        self.command
    }

    /// Returns the payload bytes.
    #[must_use]
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consumes the frame, returning its payload.
    #[must_use]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Computes the checksum this frame carries under `config`.
    #[must_use]
    pub fn checksum(&self, config: &FrameConfig) -> u16 {
        config.checksum.compute(&self.body(config.byte_order))
    }

    /// Total number of bytes on the wire under `config`.
    #[must_use]
    pub fn wire_len(&self, config: &FrameConfig) -> usize {
        config.overhead() + self.payload.len()
    }

    fn body(&self, order: ByteOrder) -> BytesMut {
        let mut body = BytesMut::with_capacity(COMMAND_SIZE + self.payload.len());
        order.put_u16(&mut body, self.command.value());
        body.put_slice(&self.payload);
        body
    }
}

/// Encodes a frame for transmission.
///
/// # Errors
///
/// Returns [`FrameError::TooLarge`] if the payload does not fit the length field.
pub fn encode(config: &FrameConfig, frame: &Frame) -> Result<Bytes, FrameError> {
    let max = config.max_payload();
    if frame.payload.len() > max {
        return Err(FrameError::TooLarge {
            size: frame.payload.len(),
            max,
        });
    }

    let body = frame.body(config.byte_order);
    let checksum = config.checksum.compute(&body);

    let mut buf = BytesMut::with_capacity(frame.wire_len(config));
    match config.length_width {
        LengthWidth::One => buf.put_u8(body.len() as u8),
        LengthWidth::Two => config.byte_order.put_u16(&mut buf, body.len() as u16),
    }
    buf.put_slice(&body);
    match config.checksum.width() {
        1 => buf.put_u8(checksum as u8),
        _ => config.byte_order.put_u16(&mut buf, checksum),
    }
    Ok(buf.freeze())
}

/// Decodes one frame from the front of `buf`.
///
/// Returns `Ok(Some((frame, consumed)))` when a complete frame is present and
/// `Ok(None)` when more bytes are needed.
///
/// # Errors
///
/// Returns [`FrameError::InvalidLength`] if the length field is too small to
/// hold a command code, or [`FrameError::ChecksumMismatch`] if verification fails.
pub fn decode_frame(config: &FrameConfig, buf: &[u8]) -> Result<Option<(Frame, usize)>, FrameError> {
    let len_size = config.length_width.size();
    if buf.len() < len_size {
        return Ok(None);
    }

    let length = match config.length_width {
        LengthWidth::One => usize::from(buf[0]),
        LengthWidth::Two => usize::from(config.byte_order.read_u16(buf)),
    };
    if length < COMMAND_SIZE {
        return Err(FrameError::InvalidLength(length));
    }

    let check_size = config.checksum.width();
    let total = len_size + length + check_size;
    if buf.len() < total {
        return Ok(None);
    }

    let body = &buf[len_size..len_size + length];
    let trailer = &buf[len_size + length..total];
    let expected = match check_size {
        1 => u16::from(trailer[0]),
        _ => config.byte_order.read_u16(trailer),
    };
    let actual = config.checksum.compute(body);
    if expected != actual {
        return Err(FrameError::ChecksumMismatch { expected, actual });
    }

    let command = CommandCode::new(config.byte_order.read_u16(body));
    let payload = Bytes::copy_from_slice(&body[COMMAND_SIZE..]);
    Ok(Some((Frame { command, payload }, total)))
}

/// Frame decoder that handles partial data.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    config: FrameConfig,
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Creates a new frame decoder.
    #[must_use]
    pub fn new(config: FrameConfig) -> Self {
        Self {
            config,
            buffer: BytesMut::new(),
        }
    }

    /// Feeds data into the decoder.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next complete frame.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was decoded and
    /// `Ok(None)` if more data is needed.
    ///
    /// # Errors
    ///
    /// On a checksum mismatch or an invalid length field the whole buffer is
    /// discarded, since frame boundaries can no longer be trusted. The caller
    /// must resynchronize the link.
    pub fn decode(&mut self) -> Result<Option<Frame>, FrameError> {
        match decode_frame(&self.config, &self.buffer) {
            Ok(Some((frame, consumed))) => {
                self.buffer.advance(consumed);
                Ok(Some(frame))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.buffer.clear();
                Err(e)
            }
        }
    }

    /// Returns the number of bytes currently buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
