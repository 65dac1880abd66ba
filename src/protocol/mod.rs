//! Protocol definitions for pump communication.
//!
//! This module contains the low-level protocol types including:
//! - Frame encoding/decoding
//! - Checksum algorithms
//! - Command codes
//! - Binary field parsing

pub mod checksum;
pub mod command;
pub mod frame;
pub mod parser;

pub use checksum::Checksum;
pub use command::CommandCode;
pub use frame::{
    ByteOrder, Frame, FrameConfig, FrameDecoder, LengthWidth, decode_frame, encode as encode_frame,
};
