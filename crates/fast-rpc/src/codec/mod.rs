//! Wire encodings for Fast packets.
//!
//! Two encodings carry the same logical [`Packet`] fields:
//! - [`BinaryCodec`]: length-prefixed frames over a byte stream (TCP)
//! - [`TextCodec`]: one JSON document per message over a framed transport (WebSocket)

pub mod binary;
pub mod text;

pub use binary::{BinaryCodec, MAX_API_NAME_LEN, MAX_FRAME_SIZE};
pub use text::TextCodec;

use crate::error::Result;
use crate::packet::Packet;

/// Converts packets to and from one wire frame representation.
pub trait PacketCodec: Send + Sync + 'static {
    /// One whole frame as the transport sends it.
    type Frame: Send + 'static;

    /// Encode a packet into a frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the packet cannot be represented in this encoding.
    fn encode_packet(&self, packet: &Packet) -> Result<Self::Frame>;

    /// Decode one whole frame.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the frame is malformed.
    fn decode_packet(&self, frame: Self::Frame) -> Result<Packet>;
}
