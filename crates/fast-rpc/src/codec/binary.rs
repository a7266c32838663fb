//! Length-prefixed binary framing for stream transports.
//!
//! Frame layout (all integers big-endian):
//!
//! ```text
//! +-----------+---------+-----------+--------+-------------+-----------+------+
//! | total u32 | api_len | api utf-8 | id u32 | is_request  | success   | body |
//! |           |   u8    |           |        | u8 (0 or 1) | u8 (0/1)  |      |
//! +-----------+---------+-----------+--------+-------------+-----------+------+
//! ```
//!
//! `total` counts the whole frame including itself.

use super::PacketCodec;
use crate::error::{Error, ProtocolError, Result};
use crate::packet::Packet;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::Decoder;

/// Maximum frame size (10MB by default).
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Longest API name the one-byte length prefix can carry.
pub const MAX_API_NAME_LEN: usize = u8::MAX as usize;

const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest frame the `u32` length prefix can describe.
const MAX_ENCODABLE_FRAME_SIZE: usize = u32::MAX as usize;

/// Smallest possible frame: prefix, api length, empty api, id and both flags.
const MIN_FRAME_SIZE: usize = LENGTH_PREFIX_SIZE + 1 + 4 + 2;

/// Codec for the binary Fast encoding.
#[derive(Debug, Clone)]
pub struct BinaryCodec {
    max_frame_size: usize,
}

impl BinaryCodec {
    /// Create a new binary codec.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Create a codec with custom max frame size.
    ///
    /// Sizes beyond what the length prefix can describe are clamped to it.
    #[must_use]
    pub const fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = if size > MAX_ENCODABLE_FRAME_SIZE {
            MAX_ENCODABLE_FRAME_SIZE
        } else {
            size
        };
        self
    }

    /// Maximum accepted frame size in bytes.
    #[must_use]
    pub const fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn check_frame_len(&self, frame_len: usize) -> Result<()> {
        if frame_len < MIN_FRAME_SIZE {
            return Err(ProtocolError::InvalidFrame(format!(
                "Frame length {frame_len} is below the minimum of {MIN_FRAME_SIZE}"
            ))
            .into());
        }
        if frame_len > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: frame_len,
                max: self.max_frame_size,
            }
            .into());
        }
        Ok(())
    }
}

impl Default for BinaryCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketCodec for BinaryCodec {
    type Frame = Bytes;

    fn encode_packet(&self, packet: &Packet) -> Result<Bytes> {
        let api = packet.api.as_bytes();
        if api.len() > MAX_API_NAME_LEN {
            return Err(ProtocolError::ApiNameTooLong {
                len: api.len(),
                max: MAX_API_NAME_LEN,
            }
            .into());
        }

        let frame_len = MIN_FRAME_SIZE + api.len() + packet.body.len();
        if frame_len > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: frame_len,
                max: self.max_frame_size,
            }
            .into());
        }

        let total = u32::try_from(frame_len).map_err(|_| ProtocolError::FrameTooLarge {
            size: frame_len,
            max: MAX_ENCODABLE_FRAME_SIZE,
        })?;

        let mut buf = BytesMut::with_capacity(frame_len);
        buf.put_u32(total);
        #[allow(clippy::cast_possible_truncation)]
        buf.put_u8(api.len() as u8);
        buf.put_slice(api);
        buf.put_u32(packet.id);
        buf.put_u8(u8::from(packet.is_request));
        buf.put_u8(u8::from(packet.success));
        buf.put_slice(&packet.body);

        Ok(buf.freeze())
    }

    fn decode_packet(&self, frame: Bytes) -> Result<Packet> {
        if frame.len() < LENGTH_PREFIX_SIZE {
            return Err(ProtocolError::InvalidFrame("Truncated length prefix".to_string()).into());
        }
        self.check_frame_len(frame.len())?;
        parse_frame(frame)
    }
}

impl Decoder for BinaryCodec {
    type Item = Packet;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Packet>> {
        if buf.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        // Peek at the length prefix without consuming
        let mut prefix = &buf[..LENGTH_PREFIX_SIZE];
        let frame_len = prefix.get_u32() as usize;
        self.check_frame_len(frame_len)?;

        if buf.len() < frame_len {
            buf.reserve(frame_len - buf.len());
            return Ok(None);
        }

        let frame = buf.split_to(frame_len).freeze();
        parse_frame(frame).map(Some)
    }
}

fn parse_frame(frame: Bytes) -> Result<Packet> {
    let mut cursor = frame.clone();

    let total = cursor.get_u32() as usize;
    if total != frame.len() {
        return Err(ProtocolError::InvalidFrame(format!(
            "Length prefix {total} does not match frame size {}",
            frame.len()
        ))
        .into());
    }

    let api_len = cursor.get_u8() as usize;
    // id + two flags must follow the api name
    if cursor.remaining() < api_len + 4 + 2 {
        return Err(ProtocolError::InvalidFrame(format!(
            "API name length {api_len} overruns frame of {total} bytes"
        ))
        .into());
    }

    let api_bytes = cursor.split_to(api_len);
    let api = std::str::from_utf8(&api_bytes)
        .map_err(|e| ProtocolError::InvalidFrame(format!("API name is not UTF-8: {e}")))?
        .to_string();

    let id = cursor.get_u32();
    let is_request = read_flag("is_request", cursor.get_u8())?;
    let success = read_flag("success", cursor.get_u8())?;

    Ok(Packet {
        api,
        id,
        is_request,
        success,
        body: cursor,
    })
}

fn read_flag(field: &'static str, value: u8) -> Result<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(ProtocolError::InvalidFlag { field, value }.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::NO_REPLY_ID;
    use proptest::prelude::*;

    fn sample() -> Packet {
        Packet::request("add", 42, Bytes::from_static(&[1, 2, 3]))
    }

    #[test]
    fn test_frame_layout() {
        let frame = BinaryCodec::new().encode_packet(&sample()).unwrap();

        assert_eq!(
            &frame[..],
            &[0, 0, 0, 17, 3, b'a', b'd', b'd', 0, 0, 0, 42, 1, 1, 1, 2, 3]
        );
    }

    #[test]
    fn test_frame_roundtrip() {
        let codec = BinaryCodec::new();
        for packet in [
            Packet::request("log", NO_REPLY_ID, Bytes::new()),
            sample(),
            sample().reply(false, Bytes::from_static(b"failed")),
        ] {
            let frame = codec.encode_packet(&packet).unwrap();
            assert_eq!(codec.decode_packet(frame).unwrap(), packet);
        }
    }

    #[test]
    fn test_partial_frame() {
        let mut codec = BinaryCodec::new();
        let frame = codec.encode_packet(&sample()).unwrap();

        let mut buf = BytesMut::new();
        buf.put_slice(&frame[..2]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.put_slice(&frame[2..10]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.put_slice(&frame[10..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(sample()));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut codec = BinaryCodec::new();
        let first = sample();
        let second = Packet::request("log", NO_REPLY_ID, Bytes::from_static(b"hello"));

        let mut buf = BytesMut::new();
        buf.put(codec.encode_packet(&first).unwrap());
        buf.put(codec.encode_packet(&second).unwrap());

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(first));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(second));
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_invalid_flag_rejected() {
        let mut codec = BinaryCodec::new();
        let mut buf = BytesMut::from(&codec.encode_packet(&sample()).unwrap()[..]);
        buf[12] = 7;

        assert!(matches!(
            codec.decode(&mut buf),
            Err(Error::Protocol(ProtocolError::InvalidFlag {
                field: "is_request",
                value: 7
            }))
        ));
    }

    #[test]
    fn test_api_length_overrun_rejected() {
        let codec = BinaryCodec::new();
        let mut frame = BytesMut::from(&codec.encode_packet(&sample()).unwrap()[..]);
        frame[4] = 200;

        assert!(matches!(
            codec.decode_packet(frame.freeze()),
            Err(Error::Protocol(ProtocolError::InvalidFrame(_)))
        ));
    }

    #[test]
    fn test_frame_too_large() {
        let mut codec = BinaryCodec::new().with_max_frame_size(32);
        let mut buf = BytesMut::new();
        buf.put_u32(1024);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(Error::Protocol(ProtocolError::FrameTooLarge { size: 1024, max: 32 }))
        ));

        let big = Packet::request("add", 1, Bytes::from(vec![0; 64]));
        assert!(codec.encode_packet(&big).is_err());
    }

    #[test]
    fn test_max_frame_size_clamped_to_prefix_range() {
        let codec = BinaryCodec::new().with_max_frame_size(usize::MAX);
        assert_eq!(codec.max_frame_size(), u32::MAX as usize);

        let codec = BinaryCodec::new().with_max_frame_size(64);
        assert_eq!(codec.max_frame_size(), 64);
    }

    #[test]
    fn test_length_below_minimum_rejected() {
        let mut codec = BinaryCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32(3);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_api_name_too_long() {
        let packet = Packet::request("x".repeat(MAX_API_NAME_LEN + 1), 1, Bytes::new());
        assert!(matches!(
            BinaryCodec::new().encode_packet(&packet),
            Err(Error::Protocol(ProtocolError::ApiNameTooLong { .. }))
        ));
    }

    proptest! {
        #[test]
        fn prop_arbitrary_chunking_decodes_the_same(
            body in proptest::collection::vec(any::<u8>(), 0..256),
            cut in 0usize..300,
        ) {
            let mut codec = BinaryCodec::new();
            let packet = Packet::request("echo", 9, Bytes::from(body));
            let frame = codec.encode_packet(&packet).unwrap();
            let cut = cut.min(frame.len());

            let mut buf = BytesMut::new();
            buf.put_slice(&frame[..cut]);
            let early = codec.decode(&mut buf).unwrap();
            if cut < frame.len() {
                prop_assert!(early.is_none());
                buf.put_slice(&frame[cut..]);
                prop_assert_eq!(codec.decode(&mut buf).unwrap(), Some(packet));
            } else {
                prop_assert_eq!(early, Some(packet));
            }
        }

        #[test]
        fn prop_garbage_never_panics(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            let mut codec = BinaryCodec::new();
            let mut buf = BytesMut::from(&data[..]);
            let _ = codec.decode(&mut buf);
        }
    }
}
