//! JSON text framing for message-oriented transports.
//!
//! Each packet is one JSON object sent as one WebSocket text message:
//!
//! ```json
//! {"api":"add","id":3,"isRequest":true,"success":true,"body":[2,3]}
//! ```
//!
//! The body is embedded verbatim as a JSON value rather than an opaque string,
//! so the packet body must itself be JSON. An empty body is omitted from the
//! document; any other body round-trips byte for byte.

use super::PacketCodec;
use crate::error::{CodecError, ProtocolError, Result};
use crate::packet::{Packet, PacketId};
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TextPacket {
    #[serde(default)]
    api: String,
    #[serde(default)]
    id: PacketId,
    is_request: bool,
    #[serde(default)]
    success: bool,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_body"
    )]
    body: Option<Box<RawValue>>,
}

// A present `null` body is still a body; only a missing field means empty
fn present_body<'de, D>(deserializer: D) -> std::result::Result<Option<Box<RawValue>>, D::Error>
where
    D: Deserializer<'de>,
{
    Box::<RawValue>::deserialize(deserializer).map(Some)
}

/// Codec for the JSON text Fast encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

impl TextCodec {
    /// Create a new text codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl PacketCodec for TextCodec {
    type Frame = String;

    fn encode_packet(&self, packet: &Packet) -> Result<String> {
        let body = if packet.body.is_empty() {
            None
        } else {
            let json = String::from_utf8(packet.body.to_vec()).map_err(|e| {
                CodecError::SerializationFailed(format!("Packet body is not UTF-8: {e}"))
            })?;
            let raw = RawValue::from_string(json).map_err(|e| {
                CodecError::SerializationFailed(format!("Packet body is not JSON: {e}"))
            })?;
            Some(raw)
        };

        let text = TextPacket {
            api: packet.api.clone(),
            id: packet.id,
            is_request: packet.is_request,
            success: packet.success,
            body,
        };

        serde_json::to_string(&text)
            .map_err(|e| CodecError::SerializationFailed(e.to_string()).into())
    }

    fn decode_packet(&self, frame: String) -> Result<Packet> {
        let text: TextPacket = serde_json::from_str(&frame)
            .map_err(|e| ProtocolError::InvalidFrame(format!("Malformed text packet: {e}")))?;

        let body = text
            .body
            .map_or_else(Bytes::new, |raw| Bytes::from(raw.get().to_owned()));

        Ok(Packet {
            api: text.api,
            id: text.id,
            is_request: text.is_request,
            success: text.success,
            body,
        })
    }
}
