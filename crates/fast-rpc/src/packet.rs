//! The logical Fast packet shared by every wire encoding.

use bytes::Bytes;

/// Correlation identifier carried by every packet.
pub type PacketId = u32;

/// Reserved id meaning "no response expected".
pub const NO_REPLY_ID: PacketId = 0;

/// One message of the Fast protocol, either a request or a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Target API name.
    pub api: String,
    /// Correlation id, [`NO_REPLY_ID`] for fire-and-forget requests.
    pub id: PacketId,
    /// `true` if this packet invokes an API, `false` if it carries a result.
    pub is_request: bool,
    /// Whether the call succeeded. Only meaningful on responses.
    pub success: bool,
    /// Serialized argument list (request) or return value / fault description (response).
    pub body: Bytes,
}

impl Packet {
    /// Create a request packet.
    pub fn request(api: impl Into<String>, id: PacketId, body: Bytes) -> Self {
        Self {
            api: api.into(),
            id,
            is_request: true,
            success: true,
            body,
        }
    }

    /// Build the response to this request, keeping its api name and id.
    #[must_use]
    pub fn reply(&self, success: bool, body: Bytes) -> Self {
        Self {
            api: self.api.clone(),
            id: self.id,
            is_request: false,
            success,
            body,
        }
    }

    /// Whether the sender waits for a response to this packet.
    #[must_use]
    pub const fn expects_reply(&self) -> bool {
        self.id != NO_REPLY_ID
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_keeps_correlation() {
        let request = Packet::request("add", 7, Bytes::from_static(b"[2,3]"));
        let reply = request.reply(false, Bytes::from_static(b"\"boom\""));

        assert_eq!(reply.api, "add");
        assert_eq!(reply.id, 7);
        assert!(!reply.is_request);
        assert!(!reply.success);
    }

    #[test]
    fn test_sentinel_id_expects_no_reply() {
        assert!(!Packet::request("log", NO_REPLY_ID, Bytes::new()).expects_reply());
        assert!(Packet::request("log", 1, Bytes::new()).expects_reply());
    }
}
