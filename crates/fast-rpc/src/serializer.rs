//! Pluggable body serializers.
//!
//! The session never looks inside a packet body. Argument lists and return
//! values go through a [`Serializer`], chosen per encoding: bincode for the
//! binary TCP encoding and JSON for the WebSocket text encoding.

use crate::error::CodecError;
use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

/// Converts values to and from packet bodies.
pub trait Serializer: Send + Sync + 'static {
    /// Serialize a value into a packet body.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be serialized.
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes, CodecError>;

    /// Deserialize a packet body into a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not a valid encoding of `T`.
    fn deserialize<T: DeserializeOwned>(&self, body: &[u8]) -> Result<T, CodecError>;
}

/// Compact binary serializer using bincode.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeSerializer;

impl Serializer for BincodeSerializer {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes, CodecError> {
        bincode::serialize(value)
            .map(Bytes::from)
            .map_err(|e| CodecError::SerializationFailed(e.to_string()))
    }

    fn deserialize<T: DeserializeOwned>(&self, body: &[u8]) -> Result<T, CodecError> {
        bincode::deserialize(body).map_err(|e| CodecError::DeserializationFailed(e.to_string()))
    }
}

/// JSON serializer. An empty body reads as `null`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes, CodecError> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| CodecError::SerializationFailed(e.to_string()))
    }

    fn deserialize<T: DeserializeOwned>(&self, body: &[u8]) -> Result<T, CodecError> {
        let body: &[u8] = if body.is_empty() { b"null" } else { body };
        serde_json::from_slice(body).map_err(|e| CodecError::DeserializationFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct TestMessage {
        id: u32,
        name: String,
        data: Vec<u8>,
    }

    fn message() -> TestMessage {
        TestMessage {
            id: 42,
            name: "test".to_string(),
            data: vec![1, 2, 3, 4, 5],
        }
    }

    #[test]
    fn test_bincode_encode_decode() {
        let encoded = BincodeSerializer.serialize(&message()).unwrap();
        let decoded: TestMessage = BincodeSerializer.deserialize(&encoded).unwrap();
        assert_eq!(decoded, message());
    }

    #[test]
    fn test_json_argument_list_is_an_array() {
        let encoded = JsonSerializer.serialize(&(2, 3)).unwrap();
        assert_eq!(&encoded[..], b"[2,3]");

        let (a, b): (i32, i32) = JsonSerializer.deserialize(&encoded).unwrap();
        assert_eq!((a, b), (2, 3));
    }

    #[test]
    fn test_json_empty_body_is_unit() {
        JsonSerializer.deserialize::<()>(&[]).unwrap();
        assert_eq!(JsonSerializer.deserialize::<Option<u8>>(&[]).unwrap(), None);
    }

    #[test]
    fn test_decode_error() {
        let bad_data = vec![0xFF, 0xFF, 0xFF];
        assert!(matches!(
            BincodeSerializer.deserialize::<TestMessage>(&bad_data),
            Err(CodecError::DeserializationFailed(_))
        ));
        assert!(matches!(
            JsonSerializer.deserialize::<TestMessage>(&bad_data),
            Err(CodecError::DeserializationFailed(_))
        ));
    }

    #[test]
    fn test_json_type_mismatch() {
        let body = JsonSerializer.serialize("five").unwrap();
        assert!(JsonSerializer.deserialize::<i32>(&body).is_err());
    }
}
