//! Codec trait and the JSON implementation.
//!
//! The signaling layer never touches bytes directly: everything goes
//! through a [`Codec`], so the wire format can change (e.g. to a binary
//! encoding) without touching the handler or transport code.

use serde::{de::DeserializeOwned, Serialize};

use crate::ProtocolError;

/// Converts message types to and from wire bytes.
///
/// `Send + Sync + 'static` because the codec is stored in long-lived
/// server state shared across connection tasks.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError>;
}

/// JSON codec via `serde_json`.
///
/// Human-readable and inspectable in browser devtools, which suits a
/// signaling channel whose clients are web apps.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClientRequest, Request};

    #[test]
    fn test_json_codec_round_trip() {
        let codec = JsonCodec;
        let req = Request {
            id: 5,
            body: ClientRequest::GetCapabilities,
        };
        let bytes = codec.encode(&req).unwrap();
        let back: Request = codec.decode(&bytes).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn test_json_codec_decode_garbage_fails() {
        let codec = JsonCodec;
        let result: Result<Request, _> = codec.decode(b"][not json");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }
}
