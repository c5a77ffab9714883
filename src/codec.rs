//! Wire codecs for RPC frames.
//!
//! A codec pairs with a channel: the channel moves opaque byte payloads, the
//! codec turns frames into those payloads and back. The default is CBOR,
//! which round-trips handler payloads that plain JSON text frames would not
//! (binary blobs, non-string map keys produced by custom serializers). A
//! JSON codec is kept for wire-level debugging against text tooling.

// Rust guideline compliant 2026-03

use crate::error::ChannelError;
use crate::rpc::RpcFrame;

/// Frame serializer/deserializer attached to a channel.
pub trait Codec: Send + Sync {
    /// Encode a frame into an outbound payload.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::Encode` if serialization fails.
    fn encode(&self, frame: &RpcFrame) -> Result<Vec<u8>, ChannelError>;

    /// Decode an inbound payload into a frame.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::Decode` if the payload is not a valid frame.
    fn decode(&self, bytes: &[u8]) -> Result<RpcFrame, ChannelError>;
}

/// CBOR codec (default for the WebSocket presets).
#[derive(Debug, Default, Clone, Copy)]
pub struct CborCodec;

impl Codec for CborCodec {
    fn encode(&self, frame: &RpcFrame) -> Result<Vec<u8>, ChannelError> {
        let mut out = Vec::new();
        ciborium::ser::into_writer(frame, &mut out)
            .map_err(|e| ChannelError::Encode(e.to_string()))?;
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<RpcFrame, ChannelError> {
        ciborium::de::from_reader(bytes).map_err(|e| ChannelError::Decode(e.to_string()))
    }
}

/// UTF-8 JSON codec for debugging against text-frame tooling.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, frame: &RpcFrame) -> Result<Vec<u8>, ChannelError> {
        serde_json::to_vec(frame).map_err(|e| ChannelError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<RpcFrame, ChannelError> {
        serde_json::from_slice(bytes).map_err(|e| ChannelError::Decode(e.to_string()))
    }
}
