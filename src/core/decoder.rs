//! Payload decoding.
//!
//! The dispatcher and the rewards poller only see [`PayloadDecoder`]; how
//! payload bytes are laid out on the wire is up to the implementation.

use crate::types::{BlockPayload, LogPayload, TracePayload, Utxo};
use crate::utils::error::Result;

/// Turns message bodies and node payloads into typed values.
///
/// Every method fails with `IndexerError::DecodingError` on malformed input
/// or an unknown variant tag.
pub trait PayloadDecoder: Send + Sync {
    fn decode_block(&self, body: &[u8]) -> Result<BlockPayload>;

    fn decode_trace(&self, body: &[u8]) -> Result<TracePayload>;

    fn decode_logs(&self, body: &[u8]) -> Result<LogPayload>;

    /// Decodes one standalone output returned by the node.
    fn decode_utxo(&self, bytes: &[u8]) -> Result<Utxo>;
}

/// Decoder for JSON-encoded payloads.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonPayloadDecoder;

impl PayloadDecoder for JsonPayloadDecoder {
    fn decode_block(&self, body: &[u8]) -> Result<BlockPayload> {
        Ok(serde_json::from_slice(body)?)
    }

    fn decode_trace(&self, body: &[u8]) -> Result<TracePayload> {
        Ok(serde_json::from_slice(body)?)
    }

    fn decode_logs(&self, body: &[u8]) -> Result<LogPayload> {
        Ok(serde_json::from_slice(body)?)
    }

    fn decode_utxo(&self, bytes: &[u8]) -> Result<Utxo> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
