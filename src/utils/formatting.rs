//! Checksummed text encodings used for identifiers and node RPC payloads.
//!
//! Both encodings append the last 4 bytes of the SHA-256 of the payload before
//! encoding: cb58 uses base58, the hex variant uses `0x`-prefixed lowercase hex.

use crate::utils::error::{IndexerError, Result};
use sha2::{Digest, Sha256};

const CHECKSUM_LEN: usize = 4;

fn checksum(bytes: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = Sha256::digest(bytes);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest[digest.len() - CHECKSUM_LEN..]);
    out
}

fn with_checksum(bytes: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(bytes.len() + CHECKSUM_LEN);
    buf.extend_from_slice(bytes);
    buf.extend_from_slice(&checksum(bytes));
    buf
}

fn strip_checksum(mut buf: Vec<u8>) -> Result<Vec<u8>> {
    if buf.len() < CHECKSUM_LEN {
        return Err(IndexerError::DecodingError(format!(
            "payload of {} bytes is shorter than its checksum",
            buf.len()
        )));
    }
    let payload_len = buf.len() - CHECKSUM_LEN;
    if buf[payload_len..] != checksum(&buf[..payload_len]) {
        return Err(IndexerError::DecodingError("checksum mismatch".to_string()));
    }
    buf.truncate(payload_len);
    Ok(buf)
}

/// Encodes `bytes` as cb58.
#[must_use]
pub fn encode_cb58(bytes: &[u8]) -> String {
    bs58::encode(with_checksum(bytes)).into_string()
}

/// Decodes a cb58 string, verifying its checksum.
pub fn decode_cb58(s: &str) -> Result<Vec<u8>> {
    let raw = bs58::decode(s)
        .into_vec()
        .map_err(|e| IndexerError::DecodingError(format!("invalid base58 '{s}': {e}")))?;
    strip_checksum(raw)
}

/// Encodes `bytes` as `0x`-prefixed hex with a trailing checksum.
#[must_use]
pub fn encode_hex_checksum(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(with_checksum(bytes)))
}

/// Decodes `0x`-prefixed checksummed hex.
pub fn decode_hex_checksum(s: &str) -> Result<Vec<u8>> {
    let digits = s
        .strip_prefix("0x")
        .ok_or_else(|| IndexerError::DecodingError("hex payload is missing 0x prefix".into()))?;
    strip_checksum(hex::decode(digits)?)
}
