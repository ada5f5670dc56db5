//! Signer recovery and address display.

use crate::types::ShortId;
use crate::utils::error::{IndexerError, Result};
use bech32::{Bech32, Hrp};
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, SECP256K1, SecretKey};
use sha2::{Digest, Sha256};

/// Length of a recoverable signature: `r ‖ s ‖ v`.
pub const SIGNATURE_LEN: usize = 65;

fn digest(unsigned_bytes: &[u8]) -> Message {
    Message::from_digest(Sha256::digest(unsigned_bytes).into())
}

/// Recovers the public key that produced `signature` over `unsigned_bytes`.
///
/// # Errors
///
/// `IndexerError::DecodingError` if the signature is not 65 bytes or no key
/// can be recovered from it.
pub fn recover_public_key(unsigned_bytes: &[u8], signature: &[u8]) -> Result<PublicKey> {
    if signature.len() != SIGNATURE_LEN {
        return Err(IndexerError::DecodingError(format!(
            "signature must be {SIGNATURE_LEN} bytes, got {}",
            signature.len()
        )));
    }
    let recovery_id = RecoveryId::from_i32(i32::from(signature[SIGNATURE_LEN - 1]))?;
    let recoverable =
        RecoverableSignature::from_compact(&signature[..SIGNATURE_LEN - 1], recovery_id)?;
    Ok(SECP256K1.recover_ecdsa(&digest(unsigned_bytes), &recoverable)?)
}

/// Address owned by `public_key`.
#[must_use]
pub fn address_of(public_key: &PublicKey) -> ShortId {
    ShortId::from_public_key(&public_key.serialize())
}

/// Produces a recoverable signature over `unsigned_bytes` in the layout
/// [`recover_public_key`] accepts.
#[must_use]
pub fn sign_recoverable(secret: &SecretKey, unsigned_bytes: &[u8]) -> [u8; SIGNATURE_LEN] {
    let (recovery_id, compact) = SECP256K1
        .sign_ecdsa_recoverable(&digest(unsigned_bytes), secret)
        .serialize_compact();
    let mut out = [0u8; SIGNATURE_LEN];
    out[..SIGNATURE_LEN - 1].copy_from_slice(&compact);
    out[SIGNATURE_LEN - 1] = recovery_id.to_i32() as u8;
    out
}

/// Bech32 display string of `address` under `hrp`.
pub fn format_bech32(hrp: &str, address: &ShortId) -> Result<String> {
    let hrp = Hrp::parse(hrp)
        .map_err(|e| IndexerError::ConfigError(format!("Invalid bech32 HRP '{hrp}': {e}")))?;
    bech32::encode::<Bech32>(hrp, address.as_bytes())
        .map_err(|e| IndexerError::DataError(format!("bech32 encoding failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(byte: u8) -> SecretKey {
        SecretKey::from_slice(&[byte; 32]).unwrap()
    }

    #[test]
    fn test_recovers_signer() {
        let sk = secret(7);
        let expected = PublicKey::from_secret_key_global(&sk);
        let sig = sign_recoverable(&sk, b"unsigned tx");

        let recovered = recover_public_key(b"unsigned tx", &sig).unwrap();
        assert_eq!(recovered, expected);
        assert_eq!(address_of(&recovered), address_of(&expected));
    }

    #[test]
    fn test_other_message_recovers_other_key() {
        let sk = secret(7);
        let sig = sign_recoverable(&sk, b"unsigned tx");
        let recovered = recover_public_key(b"tampered", &sig).unwrap();
        assert_ne!(recovered, PublicKey::from_secret_key_global(&sk));
    }

    #[test]
    fn test_malformed_signature_is_decode_error() {
        assert!(matches!(
            recover_public_key(b"x", &[0u8; 64]),
            Err(IndexerError::DecodingError(_))
        ));
        let mut sig = sign_recoverable(&secret(3), b"x");
        sig[64] = 9;
        assert!(matches!(
            recover_public_key(b"x", &sig),
            Err(IndexerError::DecodingError(_))
        ));
    }

    #[test]
    fn test_bech32_display() {
        let addr = ShortId::new([0u8; 20]);
        let display = format_bech32("local", &addr).unwrap();
        assert!(display.starts_with("local1"));
        assert!(format_bech32("", &addr).is_err());
    }
}
