//! Authenticated encryption for the transfer payload.
//!
//! One AES-256-GCM key per session, generated on the offering side and
//! carried to the peer inside the out-of-band signaling payload in exported
//! (base64) form. Every encryption uses a fresh random 96-bit nonce; the
//! nonce is prepended to the ciphertext (`[nonce ‖ ciphertext+tag]`) and
//! never sent separately. Each session uses a fresh key, so random nonces
//! give a negligible collision probability for the volumes in scope and no
//! counter is needed.
//!
//! The key lives only in volatile session memory and is never persisted.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;

use crate::config::NONCE_LEN;
use crate::error::TransferError;

/// Opaque 256-bit symmetric session key.
///
/// Generated once per session, exportable for the one-time out-of-band
/// exchange, discarded when the session ends.
#[derive(Clone)]
pub struct EncryptionKey {
    bytes: [u8; 32],
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material must never leak into logs.
        f.write_str("EncryptionKey(..)")
    }
}

impl EncryptionKey {
    /// Generate a fresh random session key.
    ///
    /// # Errors
    ///
    /// Fails only when the OS entropy source does. Fatal, non-retryable.
    pub fn generate() -> Result<Self, TransferError> {
        let mut bytes = [0u8; 32];
        rand::RngCore::try_fill_bytes(&mut rand::thread_rng(), &mut bytes)
            .map_err(|_| TransferError::KeyGenerationFailed)?;
        Ok(Self { bytes })
    }

    /// Export the key to its transportable string form (base64).
    ///
    /// Round-trips losslessly through [`EncryptionKey::import`].
    pub fn export(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.bytes)
    }

    /// Import a key from its exported string form.
    ///
    /// # Errors
    ///
    /// `InvalidKeyFormat` when the string is not base64 or does not decode
    /// to exactly 32 bytes.
    pub fn import(exported: &str) -> Result<Self, TransferError> {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(exported.trim())
            .map_err(|e| TransferError::InvalidKeyFormat(e.to_string()))?;
        let bytes: [u8; 32] = decoded.try_into().map_err(|v: Vec<u8>| {
            TransferError::InvalidKeyFormat(format!("expected 32 bytes, got {}", v.len()))
        })?;
        Ok(Self { bytes })
    }

    /// Encrypt `plaintext` with a fresh random nonce.
    ///
    /// Returns the combined `[nonce ‖ ciphertext+tag]` buffer along with the
    /// nonce that was used, so the caller can persist it for
    /// restart-reproducible re-encryption.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<(Vec<u8>, [u8; NONCE_LEN]), TransferError> {
        let nonce: [u8; NONCE_LEN] = rand::random();
        let combined = self.encrypt_with_nonce(plaintext, &nonce)?;
        Ok((combined, nonce))
    }

    /// Encrypt `plaintext` under an explicit nonce.
    ///
    /// Used when resuming a transfer after a restart: re-encrypting with the
    /// persisted nonce reproduces the byte-identical ciphertext stream, so
    /// already-sent chunks stay valid on the receiving side. Never call this
    /// twice with the same nonce for different plaintexts.
    pub fn encrypt_with_nonce(
        &self,
        plaintext: &[u8],
        nonce: &[u8; NONCE_LEN],
    ) -> Result<Vec<u8>, TransferError> {
        let cipher =
            Aes256Gcm::new_from_slice(&self.bytes).map_err(|_| TransferError::DecryptionFailed)?;
        let ct = cipher
            .encrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: plaintext,
                    aad: &[],
                },
            )
            .map_err(|_| TransferError::DecryptionFailed)?;
        let mut combined = Vec::with_capacity(NONCE_LEN + ct.len());
        combined.extend_from_slice(nonce);
        combined.extend_from_slice(&ct);
        Ok(combined)
    }

    /// Decrypt a combined `[nonce ‖ ciphertext+tag]` buffer.
    ///
    /// # Errors
    ///
    /// `TruncatedTransfer` when the buffer is shorter than the nonce, and
    /// `AuthenticationFailed` when the integrity tag does not verify. No
    /// partial or garbage plaintext is ever returned.
    pub fn decrypt(&self, combined: &[u8]) -> Result<Vec<u8>, TransferError> {
        if combined.len() < NONCE_LEN {
            return Err(TransferError::TruncatedTransfer {
                got: combined.len(),
                min: NONCE_LEN,
            });
        }
        let (nonce, ciphertext) = combined.split_at(NONCE_LEN);
        let cipher =
            Aes256Gcm::new_from_slice(&self.bytes).map_err(|_| TransferError::DecryptionFailed)?;
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| TransferError::AuthenticationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let key = EncryptionKey::generate().unwrap();
        for len in [0usize, 1, 13, 4096, 100_000] {
            let plaintext: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let (combined, nonce) = key.encrypt(&plaintext).unwrap();
            assert_eq!(&combined[..NONCE_LEN], &nonce);
            assert_eq!(key.decrypt(&combined).unwrap(), plaintext);
        }
    }

    #[test]
    fn export_import_round_trip() {
        let key = EncryptionKey::generate().unwrap();
        let imported = EncryptionKey::import(&key.export()).unwrap();
        let (combined, _) = key.encrypt(b"payload").unwrap();
        assert_eq!(imported.decrypt(&combined).unwrap(), b"payload");
    }

    #[test]
    fn import_rejects_malformed_input() {
        assert!(matches!(
            EncryptionKey::import("not base64!!"),
            Err(TransferError::InvalidKeyFormat(_))
        ));
        // Valid base64, wrong length.
        let short = base64::engine::general_purpose::STANDARD.encode([0u8; 16]);
        assert!(matches!(
            EncryptionKey::import(&short),
            Err(TransferError::InvalidKeyFormat(_))
        ));
    }

    #[test]
    fn tamper_detection() {
        let key = EncryptionKey::generate().unwrap();
        let (combined, _) = key.encrypt(b"do not touch").unwrap();

        // Flip one bit in every position: nonce, ciphertext body, tag.
        for pos in [0, NONCE_LEN, combined.len() - 1] {
            let mut corrupted = combined.clone();
            corrupted[pos] ^= 0x01;
            assert!(matches!(
                key.decrypt(&corrupted),
                Err(TransferError::AuthenticationFailed)
            ));
        }
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let key = EncryptionKey::generate().unwrap();
        let other = EncryptionKey::generate().unwrap();
        let (combined, _) = key.encrypt(b"secret").unwrap();
        assert!(matches!(
            other.decrypt(&combined),
            Err(TransferError::AuthenticationFailed)
        ));
    }

    #[test]
    fn truncated_input_is_rejected() {
        let key = EncryptionKey::generate().unwrap();
        assert!(matches!(
            key.decrypt(&[0u8; 5]),
            Err(TransferError::TruncatedTransfer { got: 5, min: 12 })
        ));
    }

    #[test]
    fn explicit_nonce_is_deterministic() {
        let key = EncryptionKey::generate().unwrap();
        let nonce = [7u8; NONCE_LEN];
        let a = key.encrypt_with_nonce(b"same bytes", &nonce).unwrap();
        let b = key.encrypt_with_nonce(b"same bytes", &nonce).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn fresh_nonce_per_call() {
        let key = EncryptionKey::generate().unwrap();
        let (_, n1) = key.encrypt(b"x").unwrap();
        let (_, n2) = key.encrypt(b"x").unwrap();
        assert_ne!(n1, n2);
    }
}
