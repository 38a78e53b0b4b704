//! Envelope encryption for certificate payloads at rest
//!
//! Each sealed payload gets its own random 256-bit data key; the data
//! key is wrapped by the process-wide master key. Rotating the master
//! key therefore means rewrapping 60 bytes per row, not recrypting
//! every container.
//!
//! Blob layout, all lengths fixed except the tail:
//!
//! ```text
//! version(1) | key_nonce(12) | wrapped_key(32) | key_tag(16)
//!            | payload_nonce(12) | payload_tag(16) | ciphertext(..)
//! ```

use openssl::rand::rand_bytes;
use openssl::symm::{decrypt_aead, encrypt_aead, Cipher};

use crate::error::CryptoError;

const VERSION: u8 = 1;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = 1 + NONCE_LEN + KEY_LEN + TAG_LEN + NONCE_LEN + TAG_LEN;

/// Process-wide wrapping key for the vault.
///
/// Loaded once at startup from `CLINSIGN_MASTER_KEY` (64 hex chars) and
/// shared by reference. Never serialized, never logged.
#[derive(Clone)]
pub struct MasterKey([u8; KEY_LEN]);

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

impl MasterKey {
    /// Read the key from the `CLINSIGN_MASTER_KEY` environment variable.
    pub fn from_env() -> Result<Self, CryptoError> {
        let raw = std::env::var("CLINSIGN_MASTER_KEY").map_err(|_| CryptoError::BadMasterKey)?;
        let bytes = hex::decode(raw.trim()).map_err(|_| CryptoError::BadMasterKey)?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| CryptoError::BadMasterKey)?;
        Ok(Self(key))
    }

    /// Fresh random key, mainly for tests and key provisioning tools.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut key = [0u8; KEY_LEN];
        rand_bytes(&mut key)?;
        Ok(Self(key))
    }

    /// Encrypt `payload` under a fresh data key wrapped by this master key.
    pub fn seal(&self, payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = Cipher::aes_256_gcm();

        let mut data_key = [0u8; KEY_LEN];
        rand_bytes(&mut data_key)?;

        let mut key_nonce = [0u8; NONCE_LEN];
        rand_bytes(&mut key_nonce)?;
        let mut key_tag = [0u8; TAG_LEN];
        let wrapped_key = encrypt_aead(
            cipher,
            &self.0,
            Some(&key_nonce),
            &[],
            &data_key,
            &mut key_tag,
        )?;

        let mut payload_nonce = [0u8; NONCE_LEN];
        rand_bytes(&mut payload_nonce)?;
        let mut payload_tag = [0u8; TAG_LEN];
        let ciphertext = encrypt_aead(
            cipher,
            &data_key,
            Some(&payload_nonce),
            &[],
            payload,
            &mut payload_tag,
        )?;

        let mut blob = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        blob.push(VERSION);
        blob.extend_from_slice(&key_nonce);
        blob.extend_from_slice(&wrapped_key);
        blob.extend_from_slice(&key_tag);
        blob.extend_from_slice(&payload_nonce);
        blob.extend_from_slice(&payload_tag);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    /// Decrypt a blob produced by [`seal`](Self::seal).
    ///
    /// Any structural damage, truncation or key mismatch collapses into
    /// [`CryptoError::Envelope`]; the caller learns nothing about which
    /// layer failed.
    pub fn open(&self, blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if blob.len() < HEADER_LEN || blob[0] != VERSION {
            return Err(CryptoError::Envelope);
        }

        let mut offset = 1;
        let key_nonce = &blob[offset..offset + NONCE_LEN];
        offset += NONCE_LEN;
        let wrapped_key = &blob[offset..offset + KEY_LEN];
        offset += KEY_LEN;
        let key_tag = &blob[offset..offset + TAG_LEN];
        offset += TAG_LEN;
        let payload_nonce = &blob[offset..offset + NONCE_LEN];
        offset += NONCE_LEN;
        let payload_tag = &blob[offset..offset + TAG_LEN];
        offset += TAG_LEN;
        let ciphertext = &blob[offset..];

        let cipher = Cipher::aes_256_gcm();
        let data_key = decrypt_aead(cipher, &self.0, Some(key_nonce), &[], wrapped_key, key_tag)
            .map_err(|_| CryptoError::Envelope)?;
        decrypt_aead(
            cipher,
            &data_key,
            Some(payload_nonce),
            &[],
            ciphertext,
            payload_tag,
        )
        .map_err(|_| CryptoError::Envelope)
    }
}
