//! AES-GCM encryption of objects stored at PubHubs Central.
//!
//! Every encryption draws 32 random bytes `r` and derives a fresh AES-256 key
//! `SHA-256(r || key || "key")` and a 32-byte IV `SHA-256(r || key || "iv")`, so
//! a key is never reused. The output is `r || ciphertext || tag`.
//!
//! Two encodings of the textual key exist. Version 1 (current) base64-decodes
//! it; version 0 used its UTF-8 bytes as-is. [`decrypt`] accepts both.

use aes_gcm::aead::consts::U32;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::error::Error;
use crate::jwt::base64_from_base64url;

/// Length of the random prefix mixed into every key derivation.
pub const RANDOM_LEN: usize = 32;

const TAG_LEN: usize = 16;

/// AES-256-GCM with the 256-bit IV produced by the derivation.
type ObjectCipher = AesGcm<Aes256, U32>;

fn derive(random: &[u8], key: &[u8], label: &[u8]) -> [u8; 32] {
    Sha256::new()
        .chain_update(random)
        .chain_update(key)
        .chain_update(label)
        .finalize()
        .into()
}

fn cipher_for(random: &[u8], key: &[u8]) -> Result<(ObjectCipher, [u8; 32]), Error> {
    let aes_key = derive(random, key, b"key");
    let iv = derive(random, key, b"iv");
    let cipher = ObjectCipher::new_from_slice(&aes_key)
        .map_err(|_| Error::Crypto("invalid AES key length".into()))?;
    Ok((cipher, iv))
}

/// Encrypts `data` under the raw key bytes `key`.
///
/// # Errors
///
/// Returns [`Error::Crypto`] if AES-GCM refuses the input.
pub fn encrypt(data: &[u8], key: &[u8]) -> Result<Vec<u8>, Error> {
    let random: [u8; RANDOM_LEN] = rand::rng().random();
    let (cipher, iv) = cipher_for(&random, key)?;
    let sealed = cipher
        .encrypt(Nonce::<U32>::from_slice(&iv), data)
        .map_err(|_| Error::Crypto("encryption failed".into()))?;

    let mut out = Vec::with_capacity(RANDOM_LEN + sealed.len());
    out.extend_from_slice(&random);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Decrypts `ciphertext` with the raw key bytes `key`.
///
/// # Errors
///
/// Returns [`Error::Crypto`] if the ciphertext is truncated or fails authentication.
pub fn decrypt_with_key_bytes(ciphertext: &[u8], key: &[u8]) -> Result<Vec<u8>, Error> {
    if ciphertext.len() < RANDOM_LEN + TAG_LEN {
        return Err(Error::Crypto(format!(
            "ciphertext too short: {} bytes",
            ciphertext.len()
        )));
    }
    let (random, sealed) = ciphertext.split_at(RANDOM_LEN);
    let (cipher, iv) = cipher_for(random, key)?;
    cipher
        .decrypt(Nonce::<U32>::from_slice(&iv), sealed)
        .map_err(|_| Error::Crypto("decryption failed".into()))
}

/// Decrypts `ciphertext` with a textual key, trying the version 1 encoding first.
///
/// # Errors
///
/// Returns [`Error::Crypto`] if neither encoding of `key` decrypts the data.
pub fn decrypt(ciphertext: &[u8], key: &str) -> Result<Vec<u8>, Error> {
    if let Some(key_bytes) = decode_key(key) {
        match decrypt_with_key_bytes(ciphertext, &key_bytes) {
            Ok(plaintext) => return Ok(plaintext),
            Err(e) => {
                tracing::debug!(error = %e, "Could not decrypt with the current key encoding, trying version 0");
            }
        }
    }
    decrypt_with_key_bytes(ciphertext, key.as_bytes())
}

/// Decodes a base64 or base64url key, padded or not.
#[must_use]
pub fn decode_key(key: &str) -> Option<Vec<u8>> {
    STANDARD
        .decode(base64_from_base64url(key.trim_end_matches('=')))
        .ok()
}
