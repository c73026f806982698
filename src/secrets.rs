//! Provider credential decryption
//!
//! Stored credentials are either plaintext or `<nonce>:<ciphertext>`, where the
//! nonce is 12 bytes (24 hex chars) and the ciphertext is AES-256-GCM output
//! (including its 16-byte tag) in hex. The AES key is the SHA-256 digest of the
//! configured key string.
//!
//! Anything that does not match [`is_encrypted_format`] passes through
//! [`decrypt_credential`] unchanged.

use aes_gcm::Aes256Gcm;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aead::generic_array::GenericArray;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::types::ProviderCredentials;

const NONCE_HEX_LEN: usize = 24;
const TAG_HEX_LEN: usize = 32;

/// True if `value` has the shape of an encrypted credential
///
/// ```
/// use campaign_dispatch::secrets::is_encrypted_format;
///
/// assert!(!is_encrypted_format("plain-secret"));
/// assert!(!is_encrypted_format("has:colon"));
/// assert!(is_encrypted_format(
///     "00112233445566778899aabb:00112233445566778899aabbccddeeff00"
/// ));
/// ```
pub fn is_encrypted_format(value: &str) -> bool {
    let Some((nonce, ciphertext)) = value.split_once(':') else {
        return false;
    };

    nonce.len() == NONCE_HEX_LEN
        && is_hex(nonce)
        && ciphertext.len() > TAG_HEX_LEN
        && ciphertext.len() % 2 == 0
        && is_hex(ciphertext)
}

fn is_hex(value: &str) -> bool {
    value.bytes().all(|b| b.is_ascii_hexdigit())
}

fn cipher_for(key: &str) -> Result<Aes256Gcm> {
    let digest = Sha256::digest(key.as_bytes());
    Aes256Gcm::new_from_slice(&digest)
        .map_err(|e| Error::Secret(format!("invalid key length: {}", e)))
}

/// Decrypt a stored credential, passing plaintext values through unchanged
///
/// An encrypted-looking value that cannot be decrypted with `key`, or that
/// arrives with no key configured, is a permanent configuration problem.
pub fn decrypt_credential(value: &str, key: Option<&str>) -> Result<String> {
    if !is_encrypted_format(value) {
        return Ok(value.to_string());
    }

    let key = key.ok_or_else(|| {
        Error::config(
            "credential is encrypted but no encryption key is configured",
            "secrets.encryption_key",
        )
    })?;

    let (nonce_hex, ciphertext_hex) = value
        .split_once(':')
        .ok_or_else(|| Error::Secret("missing nonce delimiter".to_string()))?;
    let nonce = hex::decode(nonce_hex)
        .map_err(|e| Error::Secret(format!("nonce is not valid hex: {}", e)))?;
    let ciphertext = hex::decode(ciphertext_hex)
        .map_err(|e| Error::Secret(format!("ciphertext is not valid hex: {}", e)))?;

    let plaintext = cipher_for(key)?
        .decrypt(GenericArray::from_slice(&nonce), ciphertext.as_ref())
        .map_err(|_| Error::Secret("authentication tag mismatch (wrong key?)".to_string()))?;

    String::from_utf8(plaintext)
        .map_err(|e| Error::Secret(format!("decrypted credential is not UTF-8: {}", e)))
}

/// Encrypt a credential into the stored `<nonce>:<ciphertext>` format
pub fn encrypt_credential(plaintext: &str, key: &str) -> Result<String> {
    let mut nonce = [0u8; 12];
    rand::thread_rng().fill(&mut nonce);

    let ciphertext = cipher_for(key)?
        .encrypt(GenericArray::from_slice(&nonce), plaintext.as_bytes())
        .map_err(|e| Error::Secret(format!("encryption failed: {}", e)))?;

    Ok(format!("{}:{}", hex::encode(nonce), hex::encode(ciphertext)))
}

/// Decrypt every secret field of a credential set
pub fn decrypt_credentials(
    credentials: &ProviderCredentials,
    key: Option<&str>,
) -> Result<ProviderCredentials> {
    Ok(ProviderCredentials {
        access_key: decrypt_credential(&credentials.access_key, key)?,
        secret_key: decrypt_credential(&credentials.secret_key, key)?,
        region: credentials.region.clone(),
    })
}
