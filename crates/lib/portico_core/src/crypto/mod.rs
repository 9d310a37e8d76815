//! AES-256-GCM authenticated encryption and PBKDF2 key derivation.
//!
//! The [`EncryptionService`] holds one master key and produces
//! [`EncryptedBlob`]s with a fresh random 12-byte nonce per call. The free
//! functions [`encrypt_with_key`] / [`decrypt_with_key`] work with an
//! explicit base64 key and a compact `nonce || ciphertext || tag` encoding.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::error::{ClassifiedError, ErrorKind};

/// Nonce size for AES-256-GCM (12 bytes).
const NONCE_SIZE: usize = 12;
/// AES-256 key size (32 bytes).
pub const KEY_SIZE: usize = 32;
/// GCM tag size (16 bytes).
const TAG_SIZE: usize = 16;
/// PBKDF2 iteration count.
pub const PBKDF2_ITERATIONS: u32 = 100_000;
/// Algorithm identifier recorded on every blob.
pub const ALGORITHM: &str = "AES-256-GCM";

/// Encryption errors. All of them are fail-closed.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Malformed ciphertext: {0}")]
    Malformed(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Encryption failed")]
    Encryption,

    #[error("Decryption failed: integrity check did not pass")]
    Decryption,
}

impl ClassifiedError for CryptoError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::CryptographicFailure
    }
}

/// Authenticated cipher text with its nonce and tag, all base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedBlob {
    pub ciphertext: String,
    pub nonce: String,
    pub tag: String,
    pub algorithm: String,
}

/// Symmetric encryption bound to a single master key.
#[derive(Clone)]
pub struct EncryptionService {
    key: [u8; KEY_SIZE],
}

impl std::fmt::Debug for EncryptionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionService").finish_non_exhaustive()
    }
}

impl EncryptionService {
    /// Build from a base64-encoded 256-bit key.
    pub fn new(master_key_b64: &str) -> Result<Self, CryptoError> {
        Ok(Self {
            key: decode_key(master_key_b64)?,
        })
    }

    /// Build from a passphrase and salt via [`derive_key`].
    pub fn from_passphrase(passphrase: &str, salt: &str) -> Result<Self, CryptoError> {
        Self::new(&derive_key(passphrase, salt))
    }

    /// Encrypt `plaintext` under the master key.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedBlob, CryptoError> {
        let (nonce, mut sealed) = seal(&self.key, plaintext)?;
        // aes-gcm appends the tag to the ciphertext.
        let tag = sealed.split_off(sealed.len() - TAG_SIZE);
        Ok(EncryptedBlob {
            ciphertext: STANDARD.encode(&sealed),
            nonce: STANDARD.encode(nonce),
            tag: STANDARD.encode(tag),
            algorithm: ALGORITHM.to_string(),
        })
    }

    /// Encrypt a UTF-8 string.
    pub fn encrypt_str(&self, plaintext: &str) -> Result<EncryptedBlob, CryptoError> {
        self.encrypt(plaintext.as_bytes())
    }

    /// Decrypt a blob produced by [`EncryptionService::encrypt`].
    pub fn decrypt(&self, blob: &EncryptedBlob) -> Result<Vec<u8>, CryptoError> {
        if blob.algorithm != ALGORITHM {
            return Err(CryptoError::UnsupportedAlgorithm(blob.algorithm.clone()));
        }
        let nonce = decode_field("nonce", &blob.nonce)?;
        let tag = decode_field("tag", &blob.tag)?;
        if nonce.len() != NONCE_SIZE {
            return Err(CryptoError::Malformed("nonce must be 12 bytes".into()));
        }
        if tag.len() != TAG_SIZE {
            return Err(CryptoError::Malformed("tag must be 16 bytes".into()));
        }
        let mut sealed = decode_field("ciphertext", &blob.ciphertext)?;
        sealed.extend_from_slice(&tag);
        open(&self.key, &nonce, &sealed)
    }

    /// Decrypt a blob into a UTF-8 string.
    pub fn decrypt_str(&self, blob: &EncryptedBlob) -> Result<String, CryptoError> {
        let bytes = self.decrypt(blob)?;
        String::from_utf8(bytes).map_err(|_| CryptoError::Malformed("plaintext is not UTF-8".into()))
    }
}

/// Generate a fresh random 256-bit key, base64 encoded.
pub fn generate_key() -> String {
    let mut key = [0u8; KEY_SIZE];
    rand::rng().fill_bytes(&mut key);
    STANDARD.encode(key)
}

/// Deterministically derive a 256-bit key from a password and salt
/// (PBKDF2-HMAC-SHA256), base64 encoded.
pub fn derive_key(password: &str, salt: &str) -> String {
    let mut key = [0u8; KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha256>(
        password.as_bytes(),
        salt.as_bytes(),
        PBKDF2_ITERATIONS,
        &mut key,
    );
    STANDARD.encode(key)
}

/// Encrypt with an explicit base64 key.
///
/// Returns base64-encoded `nonce || ciphertext || tag`.
pub fn encrypt_with_key(plaintext: &str, key_b64: &str) -> Result<String, CryptoError> {
    let key = decode_key(key_b64)?;
    let (nonce, sealed) = seal(&key, plaintext.as_bytes())?;

    let mut combined = Vec::with_capacity(NONCE_SIZE + sealed.len());
    combined.extend_from_slice(&nonce);
    combined.extend_from_slice(&sealed);
    Ok(STANDARD.encode(&combined))
}

/// Decrypt base64-encoded `nonce || ciphertext || tag` with an explicit key.
pub fn decrypt_with_key(encrypted_b64: &str, key_b64: &str) -> Result<String, CryptoError> {
    let key = decode_key(key_b64)?;
    let combined = decode_field("value", encrypted_b64)?;

    if combined.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::Malformed("ciphertext too short".into()));
    }

    let plaintext = open(&key, &combined[..NONCE_SIZE], &combined[NONCE_SIZE..])?;
    String::from_utf8(plaintext).map_err(|_| CryptoError::Malformed("plaintext is not UTF-8".into()))
}

fn decode_key(key_b64: &str) -> Result<[u8; KEY_SIZE], CryptoError> {
    let bytes = STANDARD
        .decode(key_b64.trim())
        .map_err(|e| CryptoError::InvalidKey(format!("base64 decode failed: {e}")))?;
    bytes
        .try_into()
        .map_err(|v: Vec<u8>| CryptoError::InvalidKey(format!("expected 32 bytes, got {}", v.len())))
}

fn decode_field(field: &str, value: &str) -> Result<Vec<u8>, CryptoError> {
    STANDARD
        .decode(value)
        .map_err(|e| CryptoError::Malformed(format!("{field}: {e}")))
}

fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<([u8; NONCE_SIZE], Vec<u8>), CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce_bytes);

    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| CryptoError::Encryption)?;
    Ok((nonce_bytes, sealed))
}

fn open(key: &[u8; KEY_SIZE], nonce: &[u8], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| CryptoError::Decryption)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> EncryptionService {
        EncryptionService::new(&generate_key()).unwrap()
    }

    fn flip_first_byte(b64: &str) -> String {
        let mut bytes = STANDARD.decode(b64).unwrap();
        bytes[0] ^= 0x01;
        STANDARD.encode(bytes)
    }

    #[test]
    fn blob_round_trip() {
        let svc = service();
        let blob = svc.encrypt_str("sk-super-secret-api-key-12345").unwrap();
        assert_eq!(blob.algorithm, ALGORITHM);
        assert_eq!(svc.decrypt_str(&blob).unwrap(), "sk-super-secret-api-key-12345");
    }

    #[test]
    fn empty_plaintext_round_trips() {
        let svc = service();
        let blob = svc.encrypt_str("").unwrap();
        assert_eq!(svc.decrypt_str(&blob).unwrap(), "");
    }

    #[test]
    fn encryption_is_not_deterministic() {
        let svc = service();
        let a = svc.encrypt_str("same").unwrap();
        let b = svc.encrypt_str("same").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
        assert_eq!(svc.decrypt_str(&a).unwrap(), svc.decrypt_str(&b).unwrap());
    }

    #[test]
    fn tampered_ciphertext_fails_closed() {
        let svc = service();
        let mut blob = svc.encrypt_str("payload").unwrap();
        blob.ciphertext = flip_first_byte(&blob.ciphertext);
        assert!(matches!(svc.decrypt(&blob), Err(CryptoError::Decryption)));
    }

    #[test]
    fn tampered_tag_fails_closed() {
        let svc = service();
        let mut blob = svc.encrypt_str("payload").unwrap();
        blob.tag = flip_first_byte(&blob.tag);
        assert!(matches!(svc.decrypt(&blob), Err(CryptoError::Decryption)));
    }

    #[test]
    fn wrong_master_key_fails() {
        let blob = service().encrypt_str("secret").unwrap();
        assert!(matches!(service().decrypt(&blob), Err(CryptoError::Decryption)));
    }

    #[test]
    fn rejects_short_keys() {
        let err = EncryptionService::new(&STANDARD.encode([0u8; 16])).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKey(_)));
    }

    #[test]
    fn explicit_key_round_trip() {
        let key = generate_key();
        let encrypted = encrypt_with_key("hello", &key).unwrap();
        assert_eq!(decrypt_with_key(&encrypted, &key).unwrap(), "hello");
        assert!(decrypt_with_key(&encrypted, &generate_key()).is_err());
    }

    #[test]
    fn explicit_key_detects_single_byte_mutation() {
        let key = generate_key();
        let encrypted = encrypt_with_key("hello", &key).unwrap();
        let mut bytes = STANDARD.decode(&encrypted).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x80;
        let mutated = STANDARD.encode(bytes);
        assert!(matches!(
            decrypt_with_key(&mutated, &key),
            Err(CryptoError::Decryption)
        ));
    }

    #[test]
    fn derive_key_is_deterministic_per_salt() {
        let a = derive_key("correct horse", "salt-1");
        let b = derive_key("correct horse", "salt-1");
        let c = derive_key("correct horse", "salt-2");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(STANDARD.decode(a).unwrap().len(), KEY_SIZE);
    }

    #[test]
    fn errors_classify_as_cryptographic() {
        let err = CryptoError::Decryption;
        assert_eq!(err.kind(), ErrorKind::CryptographicFailure);
        assert_eq!(err.public_message(), "A cryptographic operation failed");
    }
}
