//! AES-256-GCM authenticated encryption
//!
//! Ciphertexts carry the 16-byte tag appended, following the AEAD crate
//! convention. Decryption fails closed: any tag mismatch is reported as a
//! single authentication error, whatever its cause.

use crate::error::{CyberdrivexError, ErrorCategory, ErrorKind, Result};
use crate::kdf::{DerivedKey, SALT_LEN};
use aes_gcm::Nonce;
use aes_gcm::aead::{Aead, Payload};
use rand::RngCore;
use rand::rngs::OsRng;

/// Length of nonce in bytes
pub const NONCE_LEN: usize = 12;

/// Length of the authentication tag appended to every ciphertext
pub const TAG_LEN: usize = 16;

/// Message used for every authentication failure.
pub const AUTHENTICATION_FAILED_MSG: &str = "invalid password or corrupted file";

/// Fresh random salt from the OS CSPRNG.
pub fn fresh_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Fresh random nonce from the OS CSPRNG.
pub fn fresh_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypt `plaintext`, returning ciphertext with the tag appended.
pub fn encrypt(
    key: &DerivedKey,
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
    aad: Option<&[u8]>,
) -> Result<Vec<u8>> {
    let payload = Payload {
        msg: plaintext,
        aad: aad.unwrap_or_default(),
    };
    key.cipher()
        .encrypt(Nonce::from_slice(nonce), payload)
        .map_err(|_| {
            CyberdrivexError::with_kind(
                ErrorCategory::Internal,
                ErrorKind::CipherFailure,
                "AES-GCM encryption failed",
            )
        })
}

/// Decrypt and verify `ciphertext` (tag appended).
pub fn decrypt(
    key: &DerivedKey,
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
    aad: Option<&[u8]>,
) -> Result<Vec<u8>> {
    let payload = Payload {
        msg: ciphertext,
        aad: aad.unwrap_or_default(),
    };
    key.cipher()
        .decrypt(Nonce::from_slice(nonce), payload)
        .map_err(|_| {
            CyberdrivexError::with_kind(
                ErrorCategory::User,
                ErrorKind::AuthenticationFailed,
                AUTHENTICATION_FAILED_MSG,
            )
        })
}
