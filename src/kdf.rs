//! Password-based key derivation
//!
//! PBKDF2-HMAC-SHA256 with a fixed iteration count. The derived bytes never
//! leave this module: they are loaded straight into an AES-256-GCM instance
//! and wiped.

use crate::error::{CyberdrivexError, ErrorCategory, ErrorKind, Result};
use aes_gcm::aead::KeyInit;
use aes_gcm::{Aes256Gcm, Key};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use std::fmt;
use zeroize::Zeroizing;

/// Length of salt in bytes
pub const SALT_LEN: usize = 16;

/// Length of derived key in bytes
pub const KEY_LEN: usize = 32;

/// PBKDF2 iteration count
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// A symmetric key bound to AES-256-GCM.
///
/// The raw key material is not reachable from outside the crate; the only
/// things you can do with a `DerivedKey` are hand it to [`crate::cipher`].
pub struct DerivedKey {
    cipher: Aes256Gcm,
}

impl DerivedKey {
    pub(crate) fn cipher(&self) -> &Aes256Gcm {
        &self.cipher
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKey(<redacted>)")
    }
}

/// Derive an AES-256-GCM key from a password and salt.
///
/// Fails only when `salt` is not exactly [`SALT_LEN`] bytes.
pub fn derive_key(password: &str, salt: &[u8]) -> Result<DerivedKey> {
    if salt.len() != SALT_LEN {
        return Err(CyberdrivexError::with_kind(
            ErrorCategory::User,
            ErrorKind::SaltLength,
            format!("salt must be {} bytes, got {}", SALT_LEN, salt.len()),
        ));
    }

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut *key);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&*key));
    Ok(DerivedKey { cipher })
}
