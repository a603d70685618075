//! Artifact-level encryption/decryption
//!
//! Ties key derivation, the AEAD and the artifact metadata together:
//! - a fresh 16-byte salt feeds PBKDF2-HMAC-SHA256 (100,000 iterations)
//! - a fresh 12-byte nonce is used once with the derived AES-256-GCM key
//! - the ciphertext (tag appended) is stored alongside name, salt and nonce

use crate::cipher::{self, NONCE_LEN};
use crate::container::{ALGORITHM_ID, EncryptedArtifact};
use crate::error::{CyberdrivexError, ErrorCategory, ErrorKind, Result};
use crate::kdf::{self, SALT_LEN};
use chrono::{DateTime, Utc};
use zeroize::Zeroizing;

/// Encrypt `plaintext` under `password` with a random salt and nonce.
pub fn encrypt(password: &str, original_name: &str, plaintext: &[u8]) -> Result<EncryptedArtifact> {
    let salt = cipher::fresh_salt();
    let nonce = cipher::fresh_nonce();
    encrypt_deterministic(password, original_name, plaintext, &salt, &nonce, Utc::now())
}

/// Encrypt with a caller-provided salt, nonce and timestamp.
///
/// This function is ONLY for testing purposes to generate deterministic output.
/// NEVER use this in production - always use `encrypt()` which generates random salt/nonce.
pub fn encrypt_deterministic(
    password: &str,
    original_name: &str,
    plaintext: &[u8],
    salt: &[u8; SALT_LEN],
    nonce: &[u8; NONCE_LEN],
    created_at: DateTime<Utc>,
) -> Result<EncryptedArtifact> {
    let key = kdf::derive_key(password, salt)?;
    let ciphertext = cipher::encrypt(&key, nonce, plaintext, None)?;

    Ok(EncryptedArtifact {
        original_name: original_name.to_string(),
        algorithm: ALGORITHM_ID.to_string(),
        created_at,
        salt: *salt,
        nonce: *nonce,
        ciphertext,
    })
}

/// Decrypt an artifact. A wrong password and a corrupted ciphertext both
/// surface as [`ErrorKind::AuthenticationFailed`].
pub fn decrypt(password: &str, artifact: &EncryptedArtifact) -> Result<Zeroizing<Vec<u8>>> {
    if artifact.algorithm != ALGORITHM_ID {
        return Err(CyberdrivexError::with_kind(
            ErrorCategory::User,
            ErrorKind::UnsupportedAlgorithm,
            format!("unsupported algorithm {:?}", artifact.algorithm),
        ));
    }
    let key = kdf::derive_key(password, &artifact.salt)?;
    let plaintext = cipher::decrypt(&key, &artifact.nonce, &artifact.ciphertext, None)?;
    Ok(Zeroizing::new(plaintext))
}

/// Whether `password` opens `artifact`.
pub fn verify_integrity(password: &str, artifact: &EncryptedArtifact) -> bool {
    decrypt(password, artifact).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container;
    use chrono::TimeZone;

    #[test]
    fn test_empty_plaintext() {
        let artifact = encrypt("test", "empty.txt", b"").unwrap();
        assert!(decrypt("test", &artifact).unwrap().is_empty());
    }

    #[test]
    fn test_small_plaintext() {
        let artifact = encrypt("test", "hello.txt", b"hello").unwrap();
        assert_eq!(artifact.original_name, "hello.txt");
        assert_eq!(artifact.algorithm, ALGORITHM_ID);
        assert_eq!(decrypt("test", &artifact).unwrap().as_slice(), b"hello");
    }

    #[test]
    fn test_deterministic_encryption() {
        let salt = [1u8; SALT_LEN];
        let nonce = [2u8; NONCE_LEN];
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let a1 = encrypt_deterministic("test", "f", b"hello world", &salt, &nonce, at).unwrap();
        let a2 = encrypt_deterministic("test", "f", b"hello world", &salt, &nonce, at).unwrap();
        assert_eq!(a1, a2);
        assert_eq!(
            container::serialize(&a1).unwrap(),
            container::serialize(&a2).unwrap()
        );
    }

    #[test]
    fn test_fresh_salt_and_nonce_per_call() {
        let a1 = encrypt("test", "same.txt", b"identical").unwrap();
        let a2 = encrypt("test", "same.txt", b"identical").unwrap();
        assert_ne!(a1.salt, a2.salt);
        assert_ne!(a1.nonce, a2.nonce);
        assert_ne!(a1.ciphertext, a2.ciphertext);
    }

    #[test]
    fn test_wrong_password() {
        let artifact = encrypt("correct", "secret.txt", b"secret data").unwrap();
        let err = decrypt("wrong", &artifact).expect_err("expected authentication failure");
        assert_eq!(err.kind, Some(ErrorKind::AuthenticationFailed));
        assert!(!verify_integrity("wrong", &artifact));
        assert!(verify_integrity("correct", &artifact));
    }

    #[test]
    fn test_unsupported_algorithm() {
        let mut artifact = encrypt("test", "f", b"x").unwrap();
        artifact.algorithm = "ChaCha20-Poly1305".to_string();
        let err = decrypt("test", &artifact).expect_err("expected algorithm error");
        assert_eq!(err.kind, Some(ErrorKind::UnsupportedAlgorithm));
        assert!(err.is_format());
    }

    #[test]
    fn test_all_byte_values() {
        let plaintext: Vec<u8> = (0..=255).collect();
        let artifact = encrypt("test", "bytes.bin", &plaintext).unwrap();
        assert_eq!(decrypt("test", &artifact).unwrap().as_slice(), &plaintext[..]);
    }

    #[test]
    fn test_large_plaintext() {
        let plaintext = vec![0x42u8; 128 * 1024];
        let artifact = encrypt("test", "large.bin", &plaintext).unwrap();
        assert_eq!(decrypt("test", &artifact).unwrap().as_slice(), &plaintext[..]);
    }
}
