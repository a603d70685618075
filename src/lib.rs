//! cyberdrivex - password-based file encryption with AES-256-GCM
//!
//! Files are encrypted under a key derived from a password with
//! PBKDF2-HMAC-SHA256 and stored in a self-describing container. Batches of
//! files are processed with per-file isolation and progress reporting, named
//! key records are kept in a persisted [`keystore::KeyStore`], and every
//! outcome is reported as an [`audit::AuditEvent`].

#![forbid(unsafe_code)]

pub mod audit;
pub mod batch;
pub mod cipher;
pub mod container;
pub mod error;
pub mod file_ops;
pub mod kdf;
pub mod keystore;
pub mod passphrase;
pub mod secretcrypt;
pub mod strength;
