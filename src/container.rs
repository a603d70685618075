//! Self-describing container for encrypted files
//!
//! The layout is:
//! - metadata length: 4 bytes (little-endian u32)
//! - metadata: UTF-8 JSON with the original name, algorithm, timestamp,
//!   salt and iv (salt and iv as arrays of integers)
//! - ciphertext: everything after the metadata (includes the GCM tag)

use crate::cipher::NONCE_LEN;
use crate::error::{CyberdrivexError, ErrorCategory, ErrorKind, Result};
use crate::kdf::SALT_LEN;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::mem::size_of;

/// Identifier of the only algorithm this crate produces.
pub const ALGORITHM_ID: &str = "AES-256-GCM";

/// Suffix appended to the original name of an encrypted file.
pub const ENCRYPTED_SUFFIX: &str = ".encrypted";

/// An encrypted file together with everything needed to decrypt it, given
/// the password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedArtifact {
    pub original_name: String,
    pub algorithm: String,
    pub created_at: DateTime<Utc>,
    pub salt: [u8; SALT_LEN],
    pub nonce: [u8; NONCE_LEN],
    /// Ciphertext with the authentication tag appended.
    pub ciphertext: Vec<u8>,
}

impl EncryptedArtifact {
    /// Name under which the serialized container is offered to the user.
    pub fn file_name(&self) -> String {
        format!("{}{}", self.original_name, ENCRYPTED_SUFFIX)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Metadata {
    original_name: String,
    algorithm: String,
    timestamp: DateTime<Utc>,
    salt: [u8; SALT_LEN],
    iv: [u8; NONCE_LEN],
}

/// Serialize an artifact into container bytes.
pub fn serialize(artifact: &EncryptedArtifact) -> Result<Vec<u8>> {
    let metadata = Metadata {
        original_name: artifact.original_name.clone(),
        algorithm: artifact.algorithm.clone(),
        timestamp: artifact.created_at,
        salt: artifact.salt,
        iv: artifact.nonce,
    };
    let metadata_json = serde_json::to_vec(&metadata).map_err(|e| {
        CyberdrivexError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::InternalInvariant,
            "failed to encode container metadata",
            e,
        )
    })?;
    let metadata_len = u32::try_from(metadata_json.len()).map_err(|e| {
        CyberdrivexError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::MetadataInvalid,
            "container metadata exceeds 4 GiB",
            e,
        )
    })?;

    let mut output = Vec::with_capacity(
        size_of::<u32>() + metadata_json.len() + artifact.ciphertext.len(),
    );
    output.extend_from_slice(&metadata_len.to_le_bytes());
    output.extend_from_slice(&metadata_json);
    output.extend_from_slice(&artifact.ciphertext);
    Ok(output)
}

/// Parse container bytes back into an artifact.
///
/// Never reads past the end of `blob`: the declared metadata length is
/// checked against the available bytes before slicing.
pub fn parse(blob: &[u8]) -> Result<EncryptedArtifact> {
    let header_len = size_of::<u32>();
    if blob.len() < header_len {
        return Err(CyberdrivexError::with_kind(
            ErrorCategory::User,
            ErrorKind::TruncatedInput,
            "input likely truncated while reading metadata length",
        ));
    }
    let mut length_bytes = [0u8; 4];
    length_bytes.copy_from_slice(&blob[..header_len]);
    let metadata_len = u32::from_le_bytes(length_bytes) as usize;

    let remaining = blob.len() - header_len;
    if metadata_len > remaining {
        return Err(CyberdrivexError::with_kind(
            ErrorCategory::User,
            ErrorKind::TruncatedInput,
            format!(
                "truncated or corrupt input; metadata length {} exceeds the {} bytes left",
                metadata_len, remaining
            ),
        ));
    }

    let metadata_end = header_len + metadata_len;
    let metadata_str = std::str::from_utf8(&blob[header_len..metadata_end]).map_err(|e| {
        CyberdrivexError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::MetadataEncoding,
            "container metadata is not valid UTF-8",
            e,
        )
    })?;
    let metadata: Metadata = serde_json::from_str(metadata_str).map_err(|e| {
        CyberdrivexError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::MetadataInvalid,
            "container metadata is malformed",
            e,
        )
    })?;

    Ok(EncryptedArtifact {
        original_name: metadata.original_name,
        algorithm: metadata.algorithm,
        created_at: metadata.timestamp,
        salt: metadata.salt,
        nonce: metadata.iv,
        ciphertext: blob[metadata_end..].to_vec(),
    })
}
