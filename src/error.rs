use std::error::Error as StdError;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// Any failure that cannot be confidently attributed to any other error
    /// category in this enum.
    ///
    /// Use of Internal is never a guarantee that the error is not caused by
    /// the user, merely that the code cannot tell.
    Internal,

    /// The user provided invalid input or performed an action that is
    /// unsupported or impossible to complete.
    User,
}

/// Fine-grained condition flags for consumers that want to branch on error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A batch or key operation was refused before any work began (no
    /// inputs, empty password, empty key name).
    Policy,
    /// The password scored below the strength gate for encryption.
    WeakPassword,
    /// Container data ended before the declared metadata block.
    TruncatedInput,
    /// The metadata block is not valid UTF-8.
    MetadataEncoding,
    /// The metadata block is not the expected JSON document.
    MetadataInvalid,
    /// A salt of the wrong length was handed to key derivation.
    SaltLength,
    /// The container names an algorithm other than AES-256-GCM.
    UnsupportedAlgorithm,
    /// The authentication tag did not verify. Caused by a wrong password,
    /// tampering or corruption; the cases are indistinguishable.
    AuthenticationFailed,
    /// AES-GCM refused to seal the payload.
    CipherFailure,
    /// A key record offered for import is missing required fields or is
    /// not valid JSON.
    ImportInvalid,
    /// No key record with the requested id exists.
    KeyNotFound,
    /// Reading or writing the key store's persisted state failed.
    Storage,
    /// Password could not be obtained from the configured reader.
    PassphraseUnavailable,
    /// Unexpected state reached within cyberdrivex logic.
    InternalInvariant,
    /// Interaction with the filesystem, stdin/stdout, or other I/O failed.
    Io,
}

#[derive(Debug, Error)]
#[error("{msg}")]
pub struct CyberdrivexError {
    /// Broad error category, always provided.
    pub category: ErrorCategory,
    /// Optional specific condition tag for consumers that need to
    /// branch their behavior. Any code consuming errors MUST handle
    /// the absence of a defined kind.
    pub kind: Option<ErrorKind>,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    msg: String,
}

impl CyberdrivexError {
    /// Creates a new error with a required category and display message.
    pub fn new(category: ErrorCategory, msg: impl Into<String>) -> Self {
        Self {
            category,
            kind: None,
            source: None,
            msg: msg.into(),
        }
    }

    /// Creates a new error that also tags the failure with a kind.
    pub fn with_kind(category: ErrorCategory, kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            category,
            kind: Some(kind),
            source: None,
            msg: msg.into(),
        }
    }

    /// Creates a new error that carries both a kind tag and the originating source error.
    pub fn with_kind_and_source(
        category: ErrorCategory,
        kind: ErrorKind,
        msg: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            category,
            kind: Some(kind),
            source: Some(Box::new(source)),
            msg: msg.into(),
        }
    }

    /// The user-facing message carried by the error.
    pub fn message(&self) -> &str {
        &self.msg
    }

    /// Wraps the current error with a higher-level message while preserving the original as source.
    pub fn with_context(self, msg: impl Into<String>) -> Self {
        let category = self.category;
        let kind = self.kind;
        Self {
            category,
            kind,
            source: Some(Box::new(self)),
            msg: msg.into(),
        }
    }

    /// The message followed by every message in the source chain, joined
    /// by `": "`.
    pub fn chain_message(&self) -> String {
        let mut out = self.msg.clone();
        let mut next = StdError::source(self);
        while let Some(err) = next {
            out.push_str(": ");
            out.push_str(&err.to_string());
            next = err.source();
        }
        out
    }

    /// Batch-level refusal: nothing was read, derived or encrypted.
    pub fn is_policy(&self) -> bool {
        matches!(self.kind, Some(ErrorKind::Policy | ErrorKind::WeakPassword))
    }

    /// Wrong password or corrupted ciphertext.
    pub fn is_authentication(&self) -> bool {
        self.kind == Some(ErrorKind::AuthenticationFailed)
    }

    /// The container could not be parsed; the cipher was never invoked.
    pub fn is_format(&self) -> bool {
        matches!(
            self.kind,
            Some(
                ErrorKind::TruncatedInput
                    | ErrorKind::MetadataEncoding
                    | ErrorKind::MetadataInvalid
                    | ErrorKind::SaltLength
                    | ErrorKind::UnsupportedAlgorithm
            )
        )
    }

    pub fn is_import(&self) -> bool {
        self.kind == Some(ErrorKind::ImportInvalid)
    }

    pub fn is_storage(&self) -> bool {
        self.kind == Some(ErrorKind::Storage)
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, CyberdrivexError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_with_context_keeps_kind_and_category() {
        let inner = CyberdrivexError::with_kind(
            ErrorCategory::User,
            ErrorKind::AuthenticationFailed,
            "invalid password or corrupted file",
        );
        let outer = inner.with_context("failed to decrypt report.pdf.encrypted");

        assert_eq!(outer.category, ErrorCategory::User);
        assert_eq!(outer.kind, Some(ErrorKind::AuthenticationFailed));
        assert!(outer.is_authentication());
        assert_eq!(
            outer.chain_message(),
            "failed to decrypt report.pdf.encrypted: invalid password or corrupted file"
        );
    }

    #[test]
    fn test_classification() {
        let format =
            CyberdrivexError::with_kind(ErrorCategory::User, ErrorKind::TruncatedInput, "x");
        assert!(format.is_format());
        assert!(!format.is_authentication());

        let policy = CyberdrivexError::with_kind(ErrorCategory::User, ErrorKind::WeakPassword, "x");
        assert!(policy.is_policy());

        let untagged = CyberdrivexError::new(ErrorCategory::Internal, "x");
        assert!(!untagged.is_policy());
        assert!(!untagged.is_format());
        assert!(!untagged.is_storage());
    }

    #[test]
    fn test_source_is_preserved() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err = CyberdrivexError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Storage,
            "failed to write key store",
            io_err,
        );
        assert!(err.is_storage());
        assert_eq!(err.chain_message(), "failed to write key store: denied");
    }
}
