//! Named key records
//!
//! A [`KeyStore`] owns its records in memory, loads them once when opened
//! and rewrites its persistence file after every mutation. Secrets are
//! stored as standard base64, which is an encoding and not encryption: the
//! persistence file must be protected like the passwords it holds.

use crate::audit::{AuditAction, AuditEvent, AuditSink, AuditStatus, NO_ALGORITHM};
use crate::container::ALGORITHM_ID;
use crate::error::{CyberdrivexError, ErrorCategory, ErrorKind, Result};
use crate::file_ops;
use crate::strength::{self, GatedOperation};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64_STANDARD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;
use zeroize::Zeroizing;

/// Suffix of exported key files.
pub const KEY_EXPORT_SUFFIX: &str = ".cryptokey";

#[derive(Clone)]
pub struct KeyRecord {
    pub id: String,
    pub name: String,
    pub algorithm: String,
    pub created_at: DateTime<Utc>,
    secret: Zeroizing<Vec<u8>>,
}

impl KeyRecord {
    /// The reversible text encoding persisted and exported for the secret.
    pub fn key_data(&self) -> String {
        BASE64_STANDARD.encode(&*self.secret)
    }

    fn to_json(&self) -> KeyRecordJson {
        KeyRecordJson {
            id: self.id.clone(),
            name: self.name.clone(),
            algorithm: self.algorithm.clone(),
            created: self.created_at,
            key_data: self.key_data(),
        }
    }
}

impl fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("algorithm", &self.algorithm)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Export/persistence shape of a record.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyRecordJson {
    id: String,
    name: String,
    algorithm: String,
    created: DateTime<Utc>,
    key_data: String,
}

/// Lenient shape accepted on import; presence is checked by hand so that a
/// missing field is an import error rather than a parse error.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportCandidate {
    id: Option<String>,
    name: Option<String>,
    algorithm: Option<String>,
    created: Option<serde_json::Value>,
    key_data: Option<String>,
}

#[derive(Debug)]
pub enum ImportOutcome {
    Imported(KeyRecord),
    /// A record with the same id was already in the store; nothing changed.
    AlreadyPresent { id: String, name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedKey {
    /// `"<name>.cryptokey"`
    pub file_name: String,
    pub json: String,
}

pub struct KeyStore {
    path: Option<PathBuf>,
    records: Vec<KeyRecord>,
}

impl KeyStore {
    /// A store with no persistence file.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: Vec::new(),
        }
    }

    /// Load the store persisted at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = match fs::read(&path) {
            Ok(bytes) => decode_persisted(&path, &bytes)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(CyberdrivexError::with_kind_and_source(
                    ErrorCategory::Internal,
                    ErrorKind::Storage,
                    format!("failed to read key store {}", path.display()),
                    e,
                ));
            }
        };
        tracing::debug!(path = %path.display(), keys = records.len(), "opened key store");
        Ok(Self {
            path: Some(path),
            records,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// All records in insertion order.
    pub fn list(&self) -> &[KeyRecord] {
        &self.records
    }

    pub fn get(&self, id: &str) -> Option<&KeyRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Create a record protecting `password` under `name`.
    ///
    /// A weak password is accepted but reported as a warning.
    pub fn generate(
        &mut self,
        name: &str,
        password: &str,
        audit: &mut dyn AuditSink,
    ) -> Result<KeyRecord> {
        let name = name.trim();
        let refusal = if name.is_empty() {
            Some("Key name is required")
        } else if password.is_empty() {
            Some("Password is required for key generation")
        } else {
            None
        };
        if let Some(msg) = refusal {
            audit.record(AuditEvent::new(
                AuditAction::Error,
                AuditStatus::Error,
                NO_ALGORITHM,
                msg,
            ));
            return Err(CyberdrivexError::with_kind(
                ErrorCategory::User,
                ErrorKind::Policy,
                msg,
            ));
        }

        if !strength::score(password).is_acceptable_for(GatedOperation::KeyGeneration) {
            audit.record(AuditEvent::new(
                AuditAction::KeyGenerated,
                AuditStatus::Warning,
                ALGORITHM_ID,
                "Password strength is below recommended level",
            ));
        }

        let record = KeyRecord {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            algorithm: ALGORITHM_ID.to_string(),
            created_at: Utc::now(),
            secret: Zeroizing::new(password.as_bytes().to_vec()),
        };
        self.records.push(record.clone());
        if let Err(e) = self.flush() {
            self.records.pop();
            return Err(e);
        }

        tracing::info!(id = %record.id, name = %record.name, "generated key");
        audit.record(AuditEvent::new(
            AuditAction::KeyGenerated,
            AuditStatus::Success,
            ALGORITHM_ID,
            format!("Successfully generated key: {}", record.name),
        ));
        Ok(record)
    }

    /// Import a record from its export JSON.
    pub fn import(&mut self, serialized: &str, audit: &mut dyn AuditSink) -> Result<ImportOutcome> {
        let record = match parse_import(serialized) {
            Ok(r) => r,
            Err(e) => {
                audit.record(AuditEvent::new(
                    AuditAction::KeyImported,
                    AuditStatus::Error,
                    NO_ALGORITHM,
                    format!("Failed to import key: {}", e.chain_message()),
                ));
                return Err(e);
            }
        };

        if self.get(&record.id).is_some() {
            tracing::warn!(id = %record.id, "key already present, import skipped");
            audit.record(AuditEvent::new(
                AuditAction::KeyImported,
                AuditStatus::Warning,
                record.algorithm.clone(),
                format!("Key {} already exists", record.name),
            ));
            return Ok(ImportOutcome::AlreadyPresent {
                id: record.id,
                name: record.name,
            });
        }

        self.records.push(record.clone());
        if let Err(e) = self.flush() {
            self.records.pop();
            return Err(e);
        }

        tracing::info!(id = %record.id, name = %record.name, "imported key");
        audit.record(AuditEvent::new(
            AuditAction::KeyImported,
            AuditStatus::Success,
            record.algorithm.clone(),
            format!("Successfully imported key: {}", record.name),
        ));
        Ok(ImportOutcome::Imported(record))
    }

    /// Pretty export JSON for the record `id`.
    pub fn export(&self, id: &str, audit: &mut dyn AuditSink) -> Result<ExportedKey> {
        let record = self.require(id)?;
        let json = serde_json::to_string_pretty(&record.to_json()).map_err(|e| {
            CyberdrivexError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::InternalInvariant,
                "failed to encode key record",
                e,
            )
        })?;

        audit.record(AuditEvent::new(
            AuditAction::KeyExported,
            AuditStatus::Success,
            record.algorithm.clone(),
            format!("Exported key: {}", record.name),
        ));
        Ok(ExportedKey {
            file_name: format!("{}{}", record.name, KEY_EXPORT_SUFFIX),
            json,
        })
    }

    /// Decode the secret of record `id` for reuse.
    pub fn reveal_secret(&self, id: &str, audit: &mut dyn AuditSink) -> Result<Zeroizing<String>> {
        let record = self.require(id)?;
        let secret = String::from_utf8(record.secret.to_vec()).map_err(|_| {
            CyberdrivexError::new(
                ErrorCategory::User,
                format!("secret of key {} is not valid UTF-8", record.name),
            )
        })?;
        audit.record(AuditEvent::new(
            AuditAction::KeyExported,
            AuditStatus::Success,
            record.algorithm.clone(),
            format!("Password revealed for key: {}", record.name),
        ));
        Ok(Zeroizing::new(secret))
    }

    /// Remove record `id`. Removing an absent id is a no-op.
    pub fn delete(&mut self, id: &str, audit: &mut dyn AuditSink) -> Result<Option<KeyRecord>> {
        let Some(pos) = self.records.iter().position(|r| r.id == id) else {
            tracing::debug!(id, "delete of unknown key ignored");
            return Ok(None);
        };

        let removed = self.records.remove(pos);
        if let Err(e) = self.flush() {
            self.records.insert(pos, removed);
            return Err(e);
        }

        tracing::info!(id, name = %removed.name, "deleted key");
        audit.record(AuditEvent::new(
            AuditAction::KeyExported,
            AuditStatus::Success,
            removed.algorithm.clone(),
            format!("Deleted key: {}", removed.name),
        ));
        Ok(Some(removed))
    }

    fn require(&self, id: &str) -> Result<&KeyRecord> {
        self.get(id).ok_or_else(|| {
            CyberdrivexError::with_kind(
                ErrorCategory::User,
                ErrorKind::KeyNotFound,
                format!("no key with id {}", id),
            )
        })
    }

    fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let persisted: Vec<KeyRecordJson> = self.records.iter().map(KeyRecord::to_json).collect();
        let json = serde_json::to_vec_pretty(&persisted).map_err(|e| {
            CyberdrivexError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Storage,
                "failed to encode key store",
                e,
            )
        })?;
        file_ops::write_file_atomic(path, &json, ErrorKind::Storage)
            .map_err(|e| e.with_context(format!("failed to persist key store {}", path.display())))
    }
}

fn decode_persisted(path: &Path, bytes: &[u8]) -> Result<Vec<KeyRecord>> {
    let persisted: Vec<KeyRecordJson> = serde_json::from_slice(bytes).map_err(|e| {
        CyberdrivexError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::Storage,
            format!("key store {} is corrupt", path.display()),
            e,
        )
    })?;
    persisted
        .into_iter()
        .map(|p| {
            let secret = decode_key_data(&p.key_data).map_err(|e| {
                CyberdrivexError::with_kind_and_source(
                    ErrorCategory::User,
                    ErrorKind::Storage,
                    format!("key {} in {} has undecodable key data", p.id, path.display()),
                    e,
                )
            })?;
            Ok(KeyRecord {
                id: p.id,
                name: p.name,
                algorithm: p.algorithm,
                created_at: p.created,
                secret,
            })
        })
        .collect()
}

fn decode_key_data(key_data: &str) -> std::result::Result<Zeroizing<Vec<u8>>, base64::DecodeError> {
    BASE64_STANDARD.decode(key_data).map(Zeroizing::new)
}

fn parse_import(serialized: &str) -> Result<KeyRecord> {
    let invalid = |msg: &str| {
        CyberdrivexError::with_kind(ErrorCategory::User, ErrorKind::ImportInvalid, msg)
    };

    if serialized.trim().is_empty() {
        return Err(invalid("No key data provided for import"));
    }
    let candidate: ImportCandidate = serde_json::from_str(serialized).map_err(|e| {
        CyberdrivexError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::ImportInvalid,
            "Invalid format",
            e,
        )
    })?;

    let present = |field: Option<String>| field.filter(|v| !v.is_empty());
    let (Some(id), Some(name), Some(algorithm), Some(key_data)) = (
        present(candidate.id),
        present(candidate.name),
        present(candidate.algorithm),
        present(candidate.key_data),
    ) else {
        return Err(invalid("Invalid key format"));
    };

    let secret = decode_key_data(&key_data).map_err(|e| {
        CyberdrivexError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::ImportInvalid,
            "Invalid key format: keyData is not valid base64",
            e,
        )
    })?;

    Ok(KeyRecord {
        id,
        name,
        algorithm,
        created_at: parse_created(candidate.created),
        secret,
    })
}

/// `created` is informational; anything that is not an RFC 3339 string is
/// replaced by the import time.
fn parse_created(created: Option<serde_json::Value>) -> DateTime<Utc> {
    match created {
        None | Some(serde_json::Value::Null) => Utc::now(),
        Some(serde_json::Value::String(s)) => match DateTime::parse_from_rfc3339(&s) {
            Ok(t) => t.with_timezone(&Utc),
            Err(e) => {
                tracing::warn!(created = %s, error = %e, "unparseable creation time, using now");
                Utc::now()
            }
        },
        Some(other) => {
            tracing::warn!(created = %other, "non-string creation time, using now");
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const STRONG: &str = "Str0ng&Secret!Pass";

    #[test]
    fn test_generate_and_list() {
        let mut store = KeyStore::in_memory();
        let mut audit: Vec<AuditEvent> = Vec::new();
        let a = store.generate("  Documents  ", STRONG, &mut audit).unwrap();
        let b = store.generate("Photos", STRONG, &mut audit).unwrap();

        assert_eq!(a.name, "Documents");
        assert_eq!(a.algorithm, ALGORITHM_ID);
        assert_ne!(a.id, b.id);
        let names: Vec<&str> = store.list().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Documents", "Photos"]);
        assert_eq!(audit.len(), 2);
        assert!(audit.iter().all(|e| e.action == AuditAction::KeyGenerated));
    }

    #[test]
    fn test_generate_requires_name_and_password() {
        let mut store = KeyStore::in_memory();
        let mut audit: Vec<AuditEvent> = Vec::new();

        let err = store.generate("   ", STRONG, &mut audit).expect_err("expected policy error");
        assert_eq!(err.kind, Some(ErrorKind::Policy));
        let err = store.generate("k", "", &mut audit).expect_err("expected policy error");
        assert_eq!(err.kind, Some(ErrorKind::Policy));

        assert!(store.list().is_empty());
        assert_eq!(audit.len(), 2);
        assert!(audit.iter().all(|e| e.status == AuditStatus::Error));
    }

    #[test]
    fn test_weak_password_warns_but_generates() {
        let mut store = KeyStore::in_memory();
        let mut audit: Vec<AuditEvent> = Vec::new();
        store.generate("weak", "abc", &mut audit).unwrap();

        assert_eq!(store.list().len(), 1);
        assert_eq!(audit[0].status, AuditStatus::Warning);
        assert_eq!(audit[1].status, AuditStatus::Success);
    }

    #[test]
    fn test_names_need_not_be_unique() {
        let mut store = KeyStore::in_memory();
        let mut audit: Vec<AuditEvent> = Vec::new();
        store.generate("same", STRONG, &mut audit).unwrap();
        store.generate("same", STRONG, &mut audit).unwrap();
        assert_eq!(store.list().len(), 2);
    }

    #[test]
    fn test_export_shape_and_reimport() {
        let mut store = KeyStore::in_memory();
        let mut audit: Vec<AuditEvent> = Vec::new();
        let record = store.generate("Backup", STRONG, &mut audit).unwrap();

        let exported = store.export(&record.id, &mut audit).unwrap();
        assert_eq!(exported.file_name, "Backup.cryptokey");
        let json: serde_json::Value = serde_json::from_str(&exported.json).unwrap();
        assert_eq!(json["id"], record.id.as_str());
        assert_eq!(json["name"], "Backup");
        assert_eq!(json["algorithm"], ALGORITHM_ID);
        assert!(json["created"].is_string());
        assert_eq!(json["keyData"], BASE64_STANDARD.encode(STRONG));

        let mut other = KeyStore::in_memory();
        match other.import(&exported.json, &mut audit).unwrap() {
            ImportOutcome::Imported(r) => {
                assert_eq!(r.id, record.id);
                assert_eq!(r.created_at, record.created_at);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(*other.reveal_secret(&record.id, &mut audit).unwrap(), STRONG);
    }

    #[test]
    fn test_import_existing_id_is_noop_with_warning() {
        let mut store = KeyStore::in_memory();
        let mut audit: Vec<AuditEvent> = Vec::new();
        let record = store.generate("k", STRONG, &mut audit).unwrap();
        let exported = store.export(&record.id, &mut audit).unwrap();
        audit.clear();

        let outcome = store.import(&exported.json, &mut audit).unwrap();
        assert!(matches!(outcome, ImportOutcome::AlreadyPresent { .. }));
        assert_eq!(store.list().len(), 1);
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, AuditAction::KeyImported);
        assert_eq!(audit[0].status, AuditStatus::Warning);
    }

    #[test]
    fn test_import_missing_fields() {
        let mut store = KeyStore::in_memory();
        let mut audit: Vec<AuditEvent> = Vec::new();
        let inputs = [
            r#"{"name":"k","algorithm":"AES-256-GCM","keyData":"cGFzcw=="}"#,
            r#"{"id":"1","algorithm":"AES-256-GCM","keyData":"cGFzcw=="}"#,
            r#"{"id":"1","name":"k","keyData":"cGFzcw=="}"#,
            r#"{"id":"1","name":"k","algorithm":"AES-256-GCM"}"#,
            r#"{"id":"","name":"k","algorithm":"AES-256-GCM","keyData":"cGFzcw=="}"#,
        ];
        for input in inputs {
            let err = store.import(input, &mut audit).expect_err("expected import error");
            assert_eq!(err.kind, Some(ErrorKind::ImportInvalid), "input {}", input);
        }
        assert!(store.list().is_empty());
        assert!(audit.iter().all(|e| e.status == AuditStatus::Error));
    }

    #[test]
    fn test_import_garbage() {
        let mut store = KeyStore::in_memory();
        let mut audit: Vec<AuditEvent> = Vec::new();
        for input in ["", "   ", "not json", "[]", r#"{"id":1}"#] {
            let err = store.import(input, &mut audit).expect_err("expected import error");
            assert!(err.is_import(), "input {:?}", input);
        }
        let err = store
            .import(
                r#"{"id":"1","name":"k","algorithm":"AES-256-GCM","keyData":"***"}"#,
                &mut audit,
            )
            .expect_err("expected import error");
        assert!(err.is_import());
    }

    #[test]
    fn test_import_without_created_defaults_to_now() {
        let mut store = KeyStore::in_memory();
        let mut audit: Vec<AuditEvent> = Vec::new();
        let before = Utc::now();
        let outcome = store
            .import(
                r#"{"id":"42","name":"k","algorithm":"AES-256-GCM","keyData":"cGFzcw=="}"#,
                &mut audit,
            )
            .unwrap();
        let ImportOutcome::Imported(record) = outcome else {
            panic!("expected import");
        };
        assert!(record.created_at >= before);
        assert_eq!(*store.reveal_secret("42", &mut audit).unwrap(), "pass");
    }

    #[test]
    fn test_import_tolerates_unparseable_created() {
        let mut store = KeyStore::in_memory();
        let mut audit: Vec<AuditEvent> = Vec::new();
        let before = Utc::now();
        for (id, created) in [("a", r#""2024-01-01""#), ("b", "1704067200000"), ("c", "null")] {
            let json = format!(
                r#"{{"id":"{}","name":"k","algorithm":"AES-256-GCM","created":{},"keyData":"cGFzcw=="}}"#,
                id, created
            );
            let outcome = store.import(&json, &mut audit).unwrap();
            let ImportOutcome::Imported(record) = outcome else {
                panic!("expected import of {}", id);
            };
            assert!(record.created_at >= before, "created {}", created);
        }
        assert_eq!(store.list().len(), 3);
    }

    #[test]
    fn test_import_keeps_rfc3339_created() {
        let mut store = KeyStore::in_memory();
        let mut audit: Vec<AuditEvent> = Vec::new();
        let outcome = store
            .import(
                r#"{"id":"t","name":"k","algorithm":"AES-256-GCM","created":"2024-01-01T12:00:00+02:00","keyData":"cGFzcw=="}"#,
                &mut audit,
            )
            .unwrap();
        let ImportOutcome::Imported(record) = outcome else {
            panic!("expected import");
        };
        assert_eq!(record.created_at.to_rfc3339(), "2024-01-01T10:00:00+00:00");
    }

    #[test]
    fn test_delete_is_idempotent() {
        let mut store = KeyStore::in_memory();
        let mut audit: Vec<AuditEvent> = Vec::new();
        let record = store.generate("k", STRONG, &mut audit).unwrap();
        audit.clear();

        assert!(store.delete(&record.id, &mut audit).unwrap().is_some());
        assert!(store.delete(&record.id, &mut audit).unwrap().is_none());
        assert!(store.delete("never-existed", &mut audit).unwrap().is_none());
        assert!(store.list().is_empty());
        assert_eq!(audit.len(), 1);
    }

    #[test]
    fn test_unknown_id() {
        let store = KeyStore::in_memory();
        let mut audit: Vec<AuditEvent> = Vec::new();
        let err = store.export("missing", &mut audit).expect_err("expected not found");
        assert_eq!(err.kind, Some(ErrorKind::KeyNotFound));
        assert!(store.reveal_secret("missing", &mut audit).is_err());
        assert!(audit.is_empty());
    }

    #[test]
    fn test_persistence_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("keys.json");
        let mut audit: Vec<AuditEvent> = Vec::new();

        let mut store = KeyStore::open(&path).unwrap();
        assert!(store.list().is_empty());
        let first = store.generate("first", STRONG, &mut audit).unwrap();
        let second = store.generate("second", "an0ther-Secret!", &mut audit).unwrap();
        store.delete(&first.id, &mut audit).unwrap();
        drop(store);

        let reopened = KeyStore::open(&path).unwrap();
        assert_eq!(reopened.list().len(), 1);
        assert_eq!(reopened.list()[0].id, second.id);
        assert_eq!(
            *reopened.reveal_secret(&second.id, &mut audit).unwrap(),
            "an0ther-Secret!"
        );

        let persisted: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(persisted.as_array().unwrap().len(), 1);
        assert_eq!(persisted[0]["name"], "second");
    }

    #[test]
    fn test_corrupt_persisted_state() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("keys.json");
        fs::write(&path, b"{ definitely not an array").unwrap();
        let err = KeyStore::open(&path).err().expect("expected storage error");
        assert!(err.is_storage());
    }

    #[test]
    fn test_failed_flush_rolls_back() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("gone").join("keys.json");
        let mut store = KeyStore::open(&path).unwrap();
        let mut audit: Vec<AuditEvent> = Vec::new();

        let err = store.generate("k", STRONG, &mut audit).expect_err("expected storage error");
        assert!(err.is_storage());
        assert!(store.list().is_empty());
        assert!(audit.iter().all(|e| e.status != AuditStatus::Success));
    }

    #[test]
    fn test_debug_hides_secret() {
        let mut store = KeyStore::in_memory();
        let mut audit: Vec<AuditEvent> = Vec::new();
        let record = store.generate("k", STRONG, &mut audit).unwrap();
        let debug = format!("{:?}", record);
        assert!(!debug.contains(STRONG));
        assert!(!debug.contains(&record.key_data()));
    }
}
