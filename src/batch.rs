//! Batch encryption and decryption
//!
//! Files are processed one at a time in input order. Each file moves through
//! `pending -> processing -> {completed | error}`; a failure on one file is
//! recorded against that file and the batch carries on with the next.
//!
//! Progress is published as [`ProgressEvent`]s on an optional channel the
//! caller drains. Every terminal file outcome is also reported to the
//! [`AuditSink`].

use crate::audit::{AuditAction, AuditEvent, AuditSink, AuditStatus, NO_ALGORITHM};
use crate::container::{self, ALGORITHM_ID, EncryptedArtifact};
use crate::error::{CyberdrivexError, ErrorCategory, ErrorKind, Result};
use crate::file_ops;
use crate::secretcrypt;
use crate::strength::{self, GatedOperation};
use serde::Serialize;
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use zeroize::Zeroizing;

/// Progress reported once the input has been loaded.
pub const LOADED_PROGRESS: u8 = 25;

const CANCELLED_MSG: &str = "batch cancelled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl FileStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FileStatus::Completed | FileStatus::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressRecord {
    pub filename: String,
    pub progress: u8,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressRecord {
    fn pending(filename: &str) -> Self {
        Self {
            filename: filename.to_string(),
            progress: 0,
            status: FileStatus::Pending,
            error: None,
        }
    }
}

/// A progress update for the file at `index` in the batch input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub index: usize,
    pub record: ProgressRecord,
}

#[derive(Debug, Clone)]
enum ItemSource {
    Bytes(Vec<u8>),
    Path(PathBuf),
}

/// One input to a batch: a display name plus where its bytes come from.
///
/// Path-backed items are read lazily, inside the per-file isolation
/// boundary, so an unreadable file fails only itself.
#[derive(Debug, Clone)]
pub struct BatchItem {
    name: String,
    source: ItemSource,
}

impl BatchItem {
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            source: ItemSource::Bytes(bytes),
        }
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: file_ops::display_name(&path),
            source: ItemSource::Path(path),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            ItemSource::Path(p) => Some(p),
            ItemSource::Bytes(_) => None,
        }
    }

    fn load(&self) -> Result<Cow<'_, [u8]>> {
        match &self.source {
            ItemSource::Bytes(b) => Ok(Cow::Borrowed(b)),
            ItemSource::Path(p) => file_ops::read_file(p).map(Cow::Owned),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EncryptedOutput {
    /// Name of the input the output came from.
    pub source_name: String,
    pub artifact: EncryptedArtifact,
    /// Serialized container bytes.
    pub container: Vec<u8>,
}

impl EncryptedOutput {
    /// `"<original name>.encrypted"`
    pub fn file_name(&self) -> String {
        self.artifact.file_name()
    }
}

#[derive(Debug)]
pub struct DecryptedOutput {
    /// Name of the container the output came from.
    pub source_name: String,
    /// Original file name recorded in the container.
    pub filename: String,
    pub plaintext: Zeroizing<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedFile {
    pub index: usize,
    pub filename: String,
    pub message: String,
}

#[derive(Debug)]
pub struct BatchReport<T> {
    /// Terminal record of every input, in input order.
    pub records: Vec<ProgressRecord>,
    pub succeeded: Vec<T>,
    pub failed: Vec<FailedFile>,
}

impl<T> BatchReport<T> {
    fn new(items: &[BatchItem]) -> Self {
        Self {
            records: items.iter().map(|i| ProgressRecord::pending(i.name())).collect(),
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

pub type EncryptionReport = BatchReport<EncryptedOutput>;

#[derive(Debug)]
pub struct DecryptionReport {
    pub batch: BatchReport<DecryptedOutput>,
    /// Integrity check outcome per container that parsed, keyed by input
    /// name. Containers that failed to parse have no entry.
    pub verification: Vec<(String, bool)>,
}

/// Runs encryption and decryption batches.
pub struct BatchProcessor<'a> {
    audit: &'a mut dyn AuditSink,
    progress: Option<Sender<ProgressEvent>>,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> BatchProcessor<'a> {
    pub fn new(audit: &'a mut dyn AuditSink) -> Self {
        Self {
            audit,
            progress: None,
            cancel: None,
        }
    }

    /// Publish progress updates on `sender`. A dropped receiver is ignored.
    pub fn with_progress(mut self, sender: Sender<ProgressEvent>) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Check `flag` between files; once set, every remaining file ends in
    /// `error` without being read.
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Encrypt every item under `password`.
    ///
    /// Fails as a whole only on a policy violation (no items, empty or weak
    /// password); in that case no item is read.
    pub fn run_encryption(
        &mut self,
        items: &[BatchItem],
        password: &str,
    ) -> Result<EncryptionReport> {
        self.check_common_preconditions(items, password, "files", "encryption")?;

        let strength = strength::score(password);
        if !strength.is_acceptable_for(GatedOperation::Encryption) {
            let msg = "Password strength is too weak for secure encryption";
            self.audit.record(AuditEvent::new(
                AuditAction::Error,
                AuditStatus::Warning,
                ALGORITHM_ID,
                msg,
            ));
            return Err(CyberdrivexError::with_kind(
                ErrorCategory::User,
                ErrorKind::WeakPassword,
                format!("{} (score {}, {})", msg, strength.score, strength.tier),
            ));
        }

        tracing::debug!(files = items.len(), "starting encryption batch");
        let mut report = EncryptionReport::new(items);
        self.publish_pending(&report.records);

        for (index, item) in items.iter().enumerate() {
            self.update(&mut report.records, index, FileStatus::Processing, 0);
            if self.is_cancelled() {
                let name = item.name();
                self.fail(&mut report, index, name, AuditAction::Encrypt, CANCELLED_MSG);
                continue;
            }

            match self.encrypt_one(&mut report.records, index, item, password) {
                Ok(output) => {
                    tracing::info!(file = item.name(), output = %output.file_name(), "encrypted");
                    self.audit.record(
                        AuditEvent::new(
                            AuditAction::Encrypt,
                            AuditStatus::Success,
                            ALGORITHM_ID,
                            format!("Successfully encrypted {}", item.name()),
                        )
                        .with_filename(item.name()),
                    );
                    self.update(&mut report.records, index, FileStatus::Completed, 100);
                    report.succeeded.push(output);
                }
                Err(e) => {
                    let cause = e.chain_message();
                    self.fail(&mut report, index, item.name(), AuditAction::Encrypt, &cause);
                }
            }
        }

        Ok(report)
    }

    /// Decrypt every container item with `password`.
    ///
    /// Each container is parsed first (format errors never reach the
    /// cipher), then integrity-checked by a full authenticated decryption
    /// before its plaintext is surfaced.
    pub fn run_decryption(
        &mut self,
        items: &[BatchItem],
        password: &str,
    ) -> Result<DecryptionReport> {
        self.check_common_preconditions(items, password, "encrypted files", "decryption")?;

        tracing::debug!(files = items.len(), "starting decryption batch");
        let mut report = DecryptionReport {
            batch: BatchReport::new(items),
            verification: Vec::new(),
        };
        self.publish_pending(&report.batch.records);

        for (index, item) in items.iter().enumerate() {
            self.update(&mut report.batch.records, index, FileStatus::Processing, 0);
            if self.is_cancelled() {
                let name = item.name();
                self.fail(&mut report.batch, index, name, AuditAction::Decrypt, CANCELLED_MSG);
                continue;
            }

            let artifact = match self.parse_one(&mut report.batch.records, index, item) {
                Ok(a) => a,
                Err(e) => {
                    let cause = e.chain_message();
                    self.fail(&mut report.batch, index, item.name(), AuditAction::Decrypt, &cause);
                    continue;
                }
            };

            let opened = secretcrypt::decrypt(password, &artifact);
            report
                .verification
                .push((item.name().to_string(), opened.is_ok()));

            match opened {
                Ok(plaintext) => {
                    tracing::info!(
                        file = item.name(),
                        original = %artifact.original_name,
                        "decrypted"
                    );
                    self.audit.record(
                        AuditEvent::new(
                            AuditAction::Decrypt,
                            AuditStatus::Success,
                            artifact.algorithm.clone(),
                            format!("Successfully decrypted {}", item.name()),
                        )
                        .with_filename(item.name()),
                    );
                    self.update(&mut report.batch.records, index, FileStatus::Completed, 100);
                    report.batch.succeeded.push(DecryptedOutput {
                        source_name: item.name().to_string(),
                        filename: artifact.original_name,
                        plaintext,
                    });
                }
                Err(e) => {
                    let cause = e.chain_message();
                    self.fail(&mut report.batch, index, item.name(), AuditAction::Decrypt, &cause);
                }
            }
        }

        Ok(report)
    }

    fn check_common_preconditions(
        &mut self,
        items: &[BatchItem],
        password: &str,
        subject: &str,
        operation: &str,
    ) -> Result<()> {
        let refusal = if items.is_empty() {
            Some(format!("No {} selected for {}", subject, operation))
        } else if password.is_empty() {
            Some(format!("Password is required for {}", operation))
        } else {
            None
        };

        match refusal {
            Some(msg) => {
                self.audit.record(AuditEvent::new(
                    AuditAction::Error,
                    AuditStatus::Error,
                    NO_ALGORITHM,
                    msg.clone(),
                ));
                Err(CyberdrivexError::with_kind(
                    ErrorCategory::User,
                    ErrorKind::Policy,
                    msg,
                ))
            }
            None => Ok(()),
        }
    }

    fn encrypt_one(
        &mut self,
        records: &mut [ProgressRecord],
        index: usize,
        item: &BatchItem,
        password: &str,
    ) -> Result<EncryptedOutput> {
        let plaintext = item.load()?;
        self.update(records, index, FileStatus::Processing, LOADED_PROGRESS);

        let artifact = secretcrypt::encrypt(password, item.name(), &plaintext)?;
        let container = container::serialize(&artifact)?;
        Ok(EncryptedOutput {
            source_name: item.name().to_string(),
            artifact,
            container,
        })
    }

    fn parse_one(
        &mut self,
        records: &mut [ProgressRecord],
        index: usize,
        item: &BatchItem,
    ) -> Result<EncryptedArtifact> {
        let blob = item.load()?;
        let artifact = container::parse(&blob)?;
        self.update(records, index, FileStatus::Processing, LOADED_PROGRESS);
        Ok(artifact)
    }

    fn fail<T>(
        &mut self,
        report: &mut BatchReport<T>,
        index: usize,
        name: &str,
        action: AuditAction,
        cause: &str,
    ) {
        let verb = match action {
            AuditAction::Decrypt => "decrypt",
            _ => "encrypt",
        };
        tracing::warn!(file = name, error = cause, "failed to {}", verb);

        let record = &mut report.records[index];
        record.status = FileStatus::Error;
        record.error = Some(cause.to_string());
        self.publish(index, record.clone());

        self.audit.record(
            AuditEvent::new(
                action,
                AuditStatus::Error,
                ALGORITHM_ID,
                format!("Failed to {} {}: {}", verb, name, cause),
            )
            .with_filename(name),
        );
        report.failed.push(FailedFile {
            index,
            filename: name.to_string(),
            message: cause.to_string(),
        });
    }

    fn update(
        &mut self,
        records: &mut [ProgressRecord],
        index: usize,
        status: FileStatus,
        progress: u8,
    ) {
        let record = &mut records[index];
        record.status = status;
        record.progress = progress;
        self.publish(index, record.clone());
    }

    fn publish_pending(&self, records: &[ProgressRecord]) {
        for (index, record) in records.iter().enumerate() {
            self.publish(index, record.clone());
        }
    }

    fn publish(&self, index: usize, record: ProgressRecord) {
        if let Some(sender) = &self.progress {
            // The caller may have stopped listening; the batch still runs.
            let _ = sender.send(ProgressEvent { index, record });
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}
