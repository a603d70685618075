//! cyberdrivex CLI - password-based file encryption
//!
//! Encrypts and decrypts batches of files with AES-256-GCM under a
//! PBKDF2-derived key, and manages named key records.

use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::mpsc::{self, Receiver};
use std::thread;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

use cyberdrivex::audit::AuditLog;
use cyberdrivex::batch::{BatchItem, BatchProcessor, FileStatus, ProgressEvent};
use cyberdrivex::error::{CyberdrivexError, ErrorCategory, ErrorKind, Result};
use cyberdrivex::file_ops;
use cyberdrivex::keystore::{ImportOutcome, KeyStore};
use cyberdrivex::passphrase::{PassphraseReader, ReaderPassphraseReader, TerminalPassphraseReader};
use cyberdrivex::strength;

#[derive(Parser)]
#[command(name = "cyberdrivex")]
#[command(version)]
#[command(about = "Password-based file encryption.", long_about = None)]
struct Cli {
    /// Read password from stdin instead of from terminal
    #[arg(long, global = true)]
    passphrase_stdin: bool,

    /// Path to the key store file
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        env = "CYBERDRIVEX_KEYSTORE",
        default_value = "cyberdrivex-keys.json"
    )]
    keystore: PathBuf,

    /// Write the audit trail of this run as JSON to this file
    #[arg(long, global = true, value_name = "FILE")]
    audit_log: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt one or more files
    #[command(alias = "e")]
    Encrypt {
        /// Directory to write the .encrypted files to
        #[arg(short, long, value_name = "DIR")]
        output_dir: PathBuf,

        /// Files whose contents are to be encrypted
        #[arg(required = true, value_name = "FILE")]
        files: Vec<PathBuf>,
    },

    /// Decrypt one or more .encrypted files
    #[command(alias = "d")]
    Decrypt {
        /// Directory to write the decrypted files to
        #[arg(short, long, value_name = "DIR")]
        output_dir: PathBuf,

        /// Encrypted files to decrypt
        #[arg(required = true, value_name = "FILE")]
        files: Vec<PathBuf>,
    },

    /// Score a password without using it
    Strength,

    /// Print a random password
    Genpass {
        #[arg(short, long, default_value_t = strength::DEFAULT_GENERATED_LENGTH)]
        length: usize,
    },

    /// Manage key records
    #[command(subcommand)]
    Key(KeyCommands),
}

#[derive(Subcommand)]
enum KeyCommands {
    /// Create a key record from a password
    Generate {
        #[arg(short, long)]
        name: String,

        /// Use a random password instead of reading one
        #[arg(long)]
        random: bool,
    },

    /// Import a key record from a .cryptokey file
    Import {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Export a key record to <name>.cryptokey
    Export {
        id: String,

        #[arg(short, long, value_name = "DIR")]
        output_dir: PathBuf,
    },

    /// Delete a key record
    Delete { id: String },

    /// List key records
    List,

    /// Print the password held by a key record
    Reveal { id: String },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut audit = AuditLog::new();
    let result = run(&cli, &mut audit);

    if let Some(path) = &cli.audit_log {
        if let Err(e) = write_audit_log(path, &audit) {
            eprintln!("Error: {}", e.chain_message());
        }
    }

    match result {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e.chain_message());
            process::exit(1);
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("cyberdrivex={}", level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Returns `Ok(false)` when the command ran but some file failed.
fn run(cli: &Cli, audit: &mut AuditLog) -> Result<bool> {
    match &cli.command {
        Commands::Encrypt { output_dir, files } => {
            let password = read_password(cli.passphrase_stdin)?;
            encrypt_files(files, output_dir, &password, audit)
        }
        Commands::Decrypt { output_dir, files } => {
            let password = read_password(cli.passphrase_stdin)?;
            decrypt_files(files, output_dir, &password, audit)
        }
        Commands::Strength => {
            let password = read_password(cli.passphrase_stdin)?;
            let report = strength::score(&password);
            println!("{} ({}/100)", report.tier, report.score);
            Ok(true)
        }
        Commands::Genpass { length } => {
            println!("{}", *strength::generate_secure_password(*length));
            Ok(true)
        }
        Commands::Key(cmd) => run_key_command(cli, cmd, audit),
    }
}

fn encrypt_files(
    files: &[PathBuf],
    output_dir: &Path,
    password: &str,
    audit: &mut AuditLog,
) -> Result<bool> {
    let items: Vec<BatchItem> = files.iter().cloned().map(BatchItem::from_path).collect();
    let (tx, rx) = mpsc::channel();
    let report = thread::scope(|s| {
        s.spawn(move || print_progress(rx));
        BatchProcessor::new(audit)
            .with_progress(tx)
            .run_encryption(&items, password)
    })?;

    let mut ok = report.all_succeeded();
    let mut writer = OutputWriter::new(output_dir);
    for output in &report.succeeded {
        ok &= writer.write(&output.source_name, &output.file_name(), &output.container);
    }
    for failed in &report.failed {
        eprintln!("{}: {}", failed.filename, failed.message);
    }
    Ok(ok)
}

fn decrypt_files(
    files: &[PathBuf],
    output_dir: &Path,
    password: &str,
    audit: &mut AuditLog,
) -> Result<bool> {
    let items: Vec<BatchItem> = files.iter().cloned().map(BatchItem::from_path).collect();
    let (tx, rx) = mpsc::channel();
    let report = thread::scope(|s| {
        s.spawn(move || print_progress(rx));
        BatchProcessor::new(audit)
            .with_progress(tx)
            .run_decryption(&items, password)
    })?;

    let mut ok = report.batch.all_succeeded();
    let mut writer = OutputWriter::new(output_dir);
    for output in &report.batch.succeeded {
        ok &= writer.write(&output.source_name, &output.filename, &output.plaintext);
    }
    for failed in &report.batch.failed {
        eprintln!("{}: {}", failed.filename, failed.message);
    }
    Ok(ok)
}

/// Writes batch outputs into one directory, refusing to let two outputs of
/// the same run land on the same name.
struct OutputWriter<'a> {
    dir: &'a Path,
    written: HashMap<String, String>,
}

impl<'a> OutputWriter<'a> {
    fn new(dir: &'a Path) -> Self {
        Self {
            dir,
            written: HashMap::new(),
        }
    }

    /// Returns false (after reporting on stderr) if the output was not written.
    fn write(&mut self, source: &str, name: &str, contents: &[u8]) -> bool {
        let name = match file_ops::sanitize_file_name(name) {
            Ok(n) => n,
            Err(e) => {
                eprintln!("{}: {}", source, e.chain_message());
                return false;
            }
        };
        if let Some(first) = self.written.get(&name) {
            eprintln!("{}: output {} already written from {}; skipped", source, name, first);
            return false;
        }

        let path = self.dir.join(&name);
        match file_ops::write_file_secure(&path, contents) {
            Ok(()) => {
                println!("{} -> {}", source, path.display());
                self.written.insert(name, source.to_string());
                true
            }
            Err(e) => {
                eprintln!("{}: {}", source, e.chain_message());
                false
            }
        }
    }
}

fn print_progress(rx: Receiver<ProgressEvent>) {
    for event in rx {
        let record = event.record;
        match record.status {
            FileStatus::Pending => {}
            FileStatus::Processing => {
                tracing::debug!(file = %record.filename, progress = record.progress, "processing")
            }
            FileStatus::Completed => eprintln!("[{}] {}: done", event.index + 1, record.filename),
            FileStatus::Error => eprintln!("[{}] {}: failed", event.index + 1, record.filename),
        }
    }
}

fn run_key_command(cli: &Cli, cmd: &KeyCommands, audit: &mut AuditLog) -> Result<bool> {
    let mut store = KeyStore::open(&cli.keystore)?;

    match cmd {
        KeyCommands::Generate { name, random } => {
            let password = if *random {
                strength::generate_secure_password(strength::DEFAULT_GENERATED_LENGTH)
            } else {
                read_password(cli.passphrase_stdin)?
            };
            let record = store.generate(name, &password, audit)?;
            println!("{}", record.id);
        }
        KeyCommands::Import { file } => {
            let bytes = file_ops::read_file(file)?;
            let text = String::from_utf8(bytes).map_err(|e| {
                CyberdrivexError::with_kind_and_source(
                    ErrorCategory::User,
                    ErrorKind::ImportInvalid,
                    format!("{} is not valid UTF-8", file.display()),
                    e,
                )
            })?;
            match store.import(&text, audit)? {
                ImportOutcome::Imported(record) => println!("{}", record.id),
                ImportOutcome::AlreadyPresent { id, name } => {
                    eprintln!("key {} ({}) already exists; nothing imported", name, id);
                }
            }
        }
        KeyCommands::Export { id, output_dir } => {
            let exported = store.export(id, audit)?;
            let path = output_dir.join(file_ops::sanitize_file_name(&exported.file_name)?);
            file_ops::write_file_secure(&path, exported.json.as_bytes())?;
            println!("{}", path.display());
        }
        KeyCommands::Delete { id } => {
            if store.delete(id, audit)?.is_none() {
                eprintln!("no key with id {}", id);
            }
        }
        KeyCommands::List => {
            for record in store.list() {
                println!(
                    "{}\t{}\t{}\t{}",
                    record.id,
                    record.name,
                    record.algorithm,
                    record.created_at.to_rfc3339()
                );
            }
        }
        KeyCommands::Reveal { id } => {
            println!("{}", *store.reveal_secret(id, audit)?);
        }
    }
    Ok(true)
}

fn read_password(use_stdin: bool) -> Result<Zeroizing<String>> {
    let mut reader: Box<dyn PassphraseReader> = if use_stdin {
        Box::new(ReaderPassphraseReader::new(Box::new(std::io::stdin())))
    } else {
        Box::new(TerminalPassphraseReader::default())
    };
    reader.read_passphrase()
}

fn write_audit_log(path: &Path, audit: &AuditLog) -> Result<()> {
    let json = audit.export_json().map_err(|e| {
        CyberdrivexError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::InternalInvariant,
            "failed to encode audit log",
            e,
        )
    })?;
    file_ops::write_file_secure(path, json.as_bytes())
}
