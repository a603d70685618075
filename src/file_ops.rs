//! Filesystem helpers
//!
//! Reading inputs, writing outputs with owner-only permissions, and the
//! atomic replace used for the key store's persisted state.

use crate::error::{CyberdrivexError, ErrorCategory, ErrorKind, Result};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Read a whole file into memory.
pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| read_error(path, e))
}

/// Write file with secure permissions (0o600 on Unix)
pub fn write_file_secure(path: &Path, contents: &[u8]) -> Result<()> {
    #[cfg(unix)]
    {
        use std::fs::OpenOptions;
        use std::os::unix::fs::OpenOptionsExt;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .map_err(|e| {
                CyberdrivexError::with_kind_and_source(
                    ErrorCategory::User,
                    ErrorKind::Io,
                    format!("failed to open {}", path.display()),
                    e,
                )
            })?;

        file.write_all(contents).map_err(|e| {
            CyberdrivexError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                format!("failed to write {}", path.display()),
                e,
            )
        })?;
        Ok(())
    }

    #[cfg(not(unix))]
    {
        fs::write(path, contents).map_err(|e| {
            CyberdrivexError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::Io,
                format!("failed to write {}", path.display()),
                e,
            )
        })?;
        Ok(())
    }
}

/// Replace `path` with `contents` atomically (tempfile + fsync + rename).
///
/// Either the old file or the new file exists afterwards, never a partial
/// one. Failures are tagged with `kind`.
pub fn write_file_atomic(path: &Path, contents: &[u8], kind: ErrorKind) -> Result<()> {
    let io_err = |msg: String, e: io::Error| {
        CyberdrivexError::with_kind_and_source(ErrorCategory::Internal, kind, msg, e)
    };

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut temp_file = tempfile::NamedTempFile::new_in(&dir)
        .map_err(|e| io_err(format!("failed to create tempfile in {}", dir.display()), e))?;

    temp_file
        .write_all(contents)
        .map_err(|e| io_err("failed to write to tempfile".to_string(), e))?;
    // Flush and fsync() such that the rename later, if it succeeds, will
    // always point to a valid file.
    temp_file
        .flush()
        .map_err(|e| io_err("failed to flush tempfile".to_string(), e))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| io_err("failed to sync file prior to rename".to_string(), e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = temp_file
            .as_file()
            .metadata()
            .map_err(|e| io_err("failed to get tempfile metadata".to_string(), e))?
            .permissions();
        perms.set_mode(0o600);
        temp_file
            .as_file()
            .set_permissions(perms)
            .map_err(|e| io_err("failed to set tempfile permissions".to_string(), e))?;
    }

    temp_file.persist(path).map_err(|e| {
        CyberdrivexError::with_kind_and_source(
            ErrorCategory::Internal,
            kind,
            format!("failed to rename to target file {}", path.display()),
            e,
        )
    })?;
    Ok(())
}

/// Reduce a name taken from untrusted container metadata to a bare file
/// name that is safe to join onto an output directory.
pub fn sanitize_file_name(name: &str) -> Result<String> {
    let candidate = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if candidate.is_empty() || candidate == "." || candidate == ".." {
        return Err(CyberdrivexError::with_kind(
            ErrorCategory::User,
            ErrorKind::Io,
            format!("refusing to write output with unusable file name {:?}", name),
        ));
    }
    Ok(candidate.to_string())
}

/// The file name component of `path`, lossily converted to UTF-8.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn read_error(path: &Path, err: io::Error) -> CyberdrivexError {
    let category = if err.kind() == io::ErrorKind::NotFound {
        ErrorCategory::User
    } else {
        ErrorCategory::Internal
    };
    CyberdrivexError::with_kind_and_source(
        category,
        ErrorKind::Io,
        format!("failed to read from {}", path.display()),
        err,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[cfg(unix)]
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_read_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let err = read_file(&temp_dir.path().join("missing")).expect_err("expected read error");
        assert_eq!(err.category, ErrorCategory::User);
        assert_eq!(err.kind, Some(ErrorKind::Io));
    }

    #[test]
    fn test_read_error_names_cause_once() {
        let temp_dir = TempDir::new().unwrap();
        let err = read_file(&temp_dir.path().join("missing")).expect_err("expected read error");
        let cause = std::error::Error::source(&err).unwrap().to_string();
        let chain = err.chain_message();
        assert!(chain.starts_with("failed to read from "), "{}", chain);
        assert!(chain.ends_with(&cause), "{}", chain);
        assert_eq!(chain.matches(cause.as_str()).count(), 1, "{}", chain);
    }

    #[test]
    #[cfg(unix)]
    fn test_write_file_secure_permissions() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("out.bin");
        write_file_secure(&path, b"data").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"data");
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_write_file_atomic_replaces() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.json");
        write_file_atomic(&path, b"first", ErrorKind::Storage).unwrap();
        write_file_atomic(&path, b"second", ErrorKind::Storage).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");

        let leftovers = fs::read_dir(temp_dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_write_file_atomic_missing_dir() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nope").join("state.json");
        let err = write_file_atomic(&path, b"x", ErrorKind::Storage).expect_err("expected failure");
        assert!(err.is_storage());
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("report.pdf").unwrap(), "report.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\x\\a.txt").unwrap(), "a.txt");
        assert!(sanitize_file_name("..").is_err());
        assert!(sanitize_file_name("dir/").is_err());
        assert!(sanitize_file_name("").is_err());
    }
}
