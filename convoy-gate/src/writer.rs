//! Digest-guarded atomic writer for remediated files.
//!
//! 1. Re-read the target and hash it.
//! 2. Refuse the write if the digest differs from the one taken at evaluation.
//! 3. Write to `<path>.convoy.tmp`, copying the original permissions.
//! 4. Rename over the target (atomic on POSIX).

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::digest::sha256_hex;
use crate::error::{io_err, GateError};

/// New content for one file, produced by evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remediation {
    /// Absolute path of the file.
    pub path: PathBuf,
    /// Path relative to the project root.
    pub relative: PathBuf,
    /// SHA-256 of the content the rules saw.
    pub original_digest: String,
    pub original: String,
    pub content: String,
}

/// Outcome of an individual remediation write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    Written { path: PathBuf },
    /// The file changed after evaluation; nothing was written.
    Conflict { path: PathBuf },
    /// Dry run: the file would have been written.
    WouldWrite { path: PathBuf },
}

/// Apply every remediation, stopping only on I/O failure.
pub fn apply_remediations(
    remediations: &[Remediation],
    dry_run: bool,
) -> Result<Vec<WriteResult>, GateError> {
    remediations
        .iter()
        .map(|r| write_remediation(r, dry_run))
        .collect()
}

fn write_remediation(r: &Remediation, dry_run: bool) -> Result<WriteResult, GateError> {
    if dry_run {
        debug!(path = %r.path.display(), "[dry-run] would remediate");
        return Ok(WriteResult::WouldWrite { path: r.path.clone() });
    }

    let current = std::fs::read(&r.path).map_err(|e| io_err(&r.path, e))?;
    if sha256_hex(&current) != r.original_digest {
        warn!(path = %r.path.display(), "file changed since evaluation; not remediating");
        return Ok(WriteResult::Conflict { path: r.path.clone() });
    }

    let tmp = PathBuf::from(format!("{}.convoy.tmp", r.path.display()));
    write_via_tmp(&r.path, &tmp, &r.content)?;
    info!(path = %r.path.display(), "remediated");
    Ok(WriteResult::Written { path: r.path.clone() })
}

fn write_via_tmp(path: &Path, tmp: &Path, content: &str) -> Result<(), GateError> {
    let perms = std::fs::metadata(path)
        .map_err(|e| io_err(path, e))?
        .permissions();
    std::fs::write(tmp, content).map_err(|e| io_err(tmp, e))?;
    if let Err(e) = std::fs::set_permissions(tmp, perms) {
        let _ = std::fs::remove_file(tmp);
        return Err(io_err(tmp, e));
    }
    if let Err(e) = std::fs::rename(tmp, path) {
        let _ = std::fs::remove_file(tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn remediation(path: &Path, original: &str, content: &str) -> Remediation {
        Remediation {
            path: path.to_path_buf(),
            relative: PathBuf::from(path.file_name().expect("name")),
            original_digest: sha256_hex(original.as_bytes()),
            original: original.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn writes_when_digest_matches() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("main.py");
        fs::write(&path, "print()\n").expect("write");
        let results =
            apply_remediations(&[remediation(&path, "print()\n", "# hdr\nprint()\n")], false)
                .expect("apply");
        assert!(matches!(results[0], WriteResult::Written { .. }));
        assert_eq!(fs::read_to_string(&path).expect("read"), "# hdr\nprint()\n");
        assert!(!tmp.path().join("main.py.convoy.tmp").exists());
    }

    #[test]
    fn refuses_when_file_changed_since_evaluation() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("main.py");
        fs::write(&path, "edited meanwhile\n").expect("write");
        let results =
            apply_remediations(&[remediation(&path, "print()\n", "# hdr\nprint()\n")], false)
                .expect("apply");
        assert!(matches!(results[0], WriteResult::Conflict { .. }));
        assert_eq!(fs::read_to_string(&path).expect("read"), "edited meanwhile\n");
    }

    #[test]
    fn dry_run_leaves_file_alone() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("main.py");
        fs::write(&path, "print()\n").expect("write");
        let results = apply_remediations(&[remediation(&path, "print()\n", "changed")], true)
            .expect("apply");
        assert!(matches!(results[0], WriteResult::WouldWrite { .. }));
        assert_eq!(fs::read_to_string(&path).expect("read"), "print()\n");
    }

    #[test]
    #[cfg(unix)]
    fn keeps_executable_bit() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("build.sh");
        fs::write(&path, "#!/bin/sh\n").expect("write");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
        apply_remediations(&[remediation(&path, "#!/bin/sh\n", "#!/bin/sh\n# hdr\n")], false)
            .expect("apply");
        let mode = fs::metadata(&path).expect("meta").permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
