//! File integrity fingerprints.
//!
//! A fingerprint is `(size, sha-256, mtime)` of the file contents at upload
//! time; resumption requires an exact match on all three.

use chrono::{DateTime, SubsecRound, Utc};
use rollcall_protocol::types::FileFingerprint;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/// Result of checking a file against its stored fingerprint.
#[derive(Debug, Clone)]
pub enum IntegrityOutcome {
    Match,
    Mismatch {
        /// Which fields diverged, in stable order.
        fields: Vec<&'static str>,
        /// The fingerprint of the file as it is now.
        actual: FileFingerprint,
    },
}

/// Compute the fingerprint with a buffered streaming hash; the file is never
/// loaded whole. The mtime is truncated to the second, matching the stored
/// ISO-8601 precision.
pub fn compute_fingerprint(path: &Path) -> io::Result<FileFingerprint> {
    let file = File::open(path)?;
    let metadata = file.metadata()?;
    let modified: DateTime<Utc> = metadata.modified()?.into();

    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(FileFingerprint {
        file_size: metadata.len(),
        file_hash: hex::encode(hasher.finalize()),
        file_last_modified: modified.trunc_subsecs(0),
    })
}

/// Recompute and compare against the stored fingerprint.
pub fn verify_fingerprint(
    path: &Path,
    expected: &FileFingerprint,
) -> io::Result<IntegrityOutcome> {
    let actual = compute_fingerprint(path)?;
    let fields = expected.diff(&actual);
    if fields.is_empty() {
        Ok(IntegrityOutcome::Match)
    } else {
        Ok(IntegrityOutcome::Mismatch { fields, actual })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn known_content_hashes_stably() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello rollcall\n").unwrap();
        file.flush().unwrap();

        let first = compute_fingerprint(file.path()).unwrap();
        let second = compute_fingerprint(file.path()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.file_size, 15);
        assert_eq!(first.file_hash.len(), 64);
        assert!(first.file_hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(first.file_last_modified.timestamp_subsec_nanos(), 0);
    }

    #[test]
    fn verify_matches_unchanged_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"a,b,c\n1,2,3\n").unwrap();
        file.flush().unwrap();

        let expected = compute_fingerprint(file.path()).unwrap();
        assert!(matches!(
            verify_fingerprint(file.path(), &expected).unwrap(),
            IntegrityOutcome::Match
        ));
    }

    #[test]
    fn changed_bytes_are_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"original").unwrap();
        file.flush().unwrap();
        let expected = compute_fingerprint(file.path()).unwrap();

        file.write_all(b" plus more").unwrap();
        file.flush().unwrap();

        match verify_fingerprint(file.path(), &expected).unwrap() {
            IntegrityOutcome::Mismatch { fields, actual } => {
                assert!(fields.contains(&"file_size"));
                assert!(fields.contains(&"file_hash"));
                assert_ne!(actual.file_hash, expected.file_hash);
            }
            IntegrityOutcome::Match => panic!("expected a mismatch"),
        }
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = compute_fingerprint(Path::new("/nonexistent/rollcall.csv")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
