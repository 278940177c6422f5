//! Content-addressed archive of imported workbook bytes.
//!
//! Objects live at `objects/<aa>/<sha256>.<ext>`, so a workbook imported by
//! any number of runs is stored once and every report can be traced back to
//! the exact bytes it parsed.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "ledger-storage";

const OBJECTS_DIR: &str = "objects";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archived workbook {path} failed verification: expected sha256 {expected}, found {actual}")]
    HashMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
}

/// Receipt for one archived import; `object_path` is relative to the archive root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedWorkbook {
    pub source_name: String,
    pub imported_at: DateTime<Utc>,
    pub content_hash: String,
    pub object_path: PathBuf,
    pub byte_size: usize,
    /// The object was already present from an earlier import.
    pub deduplicated: bool,
}

#[derive(Debug, Clone)]
pub struct WorkbookArchive {
    root: PathBuf,
}

impl WorkbookArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    pub fn object_path(content_hash: &str, source_name: &str) -> PathBuf {
        let shard = content_hash.get(..2).unwrap_or("00");
        PathBuf::from(OBJECTS_DIR)
            .join(shard)
            .join(format!("{content_hash}.{}", object_extension(source_name)))
    }

    /// Archive the bytes of `source_name`. An existing object whose bytes no
    /// longer match its hash is rewritten.
    pub async fn store_workbook(
        &self,
        source_name: &str,
        imported_at: DateTime<Utc>,
        bytes: &[u8],
    ) -> anyhow::Result<ArchivedWorkbook> {
        let content_hash = Self::sha256_hex(bytes);
        let object_path = Self::object_path(&content_hash, source_name);
        let absolute = self.root.join(&object_path);

        let deduplicated = match fs::read(&absolute).await {
            Ok(existing) if Self::sha256_hex(&existing) == content_hash => true,
            Ok(_) => {
                warn!(path = %object_path.display(), "archived object is corrupt, rewriting");
                false
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => false,
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("checking archive object {}", absolute.display()))
            }
        };

        if deduplicated {
            debug!(source = source_name, hash = %content_hash, "workbook already archived");
        } else {
            self.write_object(&absolute, &content_hash, bytes).await?;
        }

        Ok(ArchivedWorkbook {
            source_name: source_name.to_string(),
            imported_at,
            content_hash,
            object_path,
            byte_size: bytes.len(),
            deduplicated,
        })
    }

    async fn write_object(&self, absolute: &Path, content_hash: &str, bytes: &[u8]) -> anyhow::Result<()> {
        let parent = absolute.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating archive directory {}", parent.display()))?;

        // rename within one directory so readers never see a partial object
        let partial = parent.join(format!(".{content_hash}.{}.partial", Uuid::new_v4()));
        fs::write(&partial, bytes)
            .await
            .with_context(|| format!("writing {}", partial.display()))?;
        if let Err(err) = fs::rename(&partial, absolute).await {
            let _ = fs::remove_file(&partial).await;
            return Err(err).with_context(|| format!("moving archive object into {}", absolute.display()));
        }
        Ok(())
    }

    /// Read an archived object back, checking its bytes against the recorded hash.
    pub async fn read_verified(&self, archived: &ArchivedWorkbook) -> anyhow::Result<Vec<u8>> {
        let path = self.root.join(&archived.object_path);
        let bytes = fs::read(&path)
            .await
            .with_context(|| format!("reading archived workbook {}", path.display()))?;
        let actual = Self::sha256_hex(&bytes);
        if actual != archived.content_hash {
            return Err(ArchiveError::HashMismatch {
                path,
                expected: archived.content_hash.clone(),
                actual,
            }
            .into());
        }
        Ok(bytes)
    }
}

fn object_extension(source_name: &str) -> String {
    let ext = Path::new(source_name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_ascii_lowercase();
    if ext.is_empty() {
        "bin".to_string()
    } else {
        ext
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn at(hour: u32) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(&format!("2024-06-01T{hour:02}:30:00Z"))
            .expect("ts")
            .with_timezone(&Utc)
    }

    #[test]
    fn archive_hashing_is_stable() {
        let hash = WorkbookArchive::sha256_hex(b"hello world");
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn objects_are_sharded_by_hash_prefix() {
        assert_eq!(
            WorkbookArchive::object_path("abcdef", "Q1 Incentives.XLSX"),
            PathBuf::from("objects/ab/abcdef.xlsx")
        );
        assert_eq!(
            WorkbookArchive::object_path("abcdef", "../export"),
            PathBuf::from("objects/ab/abcdef.bin")
        );
    }

    #[tokio::test]
    async fn same_bytes_across_runs_are_stored_once() {
        let dir = tempdir().expect("tempdir");
        let archive = WorkbookArchive::new(dir.path());
        let bytes = b"Recruiter Name,Candidate Name\n";

        let first = archive
            .store_workbook("march.csv", at(9), bytes)
            .await
            .expect("first store");
        let second = archive
            .store_workbook("march-copy.csv", at(14), bytes)
            .await
            .expect("second store");

        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.object_path, second.object_path);
        assert_eq!(second.source_name, "march-copy.csv");
        assert_eq!(second.imported_at, at(14));
        assert!(dir.path().join(&first.object_path).exists());
    }

    #[tokio::test]
    async fn corrupt_objects_are_rewritten() {
        let dir = tempdir().expect("tempdir");
        let archive = WorkbookArchive::new(dir.path());
        let stored = archive.store_workbook("a.csv", at(9), b"a,b\n").await.expect("store");

        std::fs::write(dir.path().join(&stored.object_path), b"junk").expect("corrupt");
        let again = archive.store_workbook("a.csv", at(10), b"a,b\n").await.expect("restore");

        assert!(!again.deduplicated);
        assert_eq!(archive.read_verified(&again).await.expect("read back"), b"a,b\n");
    }

    #[tokio::test]
    async fn verified_reads_detect_tampering() {
        let dir = tempdir().expect("tempdir");
        let archive = WorkbookArchive::new(dir.path());
        let stored = archive.store_workbook("a.csv", at(9), b"a,b\n").await.expect("store");

        std::fs::write(dir.path().join(&stored.object_path), b"a,b,c\n").expect("tamper");
        let err = archive.read_verified(&stored).await.expect_err("hash mismatch");
        assert!(err.downcast_ref::<ArchiveError>().is_some());
    }
}
