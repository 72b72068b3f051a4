//! Content-addressed byte store.
//!
//! All package and repository-file bytes live under one pool root, laid
//! out as a two-level SHA-256 fan-out:
//!
//! ```text
//! <root>/content/<h[0:2]>/<h[2:4]>/<h>_<filename>
//! <root>/files/<h[0:2]>/<h[2:4]>/<h>_<filename>
//! ```
//!
//! `Pool::add` computes the hash from the bytes actually received and
//! deduplicates on it; `Pool::link` materializes a hardlink from the pool
//! into a published tree. Pool and every `link` destination must share a
//! filesystem.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("pool I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("checksum mismatch for {filename}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        filename: String,
        expected: String,
        actual: String,
    },
    #[error("hardlink destination {dst} is on a different filesystem than the pool")]
    CrossDeviceLink { dst: PathBuf },
    #[error("object not found in pool: {sha256}")]
    NotFound { sha256: String },
}

impl packmirror_errors::Classify for PoolError {
    fn kind(&self) -> packmirror_errors::ErrorKind {
        match self {
            PoolError::ChecksumMismatch { .. } => packmirror_errors::ErrorKind::ChecksumMismatch,
            _ => packmirror_errors::ErrorKind::PoolIoFailed,
        }
    }
}

fn io_err(path: &Path, source: io::Error) -> PoolError {
    PoolError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Which pool subtree an object belongs to: packages go under `content/`,
/// non-package upstream files (mirror mode) go under `files/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subtree {
    Content,
    Files,
}

impl Subtree {
    fn dirname(self) -> &'static str {
        match self {
            Subtree::Content => "content",
            Subtree::Files => "files",
        }
    }
}

/// Result of a successful `add`: whether the object already existed
/// (deduplicated) or was newly written.
#[derive(Debug, Clone)]
pub struct AddOutcome {
    pub sha256: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub created: bool,
}

#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    pub checked: u64,
    pub mismatches: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub removed: Vec<PathBuf>,
    pub bytes_reclaimed: u64,
}

pub struct Pool {
    root: PathBuf,
    tmp_dir: PathBuf,
    // Excludes the existence-check-then-rename in `add` from racing a
    // concurrent `cleanup` pass. Held only for that instant, not for the
    // hashing pass, so concurrent downloads of distinct objects never
    // serialize on each other.
    add_lock: Mutex<()>,
}

impl Pool {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, PoolError> {
        let root = root.into();
        for subtree in [Subtree::Content, Subtree::Files] {
            let dir = root.join(subtree.dirname());
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
        let tmp_dir = root
            .parent()
            .map(|p| p.join("tmp"))
            .unwrap_or_else(|| root.join("tmp"));
        fs::create_dir_all(&tmp_dir).map_err(|e| io_err(&tmp_dir, e))?;
        Ok(Self {
            root,
            tmp_dir,
            add_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Computes the bucket path `<h[0:2]>/<h[2:4]>/<h>_<filename>` under
    /// the given subtree.
    pub fn path_for(&self, sha256: &str, filename: &str, subtree: Subtree) -> PathBuf {
        self.root
            .join(subtree.dirname())
            .join(&sha256[0..2])
            .join(&sha256[2..4])
            .join(format!("{sha256}_{filename}"))
    }

    /// Streams `src` into the pool, computing its SHA-256 as it goes.
    /// If `expected_sha256` is given and the computed hash differs, the
    /// temp file is deleted and `ChecksumMismatch` is returned.
    pub fn add_reader(
        &self,
        mut src: impl Read,
        filename: &str,
        subtree: Subtree,
        expected_sha256: Option<&str>,
    ) -> Result<AddOutcome, PoolError> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.tmp_dir)
            .map_err(|e| io_err(&self.tmp_dir, e))?;
        let mut hasher = Sha256::new();
        let mut size_bytes = 0u64;
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = src.read(&mut buf).map_err(|e| io_err(&self.tmp_dir, e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            tmp.write_all(&buf[..n])
                .map_err(|e| io_err(tmp.path(), e))?;
            size_bytes += n as u64;
        }
        tmp.flush().map_err(|e| io_err(tmp.path(), e))?;
        let sha256 = hex::encode(hasher.finalize());

        if let Some(expected) = expected_sha256 {
            if expected != sha256 {
                return Err(PoolError::ChecksumMismatch {
                    filename: filename.to_string(),
                    expected: expected.to_string(),
                    actual: sha256,
                });
            }
        }

        let dst = self.path_for(&sha256, filename, subtree);
        let _guard = self.add_lock.lock().unwrap();
        if dst.exists() {
            debug!(sha256 = %sha256, "pool add deduplicated");
            return Ok(AddOutcome {
                sha256,
                path: dst,
                size_bytes,
                created: false,
            });
        }
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        tmp.persist(&dst)
            .map_err(|e| io_err(&dst, e.error))?;
        debug!(sha256 = %sha256, path = %dst.display(), "pool add wrote new object");
        Ok(AddOutcome {
            sha256,
            path: dst,
            size_bytes,
            created: true,
        })
    }

    pub fn add(
        &self,
        src_path: &Path,
        filename: &str,
        subtree: Subtree,
        expected_sha256: Option<&str>,
    ) -> Result<AddOutcome, PoolError> {
        let file = File::open(src_path).map_err(|e| io_err(src_path, e))?;
        self.add_reader(file, filename, subtree, expected_sha256)
    }

    /// Creates a hardlink from the pool object to `dst`, replacing
    /// whatever is currently at `dst`.
    pub fn link(
        &self,
        sha256: &str,
        filename: &str,
        subtree: Subtree,
        dst: &Path,
    ) -> Result<(), PoolError> {
        let src = self.path_for(sha256, filename, subtree);
        if !src.exists() {
            return Err(PoolError::NotFound {
                sha256: sha256.to_string(),
            });
        }
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        if dst.exists() {
            fs::remove_file(dst).map_err(|e| io_err(dst, e))?;
        }
        fs::hard_link(&src, dst).map_err(|e| {
            if e.raw_os_error() == Some(libc_exdev()) {
                PoolError::CrossDeviceLink {
                    dst: dst.to_path_buf(),
                }
            } else {
                io_err(dst, e)
            }
        })
    }

    /// Recomputes every pool object's SHA-256 and confirms it matches the
    /// hash encoded in its filename. Does not delete anything.
    pub fn verify(&self) -> Result<VerifyReport, PoolError> {
        let mut report = VerifyReport::default();
        for subtree in [Subtree::Content, Subtree::Files] {
            let dir = self.root.join(subtree.dirname());
            for entry in walkdir::WalkDir::new(&dir)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                let path = entry.path();
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let Some((claimed, _)) = name.split_once('_') else {
                    continue;
                };
                report.checked += 1;
                let mut hasher = Sha256::new();
                let mut f = File::open(path).map_err(|e| io_err(path, e))?;
                io::copy(&mut f, &mut hasher).map_err(|e| io_err(path, e))?;
                let actual = hex::encode(hasher.finalize());
                if actual != claimed {
                    warn!(path = %path.display(), claimed, actual, "pool object checksum mismatch");
                    report.mismatches.push(path.to_path_buf());
                }
            }
        }
        Ok(report)
    }

    /// Removes every pool object whose sha256 is not present in `live`.
    pub fn cleanup(&self, live: &HashSet<String>) -> Result<CleanupReport, PoolError> {
        let _guard = self.add_lock.lock().unwrap();
        let mut report = CleanupReport::default();
        for subtree in [Subtree::Content, Subtree::Files] {
            let dir = self.root.join(subtree.dirname());
            for entry in walkdir::WalkDir::new(&dir)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                let path = entry.path();
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let Some((sha256, _)) = name.split_once('_') else {
                    continue;
                };
                if !live.contains(sha256) {
                    let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                    fs::remove_file(path).map_err(|e| io_err(path, e))?;
                    report.bytes_reclaimed += size;
                    report.removed.push(path.to_path_buf());
                }
            }
        }
        Ok(report)
    }
}

#[cfg(unix)]
fn libc_exdev() -> i32 {
    18
}

#[cfg(not(unix))]
fn libc_exdev() -> i32 {
    -1
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn pool() -> (tempfile::TempDir, Pool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::open(dir.path().join("pool")).unwrap();
        (dir, pool)
    }

    #[test]
    fn add_then_add_again_deduplicates() {
        let (_dir, pool) = pool();
        let a = pool
            .add_reader(Cursor::new(b"hello world"), "pkg.rpm", Subtree::Content, None)
            .unwrap();
        assert!(a.created);
        let b = pool
            .add_reader(Cursor::new(b"hello world"), "pkg.rpm", Subtree::Content, None)
            .unwrap();
        assert!(!b.created);
        assert_eq!(a.sha256, b.sha256);
        assert_eq!(a.path, b.path);
    }

    #[test]
    fn checksum_mismatch_is_rejected() {
        let (_dir, pool) = pool();
        let err = pool
            .add_reader(
                Cursor::new(b"hello world"),
                "pkg.rpm",
                Subtree::Content,
                Some("0000000000000000000000000000000000000000000000000000000000000000"),
            )
            .unwrap_err();
        assert!(matches!(err, PoolError::ChecksumMismatch { .. }));
    }

    #[test]
    fn link_creates_hardlink_to_same_inode() {
        let (dir, pool) = pool();
        let added = pool
            .add_reader(Cursor::new(b"payload"), "pkg.rpm", Subtree::Content, None)
            .unwrap();
        let dst = dir.path().join("published/pkg.rpm");
        pool.link(&added.sha256, "pkg.rpm", Subtree::Content, &dst)
            .unwrap();
        let src_meta = fs::metadata(&added.path).unwrap();
        let dst_meta = fs::metadata(&dst).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            assert_eq!(src_meta.ino(), dst_meta.ino());
        }
        let _ = (src_meta, dst_meta);
    }

    #[test]
    fn cleanup_removes_only_dead_objects() {
        let (_dir, pool) = pool();
        let live = pool
            .add_reader(Cursor::new(b"keep me"), "keep.rpm", Subtree::Content, None)
            .unwrap();
        let dead = pool
            .add_reader(Cursor::new(b"drop me"), "drop.rpm", Subtree::Content, None)
            .unwrap();
        let mut live_set = HashSet::new();
        live_set.insert(live.sha256.clone());
        let report = pool.cleanup(&live_set).unwrap();
        assert_eq!(report.removed.len(), 1);
        assert!(live.path.exists());
        assert!(!dead.path.exists());
    }

    #[test]
    fn verify_detects_no_mismatch_on_healthy_pool() {
        let (_dir, pool) = pool();
        pool.add_reader(Cursor::new(b"a"), "a.rpm", Subtree::Content, None)
            .unwrap();
        pool.add_reader(Cursor::new(b"b"), "b.rpm", Subtree::Files, None)
            .unwrap();
        let report = pool.verify().unwrap();
        assert_eq!(report.checked, 2);
        assert!(report.mismatches.is_empty());
    }
}
