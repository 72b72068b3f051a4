//! Cross-cutting error taxonomy shared by every component crate.
//!
//! Each component defines its own `thiserror` error type and implements
//! [`Classify`] so the sync engine and CLI can report failures uniformly
//! without downcasting.

use std::fmt;

/// The seven error kinds the core distinguishes, independent of which
/// component raised them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConfigInvalid,
    FetchFailed,
    ChecksumMismatch,
    PoolIoFailed,
    DbConstraintViolation,
    UpstreamParseError,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::ConfigInvalid => "config-invalid",
            ErrorKind::FetchFailed => "fetch-failed",
            ErrorKind::ChecksumMismatch => "checksum-mismatch",
            ErrorKind::PoolIoFailed => "pool-io-failed",
            ErrorKind::DbConstraintViolation => "db-constraint-violation",
            ErrorKind::UpstreamParseError => "upstream-parse-error",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Implemented by every component error type so callers can classify a
/// failure without matching on its concrete variants.
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

/// One item-level failure, as recorded in a [`SyncSummary`] or printed by
/// the CLI: the identity of the offending item plus its classified error.
#[derive(Debug, Clone)]
pub struct ItemFailure {
    /// NEVRA, `name_version_arch`, or equivalent per-format identity string.
    pub item: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.item, self.message, self.kind)
    }
}

/// Aggregated counts for a single sync run, used both for the `SyncRun`
/// audit record and the CLI's end-of-run summary line.
#[derive(Debug, Clone, Default)]
pub struct SyncSummary {
    pub downloaded: u64,
    pub skipped: u64,
    pub bytes_transferred: u64,
    pub failures: Vec<ItemFailure>,
}

impl SyncSummary {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// `partial` iff at least one item failed and at least one succeeded.
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty() && (self.downloaded > 0 || self.skipped > 0)
    }
}

impl fmt::Display for SyncSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "downloaded={} skipped={} failed={} bytes={}",
            self.downloaded,
            self.skipped,
            self.failures.len(),
            self.bytes_transferred
        )
    }
}
