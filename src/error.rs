//! Error taxonomy shared by every format reader/writer in this crate.

use std::io;
use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Errors produced while parsing or emitting any supported container format.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// EOF encountered inside a structural region (header, record, extra field).
    #[error("truncated archive: {0}")]
    Truncated(String),

    /// The container's leading magic bytes did not match any supported format.
    #[error("bad signature: {0}")]
    BadSignature(String),

    /// A structurally well-formed header failed a semantic check (CRC, bounds,
    /// ordering, overflow).
    #[error("corrupt header: {reason}")]
    CorruptHeader {
        /// Human-readable description of what failed.
        reason: String,
    },

    /// A coder, header version, or archive feature the build does not implement.
    #[error("unsupported feature: {feature}")]
    Unsupported {
        /// Name of the unsupported feature or method id.
        feature: String,
    },

    /// A size computed from on-disk values would exceed the caller's memory budget.
    #[error("memory limit exceeded: requested {requested_kib} KiB, limit {limit_kib} KiB")]
    MemoryLimitExceeded {
        /// KiB the archive's header claims it needs.
        requested_kib: u64,
        /// KiB the caller configured as a ceiling.
        limit_kib: u64,
    },

    /// `Zip64Mode::Never` was violated by an oversized field.
    #[error("zip64 extension required for field: {field}")]
    Zip64Required {
        /// Name of the field that overflowed its 32/16-bit representation.
        field: String,
    },

    /// A CRC32 (or CRC16) check failed.
    #[error("checksum mismatch in {where_}: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// What was being checked (e.g. "entry README.md", "folder 3").
        where_: String,
        expected: u64,
        actual: u64,
    },

    /// An entry name or comment name exceeded a format's length cap.
    #[error("name too long: {0} code units")]
    NameTooLong(usize),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A scatter-gather build did not complete within its configured wait.
    #[error("scatter-gather build timed out")]
    BuildTimedOut,
}

impl ArchiveError {
    pub fn corrupt(reason: impl Into<String>) -> Self {
        ArchiveError::CorruptHeader {
            reason: reason.into(),
        }
    }

    pub fn unsupported(feature: impl Into<String>) -> Self {
        ArchiveError::Unsupported {
            feature: feature.into(),
        }
    }

    pub fn truncated(where_: impl Into<String>) -> Self {
        ArchiveError::Truncated(where_.into())
    }
}
