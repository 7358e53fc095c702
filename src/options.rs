//! Reader/writer configuration (spec §6 "CLI surface / configuration").
//!
//! These are the knobs external collaborators (CLI wiring, embedding
//! applications) are expected to set; the crate itself never reads
//! environment variables or argv.

use std::path::PathBuf;

/// Options accepted by every format reader.
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Hard ceiling on any allocation whose size is derived from on-disk
    /// values (7z header sanity pass, LZMA/LZMA2 dictionary sizing, ...).
    pub max_memory_limit_kib: u64,
    /// Synthesize a name for entries formats allow to be unnamed.
    pub use_default_name_for_unnamed_entries: bool,
    /// Enable the 7z broken-archive backward scan (§4.1). Must only be set
    /// alongside a finite `max_memory_limit_kib`.
    pub try_to_recover_broken_archives: bool,
    /// Reject entry names longer than this many UTF-16 code units / bytes
    /// (format-dependent).
    pub max_entry_name_length: usize,
    /// Charset used to decode legacy (non-Unicode-flagged) ZIP/tar/cpio names.
    pub charset: &'static str,
    /// Separator used when normalizing archive-internal paths.
    pub file_separator_char: char,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            max_memory_limit_kib: 1024 * 1024, // 1 GiB
            use_default_name_for_unnamed_entries: false,
            try_to_recover_broken_archives: false,
            max_entry_name_length: 65535,
            charset: "UTF-8",
            file_separator_char: '/',
        }
    }
}

impl ReaderOptions {
    pub fn with_max_memory_limit_kib(mut self, limit: u64) -> Self {
        self.max_memory_limit_kib = limit;
        self
    }

    pub fn with_recovery_enabled(mut self, enabled: bool) -> Self {
        self.try_to_recover_broken_archives = enabled;
        self
    }
}

/// How aggressively a ZIP writer promotes fields to their Zip64 widths.
///
/// See spec §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Zip64Mode {
    /// Always emit 8-byte sizes/offsets and the Zip64 EOCD pair.
    Always,
    /// Never promote; fail with `Zip64Required` if a field would overflow.
    Never,
    /// Promote only the fields that actually overflow their 32/16-bit cap.
    #[default]
    AsNeeded,
    /// Like `Always` for local/central record sizes, but per-entry CD
    /// offsets/disk numbers are promoted only when needed (7z/Excel
    /// compatibility mode).
    AlwaysWithCompatibility,
}

/// Compression method used for newly written entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Bzip2,
    Lzma,
}

/// Options accepted by the ZIP `OutputEngine` / `ScatterGatherBuilder`.
#[derive(Debug, Clone)]
pub struct WriterOptions {
    pub zip64_mode: Zip64Mode,
    /// Segment size for split archives; `None` means a single-file ZIP.
    pub split_size: Option<u64>,
    pub compression_method: CompressionMethod,
    pub compression_level: u32,
    /// Power-of-two alignment requested for entry payload offsets.
    pub alignment: Option<u32>,
    /// Directory scatter-gather spill files are created under.
    pub backing_store_dir: Option<PathBuf>,
    /// Worker pool size for `ScatterGatherBuilder`.
    pub worker_count: usize,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            zip64_mode: Zip64Mode::AsNeeded,
            split_size: None,
            compression_method: CompressionMethod::Deflate,
            compression_level: 6,
            alignment: None,
            backing_store_dir: None,
            worker_count: 4,
        }
    }
}

impl WriterOptions {
    pub fn with_zip64_mode(mut self, mode: Zip64Mode) -> Self {
        self.zip64_mode = mode;
        self
    }

    pub fn with_split_size(mut self, size: u64) -> Self {
        self.split_size = Some(size);
        self
    }

    pub fn with_worker_count(mut self, n: usize) -> Self {
        assert!(n > 0, "worker_count must be at least 1");
        self.worker_count = n;
        self
    }
}

pub const SPLIT_SEGMENT_MIN: u64 = 64 * 1024;
pub const SPLIT_SEGMENT_MAX: u64 = u32::MAX as u64;
