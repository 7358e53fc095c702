//! Byte-level I/O primitives shared across formats (spec §2 component A).
//!
//! Readers never assume random access; callers that need it import
//! [`SeekableSource`] explicitly. Writers never assume non-sequential access
//! except through [`RandomAccessOutput`], which formats use only for the
//! narrow backpatch/absolute-position cases the spec calls out (7z is
//! read-only in this crate; ZIP is the only writer that needs it).

mod bounded;
mod counting;
mod sink;

pub use bounded::Bounded;
pub use counting::{CountingReader, Crc32Reader};
pub use sink::{MemoryOutput, RandomAccessOutput};

use std::io::{Read, Seek};

/// A byte source that additionally supports absolute-position seeking.
/// 7z random access and ZIP central-directory lookups both require this;
/// a pure sequential source (e.g. a pipe) does not implement it.
pub trait SeekableSource: Read + Seek {}
impl<T: Read + Seek> SeekableSource for T {}
