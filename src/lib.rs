//! # archivy: multi-format archive container library
//!
//! `archivy` reads and writes archive containers without shelling out to an
//! external tool: 7z (including solid-block, shared-dictionary folders),
//! ZIP (Zip64, split/spanned output, concurrent scatter-gather
//! construction), and the tar/cpio/LHA family at a shared streaming
//! contract (spec §4.5).
//!
//! ## Reading a 7z archive
//!
//! ```no_run
//! use archivy::sevenz::SevenZFile;
//! use archivy::options::ReaderOptions;
//!
//! # fn main() -> archivy::Result<()> {
//! let file = std::fs::File::open("archive.7z")?;
//! let mut archive = SevenZFile::open(file, ReaderOptions::default())?;
//! for entry in archive.entries().to_vec() {
//!     if entry.has_stream {
//!         let mut body = archive.read_entry_body(&entry)?;
//!         let mut buf = Vec::new();
//!         std::io::copy(&mut body, &mut buf)?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Writing a ZIP archive
//!
//! ```no_run
//! use archivy::zip::OutputEngine;
//! use archivy::io::MemoryOutput;
//! use archivy::options::WriterOptions;
//!
//! # fn main() -> archivy::Result<()> {
//! let mut engine = OutputEngine::new(MemoryOutput::new(), WriterOptions::default());
//! engine.add_entry("hello.txt", b"hello world")?;
//! let out = engine.finish()?;
//! let _bytes = out.into_inner();
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod cpio;
pub mod error;
pub mod io;
pub mod lha;
pub mod options;
pub mod sevenz;
pub mod tar;
pub mod zip;

pub use error::{ArchiveError, Result};
