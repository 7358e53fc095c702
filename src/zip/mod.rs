//! ZIP container support: central-directory reading, Zip64-aware output,
//! split/spanned archives, and concurrent scatter-gather construction
//! (spec §2 components F-I, §4.3-§4.4).

pub mod central_directory;
pub mod entry;
pub mod extra;
pub mod output;
pub mod scatter;
pub mod split;

pub use central_directory::CentralDirectoryReader;
pub use entry::{MethodId, ZipEntry};
pub use extra::ExtraField;
pub use output::OutputEngine;
pub use scatter::ScatterGatherBuilder;
pub use split::SplitZipWriter;

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use crate::codec::CodecRegistry;
use crate::error::Result;
use crate::io::Bounded;

/// Read-only handle onto a ZIP archive's central directory, with entry
/// bodies decompressed lazily on request.
pub struct ZipFile<R> {
    source: R,
    entries: Vec<ZipEntry>,
    codecs: CodecRegistry,
}

impl ZipFile<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        Self::new(BufReader::new(file))
    }
}

impl<R: Read + Seek> ZipFile<R> {
    pub fn new(mut source: R) -> Result<Self> {
        let entries = CentralDirectoryReader::read(&mut source)?;
        Ok(Self {
            source,
            entries,
            codecs: CodecRegistry::with_defaults(),
        })
    }

    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    pub fn find_entry(&self, name: &str) -> Option<&ZipEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Returns a decompressing reader over one entry's body, seeking the
    /// underlying source to its local file header first so the true data
    /// offset (which may differ from the central directory's optimistic
    /// guess if the local header carries extra fields the CD doesn't)
    /// is read from the archive itself.
    pub fn read_entry<'a>(&'a mut self, entry: &ZipEntry) -> Result<Box<dyn Read + 'a>> {
        let data_offset = self.locate_entry_data(entry)?;
        self.source.seek(std::io::SeekFrom::Start(data_offset))?;
        let bounded = Bounded::new(&mut self.source, entry.compressed_size);
        self.codecs_decode(entry, Box::new(bounded))
    }

    fn codecs_decode<'a>(&self, entry: &ZipEntry, input: Box<dyn Read + 'a>) -> Result<Box<dyn Read + 'a>> {
        match entry.method.0 {
            0 => Ok(input),
            8 => Ok(Box::new(flate2::read::DeflateDecoder::new(input))),
            12 => self.codecs.decode(&[0x04, 0x02, 0x02], input, &[], entry.uncompressed_size, u64::MAX),
            other => Err(crate::error::ArchiveError::unsupported(format!("zip compression method {other}"))),
        }
    }

    fn locate_entry_data(&mut self, entry: &ZipEntry) -> Result<u64> {
        self.source.seek(std::io::SeekFrom::Start(entry.local_header_offset))?;
        let mut fixed = [0u8; 30];
        self.source.read_exact(&mut fixed)?;
        let sig = u32::from_le_bytes(fixed[0..4].try_into().unwrap());
        if sig != central_directory::LOCAL_FILE_HEADER_SIG {
            return Err(crate::error::ArchiveError::corrupt("local file header signature mismatch"));
        }
        let name_len = u16::from_le_bytes(fixed[26..28].try_into().unwrap()) as u64;
        let extra_len = u16::from_le_bytes(fixed[28..30].try_into().unwrap()) as u64;
        Ok(entry.local_header_offset + 30 + name_len + extra_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryOutput;
    use crate::options::WriterOptions;
    use std::io::Cursor;

    #[test]
    fn writes_then_reads_back_a_stored_entry() {
        let mut options = WriterOptions::default();
        options.compression_method = crate::options::CompressionMethod::Stored;
        let mut engine = OutputEngine::new(MemoryOutput::new(), options);
        engine.add_entry("hello.txt", b"hello world").unwrap();
        let out = engine.finish().unwrap();
        let bytes = out.into_inner();

        let mut zip = ZipFile::new(Cursor::new(bytes)).unwrap();
        assert_eq!(zip.entries().len(), 1);
        let entry = zip.entries()[0].clone();
        let mut reader = zip.read_entry(&entry).unwrap();
        let mut got = Vec::new();
        reader.read_to_end(&mut got).unwrap();
        assert_eq!(got, b"hello world");
    }
}
