//! Writes LFH/CD/EOCD records under a configurable Zip64 policy, with
//! raw-entry insertion and alignment padding (spec §2 component H, §4.3).
//!
//! Grounded on the teacher's `StreamingZipWriter` (LFH/CD/EOCD byte layout,
//! data-descriptor use) generalized to a `RandomAccessOutput` sink, a real
//! `Zip64Mode` policy instead of an always-`AsNeeded` implicit one, and
//! entry insertion from pre-compressed bytes for the scatter-gather path.

use std::io::{self, Read, Write};

use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::error::{ArchiveError, Result};
use crate::io::RandomAccessOutput;
use crate::options::{CompressionMethod, WriterOptions, Zip64Mode};

use super::entry::{gp_flag, MethodId, ZipEntry};
use super::extra::{header_id, ExtraField, Zip64Extra};

use super::central_directory::{CENTRAL_DIRECTORY_SIG, EOCD_SIG, LOCAL_FILE_HEADER_SIG, ZIP64_EOCD_LOCATOR_SIG, ZIP64_EOCD_SIG};

/// Drives LFH/CD/EOCD emission against any [`RandomAccessOutput`], honoring
/// `options.zip64_mode` for every size-bearing field (spec §4.3).
pub struct OutputEngine<W> {
    output: W,
    options: WriterOptions,
    finished_entries: Vec<ZipEntry>,
}

impl<W: RandomAccessOutput> OutputEngine<W> {
    pub fn new(output: W, options: WriterOptions) -> Self {
        Self {
            output,
            options,
            finished_entries: Vec::new(),
        }
    }

    /// Compresses `data` with the configured method and writes a complete
    /// entry (LFH + payload, no data descriptor — sizes are known up
    /// front because the whole payload is in memory).
    pub fn add_entry(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let crc32 = crc32fast::hash(data);
        let (compressed, method) = self.compress(data)?;
        let entry = ZipEntry {
            method,
            crc32,
            compressed_size: compressed.len() as u64,
            uncompressed_size: data.len() as u64,
            ..ZipEntry::new(name)
        };
        self.add_raw_archive_entry(entry, compressed.as_slice())
    }

    fn compress(&self, data: &[u8]) -> Result<(Vec<u8>, MethodId)> {
        match self.options.compression_method {
            CompressionMethod::Stored => Ok((data.to_vec(), MethodId::STORED)),
            CompressionMethod::Deflate => {
                let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(self.options.compression_level));
                encoder.write_all(data)?;
                Ok((encoder.finish()?, MethodId::DEFLATE))
            }
            CompressionMethod::Bzip2 => Err(ArchiveError::unsupported("BZip2 output compression")),
            CompressionMethod::Lzma => Err(ArchiveError::unsupported("LZMA output compression")),
        }
    }

    /// Inserts an already-compressed entry verbatim: this is how the
    /// scatter-gather merge step serializes each worker's spill records
    /// (spec §4.3 "raw entries").
    pub fn add_raw_archive_entry(&mut self, mut entry: ZipEntry, mut payload: impl Read) -> Result<()> {
        self.apply_zip64_policy(&mut entry)?;

        if let Some(alignment) = entry.alignment {
            self.pad_for_alignment(&mut entry, alignment)?;
        }

        let offset = self.output.position()?;
        entry.local_header_offset = offset;
        self.write_local_header(&entry)?;

        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = payload.read(&mut buf)?;
            if n == 0 {
                break;
            }
            self.output.write_all(&buf[..n])?;
        }

        self.finished_entries.push(entry);
        Ok(())
    }

    /// Ensures the entry's declared sizes/offset are representable given
    /// `zip64_mode`, attaching a Zip64 extra field when the mode calls for
    /// one (spec §4.3).
    fn apply_zip64_policy(&self, entry: &mut ZipEntry) -> Result<()> {
        entry.extras.retain(|e| e.header_id() != header_id::ZIP64);

        match self.options.zip64_mode {
            Zip64Mode::Never => {
                if entry.needs_zip64() {
                    return Err(ArchiveError::Zip64Required {
                        field: "size/offset".into(),
                    });
                }
            }
            Zip64Mode::Always => {
                entry.extras.push(ExtraField::Zip64(Zip64Extra {
                    uncompressed_size: Some(entry.uncompressed_size),
                    compressed_size: Some(entry.compressed_size),
                    local_header_offset: None,
                    disk_start: None,
                }));
            }
            Zip64Mode::AsNeeded | Zip64Mode::AlwaysWithCompatibility => {
                let always_widen = self.options.zip64_mode == Zip64Mode::AlwaysWithCompatibility;
                let need_size = always_widen || entry.uncompressed_size > u32::MAX as u64 || entry.compressed_size > u32::MAX as u64;
                let need_offset = entry.local_header_offset > u32::MAX as u64;
                if need_size || need_offset {
                    entry.extras.push(ExtraField::Zip64(Zip64Extra {
                        uncompressed_size: need_size.then_some(entry.uncompressed_size),
                        compressed_size: need_size.then_some(entry.compressed_size),
                        local_header_offset: need_offset.then_some(entry.local_header_offset),
                        disk_start: None,
                    }));
                }
            }
        }
        Ok(())
    }

    /// Inserts a `0xFFFF`-id padding extra so the entry's payload begins at
    /// an offset that is a multiple of `alignment` (spec §4.3).
    fn pad_for_alignment(&mut self, entry: &mut ZipEntry, alignment: u32) -> Result<()> {
        assert!(alignment.is_power_of_two(), "alignment must be a power of two");
        let fixed_len = Self::local_header_encoded_len(entry) as u64;
        let base = self.output.position()?;
        let without_pad_end = base + fixed_len;
        if without_pad_end % alignment as u64 == 0 {
            return Ok(());
        }
        // A padding extra field costs a 4-byte frame plus its body; solve
        // for the body length that lands the payload on the boundary.
        let remainder = (without_pad_end + 4) % alignment as u64;
        let pad_body = if remainder == 0 { 0 } else { alignment as u64 - remainder };
        entry.extras.push(ExtraField::Padding { len: pad_body as usize });
        Ok(())
    }

    fn local_header_encoded_len(entry: &ZipEntry) -> usize {
        let mut extras_len = 0usize;
        for e in &entry.extras {
            let mut buf = Vec::new();
            super::extra::serialize_extra(e, &mut buf);
            extras_len += buf.len();
        }
        30 + entry.name.len() + extras_len
    }

    fn write_local_header(&mut self, entry: &ZipEntry) -> Result<()> {
        let mut extras = Vec::new();
        for e in &entry.extras {
            super::extra::serialize_extra(e, &mut extras);
        }

        self.output.write_all(&LOCAL_FILE_HEADER_SIG.to_le_bytes())?;
        self.output.write_all(&20u16.to_le_bytes())?;
        self.output.write_all(&entry.general_purpose_flags.to_le_bytes())?;
        self.output.write_all(&entry.method.0.to_le_bytes())?;
        self.output.write_all(&0u16.to_le_bytes())?; // mod time
        self.output.write_all(&0u16.to_le_bytes())?; // mod date
        self.output.write_all(&entry.crc32.to_le_bytes())?;
        self.output.write_all(&clamp_u32(entry.compressed_size).to_le_bytes())?;
        self.output.write_all(&clamp_u32(entry.uncompressed_size).to_le_bytes())?;
        self.output.write_all(&(entry.name.len() as u16).to_le_bytes())?;
        self.output.write_all(&(extras.len() as u16).to_le_bytes())?;
        self.output.write_all(entry.name.as_bytes())?;
        self.output.write_all(&extras)?;
        Ok(())
    }

    /// Writes the central directory and EOCD (promoting to the Zip64 EOCD
    /// pair when entry count or CD geometry need it) and returns the
    /// underlying sink.
    pub fn finish(mut self) -> Result<W> {
        let cd_offset = self.output.position()?;
        for entry in &self.finished_entries {
            self.write_central_directory_record(entry)?;
        }
        let cd_end = self.output.position()?;
        let cd_size = cd_end - cd_offset;

        let need_zip64_eocd = self.finished_entries.len() > u16::MAX as usize
            || cd_size > u32::MAX as u64
            || cd_offset > u32::MAX as u64
            || self.options.zip64_mode == Zip64Mode::Always;

        if need_zip64_eocd {
            self.write_zip64_eocd(cd_offset, cd_size)?;
        }
        self.write_eocd(cd_offset, cd_size)?;
        Ok(self.output)
    }

    fn write_central_directory_record(&mut self, entry: &ZipEntry) -> Result<()> {
        let mut extras = Vec::new();
        for e in &entry.extras {
            super::extra::serialize_extra(e, &mut extras);
        }

        self.output.write_all(&CENTRAL_DIRECTORY_SIG.to_le_bytes())?;
        self.output.write_all(&20u16.to_le_bytes())?;
        self.output.write_all(&20u16.to_le_bytes())?;
        self.output.write_all(&entry.general_purpose_flags.to_le_bytes())?;
        self.output.write_all(&entry.method.0.to_le_bytes())?;
        self.output.write_all(&0u16.to_le_bytes())?;
        self.output.write_all(&0u16.to_le_bytes())?;
        self.output.write_all(&entry.crc32.to_le_bytes())?;
        self.output.write_all(&clamp_u32(entry.compressed_size).to_le_bytes())?;
        self.output.write_all(&clamp_u32(entry.uncompressed_size).to_le_bytes())?;
        self.output.write_all(&(entry.name.len() as u16).to_le_bytes())?;
        self.output.write_all(&(extras.len() as u16).to_le_bytes())?;
        self.output.write_all(&(entry.comment.len() as u16).to_le_bytes())?;
        self.output.write_all(&clamp_u16(entry.disk_number_start as u64).to_le_bytes())?;
        self.output.write_all(&0u16.to_le_bytes())?; // internal attrs
        self.output.write_all(&entry.external_attributes.to_le_bytes())?;
        self.output.write_all(&clamp_u32(entry.local_header_offset).to_le_bytes())?;
        self.output.write_all(entry.name.as_bytes())?;
        self.output.write_all(&extras)?;
        self.output.write_all(entry.comment.as_bytes())?;
        Ok(())
    }

    fn write_zip64_eocd(&mut self, cd_offset: u64, cd_size: u64) -> Result<()> {
        let record_start = self.output.position()?;
        self.output.write_all(&ZIP64_EOCD_SIG.to_le_bytes())?;
        self.output.write_all(&44u64.to_le_bytes())?;
        self.output.write_all(&45u16.to_le_bytes())?; // version made by
        self.output.write_all(&45u16.to_le_bytes())?; // version needed
        self.output.write_all(&0u32.to_le_bytes())?;
        self.output.write_all(&0u32.to_le_bytes())?;
        self.output.write_all(&(self.finished_entries.len() as u64).to_le_bytes())?;
        self.output.write_all(&(self.finished_entries.len() as u64).to_le_bytes())?;
        self.output.write_all(&cd_size.to_le_bytes())?;
        self.output.write_all(&cd_offset.to_le_bytes())?;

        self.output.write_all(&ZIP64_EOCD_LOCATOR_SIG.to_le_bytes())?;
        self.output.write_all(&0u32.to_le_bytes())?;
        self.output.write_all(&record_start.to_le_bytes())?;
        self.output.write_all(&1u32.to_le_bytes())?;
        Ok(())
    }

    fn write_eocd(&mut self, cd_offset: u64, cd_size: u64) -> Result<()> {
        self.output.write_all(&EOCD_SIG.to_le_bytes())?;
        self.output.write_all(&0u16.to_le_bytes())?;
        self.output.write_all(&0u16.to_le_bytes())?;

        if self.finished_entries.len() > u16::MAX as usize {
            self.output.write_all(&0xFFFFu16.to_le_bytes())?;
            self.output.write_all(&0xFFFFu16.to_le_bytes())?;
        } else {
            self.output.write_all(&(self.finished_entries.len() as u16).to_le_bytes())?;
            self.output.write_all(&(self.finished_entries.len() as u16).to_le_bytes())?;
        }

        self.output.write_all(&clamp_u32(cd_size).to_le_bytes())?;
        self.output.write_all(&clamp_u32(cd_offset).to_le_bytes())?;
        self.output.write_all(&0u16.to_le_bytes())?;
        Ok(())
    }
}

fn clamp_u32(value: u64) -> u32 {
    if value > u32::MAX as u64 {
        0xFFFF_FFFF
    } else {
        value as u32
    }
}

fn clamp_u16(value: u64) -> u16 {
    if value > u16::MAX as u64 {
        0xFFFF
    } else {
        value as u16
    }
}

// Data descriptor support: emitted by callers that stream compressed bytes
// before the final size is known. `OutputEngine` itself always knows sizes
// up front (either from an in-memory buffer or a pre-compressed raw
// entry), so it never sets `gp_flag::DATA_DESCRIPTOR`; this helper exists
// for `ScatterGatherBuilder`'s worker-side compression path, which does
// need it if it streams to disk instead of buffering (spec §4.4 §4.3).
pub fn write_data_descriptor<W: Write>(out: &mut W, crc32: u32, compressed_size: u64, uncompressed_size: u64) -> io::Result<()> {
    out.write_all(&super::central_directory::DATA_DESCRIPTOR_SIG.to_le_bytes())?;
    out.write_all(&crc32.to_le_bytes())?;
    if compressed_size > u32::MAX as u64 || uncompressed_size > u32::MAX as u64 {
        out.write_all(&compressed_size.to_le_bytes())?;
        out.write_all(&uncompressed_size.to_le_bytes())?;
    } else {
        out.write_all(&(compressed_size as u32).to_le_bytes())?;
        out.write_all(&(uncompressed_size as u32).to_le_bytes())?;
    }
    Ok(())
}

pub fn mark_uses_data_descriptor(entry: &mut ZipEntry) {
    entry.general_purpose_flags |= gp_flag::DATA_DESCRIPTOR;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryOutput;
    use crate::zip::central_directory::CentralDirectoryReader;
    use std::io::Cursor;

    #[test]
    fn as_needed_promotes_only_the_entry_that_overflows() {
        let options = WriterOptions::default();
        let mut engine = OutputEngine::new(MemoryOutput::new(), options);
        let big = ZipEntry {
            uncompressed_size: 0x1_0000_0000,
            compressed_size: 0x1_0000_0000,
            crc32: 1,
            ..ZipEntry::new("big.bin")
        };
        let small = ZipEntry {
            uncompressed_size: 0x100,
            compressed_size: 0x100,
            crc32: 2,
            ..ZipEntry::new("small.bin")
        };
        engine.add_raw_archive_entry(big, Cursor::new(vec![0u8; 0])).unwrap();
        engine.add_raw_archive_entry(small, Cursor::new(vec![0u8; 0])).unwrap();
        let out = engine.finish().unwrap();

        let bytes = out.into_inner();
        let mut cursor = Cursor::new(bytes);
        let entries = CentralDirectoryReader::read(&mut cursor).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].extras.iter().any(|e| e.header_id() == header_id::ZIP64));
        assert!(!entries[1].extras.iter().any(|e| e.header_id() == header_id::ZIP64));
    }

    #[test]
    fn never_mode_rejects_oversized_entry() {
        let options = WriterOptions::default().with_zip64_mode(Zip64Mode::Never);
        let mut engine = OutputEngine::new(MemoryOutput::new(), options);
        let big = ZipEntry {
            uncompressed_size: 0x1_0000_0000,
            ..ZipEntry::new("big.bin")
        };
        let err = engine.add_raw_archive_entry(big, Cursor::new(Vec::<u8>::new())).unwrap_err();
        assert!(matches!(err, ArchiveError::Zip64Required { .. }));
    }

    #[test]
    fn stored_entry_round_trips_through_add_entry() {
        let options = WriterOptions::default().with_zip64_mode(Zip64Mode::AsNeeded);
        let mut options = options;
        options.compression_method = CompressionMethod::Stored;
        let mut engine = OutputEngine::new(MemoryOutput::new(), options);
        engine.add_entry("hello.txt", b"hello world").unwrap();
        let out = engine.finish().unwrap();
        let bytes = out.into_inner();
        let mut cursor = Cursor::new(bytes);
        let entries = CentralDirectoryReader::read(&mut cursor).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "hello.txt");
        assert_eq!(entries[0].uncompressed_size, 11);
    }
}
