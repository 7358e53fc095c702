//! Maps a coder's on-disk method id to a decoder factory, and hands it the
//! coder's property blob (spec §2 component B).
//!
//! Actually implementing Deflate/LZMA/LZMA2/BZip2 is out of scope (spec §1
//! Non-goals); this module only adapts real compressor crates into the
//! shape the solid-block engine and ZIP entry reader need.

mod lzma2;

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use crate::error::{ArchiveError, Result};

/// A single coder's decode side: given the packed bytes and its property
/// blob, produce the unpacked byte stream.
pub trait CoderDecoder: Send + Sync {
    fn decode<'a>(
        &self,
        input: Box<dyn Read + 'a>,
        properties: &[u8],
        unpack_size: u64,
        max_memory_limit_kib: u64,
    ) -> Result<Box<dyn Read + 'a>>;

    /// Human-readable name, surfaced via `contentMethods` (spec §4.2).
    fn name(&self) -> &'static str;
}

/// Process-wide, read-mostly map from method id to decoder factory.
/// Registration happens once at construction; lookups are lock-free reads
/// of an `Arc`-shared table (spec §5).
#[derive(Clone)]
pub struct CodecRegistry {
    decoders: Arc<HashMap<Vec<u8>, Arc<dyn CoderDecoder>>>,
}

impl CodecRegistry {
    /// Registry with the codecs every coder-DAG format (7z, ZIP-via-LZMA)
    /// needs out of the box.
    pub fn with_defaults() -> Self {
        let mut decoders: HashMap<Vec<u8>, Arc<dyn CoderDecoder>> = HashMap::new();
        decoders.insert(vec![0x00], Arc::new(CopyCoder));
        decoders.insert(vec![0x21], Arc::new(Lzma2Coder));
        decoders.insert(vec![0x03, 0x01, 0x01], Arc::new(LzmaCoder));
        decoders.insert(vec![0x04, 0x01, 0x08], Arc::new(DeflateCoder));
        decoders.insert(vec![0x04, 0x02, 0x02], Arc::new(Bzip2Coder));
        Self {
            decoders: Arc::new(decoders),
        }
    }

    pub fn register(&mut self, method_id: Vec<u8>, decoder: Arc<dyn CoderDecoder>) {
        Arc::make_mut(&mut self.decoders).insert(method_id, decoder);
    }

    pub fn get(&self, method_id: &[u8]) -> Option<Arc<dyn CoderDecoder>> {
        self.decoders.get(method_id).cloned()
    }

    pub fn decode<'a>(
        &self,
        method_id: &[u8],
        input: Box<dyn Read + 'a>,
        properties: &[u8],
        unpack_size: u64,
        max_memory_limit_kib: u64,
    ) -> Result<Box<dyn Read + 'a>> {
        let coder = self.get(method_id).ok_or_else(|| {
            ArchiveError::unsupported(format!("coder method {method_id:02x?}"))
        })?;
        coder.decode(input, properties, unpack_size, max_memory_limit_kib)
    }

    /// Human-readable name for a method id, used for `contentMethods`.
    pub fn name_of(&self, method_id: &[u8]) -> &'static str {
        self.get(method_id).map(|c| c.name()).unwrap_or("unknown")
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

struct CopyCoder;

impl CoderDecoder for CopyCoder {
    fn decode<'a>(
        &self,
        input: Box<dyn Read + 'a>,
        _properties: &[u8],
        _unpack_size: u64,
        _max_memory_limit_kib: u64,
    ) -> Result<Box<dyn Read + 'a>> {
        Ok(input)
    }

    fn name(&self) -> &'static str {
        "COPY"
    }
}

struct DeflateCoder;

impl CoderDecoder for DeflateCoder {
    fn decode<'a>(
        &self,
        input: Box<dyn Read + 'a>,
        _properties: &[u8],
        _unpack_size: u64,
        _max_memory_limit_kib: u64,
    ) -> Result<Box<dyn Read + 'a>> {
        Ok(Box::new(flate2::read::DeflateDecoder::new(input)))
    }

    fn name(&self) -> &'static str {
        "DEFLATE"
    }
}

struct Bzip2Coder;

impl CoderDecoder for Bzip2Coder {
    fn decode<'a>(
        &self,
        input: Box<dyn Read + 'a>,
        _properties: &[u8],
        _unpack_size: u64,
        _max_memory_limit_kib: u64,
    ) -> Result<Box<dyn Read + 'a>> {
        Ok(Box::new(bzip2_rs::DecoderReader::new(input)))
    }

    fn name(&self) -> &'static str {
        "BZIP2"
    }
}

struct LzmaCoder;

impl CoderDecoder for LzmaCoder {
    fn decode<'a>(
        &self,
        input: Box<dyn Read + 'a>,
        properties: &[u8],
        unpack_size: u64,
        max_memory_limit_kib: u64,
    ) -> Result<Box<dyn Read + 'a>> {
        if properties.len() != 5 {
            return Err(ArchiveError::corrupt("LZMA coder properties must be 5 bytes"));
        }
        check_dict_size_limit(&properties[1..5], max_memory_limit_kib)?;

        // lzma-rs expects the classic .lzma stream header: 5 property bytes
        // followed by an 8-byte little-endian uncompressed size. 7z carries
        // the properties separately and the size in the folder metadata, so
        // we splice a synthetic header in front of the packed bytes.
        let mut header = Vec::with_capacity(13);
        header.extend_from_slice(properties);
        header.extend_from_slice(&unpack_size.to_le_bytes());
        let framed = std::io::Cursor::new(header).chain(input);
        let mut buf_reader = std::io::BufReader::new(framed);
        let mut out = Vec::new();
        lzma_rs::lzma_decompress(&mut buf_reader, &mut out)
            .map_err(|e| ArchiveError::corrupt(format!("LZMA stream error: {e}")))?;
        Ok(Box::new(std::io::Cursor::new(out)))
    }

    fn name(&self) -> &'static str {
        "LZMA"
    }
}

struct Lzma2Coder;

impl CoderDecoder for Lzma2Coder {
    fn decode<'a>(
        &self,
        input: Box<dyn Read + 'a>,
        properties: &[u8],
        unpack_size: u64,
        max_memory_limit_kib: u64,
    ) -> Result<Box<dyn Read + 'a>> {
        if let Some(&dict_byte) = properties.first() {
            check_dict_size_limit(&lzma2::dict_size_bytes(dict_byte), max_memory_limit_kib)?;
        }
        let out = lzma2::decode_all(input, unpack_size)?;
        Ok(Box::new(std::io::Cursor::new(out)))
    }

    fn name(&self) -> &'static str {
        "LZMA2"
    }
}

fn check_dict_size_limit(dict_size_le: &[u8], max_memory_limit_kib: u64) -> Result<()> {
    if dict_size_le.len() < 4 {
        return Ok(());
    }
    let dict_size = u32::from_le_bytes([dict_size_le[0], dict_size_le[1], dict_size_le[2], dict_size_le[3]]) as u64;
    // LZMA/LZMA2 decoders need roughly one dictionary's worth of RAM; this
    // mirrors the per-coder memory check in spec §5.
    let requested_kib = dict_size.div_ceil(1024);
    if requested_kib > max_memory_limit_kib {
        return Err(ArchiveError::MemoryLimitExceeded {
            requested_kib,
            limit_kib: max_memory_limit_kib,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn copy_passes_bytes_through() {
        let registry = CodecRegistry::with_defaults();
        let data = b"hello world";
        let out = registry
            .decode(&[0x00], Box::new(data.as_slice()), &[], data.len() as u64, 1024)
            .unwrap();
        let mut buf = Vec::new();
        let mut out = out;
        out.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, data);
    }

    #[test]
    fn deflate_round_trips_with_flate2() {
        let plain = b"the quick brown fox jumps over the lazy dog".repeat(4);
        let mut encoder = flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&plain).unwrap();
        let compressed = encoder.finish().unwrap();

        let registry = CodecRegistry::with_defaults();
        let mut out = registry
            .decode(
                &[0x04, 0x01, 0x08],
                Box::new(compressed.as_slice()),
                &[],
                plain.len() as u64,
                1024,
            )
            .unwrap();
        let mut buf = Vec::new();
        out.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, plain);
    }

    #[test]
    fn unknown_method_is_unsupported() {
        let registry = CodecRegistry::with_defaults();
        let err = registry
            .decode(&[0xFE], Box::new(b"".as_slice()), &[], 0, 1024)
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Unsupported { .. }));
    }

    #[test]
    fn lzma_dict_size_over_limit_is_rejected() {
        // dict size = 64 MiB, limit = 1 KiB
        let mut props = vec![0x5Du8];
        props.extend_from_slice(&(64u32 * 1024 * 1024).to_le_bytes());
        let registry = CodecRegistry::with_defaults();
        let err = registry
            .decode(&[0x03, 0x01, 0x01], Box::new(b"".as_slice()), &props, 0, 1)
            .unwrap_err();
        assert!(matches!(err, ArchiveError::MemoryLimitExceeded { .. }));
    }
}
