//! Builds per-folder decoder stacks and serves substream reads with the
//! skip/reopen random-access policy from spec §4.2.

use std::io::{Cursor, Read};

use log::trace;

use crate::codec::CodecRegistry;
use crate::error::{ArchiveError, Result};
use crate::io::{Bounded, Crc32Reader};

use super::model::{Archive, Folder};

/// Decodes an entire folder's packed bytes into its final unpacked output,
/// walking the coder DAG in topological order and wiring each coder's
/// declared inputs to either the shared pack stream or a prior coder's
/// output. Used both for ordinary folders and for the 7z encoded-header's
/// single meta-folder.
pub fn decode_folder(
    codecs: &CodecRegistry,
    folder: &Folder,
    packed: Box<dyn Read>,
    max_memory_limit_kib: u64,
) -> Result<Vec<u8>> {
    let order = folder.topo_order();

    let mut in_stream_base = vec![0usize; folder.coders.len()];
    let mut acc = 0;
    for (i, c) in folder.coders.iter().enumerate() {
        in_stream_base[i] = acc;
        acc += c.num_in_streams;
    }
    let mut out_stream_base = vec![0usize; folder.coders.len()];
    let mut acc = 0;
    for (i, c) in folder.coders.iter().enumerate() {
        out_stream_base[i] = acc;
        acc += c.num_out_streams;
    }

    // Only single-packed-stream, single-input-per-coder folders are
    // supported (spec §9 Open Questions: numIn != 1 / numOut != 1 is
    // explicitly out of scope until a real use case needs it).
    if folder.packed_indices.len() != 1 {
        return Err(ArchiveError::unsupported(
            "folders with more than one packed input stream",
        ));
    }
    for coder in &folder.coders {
        if coder.num_in_streams != 1 || coder.num_out_streams != 1 {
            return Err(ArchiveError::unsupported(
                "coders with numIn != 1 or numOut != 1",
            ));
        }
    }

    let mut out_stream_source: Vec<Option<usize>> = vec![None; folder.coders.len()];
    for bp in &folder.bind_pairs {
        let consumer = in_stream_base
            .iter()
            .rposition(|&base| base <= bp.in_index)
            .unwrap_or(0);
        let producer = out_stream_base
            .iter()
            .rposition(|&base| base <= bp.out_index)
            .unwrap_or(0);
        out_stream_source[consumer] = Some(producer);
    }

    let mut decoded: Vec<Option<Box<dyn Read>>> = (0..folder.coders.len()).map(|_| None).collect();
    let mut pack_stream: Option<Box<dyn Read>> = Some(packed);

    for &coder_idx in &order {
        let coder = &folder.coders[coder_idx];
        let input: Box<dyn Read> = match out_stream_source[coder_idx] {
            Some(producer) => decoded[producer]
                .take()
                .ok_or_else(|| ArchiveError::corrupt("coder DAG referenced an undecoded producer"))?,
            None => pack_stream
                .take()
                .ok_or_else(|| ArchiveError::corrupt("folder has more than one packed-input coder"))?,
        };

        let unpack_size = folder
            .unpack_sizes
            .get(out_stream_base[coder_idx])
            .copied()
            .unwrap_or(0);
        trace!("decoding coder {:02x?} -> {unpack_size} bytes", coder.method_id);
        let output = codecs.decode(
            &coder.method_id,
            input,
            &coder.properties,
            unpack_size,
            max_memory_limit_kib,
        )?;
        decoded[coder_idx] = Some(output);
    }

    let final_coder = order
        .last()
        .copied()
        .ok_or_else(|| ArchiveError::corrupt("folder has no coders"))?;
    let mut out = decoded[final_coder]
        .take()
        .ok_or_else(|| ArchiveError::corrupt("folder produced no final output"))?;

    let mut buf = Vec::with_capacity(folder.final_unpack_size().min(1 << 24) as usize);
    out.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Which substreams of a folder have already been materialised, and where
/// the next read will resume, implementing the skip/reopen policy of
/// spec §4.2.
pub struct SolidBlockEngine {
    codecs: CodecRegistry,
    max_memory_limit_kib: u64,
    open_folder: Option<usize>,
    folder_bytes: Vec<u8>,
    /// Byte offset into `folder_bytes` where substream 0 of the open folder
    /// begins reading next.
    cursor: usize,
}

impl SolidBlockEngine {
    pub fn new(codecs: CodecRegistry, max_memory_limit_kib: u64) -> Self {
        Self {
            codecs,
            max_memory_limit_kib,
            open_folder: None,
            folder_bytes: Vec::new(),
            cursor: 0,
        }
    }

    /// Returns exactly `entry_size` raw bytes for the substream at
    /// `substream_index`, opening or reusing the folder decode as needed.
    /// Entry-level CRC verification happens lazily in [`entry_reader`], not
    /// here; this only verifies the folder-wide CRC when the folder is
    /// (re)opened.
    pub fn read_substream<R: Read + std::io::Seek>(
        &mut self,
        source: &mut R,
        archive: &Archive,
        substream_index: usize,
        entry_size: u64,
    ) -> Result<Vec<u8>> {
        let folder_index = *archive
            .stream_map
            .substream_to_folder
            .get(substream_index)
            .ok_or_else(|| ArchiveError::corrupt("substream index out of range"))?;

        let substream_offset_in_folder = self.offset_of_substream(archive, folder_index, substream_index);
        let reopen = match self.open_folder {
            Some(open) if open == folder_index => substream_offset_in_folder < self.cursor,
            _ => true,
        };

        if reopen {
            trace!("reopening folder {folder_index} from packPos (random access)");
            self.open_folder(source, archive, folder_index)?;
            self.cursor = 0;
        }

        let start = substream_offset_in_folder;
        let end = start + entry_size as usize;
        if end > self.folder_bytes.len() {
            return Err(ArchiveError::corrupt("substream extends past folder's unpacked size"));
        }
        let bytes = self.folder_bytes[start..end].to_vec();
        self.cursor = end;
        Ok(bytes)
    }

    fn offset_of_substream(&self, archive: &Archive, folder_index: usize, substream_index: usize) -> usize {
        let mut offset = 0usize;
        let mut idx = substream_index;
        while idx > 0 && archive.stream_map.substream_to_folder[idx - 1] == folder_index {
            offset += archive.stream_map.substream_sizes.get(idx - 1).copied().unwrap_or(0) as usize;
            idx -= 1;
        }
        offset
    }

    fn open_folder<R: Read + std::io::Seek>(
        &mut self,
        source: &mut R,
        archive: &Archive,
        folder_index: usize,
    ) -> Result<()> {
        let folder = &archive.folders[folder_index];
        let offset = archive.folder_pack_stream_offset(folder_index);
        let pack_size: u64 = {
            let count = archive.stream_map.folder_pack_stream_counts[folder_index];
            let start: usize = archive.stream_map.folder_pack_stream_counts[..folder_index]
                .iter()
                .sum();
            archive.stream_map.pack_sizes[start..start + count].iter().sum()
        };

        source
            .seek(std::io::SeekFrom::Start(offset))
            .map_err(|_| ArchiveError::truncated("seeking to folder pack stream"))?;
        let bounded = Bounded::new(source, pack_size);
        let packed: Box<dyn Read> = Box::new(bounded);

        let bytes = decode_folder(&self.codecs, folder, packed, self.max_memory_limit_kib)?;

        if let Some(expected) = folder.crc {
            let actual = crc32fast::hash(&bytes);
            if actual != expected {
                return Err(ArchiveError::ChecksumMismatch {
                    where_: format!("folder {folder_index}"),
                    expected: expected as u64,
                    actual: actual as u64,
                });
            }
        }

        self.open_folder = Some(folder_index);
        self.folder_bytes = bytes;
        Ok(())
    }
}

/// Wraps a raw substream slice with the bounded + CRC verification layer
/// every entry read gets (spec §4.2's "each entry then wraps ... with
/// `bounded(entry.size)` and optionally an entry-level CRC32 verifier").
pub fn entry_reader(bytes: Vec<u8>, expected_crc: Option<u32>, where_: String) -> Crc32Reader<Cursor<Vec<u8>>> {
    let len = bytes.len() as u64;
    Crc32Reader::new(Cursor::new(bytes), expected_crc, len, where_)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sevenz::model::{BindPair, Coder};

    #[test]
    fn decode_folder_runs_single_copy_coder() {
        let folder = Folder {
            coders: vec![Coder {
                method_id: vec![0x00],
                num_in_streams: 1,
                num_out_streams: 1,
                properties: vec![],
            }],
            bind_pairs: vec![],
            packed_indices: vec![0],
            unpack_sizes: vec![5],
            crc: None,
            num_unpack_substreams: 1,
            substream_sizes: vec![5],
            substream_crcs: vec![None],
        };
        let codecs = CodecRegistry::with_defaults();
        let out = decode_folder(&codecs, &folder, Box::new(Cursor::new(b"hello".to_vec())), 1024).unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn decode_folder_chains_two_coders() {
        // pack -> coder0(copy) -> coder1(copy) -> output; bind pair out0->in1
        let folder = Folder {
            coders: vec![
                Coder { method_id: vec![0x00], num_in_streams: 1, num_out_streams: 1, properties: vec![] },
                Coder { method_id: vec![0x00], num_in_streams: 1, num_out_streams: 1, properties: vec![] },
            ],
            bind_pairs: vec![BindPair { in_index: 1, out_index: 0 }],
            packed_indices: vec![0],
            unpack_sizes: vec![5, 5],
            crc: None,
            num_unpack_substreams: 1,
            substream_sizes: vec![5],
            substream_crcs: vec![None],
        };
        let codecs = CodecRegistry::with_defaults();
        let out = decode_folder(&codecs, &folder, Box::new(Cursor::new(b"world".to_vec())), 1024).unwrap();
        assert_eq!(out, b"world");
    }
}
