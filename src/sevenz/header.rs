//! Parses the 7z structural header into an [`Archive`] (spec §4.1).
//!
//! Grounded on the NID-walking decode loop used by the reference archiver's
//! header parser (other_examples: `withzombies sevenz-rust2`'s archive.rs)
//! and on the header-writer's inverse structure (other_examples: `apestel
//! sevenzip-mt`'s archive-header.rs) for field ordering.

use std::io::{Cursor, Read, Seek, SeekFrom};

use log::{debug, warn};

use crate::codec::CodecRegistry;
use crate::error::{ArchiveError, Result};
use crate::options::ReaderOptions;

use super::model::{Archive, BindPair, Coder, FileEntry, FileTime, Folder, StreamMap};
use super::nid;
use super::varint::{read_number, read_u32_le, read_u64_le};

/// Running totals used by the pre-decode sanity pass (spec §4.1).
#[derive(Debug, Default, Clone, Copy)]
struct ArchiveStatistics {
    num_packed_streams: u64,
    num_coders: u64,
    num_in: u64,
    num_out: u64,
    num_folders: u64,
    num_unpack_substreams: u64,
    num_entries: u64,
    num_entries_with_stream: u64,
}

impl ArchiveStatistics {
    fn estimate_kib(&self) -> u64 {
        let pk = self.num_packed_streams;
        let nc = self.num_coders;
        let no = self.num_out;
        let ni = self.num_in;
        let nf = self.num_folders;
        let ne = self.num_entries;
        let stream_map_size = 8 * nf + 8 * pk + 4 * ne;
        let lower = 16 * pk
            + pk / 8
            + nf * 30
            + nc * 22
            + no.saturating_sub(nf) * 16
            + 8 * (ni.saturating_sub(no) + nf)
            + 8 * no
            + ne * 100
            + stream_map_size;
        (2 * lower).div_ceil(1024)
    }
}

pub struct HeaderDecoder {
    options: ReaderOptions,
    codecs: CodecRegistry,
}

impl HeaderDecoder {
    pub fn new(options: ReaderOptions) -> Self {
        Self {
            options,
            codecs: CodecRegistry::with_defaults(),
        }
    }

    pub fn with_codecs(options: ReaderOptions, codecs: CodecRegistry) -> Self {
        Self { options, codecs }
    }

    /// Parses the full start header + structural header from `source`,
    /// returning a ready-to-use [`Archive`].
    pub fn open<R: Read + Seek>(&self, source: &mut R) -> Result<Archive> {
        let mut sig = [0u8; 32];
        source.read_exact(&mut sig).map_err(|_| {
            ArchiveError::truncated("7z signature header")
        })?;

        if sig[0..6] != nid::SIGNATURE {
            return Err(ArchiveError::BadSignature("not a 7z archive".into()));
        }
        let major = sig[6];
        if major != 0 {
            return Err(ArchiveError::unsupported(format!("7z major version {major}")));
        }
        let header_crc = u32::from_le_bytes([sig[8], sig[9], sig[10], sig[11]]);
        let next_header_offset = u64::from_le_bytes(sig[12..20].try_into().unwrap());
        let next_header_size = u64::from_le_bytes(sig[20..28].try_into().unwrap());
        let next_header_crc = u32::from_le_bytes(sig[28..32].try_into().unwrap());

        let mut crc_region = [0u8; 20];
        crc_region[0..8].copy_from_slice(&sig[12..20]);
        crc_region[8..16].copy_from_slice(&sig[20..28]);
        crc_region[16..20].copy_from_slice(&sig[28..32]);
        let computed = crc32fast::hash(&crc_region);
        if computed != header_crc {
            if self.options.try_to_recover_broken_archives {
                warn!("7z start header CRC mismatch, attempting broken-archive recovery");
                return self.recover_broken_archive(source);
            }
            return Err(ArchiveError::corrupt("start header CRC mismatch"));
        }

        if next_header_size == 0 {
            debug!("7z archive has no files (empty header)");
            return Ok(Archive::default());
        }

        self.check_size_limit(next_header_size)?;

        let header_start = nid::SIGNATURE_HEADER_SIZE + next_header_offset;
        source
            .seek(SeekFrom::Start(header_start))
            .map_err(|_| ArchiveError::truncated("seeking to 7z header"))?;
        let mut header_bytes = vec![0u8; next_header_size as usize];
        source
            .read_exact(&mut header_bytes)
            .map_err(|_| ArchiveError::truncated("7z header body"))?;

        if crc32fast::hash(&header_bytes) != next_header_crc {
            return Err(ArchiveError::corrupt("header block CRC mismatch"));
        }

        let header_bytes = self.resolve_encoded_header(source, header_bytes)?;
        self.parse_real_header(&header_bytes, nid::SIGNATURE_HEADER_SIZE + next_header_offset)
    }

    fn check_size_limit(&self, declared_bytes: u64) -> Result<()> {
        let requested_kib = declared_bytes.div_ceil(1024);
        if requested_kib > self.options.max_memory_limit_kib {
            return Err(ArchiveError::MemoryLimitExceeded {
                requested_kib,
                limit_kib: self.options.max_memory_limit_kib,
            });
        }
        Ok(())
    }

    /// Same check as [`Self::check_size_limit`], but for a `Vec<T>` about to
    /// be allocated with `count` elements of `element_size` bytes each. A 7z
    /// UINT64 is a *compact* varint: a 9-byte encoding can declare a count up
    /// to `u64::MAX` regardless of how many header bytes are actually left,
    /// so the count must be checked before sizing any allocation from it
    /// (spec §5).
    fn check_count_limit(&self, count: usize, element_size: usize) -> Result<()> {
        let declared_bytes = (count as u64).saturating_mul(element_size as u64);
        self.check_size_limit(declared_bytes)
    }

    /// If the header blob starts with `kEncodedHeader`, decode the single
    /// "meta folder" it describes by reading its packed bytes back from
    /// `source` and running them through the coder stack, then return the
    /// decompressed bytes as the real header. Recurses exactly once per
    /// spec §4.1 (a `kEncodedHeader` cannot itself contain another).
    fn resolve_encoded_header<R: Read + Seek>(
        &self,
        source: &mut R,
        header_bytes: Vec<u8>,
    ) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(&header_bytes);
        let mut first = [0u8; 1];
        cursor.read_exact(&mut first)?;
        if first[0] != nid::K_ENCODED_HEADER {
            return Ok(header_bytes);
        }

        let (folders, stream_map) = self.parse_streams_info(&mut cursor)?;
        let folder = folders
            .first()
            .ok_or_else(|| ArchiveError::corrupt("encoded header has no folder"))?;

        self.check_size_limit(folder.final_unpack_size())?;

        let pack_offset = nid::SIGNATURE_HEADER_SIZE
            + stream_map.folder_pack_offsets.first().copied().unwrap_or(0);
        let pack_size: u64 = stream_map.pack_sizes.iter().sum();

        source
            .seek(SeekFrom::Start(pack_offset))
            .map_err(|_| ArchiveError::truncated("seeking to encoded-header pack stream"))?;
        let mut packed = vec![0u8; pack_size as usize];
        source
            .read_exact(&mut packed)
            .map_err(|_| ArchiveError::truncated("encoded-header pack stream"))?;

        let decoded = super::solid::decode_folder(
            &self.codecs,
            folder,
            Box::new(Cursor::new(packed)),
            self.options.max_memory_limit_kib,
        )?;

        if let Some(crc) = folder.crc {
            let actual = crc32fast::hash(&decoded);
            if actual != crc {
                return Err(ArchiveError::ChecksumMismatch {
                    where_: "encoded header folder".into(),
                    expected: crc as u64,
                    actual: actual as u64,
                });
            }
        }

        Ok(decoded)
    }

    fn parse_real_header(&self, header_bytes: &[u8], _header_offset: u64) -> Result<Archive> {
        let mut cursor = Cursor::new(header_bytes);
        let mut nid_byte = [0u8; 1];
        cursor.read_exact(&mut nid_byte)?;
        if nid_byte[0] != nid::K_HEADER {
            return Err(ArchiveError::corrupt("expected kHeader NID"));
        }

        let mut folders = Vec::new();
        let mut stream_map = StreamMap::default();
        let mut files = Vec::new();
        let mut pack_pos = 0u64;

        loop {
            let mut tag = [0u8; 1];
            if cursor.read(&mut tag)? == 0 {
                break;
            }
            match tag[0] {
                nid::K_END => break,
                nid::K_ARCHIVE_PROPERTIES => self.skip_archive_properties(&mut cursor)?,
                nid::K_ADDITIONAL_STREAMS_INFO => {
                    return Err(ArchiveError::unsupported("kAdditionalStreamsInfo"));
                }
                nid::K_MAIN_STREAMS_INFO => {
                    let (f, sm, pp) = self.parse_main_streams_info(&mut cursor)?;
                    folders = f;
                    stream_map = sm;
                    pack_pos = pp;
                }
                nid::K_FILES_INFO => {
                    files = self.parse_files_info(&mut cursor, &folders)?;
                }
                other => {
                    return Err(ArchiveError::corrupt(format!("unexpected top-level NID {other:#x}")));
                }
            }
        }

        let stream_map = self.finalize_stream_map(stream_map, &folders);
        self.sanity_check(&folders, &files)?;
        self.populate_file_metadata(&mut files, &folders, &stream_map);

        Ok(Archive {
            folders,
            files,
            stream_map,
            pack_pos,
        })
    }

    fn skip_archive_properties<R: Read>(&self, r: &mut R) -> Result<()> {
        loop {
            let ty = read_number(r)?;
            if ty == 0 {
                return Ok(());
            }
            let size = read_number(r)?;
            let mut buf = vec![0u8; size as usize];
            r.read_exact(&mut buf)?;
        }
    }

    fn parse_main_streams_info<R: Read>(
        &self,
        r: &mut R,
    ) -> Result<(Vec<Folder>, StreamMap, u64)> {
        let (folders, stream_map) = self.parse_streams_info(r)?;
        // `folder_pack_offsets` already has kPackInfo's own base offset folded
        // in (see `parse_streams_info`); the only piece `pack_pos` still owes
        // each folder is the signature header's fixed size.
        Ok((folders, stream_map, nid::SIGNATURE_HEADER_SIZE))
    }

    /// Parses `kPackInfo [kUnpackInfo] [kSubStreamsInfo] kEnd`, shared
    /// between the main-streams path and the encoded-header meta-folder
    /// path (both use the same on-disk shape).
    fn parse_streams_info<R: Read>(&self, r: &mut R) -> Result<(Vec<Folder>, StreamMap)> {
        let mut pack_pos_base = 0u64;
        let mut pack_sizes = Vec::new();
        let mut folders: Vec<Folder> = Vec::new();

        loop {
            let mut tag = [0u8; 1];
            if r.read(&mut tag)? == 0 {
                break;
            }
            match tag[0] {
                nid::K_END => break,
                nid::K_PACK_INFO => {
                    pack_pos_base = read_number(r)?;
                    pack_sizes = self.parse_pack_info(r)?;
                }
                nid::K_UNPACK_INFO => {
                    folders = self.parse_unpack_info(r)?;
                }
                nid::K_SUB_STREAMS_INFO => {
                    self.parse_sub_streams_info(r, &mut folders)?;
                }
                other => {
                    return Err(ArchiveError::corrupt(format!("unexpected streams-info NID {other:#x}")));
                }
            }
        }

        let mut stream_map = StreamMap::default();
        let mut pack_offset = 0u64;
        let mut pack_stream_cursor = 0usize;
        for folder in &folders {
            let num_pack_streams = folder.packed_indices.len();
            stream_map.folder_pack_offsets.push(pack_offset);
            stream_map.folder_pack_stream_counts.push(num_pack_streams);
            for i in 0..num_pack_streams {
                let size = *pack_sizes.get(pack_stream_cursor + i).unwrap_or(&0);
                pack_offset += size;
            }
            pack_stream_cursor += num_pack_streams;
        }
        stream_map.pack_sizes = pack_sizes;
        // folder_pack_offsets above are relative to the start of packed
        // data; fold in the declared base so callers can add pack_pos once.
        for off in &mut stream_map.folder_pack_offsets {
            *off += pack_pos_base;
        }

        Ok((folders, stream_map))
    }

    fn parse_pack_info<R: Read>(&self, r: &mut R) -> Result<Vec<u64>> {
        let num_pack_streams = read_number(r)? as usize;
        self.check_count_limit(num_pack_streams, std::mem::size_of::<u64>())?;
        let mut sizes = Vec::with_capacity(num_pack_streams);

        loop {
            let mut tag = [0u8; 1];
            r.read_exact(&mut tag)?;
            match tag[0] {
                nid::K_END => break,
                nid::K_SIZE => {
                    for _ in 0..num_pack_streams {
                        sizes.push(read_number(r)?);
                    }
                }
                nid::K_CRC => {
                    self.skip_digest_vector(r, num_pack_streams)?;
                }
                other => {
                    return Err(ArchiveError::corrupt(format!("unexpected kPackInfo NID {other:#x}")));
                }
            }
        }
        Ok(sizes)
    }

    fn parse_unpack_info<R: Read>(&self, r: &mut R) -> Result<Vec<Folder>> {
        let mut tag = [0u8; 1];
        r.read_exact(&mut tag)?;
        if tag[0] != nid::K_FOLDER {
            return Err(ArchiveError::corrupt("expected kFolder"));
        }
        let num_folders = read_number(r)? as usize;
        self.check_count_limit(num_folders, std::mem::size_of::<Folder>())?;
        let mut external = [0u8; 1];
        r.read_exact(&mut external)?;
        if external[0] != 0 {
            return Err(ArchiveError::unsupported("external folder definitions"));
        }

        let mut folders = Vec::with_capacity(num_folders);
        for _ in 0..num_folders {
            folders.push(self.parse_folder(r)?);
        }

        loop {
            let mut tag = [0u8; 1];
            r.read_exact(&mut tag)?;
            match tag[0] {
                nid::K_CODERS_UNPACK_SIZE => {
                    for folder in &mut folders {
                        let n = folder.total_out_streams();
                        let mut sizes = Vec::with_capacity(n);
                        for _ in 0..n {
                            sizes.push(read_number(r)?);
                        }
                        folder.unpack_sizes = sizes;
                    }
                }
                nid::K_CRC => {
                    let crcs = self.read_digest_vector(r, folders.len())?;
                    for (folder, crc) in folders.iter_mut().zip(crcs) {
                        folder.crc = crc;
                    }
                }
                nid::K_END => break,
                other => {
                    return Err(ArchiveError::corrupt(format!("unexpected kUnpackInfo NID {other:#x}")));
                }
            }
        }

        Ok(folders)
    }

    fn parse_folder<R: Read>(&self, r: &mut R) -> Result<Folder> {
        let num_coders = read_number(r)? as usize;
        if num_coders > nid::MAX_CODERS_PER_FOLDER {
            return Err(ArchiveError::corrupt("folder exceeds MAX_CODERS_PER_FOLDER"));
        }

        let mut coders = Vec::with_capacity(num_coders);
        let mut total_in = 0usize;
        let mut total_out = 0usize;
        for _ in 0..num_coders {
            let flags = {
                let mut b = [0u8; 1];
                r.read_exact(&mut b)?;
                b[0]
            };
            let id_size = (flags & 0x0F) as usize;
            let is_complex = flags & 0x10 != 0;
            let has_attrs = flags & 0x20 != 0;

            let mut method_id = vec![0u8; id_size];
            r.read_exact(&mut method_id)?;

            let (num_in, num_out) = if is_complex {
                (read_number(r)? as usize, read_number(r)? as usize)
            } else {
                (1, 1)
            };

            let properties = if has_attrs {
                let size = read_number(r)? as usize;
                let mut buf = vec![0u8; size];
                r.read_exact(&mut buf)?;
                buf
            } else {
                Vec::new()
            };

            total_in += num_in;
            total_out += num_out;
            coders.push(Coder {
                method_id,
                num_in_streams: num_in,
                num_out_streams: num_out,
                properties,
            });
        }

        if total_in > nid::MAX_CODER_STREAMS_PER_FOLDER || total_out > nid::MAX_CODER_STREAMS_PER_FOLDER {
            return Err(ArchiveError::corrupt("folder exceeds MAX_CODER_STREAMS_PER_FOLDER"));
        }

        let num_bind_pairs = total_out - 1;
        let mut bind_pairs = Vec::with_capacity(num_bind_pairs);
        for _ in 0..num_bind_pairs {
            bind_pairs.push(BindPair {
                in_index: read_number(r)? as usize,
                out_index: read_number(r)? as usize,
            });
        }

        let num_packed_streams = total_in - num_bind_pairs;
        let mut packed_indices = Vec::with_capacity(num_packed_streams);
        if num_packed_streams == 1 {
            let bound: Vec<usize> = bind_pairs.iter().map(|bp| bp.in_index).collect();
            let free = (0..total_in).find(|i| !bound.contains(i)).ok_or_else(|| {
                ArchiveError::corrupt("folder has no free input stream for its single pack stream")
            })?;
            packed_indices.push(free);
        } else {
            for _ in 0..num_packed_streams {
                packed_indices.push(read_number(r)? as usize);
            }
        }

        Ok(Folder {
            coders,
            bind_pairs,
            packed_indices,
            unpack_sizes: Vec::new(),
            crc: None,
            num_unpack_substreams: 1,
            substream_sizes: Vec::new(),
            substream_crcs: Vec::new(),
        })
    }

    fn parse_sub_streams_info<R: Read>(&self, r: &mut R, folders: &mut [Folder]) -> Result<()> {
        for folder in folders.iter_mut() {
            folder.num_unpack_substreams = 1;
        }

        let mut tag = [0u8; 1];
        r.read_exact(&mut tag)?;

        if tag[0] == nid::K_NUM_UNPACK_STREAM {
            for folder in folders.iter_mut() {
                folder.num_unpack_substreams = read_number(r)? as usize;
            }
            r.read_exact(&mut tag)?;
        }

        // Per-substream sizes: for folders with >1 substream, all but the
        // last size are explicit; the last is derived from the folder total.
        let mut substream_sizes_per_folder: Vec<Vec<u64>> = folders
            .iter()
            .map(|f| Vec::with_capacity(f.num_unpack_substreams))
            .collect();

        if tag[0] == nid::K_SIZE {
            for (folder, sizes) in folders.iter().zip(substream_sizes_per_folder.iter_mut()) {
                if folder.num_unpack_substreams == 0 {
                    continue;
                }
                let mut sum = 0u64;
                for _ in 0..folder.num_unpack_substreams - 1 {
                    let s = read_number(r)?;
                    sum += s;
                    sizes.push(s);
                }
                sizes.push(folder.final_unpack_size().saturating_sub(sum));
            }
            r.read_exact(&mut tag)?;
        } else {
            for (folder, sizes) in folders.iter().zip(substream_sizes_per_folder.iter_mut()) {
                if folder.num_unpack_substreams == 1 {
                    sizes.push(folder.final_unpack_size());
                }
            }
        }

        let num_digests_needed: usize = folders
            .iter()
            .map(|f| {
                if f.num_unpack_substreams == 1 && f.crc.is_some() {
                    0
                } else {
                    f.num_unpack_substreams
                }
            })
            .sum();

        let mut digests: Vec<Option<u32>> = Vec::new();
        if tag[0] == nid::K_CRC {
            digests = self.read_digest_vector(r, num_digests_needed)?;
            r.read_exact(&mut tag)?;
        }

        if tag[0] != nid::K_END {
            return Err(ArchiveError::corrupt("expected kEnd after kSubStreamsInfo"));
        }

        let mut digest_cursor = 0usize;
        for (folder, sizes) in folders.iter_mut().zip(substream_sizes_per_folder.into_iter()) {
            folder.unpack_sizes_substreams_store(sizes);
            if folder.num_unpack_substreams == 1 && folder.crc.is_some() {
                folder.substream_crcs = vec![folder.crc];
                continue;
            }
            let n = folder.num_unpack_substreams;
            let end = (digest_cursor + n).min(digests.len());
            folder.substream_crcs = digests[digest_cursor..end].to_vec();
            digest_cursor = end;
        }
        Ok(())
    }

    fn read_digest_vector<R: Read>(&self, r: &mut R, count: usize) -> Result<Vec<Option<u32>>> {
        let mut all_defined = [0u8; 1];
        r.read_exact(&mut all_defined)?;
        let defined: Vec<bool> = if all_defined[0] != 0 {
            vec![true; count]
        } else {
            self.read_bit_vector(r, count)?
        };

        let mut out = Vec::with_capacity(count);
        for is_defined in defined {
            if is_defined {
                out.push(Some(read_u32_le(r)?));
            } else {
                out.push(None);
            }
        }
        Ok(out)
    }

    fn skip_digest_vector<R: Read>(&self, r: &mut R, count: usize) -> Result<()> {
        self.read_digest_vector(r, count)?;
        Ok(())
    }

    fn read_bit_vector<R: Read>(&self, r: &mut R, count: usize) -> Result<Vec<bool>> {
        let mut bits = Vec::with_capacity(count);
        let mut byte = 0u8;
        let mut mask = 0u8;
        for _ in 0..count {
            if mask == 0 {
                let mut b = [0u8; 1];
                r.read_exact(&mut b)?;
                byte = b[0];
                mask = 0x80;
            }
            bits.push(byte & mask != 0);
            mask >>= 1;
        }
        Ok(bits)
    }

    fn parse_files_info<R: Read>(&self, r: &mut R, folders: &[Folder]) -> Result<Vec<FileEntry>> {
        let num_files = read_number(r)? as usize;
        self.check_count_limit(num_files, std::mem::size_of::<FileEntry>())?;
        let mut files = vec![FileEntry::default(); num_files];

        let mut empty_stream: Vec<bool> = vec![false; num_files];
        let mut num_empty_streams = 0usize;
        let mut empty_stream_seen = false;

        loop {
            let mut ty_buf = [0u8; 1];
            if r.read(&mut ty_buf)? == 0 {
                break;
            }
            let ty = ty_buf[0];
            if ty == nid::K_END {
                break;
            }
            let size = read_number(r)?;
            let mut region = vec![0u8; size as usize];
            r.read_exact(&mut region)?;
            let mut cursor = Cursor::new(&region);

            match ty {
                nid::K_EMPTY_STREAM => {
                    empty_stream = self.read_bit_vector(&mut cursor, num_files)?;
                    num_empty_streams = empty_stream.iter().filter(|b| **b).count();
                    empty_stream_seen = true;
                    for (file, is_empty) in files.iter_mut().zip(&empty_stream) {
                        file.has_stream = !is_empty;
                    }
                }
                nid::K_EMPTY_FILE => {
                    if !empty_stream_seen {
                        return Err(ArchiveError::corrupt("kEmptyFile before kEmptyStream"));
                    }
                    let flags = self.read_bit_vector(&mut cursor, num_empty_streams)?;
                    let mut flag_cursor = flags.into_iter();
                    for (file, is_empty) in files.iter_mut().zip(&empty_stream) {
                        if *is_empty {
                            file.is_empty_file = flag_cursor.next().unwrap_or(false);
                        }
                    }
                }
                nid::K_ANTI => {
                    if !empty_stream_seen {
                        return Err(ArchiveError::corrupt("kAnti before kEmptyStream"));
                    }
                    let flags = self.read_bit_vector(&mut cursor, num_empty_streams)?;
                    let mut flag_cursor = flags.into_iter();
                    for (file, is_empty) in files.iter_mut().zip(&empty_stream) {
                        if *is_empty {
                            file.is_anti = flag_cursor.next().unwrap_or(false);
                        }
                    }
                }
                nid::K_NAME => {
                    let mut external = [0u8; 1];
                    cursor.read_exact(&mut external)?;
                    if external[0] != 0 {
                        return Err(ArchiveError::unsupported("external name stream"));
                    }
                    for file in files.iter_mut() {
                        file.name = self.read_utf16_nul_terminated(&mut cursor)?;
                        if file.name.encode_utf16().count() > self.options.max_entry_name_length {
                            return Err(ArchiveError::corrupt("NameTooLong"));
                        }
                    }
                }
                nid::K_C_TIME => self.read_times(&mut cursor, &mut files, num_empty_streams, &empty_stream, |f| &mut f.creation_time)?,
                nid::K_A_TIME => self.read_times(&mut cursor, &mut files, num_empty_streams, &empty_stream, |f| &mut f.access_time)?,
                nid::K_M_TIME => self.read_times(&mut cursor, &mut files, num_empty_streams, &empty_stream, |f| &mut f.modification_time)?,
                nid::K_WIN_ATTRIBUTES => {
                    let defined = self.read_all_defined_or_bits(&mut cursor, num_files)?;
                    let mut external = [0u8; 1];
                    cursor.read_exact(&mut external)?;
                    if external[0] != 0 {
                        return Err(ArchiveError::unsupported("external attributes stream"));
                    }
                    for (file, is_defined) in files.iter_mut().zip(&defined) {
                        if *is_defined {
                            file.attributes = Some(read_u32_le(&mut cursor)?);
                        }
                    }
                }
                nid::K_START_POS => {
                    return Err(ArchiveError::unsupported("kStartPos"));
                }
                nid::K_DUMMY => { /* padding; region already consumed */ }
                other => {
                    debug!("skipping unrecognised files-info property {other:#x}");
                }
            }
        }

        for file in files.iter_mut() {
            file.is_directory = !file.has_stream && !file.is_empty_file && !file.is_anti;
        }

        let mut folder_cursor = 0usize;
        let mut substream_in_folder = 0usize;
        let mut substream_index = 0usize;
        for file in files.iter_mut() {
            if !file.has_stream {
                file.substream_index = None;
                continue;
            }
            while folder_cursor < folders.len()
                && substream_in_folder >= folders[folder_cursor].num_unpack_substreams.max(1)
            {
                folder_cursor += 1;
                substream_in_folder = 0;
            }
            file.substream_index = Some(substream_index);
            substream_in_folder += 1;
            substream_index += 1;
        }

        Ok(files)
    }

    fn read_all_defined_or_bits<R: Read>(&self, r: &mut R, count: usize) -> Result<Vec<bool>> {
        let mut all_defined = [0u8; 1];
        r.read_exact(&mut all_defined)?;
        if all_defined[0] != 0 {
            Ok(vec![true; count])
        } else {
            self.read_bit_vector(r, count)
        }
    }

    fn read_times<R: Read>(
        &self,
        r: &mut R,
        files: &mut [FileEntry],
        _num_empty_streams: usize,
        _empty_stream: &[bool],
        field: impl Fn(&mut FileEntry) -> &mut Option<FileTime>,
    ) -> Result<()> {
        let defined = self.read_all_defined_or_bits(r, files.len())?;
        let mut external = [0u8; 1];
        r.read_exact(&mut external)?;
        if external[0] != 0 {
            return Err(ArchiveError::unsupported("external timestamp stream"));
        }
        for (file, is_defined) in files.iter_mut().zip(&defined) {
            if is_defined {
                *field(file) = Some(FileTime(read_u64_le(r)?));
            }
        }
        Ok(())
    }

    fn read_utf16_nul_terminated<R: Read>(&self, r: &mut R) -> Result<String> {
        let mut units = Vec::new();
        loop {
            let mut buf = [0u8; 2];
            r.read_exact(&mut buf)?;
            let unit = u16::from_le_bytes(buf);
            if unit == 0 {
                break;
            }
            units.push(unit);
        }
        String::from_utf16(&units).map_err(|_| ArchiveError::corrupt("invalid UTF-16 name"))
    }

    fn finalize_stream_map(&self, mut stream_map: StreamMap, folders: &[Folder]) -> StreamMap {
        stream_map.substream_to_folder.clear();
        stream_map.substream_sizes.clear();
        stream_map.substream_crcs.clear();
        for (folder_index, folder) in folders.iter().enumerate() {
            let n = folder.num_unpack_substreams.max(1);
            for i in 0..n {
                stream_map.substream_to_folder.push(folder_index);
                let size = folder.substream_sizes.get(i).copied().unwrap_or_else(|| folder.final_unpack_size());
                stream_map.substream_sizes.push(size);
                let crc = folder.substream_crcs.get(i).copied().flatten();
                stream_map.substream_crcs.push(crc);
            }
        }
        stream_map
    }

    /// Copies each entry's decoded size and CRC from its owning substream,
    /// and its folder's coder chain into `contentMethods` (spec §3, §4.2:
    /// entries sharing a folder share that folder's content methods).
    fn populate_file_metadata(&self, files: &mut [FileEntry], folders: &[Folder], stream_map: &StreamMap) {
        for file in files.iter_mut() {
            let Some(idx) = file.substream_index else { continue };
            file.size = stream_map.substream_sizes.get(idx).copied().unwrap_or(0);
            file.crc = stream_map.substream_crcs.get(idx).copied().flatten();
            if let Some(folder) = stream_map.substream_to_folder.get(idx).and_then(|&fi| folders.get(fi)) {
                file.content_methods = folder.coders.iter().map(|c| self.codecs.name_of(&c.method_id).to_string()).collect();
            }
        }
    }

    fn sanity_check(&self, folders: &[Folder], files: &[FileEntry]) -> Result<()> {
        let mut stats = ArchiveStatistics::default();
        stats.num_folders = folders.len() as u64;
        for folder in folders {
            stats.num_coders += folder.coders.len() as u64;
            stats.num_in += folder.total_in_streams() as u64;
            stats.num_out += folder.total_out_streams() as u64;
            stats.num_packed_streams += folder.packed_indices.len() as u64;
            stats.num_unpack_substreams += folder.num_unpack_substreams.max(1) as u64;
        }
        stats.num_entries = files.len() as u64;
        stats.num_entries_with_stream = files.iter().filter(|f| f.has_stream).count() as u64;

        let estimate_kib = stats.estimate_kib();
        if estimate_kib > self.options.max_memory_limit_kib {
            return Err(ArchiveError::MemoryLimitExceeded {
                requested_kib: estimate_kib,
                limit_kib: self.options.max_memory_limit_kib,
            });
        }
        Ok(())
    }

    /// Scans the last 1 MiB of `source` for a plausible header start and
    /// attempts a full parse from there, per spec §4.1. Only reachable when
    /// `tryToRecoverBrokenArchives` is enabled.
    fn recover_broken_archive<R: Read + Seek>(&self, source: &mut R) -> Result<Archive> {
        let end = source.seek(SeekFrom::End(0))?;
        let scan_start = end.saturating_sub(1024 * 1024);
        source.seek(SeekFrom::Start(scan_start))?;
        let mut tail = Vec::with_capacity((end - scan_start) as usize);
        source.read_to_end(&mut tail)?;

        for offset in (0..tail.len()).rev() {
            let byte = tail[offset];
            if byte != nid::K_HEADER && byte != nid::K_ENCODED_HEADER {
                continue;
            }
            let candidate = &tail[offset..];
            if byte == nid::K_HEADER {
                if let Ok(archive) = self.parse_real_header(candidate, scan_start + offset as u64) {
                    if !archive.stream_map.pack_sizes.is_empty() && !archive.files.is_empty() {
                        return Ok(archive);
                    }
                }
            }
        }
        Err(ArchiveError::corrupt("broken-archive recovery found no usable header"))
    }
}

impl Folder {
    fn unpack_sizes_substreams_store(&mut self, sizes: Vec<u64>) {
        self.substream_sizes = sizes;
    }
}
