//! In-memory model of a decoded 7z structural header (spec §3): coders,
//! bind pairs, folders, the pack/sub-streams maps, and file entries.
//!
//! Grounded on the `Archive`/`Coder`/`Folder`/`StreamMap` shapes used by the
//! reference archiver's own header model (other_examples: `withzombies
//! sevenz-rust2`'s archive.rs).

/// A single coder inside a folder's decoder DAG.
#[derive(Debug, Clone)]
pub struct Coder {
    pub method_id: Vec<u8>,
    pub num_in_streams: usize,
    pub num_out_streams: usize,
    pub properties: Vec<u8>,
}

/// Connects one coder's output stream to another coder's input stream,
/// forming the edges of the folder's decoder DAG.
#[derive(Debug, Clone, Copy)]
pub struct BindPair {
    pub in_index: usize,
    pub out_index: usize,
}

/// One solid block: a DAG of coders sharing a single packed-stream window.
/// `packed_indices[i]` is the index (within the folder's own in-stream
/// numbering) of the i-th coder input fed directly from a pack stream,
/// rather than from another coder's output (spec §2 component A).
#[derive(Debug, Clone, Default)]
pub struct Folder {
    pub coders: Vec<Coder>,
    pub bind_pairs: Vec<BindPair>,
    pub packed_indices: Vec<usize>,
    pub unpack_sizes: Vec<u64>,
    pub crc: Option<u32>,
    pub num_unpack_substreams: usize,
    /// Unpacked size of each of this folder's substreams, in file order.
    pub substream_sizes: Vec<u64>,
    /// CRC32 of each of this folder's substreams, when present.
    pub substream_crcs: Vec<Option<u32>>,
}

impl Folder {
    pub fn total_in_streams(&self) -> usize {
        self.coders.iter().map(|c| c.num_in_streams).sum()
    }

    pub fn total_out_streams(&self) -> usize {
        self.coders.iter().map(|c| c.num_out_streams).sum()
    }

    /// Index of the coder output stream that is not consumed by any bind
    /// pair: the folder's final decoded output (spec §2 component A).
    pub fn find_final_out_stream(&self) -> Option<usize> {
        (0..self.total_out_streams())
            .find(|out| !self.bind_pairs.iter().any(|bp| bp.out_index == *out))
    }

    /// Unpack size of the folder's final output stream, i.e. the size of
    /// the fully decoded solid block.
    pub fn final_unpack_size(&self) -> u64 {
        match self.find_final_out_stream() {
            Some(idx) => self.unpack_sizes.get(idx).copied().unwrap_or(0),
            None => 0,
        }
    }

    /// Topologically orders coder indices so each coder's bound inputs are
    /// decoded before it runs. Used by the solid-block engine to build the
    /// `Box<dyn Read>` decoder stack (spec §2 component A).
    pub fn topo_order(&self) -> Vec<usize> {
        let n = self.coders.len();
        let mut in_stream_base = vec![0usize; n];
        let mut acc = 0;
        for (i, c) in self.coders.iter().enumerate() {
            in_stream_base[i] = acc;
            acc += c.num_in_streams;
        }
        let mut out_stream_base = vec![0usize; n];
        let mut acc = 0;
        for (i, c) in self.coders.iter().enumerate() {
            out_stream_base[i] = acc;
            acc += c.num_out_streams;
        }

        let coder_of_in_stream = |in_idx: usize| -> usize {
            in_stream_base
                .iter()
                .rposition(|&base| base <= in_idx)
                .unwrap_or(0)
        };
        let coder_of_out_stream = |out_idx: usize| -> usize {
            out_stream_base
                .iter()
                .rposition(|&base| base <= out_idx)
                .unwrap_or(0)
        };

        let mut deps: Vec<Vec<usize>> = vec![Vec::new(); n];
        for bp in &self.bind_pairs {
            let consumer = coder_of_in_stream(bp.in_index);
            let producer = coder_of_out_stream(bp.out_index);
            if consumer != producer {
                deps[consumer].push(producer);
            }
        }

        let mut order = Vec::with_capacity(n);
        let mut visited = vec![false; n];
        fn visit(
            i: usize,
            deps: &[Vec<usize>],
            visited: &mut [bool],
            order: &mut Vec<usize>,
        ) {
            if visited[i] {
                return;
            }
            visited[i] = true;
            for &d in &deps[i] {
                visit(d, deps, visited, order);
            }
            order.push(i);
        }
        for i in 0..n {
            visit(i, &deps, &mut visited, &mut order);
        }
        order
    }
}

/// Windows FILETIME-resolution timestamp, carried as raw 100ns ticks since
/// 1601-01-01 to avoid a lossy round trip through any particular clock type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileTime(pub u64);

/// One file (or directory, or anti-item) entry from `kFilesInfo` (spec §3).
#[derive(Debug, Clone, Default)]
pub struct FileEntry {
    pub name: String,
    pub has_stream: bool,
    pub is_empty_file: bool,
    pub is_anti: bool,
    pub is_directory: bool,
    pub creation_time: Option<FileTime>,
    pub access_time: Option<FileTime>,
    pub modification_time: Option<FileTime>,
    pub attributes: Option<u32>,
    pub start_pos: Option<u64>,
    /// Index into `Archive::stream_map.substream_to_folder` for entries that
    /// carry a stream. `None` for directories and empty files.
    pub substream_index: Option<usize>,
    /// Decoded (unpacked) size, copied from the owning substream. `0` for
    /// directories and anti-items; exact for entries with a stream, and for
    /// empty files with no stream at all.
    pub size: u64,
    /// CRC32 of the decoded substream, when the archive carries one.
    pub crc: Option<u32>,
    /// Human-readable coder chain of the owning folder (e.g. `"LZMA2"`),
    /// propagated from the previous entry in the same folder when this
    /// entry shares it (spec §4.2 content-method propagation).
    pub content_methods: Vec<String>,
}

/// Maps substreams (one per non-empty file, in file order) back to the
/// folder and pack-stream offsets that hold their bytes (spec §3,
/// `StreamMap`).
#[derive(Debug, Clone, Default)]
pub struct StreamMap {
    /// Folder index for substream `i`.
    pub substream_to_folder: Vec<usize>,
    /// Byte offset of the first pack stream of folder `i`, relative to the
    /// end of the signature header.
    pub folder_pack_offsets: Vec<u64>,
    /// Number of pack streams consumed by folder `i`.
    pub folder_pack_stream_counts: Vec<usize>,
    /// Size, in bytes, of each pack stream (flat, across all folders).
    pub pack_sizes: Vec<u64>,
    /// CRC32 of each substream, when present.
    pub substream_crcs: Vec<Option<u32>>,
    /// Unpacked size of each substream.
    pub substream_sizes: Vec<u64>,
}

/// The fully decoded structural header plus enough pack-stream geometry to
/// stream any folder on demand.
#[derive(Debug, Clone, Default)]
pub struct Archive {
    pub folders: Vec<Folder>,
    pub files: Vec<FileEntry>,
    pub stream_map: StreamMap,
    /// Base absolute offset added to each folder's entry in
    /// `stream_map.folder_pack_offsets` to get that folder's pack-stream
    /// position; always `SIGNATURE_HEADER_SIZE`, since the base offset
    /// recorded in `kPackInfo` is already folded into `folder_pack_offsets`.
    pub pack_pos: u64,
}

impl Archive {
    pub fn folder_pack_stream_offset(&self, folder_index: usize) -> u64 {
        self.pack_pos + self.stream_map.folder_pack_offsets[folder_index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_folder() -> Folder {
        // pack -> coder0 (copy) -> coder1 (deflate) -> final output
        Folder {
            coders: vec![
                Coder { method_id: vec![0x00], num_in_streams: 1, num_out_streams: 1, properties: vec![] },
                Coder { method_id: vec![0x04, 0x01, 0x08], num_in_streams: 1, num_out_streams: 1, properties: vec![] },
            ],
            bind_pairs: vec![BindPair { in_index: 1, out_index: 0 }],
            packed_indices: vec![0],
            unpack_sizes: vec![100, 200],
            crc: None,
            num_unpack_substreams: 1,
            substream_sizes: vec![200],
            substream_crcs: vec![None],
        }
    }

    #[test]
    fn final_out_stream_is_the_one_no_bind_pair_consumes() {
        let folder = linear_folder();
        assert_eq!(folder.find_final_out_stream(), Some(1));
        assert_eq!(folder.final_unpack_size(), 200);
    }

    #[test]
    fn topo_order_runs_producers_before_consumers() {
        let folder = linear_folder();
        let order = folder.topo_order();
        let pos0 = order.iter().position(|&i| i == 0).unwrap();
        let pos1 = order.iter().position(|&i| i == 1).unwrap();
        assert!(pos0 < pos1);
    }
}
