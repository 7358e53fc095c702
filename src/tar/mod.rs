//! tar header codec (spec §2 component J, §4.5).
//!
//! Produces a lazy, finite, non-restartable sequence of `(entry, bodyStream)`
//! pairs from a sequential byte source. A consumer that doesn't fully read
//! an entry's body before asking for the next one simply gets the rest
//! skipped for them — [`TarReader::next_entry`] drains whatever the
//! previous [`TarEntryBody`] left unread (plus its block padding) before
//! parsing the following header.

mod header;
mod pax;

pub use header::{EntryType, TarEntry};

use std::io::{self, Read};

use crate::error::{ArchiveError, Result};

const BLOCK_SIZE: usize = 512;

/// Reads a sequential tar byte stream, yielding one header/PAX-overlay pass
/// per call to [`Self::next_entry`].
pub struct TarReader<R> {
    source: R,
    /// Bytes (entry data still unread, plus alignment padding) that must be
    /// skipped before the next header can be parsed.
    pending_skip: u64,
    /// Declared body size of the most recently yielded entry; the body
    /// reader is capped to this even though `pending_skip` also counts
    /// trailing padding.
    current_data_remaining: u64,
    finished: bool,
}

impl<R: Read> TarReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            pending_skip: 0,
            current_data_remaining: 0,
            finished: false,
        }
    }

    /// Parses the next header (applying any PAX/GNU-longname overlay found
    /// along the way), or returns `None` at the two-zero-block end marker.
    pub fn next_entry(&mut self) -> Result<Option<TarEntry>> {
        if self.finished {
            return Ok(None);
        }
        self.drain_pending()?;

        let mut pax_overlay: Option<pax::PaxRecords> = None;
        let mut long_name: Option<String> = None;
        let mut long_link: Option<String> = None;

        loop {
            let mut block = [0u8; BLOCK_SIZE];
            match self.read_full_block(&mut block)? {
                false => {
                    self.finished = true;
                    return Ok(None);
                }
                true => {}
            }

            if block.iter().all(|&b| b == 0) {
                // Two consecutive zero blocks mark the archive end; a lone
                // one is tolerated as a truncated-but-terminated stream.
                let mut second = [0u8; BLOCK_SIZE];
                let _ = self.read_full_block(&mut second);
                self.finished = true;
                return Ok(None);
            }

            let raw = header::RawHeader::parse(&block)?;
            let padded_size = pad_to_block(raw.size);

            match raw.type_flag {
                EntryType::PaxExtended | EntryType::PaxGlobal => {
                    let mut body = vec![0u8; raw.size as usize];
                    self.source.read_exact(&mut body)?;
                    self.skip_padding(raw.size)?;
                    let records = pax::parse(&body)?;
                    if raw.type_flag == EntryType::PaxExtended {
                        pax_overlay = Some(records);
                    }
                    continue;
                }
                EntryType::GnuLongName => {
                    let mut body = vec![0u8; raw.size as usize];
                    self.source.read_exact(&mut body)?;
                    self.skip_padding(raw.size)?;
                    long_name = Some(header::decode_cstr(&body));
                    continue;
                }
                EntryType::GnuLongLink => {
                    let mut body = vec![0u8; raw.size as usize];
                    self.source.read_exact(&mut body)?;
                    self.skip_padding(raw.size)?;
                    long_link = Some(header::decode_cstr(&body));
                    continue;
                }
                _ => {
                    let mut entry = raw.into_entry();
                    if let Some(name) = long_name.take() {
                        entry.name = name;
                    }
                    if let Some(link) = long_link.take() {
                        entry.linkname = link;
                    }
                    if let Some(records) = pax_overlay.take() {
                        records.apply(&mut entry);
                    }
                    self.current_data_remaining = entry.size;
                    self.pending_skip = padded_size;
                    return Ok(Some(entry));
                }
            }
        }
    }

    /// Returns a reader over the current entry's body, bounded to its
    /// declared size. Call once per entry, immediately after `next_entry`.
    pub fn entry_body(&mut self) -> TarEntryBody<'_, R> {
        TarEntryBody {
            source: &mut self.source,
            data_remaining: &mut self.current_data_remaining,
            pending_skip: &mut self.pending_skip,
        }
    }

    fn drain_pending(&mut self) -> Result<()> {
        if self.pending_skip == 0 {
            return Ok(());
        }
        let mut take = (&mut self.source).take(self.pending_skip);
        io::copy(&mut take, &mut io::sink())?;
        self.pending_skip = 0;
        self.current_data_remaining = 0;
        Ok(())
    }

    fn skip_padding(&mut self, data_size: u64) -> Result<()> {
        let pad = pad_to_block(data_size) - data_size;
        if pad > 0 {
            let mut take = (&mut self.source).take(pad);
            io::copy(&mut take, &mut io::sink())?;
        }
        Ok(())
    }

    /// Reads exactly `BLOCK_SIZE` bytes, returning `false` on a clean EOF
    /// at the block boundary (archives may legitimately end without a
    /// trailing zero block when truncated by a pipe).
    fn read_full_block(&mut self, block: &mut [u8; BLOCK_SIZE]) -> Result<bool> {
        let mut read = 0;
        while read < BLOCK_SIZE {
            let n = self.source.read(&mut block[read..])?;
            if n == 0 {
                if read == 0 {
                    return Ok(false);
                }
                return Err(ArchiveError::truncated("tar header block"));
            }
            read += n;
        }
        Ok(true)
    }
}

/// Bounded view over one entry's body; reads never exceed the header's
/// declared `size`, and every byte read is reflected back into the
/// reader's pending-skip counter so the next `next_entry` call only has to
/// drain what this left behind.
pub struct TarEntryBody<'a, R> {
    source: &'a mut R,
    data_remaining: &'a mut u64,
    pending_skip: &'a mut u64,
}

impl<R: Read> Read for TarEntryBody<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if *self.data_remaining == 0 {
            return Ok(0);
        }
        let cap = buf.len().min(*self.data_remaining as usize);
        let n = self.source.read(&mut buf[..cap])?;
        *self.data_remaining -= n as u64;
        *self.pending_skip = self.pending_skip.saturating_sub(n as u64);
        Ok(n)
    }
}

fn pad_to_block(size: u64) -> u64 {
    let rem = size % BLOCK_SIZE as u64;
    if rem == 0 {
        size
    } else {
        size + (BLOCK_SIZE as u64 - rem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn ustar_header(name: &str, size: u64, type_flag: u8) -> Vec<u8> {
        let mut block = vec![0u8; BLOCK_SIZE];
        block[0..name.len()].copy_from_slice(name.as_bytes());
        header::write_octal(&mut block[100..108], 0o644, 7);
        header::write_octal(&mut block[108..116], 0, 7);
        header::write_octal(&mut block[116..124], 0, 7);
        header::write_octal(&mut block[124..136], size, 11);
        header::write_octal(&mut block[136..148], 0, 11);
        block[148..156].copy_from_slice(b"        ");
        block[156] = type_flag;
        block[257..263].copy_from_slice(b"ustar\0");
        block[263] = b'0';
        block[264] = b'0';
        let checksum: u32 = block.iter().map(|&b| b as u32).sum();
        header::write_octal(&mut block[148..154], checksum as u64, 6);
        block[154] = 0;
        block[155] = b' ';
        block
    }

    fn pad(buf: &mut Vec<u8>, data: &[u8]) {
        buf.extend_from_slice(data);
        let rem = data.len() % BLOCK_SIZE;
        if rem != 0 {
            buf.extend(std::iter::repeat(0u8).take(BLOCK_SIZE - rem));
        }
    }

    #[test]
    fn reads_a_single_regular_entry() {
        let mut archive = Vec::new();
        archive.extend_from_slice(&ustar_header("hello.txt", 11, b'0'));
        pad(&mut archive, b"hello world");
        archive.extend(std::iter::repeat(0u8).take(BLOCK_SIZE * 2));

        let mut reader = TarReader::new(Cursor::new(archive));
        let entry = reader.next_entry().unwrap().unwrap();
        assert_eq!(entry.name, "hello.txt");
        assert_eq!(entry.size, 11);

        let mut body = Vec::new();
        reader.entry_body().read_to_end(&mut body).unwrap();
        assert_eq!(body, b"hello world");

        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn skips_unread_body_before_next_header() {
        let mut archive = Vec::new();
        archive.extend_from_slice(&ustar_header("a.txt", 20, b'0'));
        pad(&mut archive, &vec![b'a'; 20]);
        archive.extend_from_slice(&ustar_header("b.txt", 3, b'0'));
        pad(&mut archive, b"b!!");
        archive.extend(std::iter::repeat(0u8).take(BLOCK_SIZE * 2));

        let mut reader = TarReader::new(Cursor::new(archive));
        let first = reader.next_entry().unwrap().unwrap();
        assert_eq!(first.name, "a.txt");
        // Never touch `first`'s body.
        let second = reader.next_entry().unwrap().unwrap();
        assert_eq!(second.name, "b.txt");
        let mut body = Vec::new();
        reader.entry_body().read_to_end(&mut body).unwrap();
        assert_eq!(body, b"b!!");
    }

    #[test]
    fn pax_size_overlay_replaces_ustar_size() {
        let mut archive = Vec::new();
        let pax_body = b"14 size=12345\n";
        let mut pax_header = ustar_header("PaxHeaders/x", pax_body.len() as u64, b'x');
        pax_header[156] = b'x';
        archive.extend_from_slice(&pax_header);
        pad(&mut archive, pax_body);
        archive.extend_from_slice(&ustar_header("x", 0, b'0'));
        archive.extend(std::iter::repeat(0u8).take(BLOCK_SIZE * 2));

        let mut reader = TarReader::new(Cursor::new(archive));
        let entry = reader.next_entry().unwrap().unwrap();
        assert_eq!(entry.size, 12345);
    }

    #[test]
    fn negative_size_is_corrupt() {
        let mut block = ustar_header("neg", 0, b'0');
        // Base-256 encoding with sign bit set: a negative declared size.
        block[124] = 0xFF;
        for b in &mut block[125..136] {
            *b = 0xFF;
        }
        for b in &mut block[148..156] {
            *b = b' ';
        }
        let checksum: u32 = block.iter().map(|&b| b as u32).sum();
        header::write_octal(&mut block[148..154], checksum as u64, 6);
        block[154] = 0;
        block[155] = b' ';

        let mut archive = block;
        archive.extend(std::iter::repeat(0u8).take(BLOCK_SIZE * 2));
        let mut reader = TarReader::new(Cursor::new(archive));
        let err = reader.next_entry().unwrap_err();
        assert!(matches!(err, ArchiveError::CorruptHeader { .. }));
    }
}
