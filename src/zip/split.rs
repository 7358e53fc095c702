//! Split-segment (spanned) ZIP output channel (spec §4.3).
//!
//! A split archive is `<base>.z01, .z02, ..., .z(N-1), <base>.zip`, the last
//! segment always carrying the `.zip` extension. This type presents that
//! sequence of files as a single [`RandomAccessOutput`], tracking which
//! segment holds any given absolute offset so `write_fully` can backpatch
//! across a segment boundary it previously crossed.

use std::fs::{self, File};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::io::RandomAccessOutput;
use crate::options::{SPLIT_SEGMENT_MAX, SPLIT_SEGMENT_MIN};

/// One already-closed segment's absolute byte range within the logical
/// stream, and the path it was written to.
struct ClosedSegment {
    path: PathBuf,
    start: u64,
    end: u64,
}

pub struct SplitZipWriter {
    base_path: PathBuf,
    split_size: u64,
    segment_index: u32,
    current: File,
    current_start: u64,
    bytes_in_current: u64,
    closed: Vec<ClosedSegment>,
}

impl SplitZipWriter {
    pub fn create(base_path: impl AsRef<Path>, split_size: u64) -> io::Result<Self> {
        assert!(
            (SPLIT_SEGMENT_MIN..=SPLIT_SEGMENT_MAX).contains(&split_size),
            "split size must be within [{SPLIT_SEGMENT_MIN}, {SPLIT_SEGMENT_MAX}]"
        );
        let base_path = base_path.as_ref().to_path_buf();
        let mut current = File::create(Self::segment_path(&base_path, 1))?;
        // Spanning signature: only the first 4 bytes of segment 1.
        current.write_all(&0x0807_4B50u32.to_le_bytes())?;
        Ok(Self {
            base_path,
            split_size,
            segment_index: 1,
            current,
            current_start: 0,
            bytes_in_current: 4,
            closed: Vec::new(),
        })
    }

    fn segment_path(base: &Path, index: u32) -> PathBuf {
        base.with_extension(format!("z{index:02}"))
    }

    fn final_path(base: &Path) -> PathBuf {
        base.with_extension("zip")
    }

    /// Opens a new segment if the current one cannot hold `additional`
    /// bytes without exceeding `split_size`.
    fn ensure_capacity(&mut self, additional: u64) -> io::Result<()> {
        if self.bytes_in_current > 0 && self.bytes_in_current + additional > self.split_size {
            self.roll_segment()?;
        }
        Ok(())
    }

    /// Opens a new segment unconditionally if the current one lacks `size`
    /// bytes of room; used before writing records that must not straddle a
    /// segment boundary (EOCD, Zip64 EOCD locator; spec §4.3).
    pub fn prepare_unsplittable(&mut self, size: u64) -> io::Result<()> {
        if self.bytes_in_current + size > self.split_size {
            self.roll_segment()?;
        }
        Ok(())
    }

    fn roll_segment(&mut self) -> io::Result<()> {
        self.current.flush()?;
        let end = self.current_start + self.bytes_in_current;
        self.closed.push(ClosedSegment {
            path: Self::segment_path(&self.base_path, self.segment_index),
            start: self.current_start,
            end,
        });

        self.segment_index += 1;
        self.current = File::create(Self::segment_path(&self.base_path, self.segment_index))?;
        self.current_start = end;
        self.bytes_in_current = 0;
        Ok(())
    }

    /// Finalizes the archive: the last open segment is renamed to
    /// `<base>.zip` (spec §4.3's "atomic rename on finish").
    pub fn finish(mut self) -> io::Result<PathBuf> {
        self.current.flush()?;
        drop(self.current);
        let last_segment = Self::segment_path(&self.base_path, self.segment_index);
        let final_path = Self::final_path(&self.base_path);
        fs::rename(&last_segment, &final_path)?;
        Ok(final_path)
    }

    pub fn total_position(&self) -> u64 {
        self.current_start + self.bytes_in_current
    }
}

impl Write for SplitZipWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ensure_capacity(buf.len() as u64)?;
        let n = self.current.write(buf)?;
        self.bytes_in_current += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.current.flush()
    }
}

impl RandomAccessOutput for SplitZipWriter {
    fn position(&mut self) -> io::Result<u64> {
        Ok(self.total_position())
    }

    fn write_fully(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        if offset >= self.current_start {
            let local = offset - self.current_start;
            let cur = self.current.stream_position()?;
            self.current.seek(SeekFrom::Start(local))?;
            self.current.write_all(buf)?;
            self.current.seek(SeekFrom::Start(cur))?;
            return Ok(());
        }

        let segment = self
            .closed
            .iter()
            .find(|s| offset >= s.start && offset < s.end)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "offset not in any written segment"))?;
        let mut file = fs::OpenOptions::new().write(true).open(&segment.path)?;
        file.seek(SeekFrom::Start(offset - segment.start))?;
        file.write_all(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rolls_to_a_new_segment_when_full() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("x.zip");
        let mut writer = SplitZipWriter::create(&base, SPLIT_SEGMENT_MIN).unwrap();
        writer.write_all(&vec![0u8; (SPLIT_SEGMENT_MIN - 4) as usize]).unwrap();
        assert_eq!(writer.segment_index, 1);
        writer.write_all(b"rolled over").unwrap();
        assert_eq!(writer.segment_index, 2);
        writer.finish().unwrap();
        assert!(dir.path().join("x.z01").exists());
        assert!(dir.path().join("x.zip").exists());
    }

    #[test]
    fn write_fully_backpatches_into_a_closed_segment() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("y.zip");
        let mut writer = SplitZipWriter::create(&base, SPLIT_SEGMENT_MIN).unwrap();
        writer.write_all(&vec![b'a'; (SPLIT_SEGMENT_MIN - 4) as usize]).unwrap();
        writer.write_all(b"into-segment-2").unwrap();
        writer.write_fully(4, b"PATCHED").unwrap();
        writer.finish().unwrap();

        let seg1 = fs::read(dir.path().join("y.z01")).unwrap();
        assert_eq!(&seg1[4..11], b"PATCHED");
    }
}
