use std::io::{self, Read};

use crate::error::ArchiveError;

/// Tracks how many bytes have passed through a reader. The 7z solid-block
/// engine uses this to update `compressedBytesReadFromCurrentEntry`
/// (spec §4.2); ZIP/tar/cpio use it to know how much of an entry's declared
/// size has actually been produced.
pub struct CountingReader<R> {
    inner: R,
    count: u64,
}

impl<R: Read> CountingReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, count: 0 }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

/// Wraps a reader, accumulating a CRC32 over everything read, and checks it
/// against an expected value once `expected_len` bytes have been consumed.
/// Used for both folder-level and entry-level CRC verification (spec §4.2).
pub struct Crc32Reader<R> {
    inner: R,
    hasher: crc32fast::Hasher,
    expected: Option<u32>,
    expected_len: u64,
    seen: u64,
    where_: String,
}

impl<R: Read> Crc32Reader<R> {
    pub fn new(inner: R, expected: Option<u32>, expected_len: u64, where_: impl Into<String>) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
            expected,
            expected_len,
            seen: 0,
            where_: where_.into(),
        }
    }

    /// Reads to completion, verifying the checksum once `expected_len` bytes
    /// have been seen. Returns an error without allocating a large buffer if
    /// the checksum is wrong.
    pub fn finish_and_verify(mut self) -> Result<(), ArchiveError> {
        let mut buf = [0u8; 8192];
        loop {
            let n = self.read(&mut buf)?;
            if n == 0 {
                break;
            }
        }
        self.verify()
    }

    fn verify(&self) -> Result<(), ArchiveError> {
        if self.seen < self.expected_len {
            return Err(ArchiveError::truncated(self.where_.clone()));
        }
        if let Some(expected) = self.expected {
            let actual = self.hasher.clone().finalize();
            if actual != expected {
                return Err(ArchiveError::ChecksumMismatch {
                    where_: self.where_.clone(),
                    expected: expected as u64,
                    actual: actual as u64,
                });
            }
        }
        Ok(())
    }
}

impl<R: Read> Read for Crc32Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.hasher.update(&buf[..n]);
            self.seen += n as u64;
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_bytes_read() {
        let mut r = CountingReader::new(b"hello".as_slice());
        let mut buf = [0u8; 5];
        r.read_exact(&mut buf).unwrap();
        assert_eq!(r.count(), 5);
    }

    #[test]
    fn crc_matches_known_value() {
        let data = b"123456789";
        let expected = crc32fast::hash(data);
        let r = Crc32Reader::new(data.as_slice(), Some(expected), data.len() as u64, "test");
        assert!(r.finish_and_verify().is_ok());
    }

    #[test]
    fn crc_mismatch_is_reported() {
        let data = b"123456789";
        let r = Crc32Reader::new(data.as_slice(), Some(0xDEADBEEF), data.len() as u64, "test");
        match r.finish_and_verify() {
            Err(ArchiveError::ChecksumMismatch { .. }) => {}
            other => panic!("expected ChecksumMismatch, got {other:?}"),
        }
    }
}
