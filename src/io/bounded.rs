use std::io::{self, Read};

/// Wraps a reader so at most `limit` bytes can ever be read from it, the way
/// every entry body in this crate is wrapped so a misbehaving coder can never
/// read past its declared size (spec §4.2, §4.5).
pub struct Bounded<R> {
    inner: R,
    remaining: u64,
}

impl<R: Read> Bounded<R> {
    pub fn new(inner: R, limit: u64) -> Self {
        Self {
            inner,
            remaining: limit,
        }
    }

    /// Bytes not yet read. Used by the 7z random-access engine to detect
    /// whether an entry has already been partially consumed (spec §4.2).
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }
}

impl<R: Read> Read for Bounded<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }
        let cap = buf.len().min(self.remaining as usize);
        let n = self.inner.read(&mut buf[..cap])?;
        self.remaining -= n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_at_limit_even_if_inner_has_more() {
        let data = b"hello world".as_slice();
        let mut bounded = Bounded::new(data, 5);
        let mut out = Vec::new();
        bounded.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello");
        assert_eq!(bounded.remaining(), 0);
    }

    #[test]
    fn passes_through_short_reads() {
        let data = b"ab".as_slice();
        let mut bounded = Bounded::new(data, 10);
        let mut out = Vec::new();
        bounded.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"ab");
    }
}
