//! LHA header codec (spec §2 component L, §4.5, §6).
//!
//! Header level is read from the fixed byte at offset 20, common to every
//! level's base header; levels outside `{0, 1, 2, 3}` fail the signature
//! check immediately (spec §8 boundary case). Level 0/1 carry the
//! filename and CRC16 directly in the base header; level 1 additionally
//! carries an extended-header chain, which level 2/3 rely on exclusively
//! (no inline filename).

mod crc16;

use std::io::{self, Read};

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use num_enum::TryFromPrimitive;

use crate::error::{ArchiveError, Result};

pub use crc16::crc16;

const BASE_HEADER_PROBE_LEN: usize = 21;

/// The byte at header offset 20, common to every supported level. Levels
/// outside this closed set fail the signature check (spec §8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum HeaderLevel {
    Zero = 0,
    One = 1,
    Two = 2,
    Three = 3,
}

#[derive(Debug, Clone)]
pub struct LhaEntry {
    pub name: String,
    pub method: String,
    pub compressed_size: u64,
    pub original_size: u64,
    /// Level 0/1: MS-DOS packed date-time. Level 2/3: Unix seconds.
    pub timestamp: u32,
    pub attribute: u8,
    pub level: HeaderLevel,
    pub crc16: u16,
}

impl LhaEntry {
    /// Decodes `timestamp` into a UTC instant: MS-DOS packed date-time for
    /// level 0/1, Unix seconds for level 2/3. Returns `None` for an
    /// out-of-range MS-DOS value (e.g. all zero bits).
    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        match self.level {
            HeaderLevel::Zero | HeaderLevel::One => parse_msdos(self.timestamp).map(|naive| Utc.from_utc_datetime(&naive)),
            HeaderLevel::Two | HeaderLevel::Three => Utc.timestamp_opt(self.timestamp as i64, 0).single(),
        }
    }
}

/// MS-DOS packed date-time: date in the high 16 bits, time in the low 16,
/// the same layout ZIP local headers use (spec §6).
fn parse_msdos(packed: u32) -> Option<NaiveDateTime> {
    let time = packed as u16;
    let date = (packed >> 16) as u16;

    let seconds = (time & 0x1f) as u32 * 2;
    let minutes = (time >> 5 & 0x3f) as u32;
    let hours = (time >> 11 & 0x1f) as u32;

    let day = (date & 0x1f) as u32;
    let month = (date >> 5 & 0x0f) as u32;
    let year = ((date >> 9) as i32) + 1980;

    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hours, minutes, seconds)
}

pub struct LhaReader<R> {
    source: R,
    pending_skip: u64,
    current_data_remaining: u64,
    finished: bool,
}

impl<R: Read> LhaReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            pending_skip: 0,
            current_data_remaining: 0,
            finished: false,
        }
    }

    pub fn next_entry(&mut self) -> Result<Option<LhaEntry>> {
        if self.finished {
            return Ok(None);
        }
        self.drain_pending()?;

        let mut probe = [0u8; BASE_HEADER_PROBE_LEN];
        match self.read_or_eof(&mut probe)? {
            false => {
                self.finished = true;
                return Ok(None);
            }
            true => {}
        }

        // A single zero byte where `header_size` would be is the
        // end-of-archive marker for level 0/1 archives.
        if probe[0] == 0 {
            self.finished = true;
            return Ok(None);
        }

        let level = HeaderLevel::try_from_primitive(probe[20])
            .map_err(|_| ArchiveError::BadSignature(format!("unsupported LHA header level {}", probe[20])))?;

        let method = String::from_utf8_lossy(&probe[2..7]).into_owned();
        let compressed_size = u32::from_le_bytes(probe[7..11].try_into().unwrap()) as u64;
        let original_size = u32::from_le_bytes(probe[11..15].try_into().unwrap()) as u64;
        let timestamp = u32::from_le_bytes(probe[15..19].try_into().unwrap());
        let attribute = probe[19];

        let (name, crc16) = match level {
            HeaderLevel::Zero | HeaderLevel::One => self.read_inline_name_and_crc(&probe, level)?,
            HeaderLevel::Two | HeaderLevel::Three => self.read_extended_name_and_crc(&probe)?,
        };

        self.current_data_remaining = compressed_size;
        self.pending_skip = compressed_size;

        Ok(Some(LhaEntry {
            name,
            method,
            compressed_size,
            original_size,
            timestamp,
            attribute,
            level,
            crc16,
        }))
    }

    pub fn entry_body(&mut self) -> LhaEntryBody<'_, R> {
        LhaEntryBody {
            source: &mut self.source,
            data_remaining: &mut self.current_data_remaining,
            pending_skip: &mut self.pending_skip,
        }
    }

    /// Level 0/1: `{namelen: u8, name, crc16: u16}` follow the base header
    /// directly; level 1 additionally trails an OS id and an
    /// extended-header chain we skip over (unused by this contract).
    fn read_inline_name_and_crc(&mut self, probe: &[u8; BASE_HEADER_PROBE_LEN], level: HeaderLevel) -> Result<(String, u16)> {
        let _ = probe;
        let namelen = self.read_u8()?;
        let mut name_buf = vec![0u8; namelen as usize];
        self.source.read_exact(&mut name_buf)?;
        let name = String::from_utf8_lossy(&name_buf).into_owned();
        let crc16 = self.read_u16_le()?;

        if level == HeaderLevel::One {
            let _os_id = self.read_u8()?;
            self.skip_extended_header_chain()?;
        }
        Ok((name, crc16))
    }

    /// Level 2/3: `{crc16: u16, os_id: u8}` follow the base header, then
    /// an extended-header chain supplies the filename (type `0x01`).
    fn read_extended_name_and_crc(&mut self, _probe: &[u8; BASE_HEADER_PROBE_LEN]) -> Result<(String, u16)> {
        let crc16 = self.read_u16_le()?;
        let _os_id = self.read_u8()?;
        let mut name = String::new();
        loop {
            let size = self.read_u16_le()? as usize;
            if size == 0 {
                break;
            }
            if size < 3 {
                return Err(ArchiveError::corrupt("LHA extended header shorter than its own framing"));
            }
            let mut ext_type = [0u8; 1];
            self.source.read_exact(&mut ext_type)?;
            let mut data = vec![0u8; size - 3];
            self.source.read_exact(&mut data)?;
            if ext_type[0] == 0x01 {
                name = String::from_utf8_lossy(&data).into_owned();
            }
        }
        Ok((name, crc16))
    }

    fn skip_extended_header_chain(&mut self) -> Result<()> {
        loop {
            let size = self.read_u16_le()? as usize;
            if size == 0 {
                break;
            }
            if size < 2 {
                return Err(ArchiveError::corrupt("LHA extended header shorter than its own framing"));
            }
            let mut data = vec![0u8; size - 2];
            self.source.read_exact(&mut data)?;
        }
        Ok(())
    }

    fn read_u8(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.source.read_exact(&mut b)?;
        Ok(b[0])
    }

    fn read_u16_le(&mut self) -> Result<u16> {
        let mut b = [0u8; 2];
        self.source.read_exact(&mut b)?;
        Ok(u16::from_le_bytes(b))
    }

    fn read_or_eof(&mut self, buf: &mut [u8]) -> Result<bool> {
        let mut read = 0;
        while read < buf.len() {
            let n = self.source.read(&mut buf[read..])?;
            if n == 0 {
                if read == 0 {
                    return Ok(false);
                }
                return Err(ArchiveError::truncated("LHA base header"));
            }
            read += n;
        }
        Ok(true)
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
}

pub struct LhaEntryBody<'a, R> {
    source: &'a mut R,
    data_remaining: &'a mut u64,
    pending_skip: &'a mut u64,
}

impl<R: Read> Read for LhaEntryBody<'_, R> {
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

#[cfg(test)]
mod tests {
    use super::*;

    fn level1_header(name: &str, data: &[u8]) -> Vec<u8> {
        let mut header = Vec::new();
        header.push(0); // header_size placeholder, patched below
        header.push(0); // checksum placeholder
        header.extend_from_slice(b"-lh0-");
        header.extend_from_slice(&(data.len() as u32).to_le_bytes()); // compressed size
        header.extend_from_slice(&(data.len() as u32).to_le_bytes()); // original size
        header.extend_from_slice(&0u32.to_le_bytes()); // timestamp
        header.push(0x20); // attribute
        header.push(1); // level
        header.push(name.len() as u8);
        header.extend_from_slice(name.as_bytes());
        header.extend_from_slice(&crc16::crc16(data).to_le_bytes());
        header.push(0); // os id
        header.extend_from_slice(&0u16.to_le_bytes()); // end of extended-header chain

        header[0] = (header.len() - 2) as u8;
        let mut archive = header;
        archive.extend_from_slice(data);
        archive
    }

    #[test]
    fn reads_level1_entry_with_matching_crc() {
        let archive = level1_header("greeting.txt", b"hello lha");
        let mut reader = LhaReader::new(std::io::Cursor::new(archive));
        let entry = reader.next_entry().unwrap().unwrap();
        assert_eq!(entry.name, "greeting.txt");
        assert_eq!(entry.level, HeaderLevel::One);
        assert_eq!(entry.crc16, crc16::crc16(b"hello lha"));

        let mut body = Vec::new();
        reader.entry_body().read_to_end(&mut body).unwrap();
        assert_eq!(body, b"hello lha");
    }

    #[test]
    fn level_above_three_is_rejected() {
        let mut header = level1_header("x", b"");
        header[20] = 4;
        let mut reader = LhaReader::new(std::io::Cursor::new(header));
        let err = reader.next_entry().unwrap_err();
        assert!(matches!(err, ArchiveError::BadSignature(_)));
    }

    #[test]
    fn msdos_timestamp_decodes_to_expected_date() {
        // 2024-03-15 10:20:30, 2-second precision truncates :30 to :30.
        let date: u16 = ((2024 - 1980) << 9) | (3 << 5) | 15;
        let time: u16 = (10 << 11) | (20 << 5) | (30 / 2);
        let packed = (date as u32) << 16 | time as u32;
        let decoded = parse_msdos(packed).unwrap();
        assert_eq!(decoded.format("%Y-%m-%d %H:%M:%S").to_string(), "2024-03-15 10:20:30");
    }
}
