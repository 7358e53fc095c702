//! POSIX/ustar 512-byte header decoding (spec §6 "tar: POSIX 512-byte
//! header; numeric fields octal ASCII or base-256").

use crate::error::{ArchiveError, Result};

/// Entry kind as carried in the header's typeflag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    Regular,
    HardLink,
    SymbolicLink,
    CharSpecial,
    BlockSpecial,
    Directory,
    Fifo,
    PaxExtended,
    PaxGlobal,
    GnuLongName,
    GnuLongLink,
    Other(u8),
}

impl EntryType {
    fn from_flag(flag: u8) -> Self {
        match flag {
            0 | b'0' => EntryType::Regular,
            b'1' => EntryType::HardLink,
            b'2' => EntryType::SymbolicLink,
            b'3' => EntryType::CharSpecial,
            b'4' => EntryType::BlockSpecial,
            b'5' => EntryType::Directory,
            b'6' => EntryType::Fifo,
            b'x' | b'X' => EntryType::PaxExtended,
            b'g' => EntryType::PaxGlobal,
            b'L' => EntryType::GnuLongName,
            b'K' => EntryType::GnuLongLink,
            other => EntryType::Other(other),
        }
    }
}

/// A fully decoded tar entry, after any PAX/GNU-longname overlay has been
/// applied (spec §3 `TarEntry`).
#[derive(Debug, Clone)]
pub struct TarEntry {
    pub name: String,
    pub size: u64,
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
    pub mtime: i64,
    pub atime: Option<i64>,
    pub ctime: Option<i64>,
    /// `LIBARCHIVE.creationtime`, as (seconds, nanoseconds); ustar/GNU
    /// headers have no birth-time field, so this is only ever populated
    /// from a PAX extended header.
    pub birthtime: Option<(i64, u32)>,
    pub uname: String,
    pub gname: String,
    pub linkname: String,
    pub entry_type: EntryType,
}

/// The as-parsed contents of one 512-byte header block, before any PAX or
/// GNU longname/longlink overlay is folded in.
pub(crate) struct RawHeader {
    pub(crate) name: String,
    pub(crate) mode: u32,
    pub(crate) uid: u64,
    pub(crate) gid: u64,
    pub(crate) size: u64,
    pub(crate) mtime: i64,
    pub(crate) type_flag: EntryType,
    pub(crate) linkname: String,
    pub(crate) uname: String,
    pub(crate) gname: String,
    pub(crate) prefix: String,
}

impl RawHeader {
    pub(crate) fn parse(block: &[u8; 512]) -> Result<Self> {
        verify_checksum(block)?;

        let name = decode_cstr(&block[0..100]);
        let mode = parse_number(&block[100..108])? as u32;
        let uid = parse_number(&block[108..116])? as u64;
        let gid = parse_number(&block[116..124])? as u64;
        let size = parse_number(&block[124..136])?;
        if size < 0 {
            return Err(ArchiveError::corrupt("tar entry size is negative"));
        }
        let mtime = parse_number(&block[136..148])?;
        let type_flag = EntryType::from_flag(block[156]);
        let linkname = decode_cstr(&block[157..257]);
        let is_ustar = &block[257..263] == b"ustar\0" || &block[257..263] == b"ustar ";
        let uname = decode_cstr(&block[265..297]);
        let gname = decode_cstr(&block[297..329]);
        let prefix = if is_ustar { decode_cstr(&block[345..500]) } else { String::new() };

        Ok(Self {
            name,
            mode,
            uid,
            gid,
            size: size as u64,
            mtime,
            type_flag,
            linkname,
            uname,
            gname,
            prefix,
        })
    }

    pub(crate) fn into_entry(self) -> TarEntry {
        let name = if self.prefix.is_empty() {
            self.name
        } else {
            format!("{}/{}", self.prefix, self.name)
        };
        TarEntry {
            name,
            size: self.size,
            mode: self.mode,
            uid: self.uid,
            gid: self.gid,
            mtime: self.mtime,
            atime: None,
            ctime: None,
            birthtime: None,
            uname: self.uname,
            gname: self.gname,
            linkname: self.linkname,
            entry_type: self.type_flag,
        }
    }
}

fn verify_checksum(block: &[u8; 512]) -> Result<()> {
    let recorded = parse_number(&block[148..156])? as u32;
    let mut unsigned_sum: u32 = 0;
    let mut signed_sum: i64 = 0;
    for (i, &b) in block.iter().enumerate() {
        let field_byte = if (148..156).contains(&i) { b' ' } else { b };
        unsigned_sum += field_byte as u32;
        signed_sum += field_byte as i8 as i64;
    }
    if unsigned_sum != recorded && signed_sum as u32 != recorded {
        return Err(ArchiveError::corrupt("tar header checksum mismatch"));
    }
    Ok(())
}

/// Decodes a NUL/space-padded ASCII/UTF-8 field.
pub(crate) fn decode_cstr(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).trim_end().to_string()
}

/// Parses a numeric field: octal ASCII, or base-256 binary when the first
/// byte has its high bit set (spec §6, §8 negative-size boundary case).
fn parse_number(field: &[u8]) -> Result<i64> {
    if field.is_empty() {
        return Ok(0);
    }
    if field[0] & 0x80 != 0 {
        // Base-256: big-endian two's complement, sign-extended from the
        // second-highest bit of the first byte (the highest bit is only a
        // "this is binary" flag, not part of the magnitude).
        let mut value: i64 = if field[0] & 0x40 != 0 { -1 } else { 0 };
        for (i, &b) in field.iter().enumerate() {
            let byte = if i == 0 { b & 0x7f } else { b };
            value = (value << 8) | byte as i64;
        }
        return Ok(value);
    }

    let text: String = field
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as char)
        .collect();
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }
    i64::from_str_radix(trimmed.trim_start_matches('0').trim_end(), 8)
        .or_else(|_| if trimmed.chars().all(|c| c == '0') { Ok(0) } else { Err(()) })
        .map_err(|_| ArchiveError::corrupt(format!("invalid octal field {trimmed:?}")))
}

/// Test-only encoder for octal numeric fields (writers are out of scope
/// for tar; this exists purely to build header fixtures).
#[cfg(test)]
pub(crate) fn write_octal(field: &mut [u8], value: u64, digits: usize) {
    let s = format!("{value:0width$o}", width = digits);
    field[..digits].copy_from_slice(s.as_bytes());
    field[digits] = 0;
}
