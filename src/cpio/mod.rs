//! cpio header codec (spec §2 component K, §4.5, §6).
//!
//! Supports the three variants in active use: new ASCII (`"070701"` /
//! `"070702"` with CRC), old ASCII (`"070707"`), and old binary
//! (`0o070707` as a 16-bit magic, read in whichever byte order the first
//! two bytes imply). Variant is detected by probing the first six (new/old
//! ASCII) or two (old binary) bytes, never by caller hint.

use std::io::{self, Read};

use crate::error::{ArchiveError, Result};

const TRAILER_NAME: &str = "TRAILER!!!";

fn decode_cstr(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpioVariant {
    NewAscii,
    NewAsciiCrc,
    OldAscii,
    OldBinary { big_endian: bool },
}

/// A decoded cpio entry (spec §3).
#[derive(Debug, Clone)]
pub struct CpioEntry {
    pub name: String,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub mtime: u64,
    pub size: u64,
    pub dev_major: u32,
    pub dev_minor: u32,
    pub rdev_major: u32,
    pub rdev_minor: u32,
    pub checksum: Option<u32>,
}

/// Reads a sequential cpio byte stream, yielding one header per call to
/// [`Self::next_entry`] until the `TRAILER!!!` sentinel entry.
pub struct CpioReader<R> {
    source: R,
    variant: Option<CpioVariant>,
    pending_skip: u64,
    current_data_remaining: u64,
    finished: bool,
    old_binary_pushback: Option<[u8; 4]>,
}

impl<R: Read> CpioReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            variant: None,
            pending_skip: 0,
            current_data_remaining: 0,
            finished: false,
            old_binary_pushback: None,
        }
    }

    pub fn next_entry(&mut self) -> Result<Option<CpioEntry>> {
        if self.finished {
            return Ok(None);
        }
        self.drain_pending()?;

        let variant = match self.variant {
            Some(v) => v,
            None => {
                let v = self.probe_variant()?;
                self.variant = Some(v);
                v
            }
        };

        let entry = match variant {
            CpioVariant::NewAscii | CpioVariant::NewAsciiCrc => self.read_new_ascii(variant)?,
            CpioVariant::OldAscii => self.read_old_ascii()?,
            CpioVariant::OldBinary { big_endian } => self.read_old_binary(big_endian)?,
        };

        if entry.name == TRAILER_NAME {
            self.finished = true;
            return Ok(None);
        }

        Ok(Some(entry))
    }

    pub fn entry_body(&mut self) -> CpioEntryBody<'_, R> {
        CpioEntryBody {
            source: &mut self.source,
            data_remaining: &mut self.current_data_remaining,
            pending_skip: &mut self.pending_skip,
        }
    }

    fn probe_variant(&mut self) -> Result<CpioVariant> {
        let mut magic = [0u8; 6];
        self.source.read_exact(&mut magic)?;
        match &magic {
            b"070701" => Ok(CpioVariant::NewAscii),
            b"070702" => Ok(CpioVariant::NewAsciiCrc),
            b"070707" => Ok(CpioVariant::OldAscii),
            _ => {
                let first_two = [magic[0], magic[1]];
                let le = u16::from_le_bytes(first_two);
                let be = u16::from_be_bytes(first_two);
                if le == 0o070707 {
                    self.pushback_old_binary_remainder(&magic)?;
                    Ok(CpioVariant::OldBinary { big_endian: false })
                } else if be == 0o070707 {
                    self.pushback_old_binary_remainder(&magic)?;
                    Ok(CpioVariant::OldBinary { big_endian: true })
                } else {
                    Err(ArchiveError::BadSignature("unrecognized cpio magic".into()))
                }
            }
        }
    }

    /// Old-binary headers are 2-byte-field based and we only needed the
    /// first 2 bytes to detect the magic; the remaining 4 probed bytes
    /// belong to the `dev` field and are replayed to the binary reader.
    fn pushback_old_binary_remainder(&mut self, probed: &[u8; 6]) -> Result<()> {
        self.old_binary_pushback = Some(probed[2..6].try_into().unwrap());
        Ok(())
    }

    fn read_new_ascii(&mut self, variant: CpioVariant) -> Result<CpioEntry> {
        // Fixed fields after the 6-byte magic: 13 hex fields of 8 chars each.
        let mut fields = [0u8; 13 * 8];
        self.source.read_exact(&mut fields)?;
        let hex = |i: usize| -> Result<u32> {
            let s = std::str::from_utf8(&fields[i * 8..i * 8 + 8]).map_err(|_| ArchiveError::corrupt("non-UTF8 cpio field"))?;
            u32::from_str_radix(s, 16).map_err(|_| ArchiveError::corrupt(format!("invalid cpio hex field {s:?}")))
        };
        let _ino = hex(0)?;
        let mode = hex(1)?;
        let uid = hex(2)?;
        let gid = hex(3)?;
        let nlink = hex(4)?;
        let mtime = hex(5)? as u64;
        let filesize = hex(6)? as u64;
        let dev_major = hex(7)?;
        let dev_minor = hex(8)?;
        let rdev_major = hex(9)?;
        let rdev_minor = hex(10)?;
        let namesize = hex(11)?;
        let checksum_field = hex(12)?;

        let mut name_buf = vec![0u8; namesize as usize];
        self.source.read_exact(&mut name_buf)?;
        let name = decode_cstr(&name_buf);
        self.skip_to_4_byte_boundary(110 + namesize as u64)?;

        self.current_data_remaining = filesize;
        self.pending_skip = round_up(filesize, 4);

        Ok(CpioEntry {
            name,
            mode,
            uid,
            gid,
            nlink,
            mtime,
            size: filesize,
            dev_major,
            dev_minor,
            rdev_major,
            rdev_minor,
            checksum: if variant == CpioVariant::NewAsciiCrc { Some(checksum_field) } else { None },
        })
    }

    fn read_old_ascii(&mut self) -> Result<CpioEntry> {
        // 9 octal fields after the magic: dev, ino, mode, uid, gid, nlink,
        // rdev, mtime (11 chars), namesize (6 chars), filesize (11 chars).
        let dev = self.read_octal_field(6)?;
        let ino = self.read_octal_field(6)?;
        let mode = self.read_octal_field(6)?;
        let uid = self.read_octal_field(6)?;
        let gid = self.read_octal_field(6)?;
        let nlink = self.read_octal_field(6)?;
        let rdev = self.read_octal_field(6)?;
        let mtime = self.read_octal_field(11)? as u64;
        let namesize = self.read_octal_field(6)?;
        let filesize = self.read_octal_field(11)? as u64;
        let _ = ino;

        let mut name_buf = vec![0u8; namesize as usize];
        self.source.read_exact(&mut name_buf)?;
        let name = decode_cstr(&name_buf);

        self.current_data_remaining = filesize;
        self.pending_skip = filesize;

        Ok(CpioEntry {
            name,
            mode,
            uid,
            gid,
            nlink,
            mtime,
            size: filesize,
            dev_major: dev,
            dev_minor: 0,
            rdev_major: rdev,
            rdev_minor: 0,
            checksum: None,
        })
    }

    fn read_old_binary(&mut self, big_endian: bool) -> Result<CpioEntry> {
        let mut rest = [0u8; 20];
        rest[..4].copy_from_slice(&self.old_binary_pushback.take().unwrap_or([0u8; 4]));
        self.source.read_exact(&mut rest[4..])?;

        let read_u16 = |b: &[u8]| -> u16 {
            if big_endian {
                u16::from_be_bytes([b[0], b[1]])
            } else {
                u16::from_le_bytes([b[0], b[1]])
            }
        };
        let dev = read_u16(&rest[0..2]);
        let ino = read_u16(&rest[2..4]);
        let mode = read_u16(&rest[4..6]);
        let uid = read_u16(&rest[6..8]);
        let gid = read_u16(&rest[8..10]);
        let nlink = read_u16(&rest[10..12]);
        let rdev = read_u16(&rest[12..14]);
        // mtime and filesize are stored as two 16-bit halves, high half first.
        let mtime = (read_u16(&rest[14..16]) as u32) << 16 | read_u16(&rest[16..18]) as u32;
        let namesize = read_u16(&rest[18..20]);

        let mut filesize_halves = [0u8; 4];
        self.source.read_exact(&mut filesize_halves)?;
        let filesize = (read_u16(&filesize_halves[0..2]) as u64) << 16 | read_u16(&filesize_halves[2..4]) as u64;

        let mut name_buf = vec![0u8; namesize as usize];
        self.source.read_exact(&mut name_buf)?;
        let name = decode_cstr(&name_buf);
        // Old-binary headers pad the name (including its NUL) to an even
        // byte count.
        if (26 + namesize as u64) % 2 != 0 {
            let mut pad = [0u8; 1];
            self.source.read_exact(&mut pad)?;
        }

        self.current_data_remaining = filesize;
        self.pending_skip = round_up(filesize, 2);
        let _ = ino;

        Ok(CpioEntry {
            name,
            mode: mode as u32,
            uid: uid as u32,
            gid: gid as u32,
            nlink: nlink as u32,
            mtime: mtime as u64,
            size: filesize,
            dev_major: dev as u32,
            dev_minor: 0,
            rdev_major: rdev as u32,
            rdev_minor: 0,
            checksum: None,
        })
    }

    fn read_octal_field(&mut self, len: usize) -> Result<u32> {
        let mut buf = vec![0u8; len];
        self.source.read_exact(&mut buf)?;
        let s = std::str::from_utf8(&buf).map_err(|_| ArchiveError::corrupt("non-UTF8 cpio octal field"))?;
        u32::from_str_radix(s, 8).map_err(|_| ArchiveError::corrupt(format!("invalid cpio octal field {s:?}")))
    }

    fn skip_to_4_byte_boundary(&mut self, bytes_read_since_magic: u64) -> Result<()> {
        let pad = round_up(bytes_read_since_magic, 4) - bytes_read_since_magic;
        if pad > 0 {
            let mut buf = [0u8; 3];
            self.source.read_exact(&mut buf[..pad as usize])?;
        }
        Ok(())
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

fn round_up(value: u64, multiple: u64) -> u64 {
    let rem = value % multiple;
    if rem == 0 {
        value
    } else {
        value + (multiple - rem)
    }
}

pub struct CpioEntryBody<'a, R> {
    source: &'a mut R,
    data_remaining: &'a mut u64,
    pending_skip: &'a mut u64,
}

impl<R: Read> Read for CpioEntryBody<'_, R> {
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

    fn new_ascii_header(name: &str, data: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"070701");
        let field = |v: u32| format!("{v:08x}");
        buf.extend_from_slice(field(1).as_bytes()); // ino
        buf.extend_from_slice(field(0o100644).as_bytes()); // mode
        buf.extend_from_slice(field(0).as_bytes()); // uid
        buf.extend_from_slice(field(0).as_bytes()); // gid
        buf.extend_from_slice(field(1).as_bytes()); // nlink
        buf.extend_from_slice(field(0).as_bytes()); // mtime
        buf.extend_from_slice(field(data.len() as u32).as_bytes()); // filesize
        buf.extend_from_slice(field(0).as_bytes()); // dev major
        buf.extend_from_slice(field(0).as_bytes()); // dev minor
        buf.extend_from_slice(field(0).as_bytes()); // rdev major
        buf.extend_from_slice(field(0).as_bytes()); // rdev minor
        let name_with_nul = format!("{name}\0");
        buf.extend_from_slice(field(name_with_nul.len() as u32).as_bytes()); // namesize
        buf.extend_from_slice(field(0).as_bytes()); // checksum
        buf.extend_from_slice(name_with_nul.as_bytes());
        while (110 + name_with_nul.len()) % 4 != 0 {
            buf.push(0);
        }
        buf.extend_from_slice(data);
        while buf.len() % 4 != 0 {
            buf.push(0);
        }
        buf
    }

    #[test]
    fn reads_new_ascii_entry_then_trailer() {
        let mut archive = new_ascii_header("file.txt", b"hi");
        archive.extend_from_slice(&new_ascii_header(TRAILER_NAME, b""));

        let mut reader = CpioReader::new(std::io::Cursor::new(archive));
        let entry = reader.next_entry().unwrap().unwrap();
        assert_eq!(entry.name, "file.txt");
        assert_eq!(entry.size, 2);

        let mut body = Vec::new();
        reader.entry_body().read_to_end(&mut body).unwrap();
        assert_eq!(body, b"hi");

        assert!(reader.next_entry().unwrap().is_none());
    }
}
