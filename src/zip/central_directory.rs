//! Locates and parses EOCD / Zip64-EOCD / central-directory records
//! (spec §2 component G).
//!
//! Grounded on the backward EOCD/Zip64-locator scan used by the teacher's
//! `StreamingZipReader::find_eocd`/`read_zip64_eocd`, generalized to widen
//! every size/offset through the extra-field registry instead of a single
//! hardcoded Zip64 branch.

use std::io::{Read, Seek, SeekFrom};

use crate::error::{ArchiveError, Result};

use super::entry::{MethodId, ZipEntry};
use super::extra::{self, Zip64Placeholders};

pub const LOCAL_FILE_HEADER_SIG: u32 = 0x0403_4B50;
pub const DATA_DESCRIPTOR_SIG: u32 = 0x0807_4B50;
pub const CENTRAL_DIRECTORY_SIG: u32 = 0x0201_4B50;
pub const EOCD_SIG: u32 = 0x0605_4B50;
pub const ZIP64_EOCD_SIG: u32 = 0x0606_4B50;
pub const ZIP64_EOCD_LOCATOR_SIG: u32 = 0x0706_4B50;

/// Maximum distance the EOCD search looks back from EOF: 22-byte record
/// plus the largest possible trailing comment (`u16::MAX`).
const EOCD_SEARCH_WINDOW: u64 = 22 + u16::MAX as u64;

#[derive(Debug, Clone, Default)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd_start: u16,
    pub entries_on_disk: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment: String,
}

impl EndOfCentralDirectory {
    fn uses_zip64(&self) -> bool {
        self.total_entries == 0xFFFF || self.cd_size == 0xFFFF_FFFF || self.cd_offset == 0xFFFF_FFFF
    }
}

#[derive(Debug, Clone, Default)]
pub struct Zip64EndOfCentralDirectory {
    pub total_entries_on_disk: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

/// Finds the EOCD record (scanning backward from EOF) and, when it carries
/// Zip64 placeholder values, the Zip64 EOCD locator and record that follow
/// it, then parses every central directory entry they describe.
pub struct CentralDirectoryReader;

impl CentralDirectoryReader {
    pub fn read<R: Read + Seek>(source: &mut R) -> Result<Vec<ZipEntry>> {
        let eocd_offset = Self::find_eocd(source)?;
        source.seek(SeekFrom::Start(eocd_offset))?;
        let eocd = Self::parse_eocd(source)?;

        let (total_entries, cd_offset) = if eocd.uses_zip64() {
            let zip64 = Self::find_and_parse_zip64_eocd(source, eocd_offset)?;
            (zip64.total_entries, zip64.cd_offset)
        } else {
            (eocd.total_entries as u64, eocd.cd_offset as u64)
        };

        source.seek(SeekFrom::Start(cd_offset))?;
        let mut entries = Vec::with_capacity(total_entries as usize);
        for _ in 0..total_entries {
            match Self::parse_one_entry(source)? {
                Some(entry) => entries.push(entry),
                None => break,
            }
        }
        Ok(entries)
    }

    fn find_eocd<R: Read + Seek>(source: &mut R) -> Result<u64> {
        let file_size = source.seek(SeekFrom::End(0))?;
        let search_start = file_size.saturating_sub(EOCD_SEARCH_WINDOW);
        source.seek(SeekFrom::Start(search_start))?;
        let mut buffer = Vec::new();
        source.read_to_end(&mut buffer)?;

        for i in (0..buffer.len().saturating_sub(3)).rev() {
            if buffer[i..i + 4] == EOCD_SIG.to_le_bytes() {
                return Ok(search_start + i as u64);
            }
        }
        Err(ArchiveError::corrupt("end of central directory record not found"))
    }

    fn parse_eocd<R: Read>(r: &mut R) -> Result<EndOfCentralDirectory> {
        let sig = read_u32(r)?;
        if sig != EOCD_SIG {
            return Err(ArchiveError::corrupt("bad EOCD signature"));
        }
        let disk_number = read_u16(r)?;
        let disk_with_cd_start = read_u16(r)?;
        let entries_on_disk = read_u16(r)?;
        let total_entries = read_u16(r)?;
        let cd_size = read_u32(r)?;
        let cd_offset = read_u32(r)?;
        let comment_len = read_u16(r)? as usize;
        let mut comment_buf = vec![0u8; comment_len];
        r.read_exact(&mut comment_buf)?;
        Ok(EndOfCentralDirectory {
            disk_number,
            disk_with_cd_start,
            entries_on_disk,
            total_entries,
            cd_size,
            cd_offset,
            comment: String::from_utf8_lossy(&comment_buf).into_owned(),
        })
    }

    fn find_and_parse_zip64_eocd<R: Read + Seek>(
        source: &mut R,
        eocd_offset: u64,
    ) -> Result<Zip64EndOfCentralDirectory> {
        let search_start = eocd_offset.saturating_sub(20);
        source.seek(SeekFrom::Start(search_start))?;
        let sig = read_u32(source)?;
        if sig != ZIP64_EOCD_LOCATOR_SIG {
            return Err(ArchiveError::corrupt("zip64 EOCD locator not found"));
        }
        let _disk_with_zip64_eocd = read_u32(source)?;
        let zip64_eocd_offset = read_u64(source)?;
        let _total_disks = read_u32(source)?;

        source.seek(SeekFrom::Start(zip64_eocd_offset))?;
        let sig = read_u32(source)?;
        if sig != ZIP64_EOCD_SIG {
            return Err(ArchiveError::corrupt("bad zip64 EOCD signature"));
        }
        let _record_size = read_u64(source)?;
        let _version_made_by = read_u16(source)?;
        let _version_needed = read_u16(source)?;
        let _disk_number = read_u32(source)?;
        let _disk_with_cd_start = read_u32(source)?;
        let total_entries_on_disk = read_u64(source)?;
        let total_entries = read_u64(source)?;
        let cd_size = read_u64(source)?;
        let cd_offset = read_u64(source)?;

        Ok(Zip64EndOfCentralDirectory {
            total_entries_on_disk,
            total_entries,
            cd_size,
            cd_offset,
        })
    }

    fn parse_one_entry<R: Read>(r: &mut R) -> Result<Option<ZipEntry>> {
        let sig = read_u32(r)?;
        if sig != CENTRAL_DIRECTORY_SIG {
            return Ok(None);
        }
        let _version_made_by = read_u16(r)?;
        let _version_needed = read_u16(r)?;
        let flags = read_u16(r)?;
        let method = read_u16(r)?;
        let _mod_time = read_u16(r)?;
        let _mod_date = read_u16(r)?;
        let crc32 = read_u32(r)?;
        let compressed_size_32 = read_u32(r)?;
        let uncompressed_size_32 = read_u32(r)?;
        let name_len = read_u16(r)? as usize;
        let extra_len = read_u16(r)? as usize;
        let comment_len = read_u16(r)? as usize;
        let disk_number_start_16 = read_u16(r)?;
        let _internal_attrs = read_u16(r)?;
        let external_attrs = read_u32(r)?;
        let local_header_offset_32 = read_u32(r)?;

        let mut name_buf = vec![0u8; name_len];
        r.read_exact(&mut name_buf)?;
        let mut extra_buf = vec![0u8; extra_len];
        r.read_exact(&mut extra_buf)?;
        let mut comment_buf = vec![0u8; comment_len];
        r.read_exact(&mut comment_buf)?;

        let placeholders = Zip64Placeholders {
            uncompressed_size: uncompressed_size_32 == 0xFFFF_FFFF,
            compressed_size: compressed_size_32 == 0xFFFF_FFFF,
            local_header_offset: local_header_offset_32 == 0xFFFF_FFFF,
            disk_start: disk_number_start_16 == 0xFFFF,
        };
        let extras = extra::parse_extras(&extra_buf, placeholders)?;

        let mut uncompressed_size = uncompressed_size_32 as u64;
        let mut compressed_size = compressed_size_32 as u64;
        let mut local_header_offset = local_header_offset_32 as u64;
        let mut disk_number_start = disk_number_start_16 as u32;

        if let Some(super::extra::ExtraField::Zip64(z)) =
            extras.iter().find(|e| matches!(e, super::extra::ExtraField::Zip64(_)))
        {
            if let Some(v) = z.uncompressed_size {
                uncompressed_size = v;
            }
            if let Some(v) = z.compressed_size {
                compressed_size = v;
            }
            if let Some(v) = z.local_header_offset {
                local_header_offset = v;
            }
            if let Some(v) = z.disk_start {
                disk_number_start = v;
            }
        }

        let name = if flags & super::entry::gp_flag::UTF8_NAME != 0 {
            String::from_utf8(name_buf).map_err(|_| ArchiveError::corrupt("non-UTF8 name with UTF-8 flag set"))?
        } else {
            String::from_utf8_lossy(&name_buf).into_owned()
        };

        Ok(Some(ZipEntry {
            name,
            method: MethodId(method),
            crc32,
            compressed_size,
            uncompressed_size,
            local_header_offset,
            disk_number_start,
            general_purpose_flags: flags,
            extras,
            comment: String::from_utf8_lossy(&comment_buf).into_owned(),
            alignment: None,
            external_attributes: external_attrs,
        }))
    }
}

fn read_u16<R: Read>(r: &mut R) -> Result<u16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(r: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn minimal_zip_with_one_entry() -> Vec<u8> {
        let mut buf = Vec::new();
        // Local file header (stored, empty content)
        let lfh_offset = buf.len() as u32;
        buf.extend_from_slice(&LOCAL_FILE_HEADER_SIG.to_le_bytes());
        buf.extend_from_slice(&20u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&4u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(b"a.tx");

        let cd_offset = buf.len() as u32;
        buf.extend_from_slice(&CENTRAL_DIRECTORY_SIG.to_le_bytes());
        buf.extend_from_slice(&20u16.to_le_bytes());
        buf.extend_from_slice(&20u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&4u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&lfh_offset.to_le_bytes());
        buf.extend_from_slice(b"a.tx");
        let cd_size = buf.len() as u32 - cd_offset;

        buf.extend_from_slice(&EOCD_SIG.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&cd_size.to_le_bytes());
        buf.extend_from_slice(&cd_offset.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf
    }

    #[test]
    fn reads_single_entry_central_directory() {
        let bytes = minimal_zip_with_one_entry();
        let mut cursor = Cursor::new(bytes);
        let entries = CentralDirectoryReader::read(&mut cursor).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "a.tx");
    }
}
