//! Extra-field registry: maps a 16-bit header id to a typed parser, with an
//! opaque fallback for anything unrecognized (spec §2 component C, §3).

use crate::error::{ArchiveError, Result};

pub mod header_id {
    pub const ZIP64: u16 = 0x0001;
    pub const NTFS: u16 = 0x000A;
    pub const PKWARE_STRONG_ENCRYPTION: u16 = 0x0017;
    pub const UNICODE_COMMENT: u16 = 0x6375;
    pub const UNICODE_PATH: u16 = 0x7075;
    pub const EXTENDED_TIMESTAMP: u16 = 0x5455;
    pub const RESOURCE_ALIGNMENT: u16 = 0xA11E;
    pub const PADDING: u16 = 0xFFFF;
}

/// Bit flags in `ExtendedTimestamp.flags` (spec §6).
pub mod ts_flag {
    pub const MTIME: u8 = 1 << 0;
    pub const ATIME: u8 = 1 << 1;
    pub const CTIME: u8 = 1 << 2;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zip64Extra {
    pub uncompressed_size: Option<u64>,
    pub compressed_size: Option<u64>,
    pub local_header_offset: Option<u64>,
    pub disk_start: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NtfsTimestamps {
    pub mtime_100ns: u64,
    pub atime_100ns: u64,
    pub ctime_100ns: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtendedTimestamp {
    pub flags: u8,
    pub mtime: Option<i32>,
    pub atime: Option<i32>,
    pub ctime: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnicodePath {
    pub version: u8,
    pub name_crc32: u32,
    pub utf8_name: String,
}

/// One extra-field record attached to an LFH or CD entry. Unknown header
/// ids round-trip as `Opaque`; ids this crate recognizes but whose payload
/// fails to parse round-trip as `Unparseable` rather than being silently
/// dropped (spec §9 "distinct unparseable variant").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtraField {
    Zip64(Zip64Extra),
    Ntfs(NtfsTimestamps),
    ExtendedTimestamp(ExtendedTimestamp),
    UnicodePath(UnicodePath),
    UnicodeComment(UnicodePath),
    ResourceAlignment { alignment: u16 },
    Padding { len: usize },
    Opaque { header_id: u16, data: Vec<u8> },
    Unparseable { header_id: u16, data: Vec<u8> },
}

impl ExtraField {
    pub fn header_id(&self) -> u16 {
        match self {
            ExtraField::Zip64(_) => header_id::ZIP64,
            ExtraField::Ntfs(_) => header_id::NTFS,
            ExtraField::ExtendedTimestamp(_) => header_id::EXTENDED_TIMESTAMP,
            ExtraField::UnicodePath(_) => header_id::UNICODE_PATH,
            ExtraField::UnicodeComment(_) => header_id::UNICODE_COMMENT,
            ExtraField::ResourceAlignment { .. } => header_id::RESOURCE_ALIGNMENT,
            ExtraField::Padding { .. } => header_id::PADDING,
            ExtraField::Opaque { header_id, .. } | ExtraField::Unparseable { header_id, .. } => *header_id,
        }
    }
}

/// Parses the `{headerId: u16, dataSize: u16, data}*` extra-field blob
/// attached to an LFH or CD record. `zip64_placeholders` tells the Zip64
/// parser which fields were `0xFFFFFFFF`/`0xFFFF` in the fixed record and
/// therefore present in the Zip64 payload, per the de-facto ZIP convention
/// that the Zip64 extra's fields are *only* the ones that overflowed.
pub fn parse_extras(raw: &[u8], zip64_placeholders: Zip64Placeholders) -> Result<Vec<ExtraField>> {
    let mut fields = Vec::new();
    let mut i = 0usize;
    while i + 4 <= raw.len() {
        let id = u16::from_le_bytes([raw[i], raw[i + 1]]);
        let size = u16::from_le_bytes([raw[i + 2], raw[i + 3]]) as usize;
        i += 4;
        if i + size > raw.len() {
            return Err(ArchiveError::corrupt("extra field overruns its declared length"));
        }
        let data = &raw[i..i + size];
        fields.push(parse_one(id, data, zip64_placeholders));
        i += size;
    }
    Ok(fields)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Zip64Placeholders {
    pub uncompressed_size: bool,
    pub compressed_size: bool,
    pub local_header_offset: bool,
    pub disk_start: bool,
}

fn parse_one(id: u16, data: &[u8], zip64: Zip64Placeholders) -> ExtraField {
    match id {
        header_id::ZIP64 => parse_zip64(data, zip64)
            .unwrap_or_else(|| ExtraField::Unparseable { header_id: id, data: data.to_vec() }),
        header_id::NTFS => parse_ntfs(data)
            .unwrap_or_else(|| ExtraField::Unparseable { header_id: id, data: data.to_vec() }),
        header_id::EXTENDED_TIMESTAMP => parse_extended_timestamp(data)
            .unwrap_or_else(|| ExtraField::Unparseable { header_id: id, data: data.to_vec() }),
        header_id::UNICODE_PATH => parse_unicode(data)
            .map(ExtraField::UnicodePath)
            .unwrap_or_else(|| ExtraField::Unparseable { header_id: id, data: data.to_vec() }),
        header_id::UNICODE_COMMENT => parse_unicode(data)
            .map(ExtraField::UnicodeComment)
            .unwrap_or_else(|| ExtraField::Unparseable { header_id: id, data: data.to_vec() }),
        header_id::RESOURCE_ALIGNMENT if data.len() >= 2 => ExtraField::ResourceAlignment {
            alignment: u16::from_le_bytes([data[0], data[1]]),
        },
        header_id::PADDING => ExtraField::Padding { len: data.len() },
        _ => ExtraField::Opaque { header_id: id, data: data.to_vec() },
    }
}

fn parse_zip64(data: &[u8], placeholders: Zip64Placeholders) -> Option<ExtraField> {
    let mut cursor = 0usize;
    let mut take_u64 = |want: bool| -> Option<u64> {
        if !want {
            return None;
        }
        if cursor + 8 > data.len() {
            return None;
        }
        let v = u64::from_le_bytes(data[cursor..cursor + 8].try_into().ok()?);
        cursor += 8;
        Some(v)
    };
    let uncompressed_size = take_u64(placeholders.uncompressed_size);
    let compressed_size = take_u64(placeholders.compressed_size);
    let local_header_offset = take_u64(placeholders.local_header_offset);
    let disk_start = if placeholders.disk_start {
        if cursor + 4 > data.len() {
            None
        } else {
            Some(u32::from_le_bytes(data[cursor..cursor + 4].try_into().ok()?))
        }
    } else {
        None
    };
    Some(ExtraField::Zip64(Zip64Extra {
        uncompressed_size,
        compressed_size,
        local_header_offset,
        disk_start,
    }))
}

fn parse_ntfs(data: &[u8]) -> Option<ExtraField> {
    // {reserved: u32=0, tag=0x0001: u16, size=24: u16, mtime, atime, ctime: u64}
    if data.len() < 8 + 24 {
        return None;
    }
    let tag = u16::from_le_bytes([data[4], data[5]]);
    let size = u16::from_le_bytes([data[6], data[7]]);
    if tag != 0x0001 || size != 24 {
        return None;
    }
    let mtime = u64::from_le_bytes(data[8..16].try_into().ok()?);
    let atime = u64::from_le_bytes(data[16..24].try_into().ok()?);
    let ctime = u64::from_le_bytes(data[24..32].try_into().ok()?);
    Some(ExtraField::Ntfs(NtfsTimestamps {
        mtime_100ns: mtime,
        atime_100ns: atime,
        ctime_100ns: ctime,
    }))
}

fn parse_extended_timestamp(data: &[u8]) -> Option<ExtraField> {
    if data.is_empty() {
        return None;
    }
    let flags = data[0];
    let mut cursor = 1usize;
    let mut take_i32 = |present: bool| -> Option<i32> {
        if !present {
            return None;
        }
        if cursor + 4 > data.len() {
            return None;
        }
        let v = i32::from_le_bytes(data[cursor..cursor + 4].try_into().ok()?);
        cursor += 4;
        Some(v)
    };
    let mtime = take_i32(flags & ts_flag::MTIME != 0);
    let atime = take_i32(flags & ts_flag::ATIME != 0);
    let ctime = take_i32(flags & ts_flag::CTIME != 0);
    Some(ExtraField::ExtendedTimestamp(ExtendedTimestamp {
        flags,
        mtime,
        atime,
        ctime,
    }))
}

fn parse_unicode(data: &[u8]) -> Option<UnicodePath> {
    if data.len() < 5 {
        return None;
    }
    let version = data[0];
    let name_crc32 = u32::from_le_bytes(data[1..5].try_into().ok()?);
    let utf8_name = String::from_utf8(data[5..].to_vec()).ok()?;
    Some(UnicodePath {
        version,
        name_crc32,
        utf8_name,
    })
}

/// Serializes one extra field back to its `{headerId, dataSize, data}` form.
pub fn serialize_extra(field: &ExtraField, out: &mut Vec<u8>) {
    let mut payload = Vec::new();
    match field {
        ExtraField::Zip64(z) => {
            if let Some(v) = z.uncompressed_size {
                payload.extend_from_slice(&v.to_le_bytes());
            }
            if let Some(v) = z.compressed_size {
                payload.extend_from_slice(&v.to_le_bytes());
            }
            if let Some(v) = z.local_header_offset {
                payload.extend_from_slice(&v.to_le_bytes());
            }
            if let Some(v) = z.disk_start {
                payload.extend_from_slice(&v.to_le_bytes());
            }
        }
        ExtraField::Ntfs(n) => {
            payload.extend_from_slice(&0u32.to_le_bytes());
            payload.extend_from_slice(&0x0001u16.to_le_bytes());
            payload.extend_from_slice(&24u16.to_le_bytes());
            payload.extend_from_slice(&n.mtime_100ns.to_le_bytes());
            payload.extend_from_slice(&n.atime_100ns.to_le_bytes());
            payload.extend_from_slice(&n.ctime_100ns.to_le_bytes());
        }
        ExtraField::ExtendedTimestamp(t) => {
            payload.push(t.flags);
            if let Some(v) = t.mtime {
                payload.extend_from_slice(&v.to_le_bytes());
            }
            if let Some(v) = t.atime {
                payload.extend_from_slice(&v.to_le_bytes());
            }
            if let Some(v) = t.ctime {
                payload.extend_from_slice(&v.to_le_bytes());
            }
        }
        ExtraField::UnicodePath(u) | ExtraField::UnicodeComment(u) => {
            payload.push(u.version);
            payload.extend_from_slice(&u.name_crc32.to_le_bytes());
            payload.extend_from_slice(u.utf8_name.as_bytes());
        }
        ExtraField::ResourceAlignment { alignment } => {
            payload.extend_from_slice(&alignment.to_le_bytes());
        }
        ExtraField::Padding { len } => {
            payload.resize(*len, 0);
        }
        ExtraField::Opaque { data, .. } | ExtraField::Unparseable { data, .. } => {
            payload.extend_from_slice(data);
        }
    }
    out.extend_from_slice(&field.header_id().to_le_bytes());
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(&payload);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unicode_path_round_trips() {
        let field = ExtraField::UnicodePath(UnicodePath {
            version: 1,
            name_crc32: 0xDEADBEEF,
            utf8_name: "caf\u{e9}.txt".into(),
        });
        let mut buf = Vec::new();
        serialize_extra(&field, &mut buf);
        let parsed = parse_extras(&buf, Zip64Placeholders::default()).unwrap();
        assert_eq!(parsed, vec![field]);
    }

    #[test]
    fn unknown_id_round_trips_as_opaque() {
        let raw = [0x34, 0x12, 0x02, 0x00, 0xAA, 0xBB];
        let parsed = parse_extras(&raw, Zip64Placeholders::default()).unwrap();
        assert_eq!(parsed, vec![ExtraField::Opaque { header_id: 0x1234, data: vec![0xAA, 0xBB] }]);
    }

    #[test]
    fn zip64_extra_reads_only_requested_fields() {
        let mut data = Vec::new();
        data.extend_from_slice(&0x1_0000_0000u64.to_le_bytes());
        let placeholders = Zip64Placeholders {
            uncompressed_size: true,
            ..Default::default()
        };
        let field = parse_zip64(&data, placeholders).unwrap();
        match field {
            ExtraField::Zip64(z) => {
                assert_eq!(z.uncompressed_size, Some(0x1_0000_0000));
                assert_eq!(z.compressed_size, None);
            }
            _ => panic!("expected Zip64 variant"),
        }
    }
}
