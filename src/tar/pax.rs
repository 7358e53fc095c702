//! PAX extended-header record parsing and overlay application (spec §4.5,
//! §6 `"<len> <key>=<value>\n"`, §8 scenario 6, §9 `LIBARCHIVE.creationtime`).

use std::collections::HashMap;

use crate::error::{ArchiveError, Result};

use super::header::TarEntry;

/// A parsed set of PAX keyword records, ready to overlay onto the ustar
/// header parsed from the following block.
pub(crate) struct PaxRecords {
    fields: HashMap<String, String>,
}

/// Parses the `"<len> <key>=<value>\n"*` record stream carried in a PAX
/// extended header's body.
pub(crate) fn parse(body: &[u8]) -> Result<PaxRecords> {
    let mut fields = HashMap::new();
    let mut cursor = 0usize;
    while cursor < body.len() {
        let rest = &body[cursor..];
        let space = rest
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| ArchiveError::corrupt("malformed PAX record: missing length separator"))?;
        let len_str = std::str::from_utf8(&rest[..space]).map_err(|_| ArchiveError::corrupt("malformed PAX record length"))?;
        let record_len: usize = len_str.parse().map_err(|_| ArchiveError::corrupt("malformed PAX record length"))?;
        if record_len == 0 || record_len > rest.len() {
            return Err(ArchiveError::corrupt("PAX record length out of range"));
        }
        let record = &rest[..record_len];
        let kv = &record[space + 1..record.len() - 1]; // drop "<len> " prefix and trailing '\n'
        let eq = kv
            .iter()
            .position(|&b| b == b'=')
            .ok_or_else(|| ArchiveError::corrupt("malformed PAX record: missing '='"))?;
        let key = String::from_utf8_lossy(&kv[..eq]).into_owned();
        let value = String::from_utf8_lossy(&kv[eq + 1..]).into_owned();
        fields.insert(key, value);
        cursor += record_len;
    }
    Ok(PaxRecords { fields })
}

impl PaxRecords {
    /// Applies the overlay's known keys onto `entry`; unrecognized keys are
    /// kept available but not reflected onto the typed struct (spec §9:
    /// applied verbatim, no reinterpretation beyond what the contract
    /// names: path, linkpath, size, mtime, atime, ctime, uid, gid, uname,
    /// gname, LIBARCHIVE.creationtime).
    pub(crate) fn apply(&self, entry: &mut TarEntry) {
        if let Some(v) = self.fields.get("path") {
            entry.name = v.clone();
        }
        if let Some(v) = self.fields.get("linkpath") {
            entry.linkname = v.clone();
        }
        if let Some(v) = self.fields.get("size").and_then(|v| v.parse().ok()) {
            entry.size = v;
        }
        if let Some(v) = self.fields.get("mtime").and_then(|v| parse_pax_time(v)) {
            entry.mtime = v;
        }
        if let Some(v) = self.fields.get("atime").and_then(|v| parse_pax_time(v)) {
            entry.atime = Some(v);
        }
        if let Some(v) = self.fields.get("ctime").and_then(|v| parse_pax_time(v)) {
            entry.ctime = Some(v);
        }
        if let Some(v) = self.fields.get("uid").and_then(|v| v.parse().ok()) {
            entry.uid = v;
        }
        if let Some(v) = self.fields.get("gid").and_then(|v| v.parse().ok()) {
            entry.gid = v;
        }
        if let Some(v) = self.fields.get("uname") {
            entry.uname = v.clone();
        }
        if let Some(v) = self.fields.get("gname") {
            entry.gname = v.clone();
        }
        // The mapping of LIBARCHIVE.creationtime onto a birth-time field is
        // only loosely specified by upstream tools; applied verbatim here
        // as seconds-since-epoch plus a nanosecond fraction (spec §9).
        if let Some(v) = self.fields.get("LIBARCHIVE.creationtime").and_then(|v| parse_pax_time_with_nanos(v)) {
            entry.birthtime = Some(v);
        }
    }
}

/// PAX timestamps are `seconds[.fraction]`; the fractional part is
/// truncated since `TarEntry`'s mtime/atime/ctime carry whole seconds only.
fn parse_pax_time(raw: &str) -> Option<i64> {
    raw.split('.').next()?.parse().ok()
}

/// Same format as [`parse_pax_time`], but keeps the fractional part as
/// nanoseconds instead of truncating it.
fn parse_pax_time_with_nanos(raw: &str) -> Option<(i64, u32)> {
    let mut parts = raw.splitn(2, '.');
    let seconds: i64 = parts.next()?.parse().ok()?;
    let nanos = match parts.next() {
        Some(frac) => {
            let mut digits: String = frac.chars().take(9).collect();
            while digits.len() < 9 {
                digits.push('0');
            }
            digits.parse().ok()?
        }
        None => 0,
    };
    Some((seconds, nanos))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiple_records() {
        let body = b"14 size=12345\n20 uname=deployuser\n";
        let records = parse(body).unwrap();
        assert_eq!(records.fields.get("size").unwrap(), "12345");
        assert_eq!(records.fields.get("uname").unwrap(), "deployuser");
    }

    #[test]
    fn truncates_fractional_time() {
        assert_eq!(parse_pax_time("1700000000.123456789"), Some(1700000000));
    }

    #[test]
    fn creationtime_keeps_nanosecond_fraction() {
        assert_eq!(parse_pax_time_with_nanos("1700000000.5"), Some((1700000000, 500_000_000)));
        assert_eq!(parse_pax_time_with_nanos("1700000000"), Some((1700000000, 0)));
    }

    #[test]
    fn applies_creationtime_onto_birthtime() {
        let body = b"39 LIBARCHIVE.creationtime=1700000000.25\n";
        let records = parse(body).unwrap();
        let mut entry = TarEntry {
            name: "f".into(),
            size: 0,
            mode: 0,
            uid: 0,
            gid: 0,
            mtime: 0,
            atime: None,
            ctime: None,
            birthtime: None,
            uname: String::new(),
            gname: String::new(),
            linkname: String::new(),
            entry_type: super::super::header::EntryType::Regular,
        };
        records.apply(&mut entry);
        assert_eq!(entry.birthtime, Some((1700000000, 250_000_000)));
    }
}
