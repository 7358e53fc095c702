//! Minimal LZMA2 chunk framer built on top of `lzma_rs`'s raw LZMA decoder.
//!
//! LZMA2 wraps a sequence of LZMA1 chunks (or literal/uncompressed chunks)
//! with a small control header; full fidelity requires carrying LZMA state
//! (and the sliding dictionary) across chunks that don't request a reset.
//! `lzma_rs` does not expose that lower-level state machine, so this decoder
//! treats every compressed chunk as an independent LZMA1 stream reset with
//! the coder's properties. This is correct for the common case of
//! dictionary-reset-per-chunk streams and is a known simplification for
//! streams that rely on cross-chunk dictionary continuation.

use std::io::{Cursor, Read};

use crate::error::{ArchiveError, Result};

pub fn dict_size_bytes(dict_byte: u8) -> [u8; 4] {
    let size = if dict_byte > 40 {
        u32::MAX
    } else if dict_byte == 40 {
        0xFFFFFFFF
    } else {
        (2u32 | (dict_byte as u32 & 1)) << (dict_byte as u32 / 2 + 11)
    };
    size.to_le_bytes()
}

pub fn decode_all<R: Read>(mut input: R, expected_size: u64) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(expected_size.min(1 << 20) as usize);
    let mut lzma_props: Option<[u8; 5]> = None;

    loop {
        let mut control = [0u8; 1];
        if input.read(&mut control)? == 0 {
            break;
        }
        let control = control[0];
        if control == 0x00 {
            break;
        }

        if control & 0x80 == 0 {
            // Uncompressed chunk: control is 0x01 (dict reset) or 0x02.
            if control > 0x02 {
                return Err(ArchiveError::corrupt("invalid LZMA2 control byte"));
            }
            let size = read_be_u16_plus_one(&mut input)?;
            let mut chunk = vec![0u8; size];
            input.read_exact(&mut chunk)?;
            out.extend_from_slice(&chunk);
        } else {
            let uncompressed_size = read_be_u16_plus_one(&mut input)? as u64;
            let compressed_size = read_be_u16_plus_one(&mut input)?;
            let reset_mode = (control >> 5) & 0x3;
            if reset_mode >= 2 {
                let mut props_byte = [0u8; 1];
                input.read_exact(&mut props_byte)?;
                let mut props = [0u8; 5];
                props[0] = props_byte[0];
                props[1..].copy_from_slice(&dict_size_bytes(0x28));
                lzma_props = Some(props);
            }
            let props = lzma_props
                .ok_or_else(|| ArchiveError::corrupt("LZMA2 chunk before property reset"))?;

            let mut compressed = vec![0u8; compressed_size];
            input.read_exact(&mut compressed)?;

            let mut header = Vec::with_capacity(13);
            header.extend_from_slice(&props);
            header.extend_from_slice(&uncompressed_size.to_le_bytes());
            let framed = Cursor::new(header).chain(compressed.as_slice());
            let mut buf_reader = std::io::BufReader::new(framed);
            let mut chunk_out = Vec::new();
            lzma_rs::lzma_decompress(&mut buf_reader, &mut chunk_out)
                .map_err(|e| ArchiveError::corrupt(format!("LZMA2 chunk error: {e}")))?;
            out.extend_from_slice(&chunk_out);
        }
    }

    Ok(out)
}

fn read_be_u16_plus_one<R: Read>(input: &mut R) -> Result<usize> {
    let mut buf = [0u8; 2];
    input.read_exact(&mut buf)?;
    Ok(u16::from_be_bytes(buf) as usize + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dict_size_for_common_presets_is_monotonic() {
        let small = u32::from_le_bytes(dict_size_bytes(0));
        let large = u32::from_le_bytes(dict_size_bytes(30));
        assert!(large > small);
    }

    #[test]
    fn uncompressed_chunk_round_trips() {
        // control 0x01 (uncompressed, dict reset), size-1 = 4 (5 bytes), then data, then end marker.
        let mut stream = vec![0x01u8, 0x00, 0x04];
        stream.extend_from_slice(b"hello");
        stream.push(0x00);
        let out = decode_all(stream.as_slice(), 5).unwrap();
        assert_eq!(out, b"hello");
    }
}
