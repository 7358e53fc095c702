use std::io::{Cursor, Read};

use archivy::tar::TarReader;

const BLOCK_SIZE: usize = 512;

fn write_octal(field: &mut [u8], value: u64, digits: usize) {
    let s = format!("{value:0width$o}", width = digits);
    field[..digits].copy_from_slice(s.as_bytes());
    field[digits] = 0;
}

fn ustar_header(name: &str, size: u64, type_flag: u8) -> Vec<u8> {
    let mut block = vec![0u8; BLOCK_SIZE];
    block[0..name.len()].copy_from_slice(name.as_bytes());
    write_octal(&mut block[100..108], 0o644, 7);
    write_octal(&mut block[108..116], 0, 7);
    write_octal(&mut block[116..124], 0, 7);
    write_octal(&mut block[124..136], size, 11);
    write_octal(&mut block[136..148], 0, 11);
    block[148..156].copy_from_slice(b"        ");
    block[156] = type_flag;
    block[257..263].copy_from_slice(b"ustar\0");
    block[263] = b'0';
    block[264] = b'0';
    let checksum: u32 = block.iter().map(|&b| b as u32).sum();
    write_octal(&mut block[148..154], checksum as u64, 6);
    block[154] = 0;
    block[155] = b' ';
    block
}

fn pad_block(buf: &mut Vec<u8>, data: &[u8]) {
    buf.extend_from_slice(data);
    let rem = data.len() % BLOCK_SIZE;
    if rem != 0 {
        buf.extend(std::iter::repeat(0u8).take(BLOCK_SIZE - rem));
    }
}

// A real-world-shaped archive: a PAX extended header overriding the
// following entry's path with one too long to fit the ustar `name`
// field, then a regular file whose body is read back in full.

#[test]
fn pax_path_overlay_and_trailing_regular_entry() {
    let long_path = "a/".repeat(60) + "deeply-nested-file.bin";
    let pax_record = format!("{} path={}\n", 6 + long_path.len() + 1, long_path);
    let pax_record = {
        // The record's own declared length must include its own digits;
        // recompute until the prefix length is self-consistent.
        let mut len = pax_record.len();
        loop {
            let candidate = format!("{len} path={long_path}\n");
            if candidate.len() == len {
                break candidate;
            }
            len = candidate.len();
        }
    };

    let mut archive = Vec::new();
    let mut pax_header = ustar_header("PaxHeaders/x", pax_record.len() as u64, b'x');
    pax_header[156] = b'x';
    archive.extend_from_slice(&pax_header);
    pad_block(&mut archive, pax_record.as_bytes());

    let body = b"binary payload".repeat(10);
    archive.extend_from_slice(&ustar_header("placeholder", body.len() as u64, b'0'));
    pad_block(&mut archive, &body);

    archive.extend(std::iter::repeat(0u8).take(BLOCK_SIZE * 2));

    let mut reader = TarReader::new(Cursor::new(archive));
    let entry = reader.next_entry().unwrap().unwrap();
    assert_eq!(entry.name, long_path);
    assert_eq!(entry.size, body.len() as u64);

    let mut got = Vec::new();
    reader.entry_body().read_to_end(&mut got).unwrap();
    assert_eq!(got, body);

    assert!(reader.next_entry().unwrap().is_none());
}
