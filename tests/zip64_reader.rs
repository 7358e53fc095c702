use std::io::{Cursor, Read};

use archivy::io::MemoryOutput;
use archivy::options::{CompressionMethod, WriterOptions, Zip64Mode};
use archivy::zip::extra::header_id;
use archivy::zip::{OutputEngine, ZipEntry, ZipFile};
use archivy::ArchiveError;

// Crafts an archive with one entry large enough to need Zip64 promotion
// under `AsNeeded`, then confirms `ZipFile` reads it back correctly and
// that the Zip64 extra field actually landed in the central directory.

#[test]
fn as_needed_zip64_entry_round_trips() {
    let mut options = WriterOptions::default().with_zip64_mode(Zip64Mode::AsNeeded);
    options.compression_method = CompressionMethod::Stored;
    let mut engine = OutputEngine::new(MemoryOutput::new(), options);

    // The payload itself is small; only the declared sizes need to cross
    // the Zip64 threshold for this test to exercise the promotion path.
    let oversized = ZipEntry {
        uncompressed_size: 0x1_0000_0005,
        compressed_size: 4,
        crc32: crc32fast::hash(b"huge"),
        ..ZipEntry::new("huge.bin")
    };
    engine.add_raw_archive_entry(oversized, Cursor::new(b"huge".to_vec())).unwrap();

    let out = engine.finish().unwrap();
    let bytes = out.into_inner();

    let mut zip = ZipFile::new(Cursor::new(bytes)).unwrap();
    assert_eq!(zip.entries().len(), 1);
    let entry = zip.entries()[0].clone();
    assert!(entry.extras.iter().any(|e| e.header_id() == header_id::ZIP64));

    let mut body = Vec::new();
    zip.read_entry(&entry).unwrap().read_to_end(&mut body).unwrap();
    assert_eq!(body, b"huge");
}

#[test]
fn never_mode_rejects_the_same_entry() {
    let options = WriterOptions::default().with_zip64_mode(Zip64Mode::Never);
    let mut engine = OutputEngine::new(MemoryOutput::new(), options);
    let oversized = ZipEntry {
        uncompressed_size: 0x1_0000_0005,
        ..ZipEntry::new("huge.bin")
    };
    let err = engine.add_raw_archive_entry(oversized, Cursor::new(Vec::<u8>::new())).unwrap_err();
    assert!(matches!(err, ArchiveError::Zip64Required { .. }));
}
