use std::io::Cursor;

use archivy::io::MemoryOutput;
use archivy::options::{CompressionMethod, WriterOptions};
use archivy::zip::{ScatterGatherBuilder, ZipFile};

// Exercises the worker pool end to end: submit more entries than there are
// workers, merge through `write_to`, then read the result back with the
// plain sequential reader to make sure nothing the parallel path wrote is
// unreadable by it.

#[test]
fn scatter_gather_archive_is_readable_by_zip_file() {
    let mut options = WriterOptions::default().with_worker_count(3);
    options.compression_method = CompressionMethod::Deflate;
    let mut builder = ScatterGatherBuilder::new(options).unwrap();

    let expected: Vec<(String, Vec<u8>)> = (0..10)
        .map(|i| (format!("part-{i:02}.txt"), format!("payload for part {i}").repeat(32).into_bytes()))
        .collect();

    for (name, data) in &expected {
        builder.submit(name.clone(), data.clone()).unwrap();
    }

    let out = builder.write_to(MemoryOutput::new()).unwrap();
    let bytes = out.into_inner();

    let mut zip = ZipFile::new(Cursor::new(bytes)).unwrap();
    assert_eq!(zip.entries().len(), expected.len());

    for (name, data) in &expected {
        let entry = zip.find_entry(name).unwrap_or_else(|| panic!("missing entry {name}")).clone();
        let mut body = Vec::new();
        std::io::Read::read_to_end(&mut zip.read_entry(&entry).unwrap(), &mut body).unwrap();
        assert_eq!(&body, data);
    }
}
