use std::fs::File;
use std::process::Command;

use archivy::options::WriterOptions;
use archivy::zip::OutputEngine;
use tempfile::tempdir;

// Writes a ZIP using the library and calls `unzip -t` to verify
// compatibility with an independent implementation. Skipped if `unzip`
// isn't on the system.

#[test]
fn unzip_compatibility() {
    let check = Command::new("unzip").arg("-v").output();
    if check.is_err() {
        eprintln!("skipping test: `unzip` not found");
        return;
    }

    let dir = tempdir().unwrap();
    let zip_path = dir.path().join("compat.zip");

    let file = File::create(&zip_path).unwrap();
    let mut engine = OutputEngine::new(file, WriterOptions::default());
    engine.add_entry("hello.txt", b"hello from test").unwrap();
    let big = vec![0u8; 1024 * 1024];
    engine.add_entry("big.bin", &big).unwrap();
    engine.finish().unwrap();

    let output = Command::new("unzip").arg("-t").arg(&zip_path).output().expect("failed to run unzip");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(output.status.success(), "unzip reported failure: {stdout} {stderr}");
}
