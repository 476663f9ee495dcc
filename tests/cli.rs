mod common;

use common::{two_group_builder, two_group_image};
use std::ffi::OsStr;
use std::io::Write;
use std::process::{Command, Output};

fn exhume(args: &[&OsStr]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_exhume_ext2"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

#[test]
fn check_reports_before_a_failing_write() {
    let mut builder = two_group_builder();
    builder.descriptors[1].bg_free_blocks_count = 9;
    let mut image = tempfile::NamedTempFile::new().unwrap();
    image.write_all(&builder.build()).unwrap();
    image.flush().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing");

    let out = exhume(&[
        image.path().as_os_str(),
        OsStr::new("-c"),
        OsStr::new("-d"),
        missing.as_os_str(),
    ]);
    let stdout = String::from_utf8_lossy(&out.stdout);
    let stderr = String::from_utf8_lossy(&out.stderr);

    assert_eq!(out.status.code(), Some(1));
    assert!(
        stdout.contains("1 of 2 groups have free counts matching their bitmaps"),
        "{}",
        stdout
    );
    assert!(
        stderr.contains("Group 1: descriptor says 9 free blocks, bitmap has 8175"),
        "{}",
        stderr
    );
    assert!(stderr.contains("does not exist"), "{}", stderr);
}

#[test]
fn writes_artifacts_and_json_from_one_run() {
    let mut image = tempfile::NamedTempFile::new().unwrap();
    image.write_all(&two_group_image()).unwrap();
    image.flush().unwrap();
    let dir = tempfile::tempdir().unwrap();

    let out = exhume(&[
        image.path().as_os_str(),
        OsStr::new("-j"),
        OsStr::new("-d"),
        dir.path().as_os_str(),
    ]);
    assert_eq!(out.status.code(), Some(0));

    let doc: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(
        doc["free"].as_array().unwrap().len(),
        8191 + 2039 + 8175 + 2048
    );
    let bitmap = std::fs::read_to_string(dir.path().join("bitmap.csv")).unwrap();
    assert_eq!(bitmap.lines().count(), 8191 + 2039 + 8175 + 2048);
}

#[test]
fn missing_image_argument_exits_one() {
    let out = exhume(&[]);
    assert_eq!(out.status.code(), Some(1));
}
