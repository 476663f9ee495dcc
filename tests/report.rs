mod common;

use common::{two_group_builder, two_group_image};
use exhume_ext2::error::{Ext2Error, Stage};
use exhume_ext2::image::DiskImage;
use exhume_ext2::report::{self, BITMAP_CSV, GROUP_CSV, SUPERBLOCK_CSV};
use exhume_ext2::{DecodeOptions, Ext2Image};
use std::fs;
use std::io::Write;

#[test]
fn writes_the_three_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let image = Ext2Image::open(two_group_image(), DecodeOptions::default()).unwrap();
    report::write_all(&image, dir.path()).unwrap();

    let superblock = fs::read_to_string(dir.path().join(SUPERBLOCK_CSV)).unwrap();
    assert_eq!(superblock, "ef53,4096,16384,1024,1024,8192,2048,8192,1\n");

    let groups = fs::read_to_string(dir.path().join(GROUP_CSV)).unwrap();
    assert_eq!(groups, "8192,8191,2038,2,4,3,5\n8192,8175,2048,0,7,6,8\n");

    let bitmap = fs::read_to_string(dir.path().join(BITMAP_CSV)).unwrap();
    let lines: Vec<&str> = bitmap.lines().collect();
    assert_eq!(lines.len(), 8191 + 2039 + 8175 + 2048);
    assert_eq!(lines[0], "3,1");
    assert_eq!(lines[8190], "3,8191");
    assert_eq!(lines[8191], "4,0");
    assert_eq!(lines[8192], "4,11");
    assert_eq!(lines.last(), Some(&"7,4096"));
}

#[test]
fn damaged_image_leaves_no_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let mut raw = two_group_image();
    raw.truncate(6 * 1024 + 512);
    let image = Ext2Image::open(raw, DecodeOptions::default()).unwrap();

    let err = report::write_all(&image, dir.path()).unwrap_err();
    assert!(matches!(err, Ext2Error::TruncatedImage { .. }));
    for name in [SUPERBLOCK_CSV, GROUP_CSV, BITMAP_CSV] {
        assert!(!dir.path().join(name).exists(), "{} was written", name);
    }
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn one_scan_feeds_csv_and_json() {
    let dir = tempfile::tempdir().unwrap();
    let image = Ext2Image::open(two_group_image(), DecodeOptions::default()).unwrap();
    let mut free = Vec::new();
    report::write_all_with(&image, dir.path(), |r| free.push(*r)).unwrap();

    let bitmap = fs::read_to_string(dir.path().join(BITMAP_CSV)).unwrap();
    let lines: Vec<String> = free.iter().map(|r| r.to_csv_line()).collect();
    assert_eq!(bitmap.lines().collect::<Vec<_>>(), lines);
    assert_eq!(
        report::json_document(&image, &free),
        report::to_json(&image).unwrap()
    );
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 3);
}

#[test]
fn unwritable_output_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let image = Ext2Image::open(two_group_image(), DecodeOptions::default()).unwrap();
    let missing = dir.path().join("missing");
    let err = report::write_all(&image, &missing).unwrap_err();
    match err {
        Ext2Error::OutputWrite { path, .. } => assert_eq!(path, missing.join(SUPERBLOCK_CSV)),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn disk_image_at_partition_offset() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&vec![0u8; 0x10000]).unwrap();
    file.write_all(&two_group_image()).unwrap();
    file.flush().unwrap();

    let body = DiskImage::open(file.path(), 0x10000).unwrap();
    let image = Ext2Image::open(body, DecodeOptions::default()).unwrap();
    assert_eq!(image.superblock.s_inodes_count, 4096);
    assert_eq!(image.group_count(), 2);
    assert_eq!(image.free_resources().count(), 8191 + 2039 + 8175 + 2048);
}

#[test]
fn huge_descriptor_table_on_disk_is_truncation() {
    let mut builder = two_group_builder();
    builder.blocks_per_group = 1;
    builder.blocks_count = u32::MAX;
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&builder.build()).unwrap();
    file.flush().unwrap();

    let body = DiskImage::open(file.path(), 0).unwrap();
    let err = Ext2Image::open(body, DecodeOptions::default())
        .err()
        .unwrap();
    match err {
        Ext2Error::TruncatedImage {
            stage: Stage::GroupDescriptors,
            offset,
            needed,
            read,
        } => {
            assert_eq!(offset, 2048);
            assert_eq!(needed as u64, u32::MAX as u64 * 32);
            assert_eq!(read, 8 * 1024 - 2048);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn json_document_has_every_section() {
    let image = Ext2Image::open(two_group_image(), DecodeOptions::default()).unwrap();
    let doc = report::to_json(&image).unwrap();
    assert_eq!(doc["superblock"]["magic"], "0xef53");
    assert_eq!(doc["superblock"]["block_size"], 1024);
    assert_eq!(doc["superblock"]["mtime"], "2023-11-14T22:13:20+00:00");
    assert_eq!(doc["groups"].as_array().unwrap().len(), 2);
    assert_eq!(doc["groups"][1]["inode_table"], 8);
    assert_eq!(doc["free"][0]["kind"], "block");
    assert_eq!(doc["free"][0]["index"], 1);
}
