//! Archive diffing tests.
//!
//! Covers the created/deleted/modified scenarios on checksum maps and on
//! real archives, pairing of archive sets by name, and the precondition
//! errors raised for mismatched sets.

mod common;

use std::collections::BTreeMap;

use apkdelta::{
    Archive, ChangeKind, DiffStatus, Error, Fallback, diff_archives, diff_checksum_maps, diff_sets,
};
use common::ZipBuilder;

fn checksums(pairs: &[(&str, u32)]) -> BTreeMap<String, u32> {
    pairs.iter().map(|(p, c)| (p.to_string(), *c)).collect()
}

fn archive(name: &str, files: &[(&str, &[u8])]) -> Archive {
    let mut builder = ZipBuilder::new();
    for (path, data) in files {
        builder = builder.stored(path, data);
    }
    builder.build_layout().local(name)
}

#[test]
fn test_added_entry_is_created() {
    let diffs = diff_checksum_maps(
        "base.apk",
        &checksums(&[("A", 0x01)]),
        &checksums(&[("A", 0x01), ("B", 0x02)]),
    );
    assert_eq!(diffs.len(), 1);
    assert_eq!(diffs[0].status, DiffStatus::Created);
    assert_eq!(diffs[0].path(), "B");
    assert!(diffs[0].old.is_none());
    assert_eq!(diffs[0].new.as_ref().unwrap().crc32, 0x02);
}

#[test]
fn test_removed_entry_is_deleted() {
    let diffs = diff_checksum_maps(
        "base.apk",
        &checksums(&[("A", 0x01), ("B", 0x02)]),
        &checksums(&[("A", 0x01)]),
    );
    assert_eq!(diffs.len(), 1);
    assert_eq!(diffs[0].status, DiffStatus::Deleted);
    assert_eq!(diffs[0].path(), "B");
    assert!(diffs[0].new.is_none());
}

#[test]
fn test_changed_crc_is_modified() {
    let diffs = diff_checksum_maps(
        "base.apk",
        &checksums(&[("A", 0x01)]),
        &checksums(&[("A", 0x02)]),
    );
    assert_eq!(diffs.len(), 1);
    assert_eq!(diffs[0].status, DiffStatus::Modified);
    assert_eq!(diffs[0].old.as_ref().unwrap().crc32, 0x01);
    assert_eq!(diffs[0].new.as_ref().unwrap().crc32, 0x02);
    assert_eq!(diffs[0].qualified_path(), "base.apk/A");
}

#[test]
fn test_diff_archive_with_itself_is_empty() {
    let a = archive(
        "base.apk",
        &[("AndroidManifest.xml", b"<manifest/>"), ("classes.dex", b"dex")],
    );
    assert!(diff_archives(&a, &a).unwrap().is_empty());
    assert!(diff_sets(std::slice::from_ref(&a), std::slice::from_ref(&a))
        .unwrap()
        .is_empty());
}

#[test]
fn test_diff_real_archives() {
    let old = archive(
        "base.apk",
        &[
            ("AndroidManifest.xml", b"<manifest/>"),
            ("classes.dex", b"v1"),
            ("res/old.xml", b"old"),
        ],
    );
    let new = archive(
        "base.apk",
        &[
            ("AndroidManifest.xml", b"<manifest/>"),
            ("classes.dex", b"v2"),
            ("lib/x86_64/libapp.so", b"elf"),
        ],
    );

    let diffs = diff_archives(&old, &new).unwrap();
    let summary: Vec<(&str, DiffStatus, ChangeKind)> = diffs
        .iter()
        .map(|d| (d.path(), d.status, d.kind()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("classes.dex", DiffStatus::Modified, ChangeKind::Dex),
            ("lib/x86_64/libapp.so", DiffStatus::Created, ChangeKind::NativeLibrary),
            ("res/old.xml", DiffStatus::Deleted, ChangeKind::Resource),
        ]
    );
}

#[test]
fn test_diff_archives_rejects_name_mismatch() {
    let a = archive("base.apk", &[("a", b"a")]);
    let b = archive("split.apk", &[("a", b"a")]);
    let err = diff_archives(&a, &b).unwrap_err();
    assert!(matches!(err, Error::PreconditionViolation(_)));
    assert_eq!(err.fallback(), Fallback::Abort);
}

#[test]
fn test_diff_sets_pairs_by_name() {
    let old = vec![
        archive("split_b.apk", &[("b", b"1")]),
        archive("base.apk", &[("a", b"1")]),
    ];
    let new = vec![
        archive("base.apk", &[("a", b"2")]),
        archive("split_b.apk", &[("b", b"1")]),
    ];

    let diffs = diff_sets(&old, &new).unwrap();
    assert_eq!(diffs.len(), 1);
    assert_eq!(diffs[0].archive(), "base.apk");
    assert_eq!(diffs[0].status, DiffStatus::Modified);
}

#[test]
fn test_diff_sets_rejects_count_mismatch() {
    let old = vec![archive("base.apk", &[("a", b"1")])];
    let new = vec![
        archive("base.apk", &[("a", b"1")]),
        archive("split.apk", &[("a", b"1")]),
    ];
    assert!(matches!(
        diff_sets(&old, &new),
        Err(Error::PreconditionViolation(_))
    ));
}

#[test]
fn test_diff_sets_rejects_name_mismatch() {
    let old = vec![archive("base.apk", &[("a", b"1")])];
    let new = vec![archive("other.apk", &[("a", b"1")])];
    assert!(matches!(
        diff_sets(&old, &new),
        Err(Error::PreconditionViolation(_))
    ));
}

#[test]
fn test_remote_dump_diffs_against_local_build() {
    let installed = ZipBuilder::new()
        .stored("AndroidManifest.xml", b"<manifest/>")
        .stored("res/a.xml", b"a")
        .signing_block(b"signed v1")
        .build_layout()
        .remote("base.apk");
    let built = archive(
        "base.apk",
        &[("AndroidManifest.xml", b"<manifest/>"), ("res/a.xml", b"b")],
    );

    let diffs = diff_sets(&[installed], &[built]).unwrap();
    assert_eq!(diffs.len(), 1);
    assert_eq!(diffs[0].qualified_path(), "base.apk/res/a.xml");
}

#[test]
fn test_diff_order_is_stable() {
    let old = checksums(&[("z", 1), ("a", 1), ("m", 1)]);
    let new = checksums(&[("z", 2), ("b", 1), ("m", 2)]);
    let paths: Vec<String> = diff_checksum_maps("base.apk", &old, &new)
        .iter()
        .map(|d| d.path().to_string())
        .collect();
    assert_eq!(paths, ["a", "b", "m", "z"]);
}
