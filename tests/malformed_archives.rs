//! Tests for malformed and corrupted input handling.
//!
//! These tests verify that truncated, mangled or hostile archives and dex
//! containers are reported as errors rather than causing panics.

mod common;

use apkdelta::dex::{DexFile, split_dex};
use apkdelta::{Archive, Error, Fallback, describe};
use common::{ClassSpec, RETURN_VOID, ZipBuilder, build_dex};
use rand::{Rng, SeedableRng};

fn sample() -> Vec<u8> {
    ZipBuilder::new()
        .stored("AndroidManifest.xml", b"<manifest/>")
        .deflated("classes.dex", &build_dex(&[ClassSpec::new("LMain;", RETURN_VOID)]))
        .signing_block(b"signature")
        .build()
}

fn eocd_offset(bytes: &[u8]) -> usize {
    bytes.len() - 22
}

#[test]
fn test_empty_input() {
    let err = Archive::from_bytes("base.apk", Vec::new()).unwrap_err();
    assert!(matches!(err, Error::MalformedArchive { .. }));
    assert!(err.is_corruption());
}

#[test]
fn test_no_eocd_signature() {
    let err = Archive::from_bytes("base.apk", vec![0x50u8; 512]).unwrap_err();
    assert!(matches!(err, Error::MalformedArchive { .. }));
    assert_eq!(err.fallback(), Fallback::FullReinstall);
    assert!(describe(&err).ends_with("A full reinstall is required."));
}

#[test]
fn test_cd_offset_points_at_garbage() {
    let mut bytes = sample();
    let at = eocd_offset(&bytes) + 16;
    bytes[at..at + 4].copy_from_slice(&1u32.to_le_bytes());
    let err = Archive::from_bytes("base.apk", bytes).unwrap_err();
    assert!(matches!(err, Error::MalformedArchive { .. }));
}

#[test]
fn test_cd_size_past_end() {
    let mut bytes = sample();
    let at = eocd_offset(&bytes) + 12;
    bytes[at..at + 4].copy_from_slice(&u32::MAX.to_le_bytes());
    let err = Archive::from_bytes("base.apk", bytes).unwrap_err();
    assert!(matches!(err, Error::MalformedArchive { .. }));
}

#[test]
fn test_truncated_archive() {
    let bytes = sample();
    for len in [0, 10, 21, 22, bytes.len() / 2, bytes.len() - 1] {
        let result = Archive::from_bytes("base.apk", bytes[..len].to_vec());
        assert!(result.is_err(), "truncated to {len} bytes should fail");
    }
}

#[test]
fn test_signing_block_size_mismatch_is_ignored() {
    let built = ZipBuilder::new()
        .stored("a.txt", b"a")
        .signing_block(b"payload")
        .build_layout();
    let mut bytes = built.bytes.clone();
    let start = built.signature.clone().unwrap().start;
    bytes[start] ^= 0x01;

    let archive = Archive::from_bytes("base.apk", bytes).unwrap();
    assert!(archive.map().signature.is_none());
    assert_eq!(
        archive.checksum(),
        apkdelta::checksum::sha1_hex(&built.bytes[built.cd.clone()])
    );
}

#[test]
fn test_truncated_central_directory_dump() {
    let built = ZipBuilder::new()
        .stored("a.txt", b"a")
        .stored("b.txt", b"b")
        .build_layout();
    let cd = &built.bytes[built.cd.clone()];

    // A record cut short is dropped; the complete one before it is kept.
    let archive = Archive::from_remote_dump("base.apk", cd[..cd.len() - 3].to_vec(), None).unwrap();
    assert_eq!(archive.len(), 1);
    assert!(archive.entry("a.txt").is_some());
}

#[test]
fn test_remote_dump_with_bad_signature() {
    let err = Archive::from_remote_dump("base.apk", b"PK\x03\x04 local header".to_vec(), None)
        .unwrap_err();
    assert!(matches!(err, Error::MalformedArchive { .. }));
}

#[test]
fn test_local_header_missing() {
    let built = ZipBuilder::new().stored("a.txt", b"hello").build_layout();
    let mut bytes = built.bytes.clone();
    bytes[0] = 0;
    let archive = Archive::from_bytes("base.apk", bytes).unwrap();
    let err = archive.read_entry("a.txt", 1024, true).unwrap_err();
    assert!(matches!(err, Error::MalformedArchive { .. }));
}

#[test]
fn test_dex_bad_magic() {
    let mut dex = build_dex(&[ClassSpec::new("LMain;", RETURN_VOID)]);
    dex[0] = b'x';
    let err = DexFile::parse(&dex).unwrap_err();
    assert!(matches!(err, Error::MalformedDex { .. }));
}

#[test]
fn test_dex_too_short() {
    let err = split_dex("classes.dex", b"dex\n035\0", None).unwrap_err();
    assert!(matches!(err, Error::MalformedDex { offset: 0, .. }));
}

#[test]
fn test_dex_class_data_out_of_range() {
    let mut dex = build_dex(&[ClassSpec::new("LMain;", RETURN_VOID)]);
    let class_defs = u32::from_le_bytes(dex[0x64..0x68].try_into().unwrap()) as usize;
    let len = dex.len() as u32;
    dex[class_defs + 24..class_defs + 28].copy_from_slice(&(len + 100).to_le_bytes());
    let err = split_dex("classes.dex", &dex, None).unwrap_err();
    assert!(matches!(err, Error::MalformedDex { .. }));
}

#[test]
fn test_dex_string_index_out_of_range() {
    let mut dex = build_dex(&[ClassSpec::new("LMain;", RETURN_VOID)]);
    let class_defs = u32::from_le_bytes(dex[0x64..0x68].try_into().unwrap()) as usize;
    dex[class_defs..class_defs + 4].copy_from_slice(&999u32.to_le_bytes());
    let err = split_dex("classes.dex", &dex, None).unwrap_err();
    assert!(matches!(err, Error::MalformedDex { .. }));
}

#[test]
fn test_random_mutations_never_panic() {
    let original = sample();
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);
    for _ in 0..500 {
        let mut bytes = original.clone();
        for _ in 0..rng.gen_range(1..8) {
            let at = rng.gen_range(0..bytes.len());
            bytes[at] = rng.r#gen();
        }
        if let Ok(archive) = Archive::from_bytes("base.apk", bytes) {
            for path in archive.entries().keys() {
                let _ = archive.read_entry(path, 1 << 20, true);
            }
        }
    }
}

#[test]
fn test_random_dex_mutations_never_panic() {
    let original = build_dex(&[
        ClassSpec::new("LMain;", RETURN_VOID).method("helper", RETURN_VOID),
        ClassSpec::new("LOther;", RETURN_VOID),
    ]);
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);
    for _ in 0..500 {
        let mut dex = original.clone();
        for _ in 0..rng.gen_range(1..6) {
            let at = rng.gen_range(0..dex.len());
            dex[at] = rng.r#gen();
        }
        let _ = split_dex("classes.dex", &dex, None);
    }
}

#[test]
fn test_random_garbage_never_panics() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    for _ in 0..200 {
        let len = rng.gen_range(0..512);
        let bytes: Vec<u8> = (0..len).map(|_| rng.r#gen()).collect();
        let _ = Archive::from_bytes("base.apk", bytes.clone());
        let _ = Archive::from_remote_dump("base.apk", bytes.clone(), None);
        let _ = split_dex("classes.dex", &bytes, None);
    }
}
