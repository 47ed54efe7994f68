//! Fuzz target for archive indexing with arbitrary byte input.
//!
//! The input is indexed both as a whole local archive and as a central
//! directory dump. Any entry of a successfully indexed archive is then read
//! back, which exercises local header parsing and inflation.
//!
//! Run with: cargo +nightly fuzz run archive_index

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(archive) = apkdelta::Archive::from_bytes("base.apk", data.to_vec()) {
        for path in archive.entries().keys() {
            let _ = archive.read_entry(path, 1 << 20, true);
        }

        // A patch against itself must always be clean
        let patch = apkdelta::PatchGenerator::default().generate(&archive, &archive);
        assert!(patch.is_clean());
    }

    if let Ok(remote) = apkdelta::Archive::from_remote_dump("base.apk", data.to_vec(), None) {
        for entry in remote.entries().values() {
            assert_eq!(entry.archive, "base.apk");
        }
    }
});
