//! Fuzz target for dex container splitting with arbitrary byte input.
//!
//! Run with: cargo +nightly fuzz run dex_split
//!
//! Properties checked on success:
//! - one unit per class definition
//! - units keep their bytes exactly when the predicate selects them

#![no_main]

use apkdelta::dex::{DexFile, KeepBytes, split_dex};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let keep: KeepBytes<'_> = &|_name: &str, checksum: u64| checksum % 2 == 0;
    if let Ok(units) = split_dex("classes.dex", data, Some(keep)) {
        let dex = DexFile::parse(data).expect("split succeeded, so the header parses");
        assert_eq!(units.len(), dex.class_count());
        for unit in &units {
            assert_eq!(unit.bytes.is_some(), unit.checksum % 2 == 0);
        }
    }
});
