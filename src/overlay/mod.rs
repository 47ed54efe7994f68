//! Overlay identities: a fingerprint of a base install plus the files
//! overlaid on top of it.
//!
//! An identity starts as a base install (one checksum per archive) and is
//! derived into successive overlay states by adding or removing delta
//! files. Its fingerprint is the SHA-256 of a textual representation in
//! which both maps are sorted, so two identities describing the same state
//! compare equal no matter in which order their deltas were added.
//!
//! # Example
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use apkdelta::overlay::OverlayIdentity;
//!
//! let base = OverlayIdentity::from_checksums(BTreeMap::from([
//!     ("base.apk".to_string(), "abcd".to_string()),
//! ]));
//! let a = base.builder().add("base.apk/classes1.dex", 1).add("base.apk/res/a.xml", 2).build();
//! let b = base.builder().add("base.apk/res/a.xml", 2).add("base.apk/classes1.dex", 1).build();
//! assert_eq!(a.fingerprint(), b.fingerprint());
//! assert_eq!(a.builder().remove("base.apk/classes1.dex").remove("base.apk/res/a.xml").build(), base);
//! ```

mod diff;

use std::collections::BTreeMap;
use std::fmt::{self, Write};
use std::sync::Arc;

pub use diff::{OverlayDiff, OverlayDiffer};

use crate::archive::{Archive, find_by_name};
use crate::checksum::sha256_hex;

const HEADER: &str = "Overlay identity\n";

/// A content fingerprint of a base install and its overlay deltas.
///
/// Identities are immutable; use [`builder`](Self::builder) to derive a
/// new one. Equality compares fingerprints only.
#[derive(Clone)]
pub struct OverlayIdentity {
    base: BTreeMap<String, String>,
    deltas: BTreeMap<String, u64>,
    base_archives: Arc<[Archive]>,
    representation: String,
    fingerprint: String,
}

impl OverlayIdentity {
    /// The identity of a fresh install of `archives`.
    ///
    /// The archives are kept, detached from their bytes, so that later
    /// overlay diffs can compare against the base install.
    pub fn base_install(archives: &[Archive]) -> Self {
        let base = archives
            .iter()
            .map(|a| (a.name().to_string(), a.checksum().to_string()))
            .collect();
        let base_archives = archives.iter().map(Archive::detached).collect();
        Self::assemble(base, BTreeMap::new(), base_archives)
    }

    /// The identity of a base install known only by archive checksums.
    ///
    /// Such an identity fingerprints like any other but cannot be diffed
    /// against, since the base entries are unknown.
    pub fn from_checksums(base: BTreeMap<String, String>) -> Self {
        Self::assemble(base, BTreeMap::new(), Arc::from(Vec::new()))
    }

    fn assemble(
        base: BTreeMap<String, String>,
        deltas: BTreeMap<String, u64>,
        base_archives: Arc<[Archive]>,
    ) -> Self {
        let representation = render(&base, &deltas);
        let fingerprint = sha256_hex(representation.as_bytes());
        Self {
            base,
            deltas,
            base_archives,
            representation,
            fingerprint,
        }
    }

    /// Starts deriving a child identity with the same base and deltas.
    pub fn builder(&self) -> OverlayBuilder {
        OverlayBuilder {
            base: self.base.clone(),
            deltas: self.deltas.clone(),
            base_archives: Arc::clone(&self.base_archives),
        }
    }

    /// Returns the lowercase hex SHA-256 fingerprint.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Returns the text the fingerprint is computed over.
    pub fn representation(&self) -> &str {
        &self.representation
    }

    /// Returns `archive name -> archive checksum` of the base install.
    pub fn base(&self) -> &BTreeMap<String, String> {
        &self.base
    }

    /// Returns `qualified path -> checksum` of the overlaid files.
    pub fn deltas(&self) -> &BTreeMap<String, u64> {
        &self.deltas
    }

    /// Returns `true` if nothing is overlaid.
    pub fn is_base_install(&self) -> bool {
        self.deltas.is_empty()
    }

    /// Returns `true` if `qualified_path` is overlaid.
    pub fn contains(&self, qualified_path: &str) -> bool {
        self.deltas.contains_key(qualified_path)
    }

    /// Returns the base install archives, detached. Empty for identities
    /// built with [`from_checksums`](Self::from_checksums).
    pub fn base_archives(&self) -> &[Archive] {
        &self.base_archives
    }

    /// Returns the checksum the device currently has for a file: the
    /// overlaid one if any, otherwise the base install entry's CRC-32.
    pub fn recorded_checksum(&self, archive: &str, path: &str) -> Option<u64> {
        if let Some(&checksum) = self.deltas.get(&format!("{archive}/{path}")) {
            return Some(checksum);
        }
        find_by_name(&self.base_archives, archive)
            .and_then(|a| a.entry(path))
            .map(|e| u64::from(e.crc32))
    }
}

impl PartialEq for OverlayIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint
    }
}

impl Eq for OverlayIdentity {}

impl fmt::Debug for OverlayIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverlayIdentity")
            .field("fingerprint", &self.fingerprint)
            .field("base", &self.base)
            .field("deltas", &self.deltas.len())
            .finish()
    }
}

impl fmt::Display for OverlayIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fingerprint)
    }
}

fn render(base: &BTreeMap<String, String>, deltas: &BTreeMap<String, u64>) -> String {
    let mut out = String::from(HEADER);
    for (name, checksum) in base {
        let _ = writeln!(out, "Real APK {name} has checksum of {checksum}");
    }
    for (path, checksum) in deltas {
        let _ = writeln!(out, " Has overlayfile {path} with checksum {checksum}");
    }
    out
}

/// Derives an [`OverlayIdentity`] from a parent.
#[derive(Debug, Clone)]
pub struct OverlayBuilder {
    base: BTreeMap<String, String>,
    deltas: BTreeMap<String, u64>,
    base_archives: Arc<[Archive]>,
}

impl OverlayBuilder {
    /// Adds or overwrites an overlaid file.
    pub fn add(mut self, qualified_path: impl Into<String>, checksum: u64) -> Self {
        self.deltas.insert(qualified_path.into(), checksum);
        self
    }

    /// Removes an overlaid file. Removing an absent path is a no-op.
    pub fn remove(mut self, qualified_path: &str) -> Self {
        self.deltas.remove(qualified_path);
        self
    }

    /// Builds the identity.
    pub fn build(self) -> OverlayIdentity {
        OverlayIdentity::assemble(self.base, self.deltas, self.base_archives)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> OverlayIdentity {
        OverlayIdentity::from_checksums(BTreeMap::from([
            ("split.apk".to_string(), "ef01".to_string()),
            ("base.apk".to_string(), "abcd".to_string()),
        ]))
    }

    #[test]
    fn test_representation() {
        let identity = base()
            .builder()
            .add("base.apk/res/b.xml", 4_000_000_000)
            .add("base.apk/classes1.dex", 1)
            .build();
        assert_eq!(
            identity.representation(),
            "Overlay identity\n\
             Real APK base.apk has checksum of abcd\n\
             Real APK split.apk has checksum of ef01\n \
             Has overlayfile base.apk/classes1.dex with checksum 1\n \
             Has overlayfile base.apk/res/b.xml with checksum 4000000000\n"
        );
        assert_eq!(identity.fingerprint().len(), 64);
        assert_eq!(
            identity.fingerprint(),
            sha256_hex(identity.representation().as_bytes())
        );
    }

    #[test]
    fn test_add_remove_restores_parent() {
        let parent = base();
        let child = parent.builder().add("base.apk/a", 7).build();
        assert_ne!(child, parent);
        assert!(!child.is_base_install());
        assert!(child.contains("base.apk/a"));
        let back = child.builder().remove("base.apk/a").build();
        assert_eq!(back, parent);
        assert_eq!(back.representation(), parent.representation());
    }

    #[test]
    fn test_overwrite_delta() {
        let a = base().builder().add("base.apk/a", 1).add("base.apk/a", 2).build();
        let b = base().builder().add("base.apk/a", 2).build();
        assert_eq!(a, b);
        assert_eq!(a.deltas().len(), 1);
    }

    #[test]
    fn test_recorded_checksum_without_archives() {
        let identity = base().builder().add("base.apk/a", 9).build();
        assert_eq!(identity.recorded_checksum("base.apk", "a"), Some(9));
        assert_eq!(identity.recorded_checksum("base.apk", "b"), None);
        assert!(identity.base_archives().is_empty());
    }
}
