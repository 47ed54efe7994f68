//! File-level differences between archive snapshots.
//!
//! Two entries are considered equal when their CRC-32 values are equal;
//! nothing else is compared. The differ is a pure function and the result
//! is ordered by archive name and then entry path.
//!
//! # Example
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use apkdelta::diff::{DiffStatus, diff_checksum_maps};
//!
//! let old = BTreeMap::from([("A".to_string(), 0x01)]);
//! let new = BTreeMap::from([("A".to_string(), 0x01), ("B".to_string(), 0x02)]);
//! let diffs = diff_checksum_maps("base.apk", &old, &new);
//! assert_eq!(diffs.len(), 1);
//! assert_eq!(diffs[0].status, DiffStatus::Created);
//! assert_eq!(diffs[0].path(), "B");
//! ```

use std::collections::BTreeMap;
use std::fmt;

use crate::archive::{Archive, Entry};
use crate::{Error, Result};

/// How an entry changed between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DiffStatus {
    /// Present only in the new snapshot.
    Created,
    /// Present in both with different CRCs.
    Modified,
    /// Present only in the old snapshot.
    Deleted,
}

/// What kind of file an entry is, as far as redeployment is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChangeKind {
    /// A code container (`*.dex`).
    Dex,
    /// A native library (`lib/<abi>/*.so`).
    NativeLibrary,
    /// Anything else packaged with the application.
    Resource,
    /// The application manifest.
    Manifest,
}

impl ChangeKind {
    /// Classifies an archive-relative path.
    pub fn of(path: &str) -> Self {
        if path == "AndroidManifest.xml" {
            ChangeKind::Manifest
        } else if path.ends_with(".dex") {
            ChangeKind::Dex
        } else if path.starts_with("lib/") && path.ends_with(".so") {
            ChangeKind::NativeLibrary
        } else {
            ChangeKind::Resource
        }
    }

    /// Returns a lowercase human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            ChangeKind::Dex => "dex",
            ChangeKind::NativeLibrary => "native library",
            ChangeKind::Resource => "resource",
            ChangeKind::Manifest => "manifest",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A set of [`ChangeKind`]s, used as an overlay allow-set.
///
/// The default allows code and resource changes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChangeKinds(u8);

impl ChangeKinds {
    const fn bit(kind: ChangeKind) -> u8 {
        match kind {
            ChangeKind::Dex => 1,
            ChangeKind::NativeLibrary => 1 << 1,
            ChangeKind::Resource => 1 << 2,
            ChangeKind::Manifest => 1 << 3,
        }
    }

    /// Allows nothing.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Allows every kind.
    pub const fn all() -> Self {
        Self(0b1111)
    }

    /// Returns this set with `kind` added.
    pub const fn with(self, kind: ChangeKind) -> Self {
        Self(self.0 | Self::bit(kind))
    }

    /// Returns this set with `kind` removed.
    pub const fn without(self, kind: ChangeKind) -> Self {
        Self(self.0 & !Self::bit(kind))
    }

    /// Returns `true` if `kind` is in the set.
    pub const fn contains(&self, kind: ChangeKind) -> bool {
        self.0 & Self::bit(kind) != 0
    }

    /// Returns `true` if nothing is allowed.
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl Default for ChangeKinds {
    fn default() -> Self {
        Self::empty()
            .with(ChangeKind::Dex)
            .with(ChangeKind::Resource)
    }
}

impl FromIterator<ChangeKind> for ChangeKinds {
    fn from_iter<I: IntoIterator<Item = ChangeKind>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

impl fmt::Debug for ChangeKinds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds = [
            ChangeKind::Dex,
            ChangeKind::NativeLibrary,
            ChangeKind::Resource,
            ChangeKind::Manifest,
        ];
        f.debug_set()
            .entries(kinds.iter().filter(|k| self.contains(**k)))
            .finish()
    }
}

/// One changed entry.
///
/// Exactly one of `old`/`new` is `None` for [`DiffStatus::Created`] and
/// [`DiffStatus::Deleted`]; both are present, with differing CRCs, for
/// [`DiffStatus::Modified`]. The path accessors panic on a diff built by
/// hand with neither side set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileDiff {
    /// The entry in the old snapshot.
    pub old: Option<Entry>,
    /// The entry in the new snapshot.
    pub new: Option<Entry>,
    /// How the entry changed.
    pub status: DiffStatus,
}

impl FileDiff {
    /// A diff for an entry that only exists in the new snapshot.
    pub fn created(new: Entry) -> Self {
        Self {
            old: None,
            new: Some(new),
            status: DiffStatus::Created,
        }
    }

    /// A diff for an entry whose CRC changed.
    pub fn modified(old: Entry, new: Entry) -> Self {
        Self {
            old: Some(old),
            new: Some(new),
            status: DiffStatus::Modified,
        }
    }

    /// A diff for an entry that only exists in the old snapshot.
    pub fn deleted(old: Entry) -> Self {
        Self {
            old: Some(old),
            new: None,
            status: DiffStatus::Deleted,
        }
    }

    fn any_side(&self) -> &Entry {
        match (&self.new, &self.old) {
            (Some(entry), _) | (None, Some(entry)) => entry,
            (None, None) => unreachable!("a FileDiff always has at least one side"),
        }
    }

    /// Returns the entry path.
    pub fn path(&self) -> &str {
        &self.any_side().path
    }

    /// Returns the name of the archive the entry belongs to.
    pub fn archive(&self) -> &str {
        &self.any_side().archive
    }

    /// Returns `<archive>/<path>`.
    pub fn qualified_path(&self) -> String {
        self.any_side().qualified_path()
    }

    /// Classifies the changed entry by its path.
    pub fn kind(&self) -> ChangeKind {
        ChangeKind::of(self.path())
    }
}

/// Diffs two entry maps of the same archive.
pub fn diff_entries(
    old: &BTreeMap<String, Entry>,
    new: &BTreeMap<String, Entry>,
) -> Vec<FileDiff> {
    let mut diffs = Vec::new();

    for (path, new_entry) in new {
        match old.get(path) {
            None => diffs.push(FileDiff::created(new_entry.clone())),
            Some(old_entry) if old_entry.crc32 != new_entry.crc32 => {
                diffs.push(FileDiff::modified(old_entry.clone(), new_entry.clone()));
            }
            Some(_) => {}
        }
    }
    for (path, old_entry) in old {
        if !new.contains_key(path) {
            diffs.push(FileDiff::deleted(old_entry.clone()));
        }
    }

    diffs.sort_by(|a, b| a.path().cmp(b.path()));
    diffs
}

/// Diffs two `path -> crc32` maps belonging to the archive `archive`.
pub fn diff_checksum_maps(
    archive: &str,
    old: &BTreeMap<String, u32>,
    new: &BTreeMap<String, u32>,
) -> Vec<FileDiff> {
    let to_entries = |map: &BTreeMap<String, u32>| -> BTreeMap<String, Entry> {
        map.iter()
            .map(|(path, crc)| (path.clone(), Entry::new(archive, path.clone(), *crc)))
            .collect()
    };
    diff_entries(&to_entries(old), &to_entries(new))
}

/// Diffs two snapshots of the same archive.
///
/// # Errors
///
/// Returns [`Error::PreconditionViolation`] if the archive names differ.
pub fn diff_archives(old: &Archive, new: &Archive) -> Result<Vec<FileDiff>> {
    if old.name() != new.name() {
        return Err(Error::PreconditionViolation(format!(
            "cannot diff archive {} against {}",
            old.name(),
            new.name()
        )));
    }
    Ok(diff_entries(old.entries(), new.entries()))
}

/// Diffs two archive sets, pairing archives by name.
///
/// # Errors
///
/// Returns [`Error::PreconditionViolation`] if the sets have different
/// sizes or different archive names.
pub fn diff_sets(old: &[Archive], new: &[Archive]) -> Result<Vec<FileDiff>> {
    let pairs = pair_by_name(old, new)?;
    let mut diffs = Vec::new();
    for (old, new) in pairs {
        diffs.extend(diff_entries(old.entries(), new.entries()));
    }
    log::debug!(
        "diffed {} archive(s): {} changed entries",
        old.len(),
        diffs.len()
    );
    Ok(diffs)
}

/// Pairs two archive sets by name, sorted by name.
pub(crate) fn pair_by_name<'a>(
    old: &'a [Archive],
    new: &'a [Archive],
) -> Result<Vec<(&'a Archive, &'a Archive)>> {
    if old.len() != new.len() {
        return Err(Error::PreconditionViolation(format!(
            "archive count mismatch: {} installed, {} new",
            old.len(),
            new.len()
        )));
    }

    let mut old_sorted: Vec<&Archive> = old.iter().collect();
    let mut new_sorted: Vec<&Archive> = new.iter().collect();
    old_sorted.sort_by(|a, b| a.name().cmp(b.name()));
    new_sorted.sort_by(|a, b| a.name().cmp(b.name()));

    old_sorted
        .into_iter()
        .zip(new_sorted)
        .map(|(o, n)| {
            if o.name() == n.name() {
                Ok((o, n))
            } else {
                Err(Error::PreconditionViolation(format!(
                    "archive name mismatch: {} installed, {} new",
                    o.name(),
                    n.name()
                )))
            }
        })
        .collect()
}
