use super::OverlayIdentity;
use crate::archive::{Archive, Entry};
use crate::diff::{ChangeKinds, DiffStatus, diff_sets};
use crate::options::DeltaOptions;
use crate::{Error, Result};

/// Files to push to, and remove from, a device overlay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverlayDiff {
    /// Entries whose content the device does not have yet.
    pub files_to_add: Vec<Entry>,
    /// Qualified paths of overlaid files no longer in the new build.
    pub files_to_remove: Vec<String>,
}

impl OverlayDiff {
    /// Returns `true` if the overlay is already up to date.
    pub fn is_empty(&self) -> bool {
        self.files_to_add.is_empty() && self.files_to_remove.is_empty()
    }

    /// Derives the identity the device will have once this diff is applied.
    ///
    /// Call this to build the proposal; commit it only after the device
    /// confirms the update.
    pub fn apply_to(&self, identity: &OverlayIdentity) -> OverlayIdentity {
        let mut builder = identity.builder();
        for path in &self.files_to_remove {
            builder = builder.remove(path);
        }
        for entry in &self.files_to_add {
            builder = builder.add(entry.qualified_path(), u64::from(entry.crc32));
        }
        builder.build()
    }
}

/// Computes overlay updates against an [`OverlayIdentity`].
#[derive(Debug, Clone, Copy, Default)]
pub struct OverlayDiffer {
    allowed: ChangeKinds,
}

impl OverlayDiffer {
    /// Creates a differ accepting the given change kinds.
    pub fn new(allowed: ChangeKinds) -> Self {
        Self { allowed }
    }

    /// Creates a differ from options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `options` fail
    /// [`DeltaOptions::validate`].
    pub fn from_options(options: &DeltaOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self::new(options.allowed_changes))
    }

    /// Returns the allow-set.
    pub fn allowed(&self) -> ChangeKinds {
        self.allowed
    }

    /// Diffs the new build against what the device has.
    ///
    /// Every change relative to the base install is classified first: a
    /// deleted base file, or a change whose kind is not allowed, rejects
    /// the whole update. Files to add are then the new entries whose
    /// checksum differs from the one recorded by `identity` (the overlaid
    /// checksum, or the base install's). Files to remove are overlaid paths
    /// that no longer exist in the new build.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedDelete`] for a deleted base install file
    /// - [`Error::UnsupportedChangeType`] for a disallowed change
    /// - [`Error::PreconditionViolation`] if `identity` carries no base
    ///   archives or they do not match `new` by name
    pub fn diff(&self, new: &[Archive], identity: &OverlayIdentity) -> Result<OverlayDiff> {
        let base = identity.base_archives();
        if base.is_empty() && !identity.base().is_empty() {
            return Err(Error::PreconditionViolation(
                "overlay identity does not carry its base install archives".into(),
            ));
        }

        for diff in diff_sets(base, new)? {
            if diff.status == DiffStatus::Deleted {
                return Err(Error::UnsupportedDelete {
                    path: diff.qualified_path(),
                });
            }
            let kind = diff.kind();
            if !self.allowed.contains(kind) {
                return Err(Error::UnsupportedChangeType {
                    kind,
                    path: diff.qualified_path(),
                });
            }
        }

        let mut files_to_add = Vec::new();
        for archive in new {
            for entry in archive.entries().values() {
                let recorded = identity.recorded_checksum(archive.name(), &entry.path);
                if recorded != Some(u64::from(entry.crc32)) {
                    files_to_add.push(entry.clone());
                }
            }
        }

        let files_to_remove: Vec<String> = identity
            .deltas()
            .keys()
            .filter(|path| !contains_qualified(new, path))
            .cloned()
            .collect();

        log::debug!(
            "overlay diff against {}: {} to add, {} to remove",
            identity.fingerprint(),
            files_to_add.len(),
            files_to_remove.len()
        );
        Ok(OverlayDiff {
            files_to_add,
            files_to_remove,
        })
    }
}

fn contains_qualified(archives: &[Archive], qualified_path: &str) -> bool {
    archives.iter().any(|archive| {
        qualified_path
            .strip_prefix(archive.name())
            .and_then(|rest| rest.strip_prefix('/'))
            .is_some_and(|path| archive.entry(path).is_some())
    })
}
