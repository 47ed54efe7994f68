//! Patch generation from two indexed archives.

use super::areas::CleanAreaMap;
use super::{INSTRUCTION_SIZE, MAX_PATCH_SIZE, Patch, PatchInstruction, PatchStatus};
use crate::archive::{Archive, Entry};
use crate::diff::pair_by_name;
use crate::format::LOCAL_HEADER_SIZE;
use crate::format::local::{LocalHeader, read_local_header};
use crate::options::DeltaOptions;
use crate::Result;

/// Builds a [`Patch`] turning an installed archive into a local one.
#[derive(Debug, Clone, Copy)]
pub struct PatchGenerator {
    max_patch_size: u64,
}

impl Default for PatchGenerator {
    fn default() -> Self {
        Self::new(MAX_PATCH_SIZE)
    }
}

impl PatchGenerator {
    /// Creates a generator with the given budget.
    pub fn new(max_patch_size: u64) -> Self {
        Self { max_patch_size }
    }

    /// Creates a generator from options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `options` fail
    /// [`DeltaOptions::validate`].
    ///
    /// [`Error::InvalidConfig`]: crate::Error::InvalidConfig
    pub fn from_options(options: &DeltaOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self::new(options.max_patch_size))
    }

    /// Returns the budget.
    pub fn max_patch_size(&self) -> u64 {
        self.max_patch_size
    }

    /// Generates a patch from `remote` (the installed archive, usually a
    /// remote dump) to `local` (the new build, which must have local bytes).
    ///
    /// Archives with equal digests yield a clean patch. Otherwise every
    /// local entry whose central directory record matches the installed
    /// one (same CRC, method, offset, compressed size and extra field) is
    /// clean over its local header and data, provided its local header
    /// carries the same name and extra lengths as the record. The rest of
    /// the file, including the central directory, is sent.
    ///
    /// A remote dump has no local headers, so the installed archive is
    /// taken to satisfy the same rule its directory records describe.
    pub fn generate(&self, remote: &Archive, local: &Archive) -> Patch {
        self.generate_within(remote, local, self.max_patch_size)
    }

    pub(crate) fn generate_within(&self, remote: &Archive, local: &Archive, budget: u64) -> Patch {
        let source_path = remote.name();
        let Some(bytes) = local.bytes() else {
            log::warn!("cannot patch {}: no local bytes", local.name());
            return Patch::with_status(PatchStatus::Invalid, source_path, 0);
        };
        let destination_size = bytes.len() as u64;

        if remote.checksum() == local.checksum() {
            log::debug!("{} is unchanged (digest {})", local.name(), local.checksum());
            return Patch::clean(source_path, destination_size);
        }

        let Some(clean) = clean_areas(remote, local, bytes) else {
            return Patch::with_status(PatchStatus::Invalid, source_path, destination_size);
        };
        let dirty = match clean.dirty_ranges() {
            Ok(dirty) => dirty,
            Err(conflict) => {
                log::warn!("cannot patch {}: {conflict}", local.name());
                return Patch::with_status(PatchStatus::Invalid, source_path, destination_size);
            }
        };

        let mut instructions = Vec::with_capacity(dirty.len());
        let mut data = Vec::new();
        let mut size = 0u64;
        for range in dirty {
            size += INSTRUCTION_SIZE + range.len();
            if size > budget {
                log::warn!(
                    "patch for {} exceeds the {budget} byte budget, giving up",
                    local.name()
                );
                return Patch::with_status(
                    PatchStatus::SizeThresholdExceeded,
                    source_path,
                    destination_size,
                );
            }

            let (Ok(offset), Ok(length)) = (u32::try_from(range.start), u32::try_from(range.len()))
            else {
                log::warn!("dirty range {range} of {} does not fit in 32 bits", local.name());
                return Patch::with_status(PatchStatus::Invalid, source_path, destination_size);
            };
            // Ranges are bounded by `destination_size`, so the slice exists.
            data.extend_from_slice(&bytes[range.start as usize..range.end as usize]);
            instructions.push(PatchInstruction::new(offset, length));
        }

        log::debug!(
            "patch for {}: {} instructions, {} data bytes, {} clean bytes",
            local.name(),
            instructions.len(),
            data.len(),
            clean.clean_bytes()
        );
        Patch {
            status: PatchStatus::Ok,
            source_path: source_path.to_string(),
            destination_size,
            instructions,
            data,
        }
    }
}

/// Marks the clean areas of `local`. Returns `None` if a matching entry's
/// local header cannot be read.
fn clean_areas(remote: &Archive, local: &Archive, bytes: &[u8]) -> Option<CleanAreaMap> {
    let mut map = CleanAreaMap::new(bytes.len() as u64);
    for entry in local.entries().values() {
        let Some(installed) = remote.entry(&entry.path) else {
            continue;
        };
        if !installed.same_layout(entry) {
            continue;
        }
        let Some(header) = read_local_header(bytes, entry.local_header_offset) else {
            log::warn!(
                "no local header for {} at {:#x}",
                entry.qualified_path(),
                entry.local_header_offset
            );
            return None;
        };
        // Installed dumps carry directory records only, so the span is
        // clean only when the local header agrees with them.
        if !header_matches(&header, entry) {
            log::trace!("local header of {} differs from its record", entry.qualified_path());
            continue;
        }
        if let Some(installed_bytes) = remote.bytes() {
            let same = read_local_header(installed_bytes, installed.local_header_offset)
                .is_some_and(|h| header_matches(&h, installed));
            if !same {
                continue;
            }
        }
        map.mark_clean(entry.local_header_offset, clean_span_len(entry));
    }
    Some(map)
}

fn header_matches(header: &LocalHeader, entry: &Entry) -> bool {
    usize::from(header.name_len) == entry.path.len() && header.extra_len == entry.extra_len
}

/// `[lho, lho + 30 + name_len + extra_len + compressed_size)` from the
/// directory record.
fn clean_span_len(entry: &Entry) -> u64 {
    LOCAL_HEADER_SIZE as u64
        + entry.path.len() as u64
        + u64::from(entry.extra_len)
        + entry.compressed_size
}

/// Patches for every archive of an install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchSet {
    /// Overall outcome.
    pub status: PatchStatus,
    /// One patch per archive, sorted by archive name. Empty unless the
    /// status is [`PatchStatus::Ok`] or [`PatchStatus::NoChanges`].
    pub patches: Vec<Patch>,
}

impl PatchSet {
    fn failed(status: PatchStatus) -> Self {
        Self {
            status,
            patches: Vec::new(),
        }
    }

    /// Total size counted against the budget.
    pub fn size(&self) -> u64 {
        self.patches.iter().map(Patch::size).sum()
    }
}

/// Builds a [`PatchSet`] for a whole install, sharing one budget.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatchSetGenerator {
    generator: PatchGenerator,
}

impl PatchSetGenerator {
    /// Creates a set generator with the given budget.
    pub fn new(max_patch_size: u64) -> Self {
        Self {
            generator: PatchGenerator::new(max_patch_size),
        }
    }

    /// Creates a set generator from options, validating them first.
    pub fn from_options(options: &DeltaOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self::new(options.max_patch_size))
    }

    /// Generates one patch per archive pair.
    ///
    /// - [`PatchStatus::Invalid`] if the sets differ in size or names, or
    ///   if any single patch is invalid
    /// - [`PatchStatus::SizeThresholdExceeded`] once the patches together
    ///   exceed the budget
    /// - [`PatchStatus::NoChanges`] if every patch is clean
    pub fn generate(&self, remote: &[Archive], local: &[Archive]) -> PatchSet {
        let pairs = match pair_by_name(remote, local) {
            Ok(pairs) => pairs,
            Err(e) => {
                log::warn!("cannot patch archive set: {e}");
                return PatchSet::failed(PatchStatus::Invalid);
            }
        };

        let max = self.generator.max_patch_size();
        let mut used = 0u64;
        let mut patches = Vec::with_capacity(pairs.len());
        for (remote, local) in pairs {
            let patch = self.generator.generate_within(remote, local, max - used);
            match patch.status {
                PatchStatus::Ok => {}
                status => return PatchSet::failed(status),
            }
            used += patch.size();
            patches.push(patch);
        }

        let status = if patches.iter().all(Patch::is_clean) {
            PatchStatus::NoChanges
        } else {
            PatchStatus::Ok
        };
        PatchSet { status, patches }
    }
}
