//! Finding the classes that changed between two archive sets.

use std::collections::HashMap;

use super::{CodeUnit, KeepBytes, Splitter};
use crate::archive::{Archive, find_by_name};
use crate::diff::{ChangeKind, FileDiff};
use crate::{Error, Result};

/// Refines file-level diffs of code containers into changed code units.
#[derive(Debug, Clone, Default)]
pub struct CodeDiffer {
    splitter: Splitter,
}

impl CodeDiffer {
    /// Creates a differ reading containers through `splitter`.
    pub fn new(splitter: Splitter) -> Self {
        Self { splitter }
    }

    /// Returns the splitter.
    pub fn splitter(&self) -> &Splitter {
        &self.splitter
    }

    /// Returns the units whose checksum changed, with their new bytes.
    ///
    /// All old-side units of every container diff are first flattened into
    /// one `name -> checksum` map, so a class moving between containers
    /// (e.g. from `classes2.dex` to `classes3.dex`) compares against its
    /// previous version instead of looking new. Each new-side container is
    /// then split keeping bytes only for units present in that map with a
    /// different checksum. Diffs of non-code entries are ignored.
    ///
    /// # Errors
    ///
    /// - [`Error::NewCodeUnitUnsupported`] if a new-side unit has no
    ///   old-side counterpart
    /// - [`Error::PreconditionViolation`] if a diff names an archive that
    ///   is missing from `old` or `new`
    /// - any error of [`Splitter::split`]
    pub fn changed_units(
        &self,
        diffs: &[FileDiff],
        old: &[Archive],
        new: &[Archive],
    ) -> Result<Vec<CodeUnit>> {
        let code_diffs: Vec<&FileDiff> = diffs
            .iter()
            .filter(|d| d.kind() == ChangeKind::Dex)
            .collect();

        let mut previous: HashMap<String, u64> = HashMap::new();
        for diff in &code_diffs {
            let Some(entry) = &diff.old else { continue };
            let archive = archive_named(old, &entry.archive)?;
            for unit in self.splitter.split(archive, entry, None)? {
                previous.insert(unit.name, unit.checksum);
            }
        }

        let keep: KeepBytes<'_> =
            &|name: &str, checksum: u64| previous.get(name).is_some_and(|&c| c != checksum);
        let mut changed = Vec::new();
        for diff in &code_diffs {
            let Some(entry) = &diff.new else { continue };
            let archive = archive_named(new, &entry.archive)?;
            for unit in self.splitter.split(archive, entry, Some(keep))? {
                if !previous.contains_key(&unit.name) {
                    return Err(Error::NewCodeUnitUnsupported { name: unit.name });
                }
                if unit.bytes.is_some() {
                    changed.push(unit);
                }
            }
        }

        log::debug!(
            "{} container diff(s): {} old units, {} changed",
            code_diffs.len(),
            previous.len(),
            changed.len()
        );
        Ok(changed)
    }
}

fn archive_named<'a>(archives: &'a [Archive], name: &str) -> Result<&'a Archive> {
    find_by_name(archives, name).ok_or_else(|| {
        Error::PreconditionViolation(format!("no archive named {name} in the set"))
    })
}
