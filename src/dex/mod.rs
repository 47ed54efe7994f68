//! Class-level fingerprints for dex code containers.
//!
//! A modified `classes*.dex` entry says nothing about which classes
//! changed. This module splits containers into [`CodeUnit`]s (one per
//! class definition) with a CRC-64 fingerprint each, and compares the old
//! and new unit sets to find the classes that must be redefined.
//!
//! # Overview
//!
//! - **[`DexFile`]**: a borrowed view of one container
//! - **[`split_dex`]**: container bytes to code units
//! - **[`Splitter`]**: reads containers out of archives, optionally through
//!   a [`CodeUnitStore`]
//! - **[`CodeDiffer`]**: the changed units of a set of file diffs
//!
//! A unit's fingerprint covers its canonical encoding: descriptor, flags,
//! superclass, interfaces, field and method signatures with their flags,
//! each method's register counts, instructions and try/catch handlers, and
//! the initial values of static fields. Catch types and pool references in
//! static values are resolved to names. Annotations and debug info are not
//! covered. Instructions refer to the container's constant pools directly,
//! so an unrelated change that shifts those pools can change a fingerprint.

mod compare;
mod parser;
mod splitter;

pub use compare::CodeDiffer;
pub use parser::{DexClass, DexFile};
pub use splitter::{CodeUnitStore, ContainerKey, MemoryUnitStore, SplitStrategy, Splitter};

use crate::Result;
use crate::checksum::{Checksum, Crc64};

/// One class of a code container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CodeUnit {
    /// Class descriptor, e.g. `Lcom/example/Foo;`.
    pub name: String,
    /// CRC-64 of the canonical class encoding.
    pub checksum: u64,
    /// The canonical encoding, present only when the unit was selected for
    /// retention while splitting.
    pub bytes: Option<Vec<u8>>,
    /// Archive-qualified path of the container, e.g. `base.apk/classes.dex`.
    pub container: String,
}

impl CodeUnit {
    /// Returns a copy without bytes, as stored in unit caches.
    pub fn without_bytes(&self) -> Self {
        Self {
            name: self.name.clone(),
            checksum: self.checksum,
            bytes: None,
            container: self.container.clone(),
        }
    }
}

/// Predicate choosing, by name and checksum, which units keep their bytes.
pub type KeepBytes<'a> = &'a dyn Fn(&str, u64) -> bool;

/// Splits a dex container into code units.
///
/// Units whose `(name, checksum)` satisfies `keep` carry their canonical
/// bytes; with no predicate none do.
///
/// # Errors
///
/// Returns [`Error::MalformedDex`](crate::Error::MalformedDex) if the
/// container cannot be parsed.
pub fn split_dex(container: &str, data: &[u8], keep: Option<KeepBytes<'_>>) -> Result<Vec<CodeUnit>> {
    let dex = DexFile::parse(data)?;
    let classes = dex.classes()?;
    log::trace!(
        "{container}: dex version {:03}, {} classes",
        dex.version(),
        classes.len()
    );

    Ok(classes
        .into_iter()
        .map(|class| {
            let checksum = Crc64::compute(&class.canonical);
            let retain = keep.is_some_and(|keep| keep(&class.descriptor, checksum));
            CodeUnit {
                name: class.descriptor,
                checksum,
                bytes: retain.then_some(class.canonical),
                container: container.to_string(),
            }
        })
        .collect())
}
