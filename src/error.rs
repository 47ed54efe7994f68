//! Error types for delta deployment operations.
//!
//! This module provides the [`Error`] enum which represents all failure modes
//! of archive indexing, diffing, class-level comparison and overlay
//! computation, along with a convenient [`Result<T>`] type alias.
//!
//! None of the components retry internally. Every error carries enough
//! context for the caller to choose a fallback, and [`Error::fallback`]
//! maps each variant onto the recovery the caller is expected to take.
//!
//! Oversized patches are not errors: they are reported through
//! [`PatchStatus::SizeThresholdExceeded`](crate::patch::PatchStatus).
//!
//! # Example
//!
//! ```rust
//! use apkdelta::{Archive, Error, Fallback};
//!
//! let result = Archive::from_remote_dump("base.apk", b"garbage".to_vec(), None);
//! match result {
//!     Err(e @ Error::MalformedArchive { .. }) => {
//!         assert_eq!(e.fallback(), Fallback::FullReinstall);
//!     }
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

use std::io;

use crate::diff::ChangeKind;

/// Helper struct for formatting CrcMismatch error messages.
struct CrcMismatchDisplay<'a> {
    path: &'a str,
    expected: u32,
    actual: u32,
}

impl std::fmt::Display for CrcMismatchDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CRC mismatch for entry {}: expected {:#010x}, got {:#010x}",
            self.path, self.expected, self.actual
        )
    }
}

/// The main error type for delta deployment operations.
///
/// # Error Categories
///
/// | Category | Variants | Typical Cause |
/// |----------|----------|---------------|
/// | I/O | [`Io`][Self::Io] | Opening or mapping a local archive |
/// | Format | [`MalformedArchive`][Self::MalformedArchive], [`MalformedDex`][Self::MalformedDex] | Invalid archive or container bytes |
/// | Integrity | [`CrcMismatch`][Self::CrcMismatch] | Entry data does not match its directory record |
/// | Caller contract | [`PreconditionViolation`][Self::PreconditionViolation], [`InvalidConfig`][Self::InvalidConfig] | Mismatched archive sets, bad options |
/// | Overlay policy | [`UnsupportedChangeType`][Self::UnsupportedChangeType], [`UnsupportedDelete`][Self::UnsupportedDelete] | Change cannot be expressed as an overlay |
/// | Hot swap | [`NewCodeUnitUnsupported`][Self::NewCodeUnitUnsupported] | Class added since the last deployment |
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred while opening or mapping a local archive.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The archive's end-of-central-directory record or central directory
    /// could not be located or does not carry the expected signature.
    ///
    /// The caller must fall back to a full reinstall.
    #[error("Malformed archive: {reason}")]
    MalformedArchive {
        /// A description of what was expected vs. found.
        reason: String,
    },

    /// The caller supplied inputs that violate a documented precondition,
    /// for example archive sets of different sizes or names.
    #[error("Precondition violated: {0}")]
    PreconditionViolation(String),

    /// A file changed in a way the configured overlay allow-set forbids.
    #[error("Unsupported {kind} change to {path}")]
    UnsupportedChangeType {
        /// The kind of change that was rejected.
        kind: ChangeKind,
        /// Archive-qualified path of the changed file.
        path: String,
    },

    /// A file that exists in the base install was deleted.
    ///
    /// Overlays can only add or replace files; removing base content
    /// requires a reinstall.
    #[error("Unsupported delete of base install file {path}")]
    UnsupportedDelete {
        /// Archive-qualified path of the deleted file.
        path: String,
    },

    /// A code unit appeared that did not exist in the previous deployment.
    #[error("New code unit {name} cannot be hot-swapped")]
    NewCodeUnitUnsupported {
        /// Name of the new code unit (class descriptor).
        name: String,
    },

    /// A code container (dex file) is structurally invalid.
    #[error("Malformed dex container at offset {offset:#x}: {reason}")]
    MalformedDex {
        /// Byte offset inside the container where parsing failed.
        offset: u64,
        /// A description of the problem.
        reason: String,
    },

    /// The entry uses a compression method this build cannot decode.
    #[error("Unsupported compression method {method} for entry {path}")]
    UnsupportedMethod {
        /// ZIP compression method number.
        method: u16,
        /// Entry path.
        path: String,
    },

    /// Inflated entry data does not match the CRC recorded in the central
    /// directory.
    #[error("{}", CrcMismatchDisplay { path, expected: *expected, actual: *actual })]
    CrcMismatch {
        /// Entry path.
        path: String,
        /// The CRC from the central directory.
        expected: u32,
        /// The CRC of the data actually read.
        actual: u32,
    },

    /// A code container is needed for comparison but neither its bytes nor
    /// a cached split are available.
    #[error("Code container {name} (crc {checksum:#010x}) is not available locally or in the unit store")]
    ContainerUnavailable {
        /// Container entry path.
        name: String,
        /// Container CRC-32.
        checksum: u32,
    },

    /// An entry was not found in the archive.
    #[error("Entry not found: {path}")]
    EntryNotFound {
        /// The path that was not found.
        path: String,
    },

    /// A configured resource limit was exceeded.
    #[error("Resource limit exceeded: {0}")]
    ResourceLimitExceeded(String),

    /// Options failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// The recovery a caller is expected to take for a given error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fallback {
    /// Reinstall the full application.
    FullReinstall,
    /// Transfer the archives in full instead of patching them.
    FullTransfer,
    /// Restart the running process instead of hot-swapping code.
    Restart,
    /// No automatic fallback; surface the error.
    Abort,
}

impl Error {
    /// Creates a [`Error::MalformedArchive`] from any displayable reason.
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Error::MalformedArchive {
            reason: reason.into(),
        }
    }

    /// Creates a [`Error::MalformedDex`] at the given container offset.
    pub(crate) fn malformed_dex(offset: usize, reason: impl Into<String>) -> Self {
        Error::MalformedDex {
            offset: offset as u64,
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error indicates corrupted or unparseable input.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::MalformedArchive { .. } | Error::MalformedDex { .. } | Error::CrcMismatch { .. }
        )
    }

    /// Returns the fallback the caller should take after this error.
    ///
    /// ```rust
    /// use apkdelta::{Error, Fallback};
    ///
    /// let err = Error::NewCodeUnitUnsupported { name: "Lcom/example/New;".into() };
    /// assert_eq!(err.fallback(), Fallback::Restart);
    /// ```
    pub fn fallback(&self) -> Fallback {
        match self {
            Error::MalformedArchive { .. }
            | Error::UnsupportedChangeType { .. }
            | Error::UnsupportedDelete { .. } => Fallback::FullReinstall,
            Error::NewCodeUnitUnsupported { .. }
            | Error::MalformedDex { .. }
            | Error::ContainerUnavailable { .. }
            | Error::UnsupportedMethod { .. }
            | Error::CrcMismatch { .. } => Fallback::Restart,
            Error::ResourceLimitExceeded(_) => Fallback::FullTransfer,
            Error::Io(_)
            | Error::PreconditionViolation(_)
            | Error::EntryNotFound { .. }
            | Error::InvalidConfig(_) => Fallback::Abort,
        }
    }
}

/// A result type alias using the crate's [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

type Matcher = fn(&Error) -> bool;
type Formatter = fn(&Error) -> String;

fn is_malformed_archive(e: &Error) -> bool {
    matches!(e, Error::MalformedArchive { .. })
}

fn is_overlay_rejection(e: &Error) -> bool {
    matches!(
        e,
        Error::UnsupportedChangeType { .. } | Error::UnsupportedDelete { .. }
    )
}

fn is_new_code_unit(e: &Error) -> bool {
    matches!(e, Error::NewCodeUnitUnsupported { .. })
}

fn is_container_issue(e: &Error) -> bool {
    matches!(
        e,
        Error::MalformedDex { .. } | Error::ContainerUnavailable { .. } | Error::CrcMismatch { .. }
    )
}

fn any(_: &Error) -> bool {
    true
}

fn reinstall_message(e: &Error) -> String {
    format!("{e}. A full reinstall is required.")
}

fn overlay_message(e: &Error) -> String {
    match e {
        Error::UnsupportedChangeType { kind, path } => format!(
            "{path} has a {kind} change that cannot be applied without reinstalling."
        ),
        Error::UnsupportedDelete { path } => {
            format!("{path} was removed from the base install; reinstall to apply the deletion.")
        }
        _ => e.to_string(),
    }
}

fn new_unit_message(e: &Error) -> String {
    match e {
        Error::NewCodeUnitUnsupported { name } => {
            format!("Class {name} was added; restart the application to load it.")
        }
        _ => e.to_string(),
    }
}

fn container_message(e: &Error) -> String {
    format!("Could not compare code changes ({e}); restart the application.")
}

fn plain(e: &Error) -> String {
    e.to_string()
}

/// Ordered presentation rules; the first matching row wins.
const PRESENTERS: &[(Matcher, Formatter)] = &[
    (is_malformed_archive, reinstall_message),
    (is_overlay_rejection, overlay_message),
    (is_new_code_unit, new_unit_message),
    (is_container_issue, container_message),
    (any, plain),
];

/// Renders a caller-facing message for an error.
///
/// Rules are evaluated in order and the first applicable one formats the
/// message. The last rule matches everything and falls back to [`Display`].
///
/// [`Display`]: std::fmt::Display
pub fn describe(error: &Error) -> String {
    PRESENTERS
        .iter()
        .find(|(matches, _)| matches(error))
        .map(|(_, format)| format(error))
        .unwrap_or_else(|| error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc_mismatch_display() {
        let err = Error::CrcMismatch {
            path: "classes.dex".into(),
            expected: 0x1234,
            actual: 0xabcd,
        };
        assert_eq!(
            err.to_string(),
            "CRC mismatch for entry classes.dex: expected 0x00001234, got 0x0000abcd"
        );
        assert!(err.is_corruption());
    }

    #[test]
    fn test_fallback_mapping() {
        assert_eq!(Error::malformed("x").fallback(), Fallback::FullReinstall);
        assert_eq!(
            Error::UnsupportedDelete { path: "base.apk/a".into() }.fallback(),
            Fallback::FullReinstall
        );
        assert_eq!(
            Error::PreconditionViolation("count".into()).fallback(),
            Fallback::Abort
        );
    }

    #[test]
    fn test_describe_first_matching_rule_wins() {
        let err = Error::UnsupportedChangeType {
            kind: ChangeKind::Manifest,
            path: "base.apk/AndroidManifest.xml".into(),
        };
        let msg = describe(&err);
        assert!(msg.starts_with("base.apk/AndroidManifest.xml has a manifest change"));

        let err = Error::malformed("EOCD not found");
        assert_eq!(
            describe(&err),
            "Malformed archive: EOCD not found. A full reinstall is required."
        );
    }

    #[test]
    fn test_describe_catch_all() {
        let err = Error::InvalidConfig("cache_capacity must be non-zero".into());
        assert_eq!(describe(&err), err.to_string());
    }
}
