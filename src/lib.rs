//! # apkdelta
//!
//! Incremental redeployment of Android application packages.
//!
//! Reinstalling an application after every build is slow. This crate finds
//! out exactly what changed between the archives installed on a device and
//! the ones just built, and expresses the change in the cheapest form the
//! device can apply:
//!
//! - a **patch** of byte ranges, when the new archives are installed in
//!   place of the old ones,
//! - an **overlay** update, a set of files layered on top of the base
//!   install without reinstalling,
//! - a list of **changed classes**, when code is swapped into the running
//!   process.
//!
//! ## Quick Start
//!
//! ### Patching an Install
//!
//! ```rust,no_run
//! use apkdelta::{Archive, PatchSetGenerator, PatchStatus, Result};
//!
//! fn main() -> Result<()> {
//!     // The device reports the central directory of the installed archive
//!     let cd: Vec<u8> = std::fs::read("dump/base.apk.cd")?;
//!     let installed = vec![Archive::from_remote_dump("base.apk", cd, None)?];
//!     let built = vec![Archive::open_path("app/build/outputs/base.apk")?];
//!
//!     let set = PatchSetGenerator::default().generate(&installed, &built);
//!     match set.status {
//!         PatchStatus::NoChanges => println!("nothing to do"),
//!         PatchStatus::Ok => println!("sending {} bytes", set.size()),
//!         other => println!("falling back to a full install: {other:?}"),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ### Updating an Overlay
//!
//! ```rust,no_run
//! use apkdelta::{Archive, DeltaOptions, OverlayDiffer, OverlayIdentity, Result};
//!
//! fn main() -> Result<()> {
//!     let base = vec![Archive::open_path("v1/base.apk")?];
//!     let identity = OverlayIdentity::base_install(&base);
//!
//!     let next = vec![Archive::open_path("v2/base.apk")?];
//!     let differ = OverlayDiffer::from_options(&DeltaOptions::default())?;
//!     let update = differ.diff(&next, &identity)?;
//!     for entry in &update.files_to_add {
//!         println!("push {}", entry.qualified_path());
//!     }
//!     let proposed = update.apply_to(&identity);
//!     println!("overlay {} -> {}", identity.fingerprint(), proposed.fingerprint());
//!     Ok(())
//! }
//! ```
//!
//! ### Finding Changed Classes
//!
//! ```rust,no_run
//! use apkdelta::{Archive, CodeDiffer, Result, diff_sets};
//!
//! fn main() -> Result<()> {
//!     let old = vec![Archive::open_path("v1/base.apk")?];
//!     let new = vec![Archive::open_path("v2/base.apk")?];
//!
//!     let diffs = diff_sets(&old, &new)?;
//!     for unit in CodeDiffer::default().changed_units(&diffs, &old, &new)? {
//!         println!("redefine {} ({:016x})", unit.name, unit.checksum);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `deflate` | Yes | Inflate deflated code containers |
//! | `parallel` | Yes | Index several local archives concurrently with Rayon |
//!
//! ## Error Handling
//!
//! All operations return [`Result<T>`]. Nothing retries internally;
//! [`Error::fallback`] tells the caller which recovery applies, and
//! [`describe`] renders a message for it:
//!
//! ```rust
//! use apkdelta::{Archive, Fallback, describe};
//!
//! let err = Archive::from_bytes("base.apk", vec![0u8; 64]).unwrap_err();
//! assert_eq!(err.fallback(), Fallback::FullReinstall);
//! assert!(describe(&err).ends_with("A full reinstall is required."));
//! ```
//!
//! Oversized patches are not errors: they come back as
//! [`PatchStatus::SizeThresholdExceeded`].
//!
//! ## Logging
//!
//! The crate logs through the [`log`] facade and installs no logger.
//!
//! ## Minimum Supported Rust Version (MSRV)
//!
//! This crate requires **Rust 1.85** or later.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod archive;
pub mod cache;
pub mod checksum;
pub mod dex;
pub mod diff;
pub mod error;
pub mod format;
pub mod options;
pub mod overlay;
pub mod patch;
pub mod remote;

mod lru;

pub use archive::{Archive, ByteSource, Entry, find_by_name, index_local_archives};
pub use cache::{CacheEntry, CacheKey, DeploymentCache};
pub use dex::{CodeDiffer, CodeUnit, CodeUnitStore, MemoryUnitStore, SplitStrategy, Splitter};
pub use diff::{
    ChangeKind, ChangeKinds, DiffStatus, FileDiff, diff_archives, diff_checksum_maps, diff_sets,
};
pub use error::{Error, Fallback, Result, describe};
pub use options::DeltaOptions;
pub use overlay::{OverlayBuilder, OverlayDiff, OverlayDiffer, OverlayIdentity};
pub use patch::{
    MAX_PATCH_SIZE, Patch, PatchGenerator, PatchInstruction, PatchSet, PatchSetGenerator,
    PatchStatus,
};
pub use remote::{
    Confirmation, DeviceConfirmation, Proposal, RemoteArchiveProvider, RemoteDump, index_remote,
    resolve_installed,
};
