//! Interfaces to the device side.
//!
//! The crate never talks to a device itself. Transport, installer and
//! prompting live behind these traits and are supplied by the caller.

use std::collections::BTreeMap;

use crate::archive::Archive;
use crate::cache::{CacheEntry, CacheKey, DeploymentCache};
use crate::overlay::OverlayIdentity;
use crate::patch::PatchSet;
use crate::Result;

/// The index of one installed archive, as reported by a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDump {
    /// Archive name, e.g. `base.apk`.
    pub name: String,
    /// Raw central directory bytes.
    pub central_directory: Vec<u8>,
    /// Raw signing block bytes, if the archive has one.
    pub signature: Option<Vec<u8>>,
}

impl RemoteDump {
    /// Indexes the dump.
    pub fn into_archive(self) -> Result<Archive> {
        Archive::from_remote_dump(self.name, self.central_directory, self.signature)
    }
}

/// Reports the installed archives of packages on a device.
pub trait RemoteArchiveProvider {
    /// Returns `package -> dumps` for the given packages. Packages that are
    /// not installed are absent from the map.
    fn dump(&self, packages: &[&str]) -> Result<BTreeMap<String, Vec<RemoteDump>>>;
}

/// What the caller asks the device to accept.
#[derive(Debug, Clone, Copy)]
pub enum Proposal<'a> {
    /// Move the overlay to this identity.
    Overlay(&'a OverlayIdentity),
    /// Patch the installed archives.
    Patches(&'a PatchSet),
}

/// The device's answer to a [`Proposal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Confirmation {
    /// The device applied the proposal.
    Accepted,
    /// The device did not apply the proposal.
    Rejected,
}

/// Submits a proposal to the device and reports whether it was applied.
pub trait DeviceConfirmation {
    /// Submits `proposal`.
    fn confirm(&self, proposal: Proposal<'_>) -> Confirmation;
}

/// Indexes the installed archives of `packages`.
///
/// # Errors
///
/// Propagates provider errors, and returns
/// [`Error::MalformedArchive`](crate::Error::MalformedArchive) for a dump
/// that is not a central directory.
pub fn index_remote<P>(provider: &P, packages: &[&str]) -> Result<BTreeMap<String, Vec<Archive>>>
where
    P: RemoteArchiveProvider + ?Sized,
{
    let dumps = provider.dump(packages)?;
    let mut installed = BTreeMap::new();
    for (package, dumps) in dumps {
        let archives = dumps
            .into_iter()
            .map(RemoteDump::into_archive)
            .collect::<Result<Vec<_>>>()?;
        log::debug!("{package}: {} installed archive(s)", archives.len());
        installed.insert(package, archives);
    }
    Ok(installed)
}

/// Returns what is installed for `package` on device `serial`.
///
/// The cache answers when it can. On a miss the installed archives are
/// fetched from `provider` and described as a base install; nothing is
/// written to the cache, since only a confirmed device operation may do
/// that. Returns `None` if the package is not installed.
pub fn resolve_installed<P>(
    cache: &DeploymentCache,
    provider: &P,
    serial: &str,
    package: &str,
) -> Result<Option<CacheEntry>>
where
    P: RemoteArchiveProvider + ?Sized,
{
    let key = CacheKey::new(serial, package);
    if let Some(entry) = cache.get(&key) {
        log::debug!("{key}: using cached overlay {}", entry.overlay.fingerprint());
        return Ok(Some(entry));
    }

    log::debug!("{key}: cache miss, reading installed archives");
    let mut installed = index_remote(provider, &[package])?;
    Ok(installed.remove(package).map(|archives| {
        let overlay = OverlayIdentity::base_install(&archives);
        CacheEntry { archives, overlay }
    }))
}
