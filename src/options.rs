//! Configuration shared by the patch generator, the code splitter, the
//! overlay differ and the deployment cache.

use crate::diff::{ChangeKind, ChangeKinds};
use crate::patch::MAX_PATCH_SIZE;
use crate::{Error, Result};

/// Default number of (device, package) entries the deployment cache holds.
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

/// Default upper bound for an inflated code container.
pub const DEFAULT_MAX_CONTAINER_SIZE: u64 = 256 * 1024 * 1024;

/// Options for delta computation.
///
/// # Example
///
/// ```rust
/// use apkdelta::DeltaOptions;
/// use apkdelta::diff::ChangeKind;
///
/// let options = DeltaOptions::new()
///     .max_patch_size(8 * 1024 * 1024)
///     .allow_change(ChangeKind::NativeLibrary)
///     .cache_capacity(16);
/// assert!(options.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct DeltaOptions {
    /// Upper bound, in bytes, for instructions plus data of a patch set.
    pub max_patch_size: u64,
    /// Number of entries the deployment cache keeps before evicting.
    pub cache_capacity: usize,
    /// Change kinds an overlay update may carry.
    pub allowed_changes: ChangeKinds,
    /// Verify the CRC-32 of code containers after inflating them.
    pub verify_container_crc: bool,
    /// Upper bound for an inflated code container.
    pub max_container_size: u64,
}

impl Default for DeltaOptions {
    fn default() -> Self {
        Self {
            max_patch_size: MAX_PATCH_SIZE,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            allowed_changes: ChangeKinds::default(),
            verify_container_crc: true,
            max_container_size: DEFAULT_MAX_CONTAINER_SIZE,
        }
    }
}

impl DeltaOptions {
    /// Creates options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the patch size budget.
    pub fn max_patch_size(mut self, bytes: u64) -> Self {
        self.max_patch_size = bytes;
        self
    }

    /// Sets the deployment cache capacity.
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Replaces the overlay allow-set.
    pub fn allowed_changes(mut self, kinds: ChangeKinds) -> Self {
        self.allowed_changes = kinds;
        self
    }

    /// Adds one kind to the overlay allow-set.
    pub fn allow_change(mut self, kind: ChangeKind) -> Self {
        self.allowed_changes = self.allowed_changes.with(kind);
        self
    }

    /// Enables or disables CRC verification of inflated code containers.
    pub fn verify_container_crc(mut self, verify: bool) -> Self {
        self.verify_container_crc = verify;
        self
    }

    /// Sets the upper bound for an inflated code container.
    pub fn max_container_size(mut self, bytes: u64) -> Self {
        self.max_container_size = bytes;
        self
    }

    /// Checks the options for values no component can work with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a zero patch budget, cache
    /// capacity or container size limit.
    pub fn validate(&self) -> Result<()> {
        if self.max_patch_size == 0 {
            return Err(Error::InvalidConfig(
                "max_patch_size must be non-zero".into(),
            ));
        }
        if self.cache_capacity == 0 {
            return Err(Error::InvalidConfig(
                "cache_capacity must be non-zero".into(),
            ));
        }
        if self.max_container_size == 0 {
            return Err(Error::InvalidConfig(
                "max_container_size must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
