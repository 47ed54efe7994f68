//! The deployment cache: what was last deployed to each (device, package).
//!
//! The cache is advisory. An entry may be stale, evicted or missing at any
//! time, and a miss only means the installed state has to be read back
//! from the device. Entries are written by the caller after the device
//! confirmed an operation, never speculatively.
//!
//! Reads and writes for one key are serialized: [`DeploymentCache::update`]
//! and the `commit_*` methods hold a per-key lock across their whole
//! read-modify-write cycle, so two deployments to the same device and
//! package cannot interleave.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::archive::Archive;
use crate::lru::LruMap;
use crate::options::{DEFAULT_CACHE_CAPACITY, DeltaOptions};
use crate::overlay::OverlayIdentity;
use crate::patch::{PatchSet, PatchStatus};
use crate::remote::{Confirmation, DeviceConfirmation, Proposal};
use crate::{Error, Result};

/// Identifies one installed package on one device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    /// Device serial number.
    pub serial: String,
    /// Application package name.
    pub package: String,
}

impl CacheKey {
    /// Creates a key.
    pub fn new(serial: impl Into<String>, package: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            package: package.into(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.serial, self.package)
    }
}

/// The last confirmed state of one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Archives installed as the base, without their bytes.
    pub archives: Vec<Archive>,
    /// The overlay identity on the device.
    pub overlay: OverlayIdentity,
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        log::warn!("deployment cache mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}

/// A bounded, least-recently-used map from [`CacheKey`] to [`CacheEntry`].
///
/// Create one per session and pass it to whatever needs it.
///
/// # Example
///
/// ```rust
/// use apkdelta::cache::{CacheKey, DeploymentCache};
/// use apkdelta::overlay::OverlayIdentity;
///
/// let cache = DeploymentCache::default();
/// let key = CacheKey::new("emulator-5554", "com.example.app");
/// assert!(cache.get(&key).is_none());
///
/// cache.store(key.clone(), &[], OverlayIdentity::base_install(&[]));
/// assert!(cache.get(&key).is_some());
/// ```
pub struct DeploymentCache {
    entries: Mutex<LruMap<CacheKey, CacheEntry>>,
    key_locks: Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
}

impl Default for DeploymentCache {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(DEFAULT_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN))
    }
}

impl fmt::Debug for DeploymentCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = lock_or_recover(&self.entries);
        f.debug_struct("DeploymentCache")
            .field("len", &entries.len())
            .field("capacity", &entries.capacity())
            .finish()
    }
}

impl DeploymentCache {
    /// Creates a cache holding at most `capacity` entries.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruMap::new(capacity)),
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a cache sized by `options`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `options` fail
    /// [`DeltaOptions::validate`].
    pub fn from_options(options: &DeltaOptions) -> Result<Self> {
        options.validate()?;
        let capacity = NonZeroUsize::new(options.cache_capacity)
            .ok_or_else(|| Error::InvalidConfig("cache_capacity must be non-zero".into()))?;
        Ok(Self::new(capacity))
    }

    /// Returns the entry for `key`, marking it recently used.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        lock_or_recover(&self.entries).get(key).cloned()
    }

    /// Records the confirmed state of `key`. Archives are stored detached.
    pub fn store(&self, key: CacheKey, archives: &[Archive], overlay: OverlayIdentity) {
        self.with_key_lock(&key, || self.insert(key.clone(), archives, overlay));
    }

    /// Drops the entry for `key`, returning it.
    pub fn invalidate(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.with_key_lock(key, || lock_or_recover(&self.entries).remove(key))
    }

    /// Runs a read-modify-write cycle on `key` under its lock.
    ///
    /// `f` receives the current entry. Returning `Ok(Some(_))` stores the
    /// new entry, `Ok(None)` removes it, and an error leaves the cache
    /// untouched and is returned.
    pub fn update<F>(&self, key: &CacheKey, f: F) -> Result<Option<CacheEntry>>
    where
        F: FnOnce(Option<CacheEntry>) -> Result<Option<CacheEntry>>,
    {
        self.with_key_lock(key, || {
            let current = lock_or_recover(&self.entries).peek(key).cloned();
            let next = f(current)?;
            let mut entries = lock_or_recover(&self.entries);
            match &next {
                Some(entry) => {
                    let archives: Vec<Archive> = entry.archives.iter().map(Archive::detached).collect();
                    let stored = CacheEntry {
                        archives,
                        overlay: entry.overlay.clone(),
                    };
                    if let Some((evicted, _)) = entries.insert(key.clone(), stored) {
                        log::debug!("deployment cache evicted {evicted}");
                    }
                }
                None => {
                    entries.remove(key);
                }
            }
            Ok(next)
        })
    }

    /// Proposes `overlay` to the device and, if it accepts, records it
    /// with `archives` as the base install.
    pub fn commit_if_confirmed(
        &self,
        key: CacheKey,
        archives: &[Archive],
        overlay: OverlayIdentity,
        device: &dyn DeviceConfirmation,
    ) -> Confirmation {
        self.with_key_lock(&key, || {
            let confirmation = device.confirm(Proposal::Overlay(&overlay));
            match confirmation {
                Confirmation::Accepted => self.insert(key.clone(), archives, overlay),
                Confirmation::Rejected => log::debug!("{key}: device rejected overlay update"),
            }
            confirmation
        })
    }

    /// Proposes `patches` to the device and, if it accepts, records
    /// `archives` as a fresh base install.
    ///
    /// A patch set that is not [`PatchStatus::Ok`] or
    /// [`PatchStatus::NoChanges`] is never proposed and counts as rejected.
    pub fn commit_patches_if_confirmed(
        &self,
        key: CacheKey,
        archives: &[Archive],
        patches: &PatchSet,
        device: &dyn DeviceConfirmation,
    ) -> Confirmation {
        if !matches!(patches.status, PatchStatus::Ok | PatchStatus::NoChanges) {
            log::debug!("{key}: not proposing a {:?} patch set", patches.status);
            return Confirmation::Rejected;
        }
        self.with_key_lock(&key, || {
            let confirmation = device.confirm(Proposal::Patches(patches));
            if confirmation == Confirmation::Accepted {
                self.insert(key.clone(), archives, OverlayIdentity::base_install(archives));
            }
            confirmation
        })
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        lock_or_recover(&self.entries).len()
    }

    /// Returns `true` if the cache is empty.
    pub fn is_empty(&self) -> bool {
        lock_or_recover(&self.entries).is_empty()
    }

    /// Returns the maximum number of entries.
    pub fn capacity(&self) -> usize {
        lock_or_recover(&self.entries).capacity()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        lock_or_recover(&self.entries).clear();
    }

    fn insert(&self, key: CacheKey, archives: &[Archive], overlay: OverlayIdentity) {
        let entry = CacheEntry {
            archives: archives.iter().map(Archive::detached).collect(),
            overlay,
        };
        if let Some((evicted, _)) = lock_or_recover(&self.entries).insert(key, entry) {
            log::debug!("deployment cache evicted {evicted}");
        }
    }

    fn with_key_lock<T>(&self, key: &CacheKey, f: impl FnOnce() -> T) -> T {
        let lock = {
            let mut locks = lock_or_recover(&self.key_locks);
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        let result = {
            let _guard = lock_or_recover(&lock);
            f()
        };
        drop(lock);

        let mut locks = lock_or_recover(&self.key_locks);
        if locks.get(key).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(key);
        }
        result
    }
}
