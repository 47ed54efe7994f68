//! Reading code units out of archives, with optional caching.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{CodeUnit, KeepBytes, split_dex};
use crate::Result;
use crate::archive::{Archive, Entry};
use crate::lru::LruMap;
use crate::options::{DEFAULT_MAX_CONTAINER_SIZE, DeltaOptions};

/// Identifies one container version: qualified path plus entry CRC-32.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerKey {
    /// Archive-qualified container path.
    pub name: String,
    /// CRC-32 of the container entry.
    pub checksum: u32,
}

impl ContainerKey {
    /// Creates a key.
    pub fn new(name: impl Into<String>, checksum: u32) -> Self {
        Self {
            name: name.into(),
            checksum,
        }
    }

    /// The key of an archive entry.
    pub fn of(entry: &Entry) -> Self {
        Self::new(entry.qualified_path(), entry.crc32)
    }
}

impl fmt::Display for ContainerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:08x}", self.name, self.checksum)
    }
}

/// A cache of split containers.
///
/// Stores are owned by the caller, who also chooses whether they persist.
/// Stored units never carry bytes.
pub trait CodeUnitStore: Send + Sync {
    /// Returns the units of a container version, if known.
    fn get(&self, container: &ContainerKey) -> Option<Vec<CodeUnit>>;

    /// Records the units of a container version.
    fn put(&self, container: &ContainerKey, units: &[CodeUnit]);
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        log::warn!("code unit store mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}

/// An in-memory [`CodeUnitStore`] bounded to a number of containers,
/// evicting the least recently used.
pub struct MemoryUnitStore {
    containers: Mutex<LruMap<ContainerKey, Arc<[CodeUnit]>>>,
}

impl MemoryUnitStore {
    /// Default number of containers kept.
    pub const DEFAULT_CAPACITY: usize = 64;

    /// Creates a store holding at most `capacity` containers.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            containers: Mutex::new(LruMap::new(capacity)),
        }
    }

    /// Returns the number of containers held.
    pub fn len(&self) -> usize {
        lock_or_recover(&self.containers).len()
    }

    /// Returns `true` if nothing is held.
    pub fn is_empty(&self) -> bool {
        lock_or_recover(&self.containers).is_empty()
    }

    /// Returns `true` if the container version is held, without touching it.
    pub fn contains(&self, container: &ContainerKey) -> bool {
        lock_or_recover(&self.containers).contains(container)
    }
}

impl Default for MemoryUnitStore {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(Self::DEFAULT_CAPACITY).unwrap_or(NonZeroUsize::MIN))
    }
}

impl fmt::Debug for MemoryUnitStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let containers = lock_or_recover(&self.containers);
        f.debug_struct("MemoryUnitStore")
            .field("len", &containers.len())
            .field("capacity", &containers.capacity())
            .finish()
    }
}

impl CodeUnitStore for MemoryUnitStore {
    fn get(&self, container: &ContainerKey) -> Option<Vec<CodeUnit>> {
        lock_or_recover(&self.containers)
            .get(container)
            .map(|units| units.to_vec())
    }

    fn put(&self, container: &ContainerKey, units: &[CodeUnit]) {
        let stripped: Arc<[CodeUnit]> = units.iter().map(CodeUnit::without_bytes).collect();
        if let Some((evicted, _)) = lock_or_recover(&self.containers).insert(container.clone(), stripped)
        {
            log::debug!("code unit store evicted {evicted}");
        }
    }
}

/// How a [`Splitter`] obtains code units.
#[derive(Clone)]
pub enum SplitStrategy {
    /// Always inflate and parse the container.
    Direct,
    /// Consult a store first and populate it after splitting.
    Cached(Arc<dyn CodeUnitStore>),
}

impl fmt::Debug for SplitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplitStrategy::Direct => f.write_str("Direct"),
            SplitStrategy::Cached(_) => f.write_str("Cached"),
        }
    }
}

/// Reads code containers out of archives and splits them into units.
#[derive(Debug, Clone)]
pub struct Splitter {
    strategy: SplitStrategy,
    max_container_size: u64,
    verify_crc: bool,
}

impl Default for Splitter {
    fn default() -> Self {
        Self::new(SplitStrategy::Direct)
    }
}

impl Splitter {
    /// Creates a splitter with the given strategy and default limits.
    pub fn new(strategy: SplitStrategy) -> Self {
        Self {
            strategy,
            max_container_size: DEFAULT_MAX_CONTAINER_SIZE,
            verify_crc: true,
        }
    }

    /// A splitter that always parses.
    pub fn direct() -> Self {
        Self::new(SplitStrategy::Direct)
    }

    /// A splitter backed by `store`.
    pub fn cached(store: Arc<dyn CodeUnitStore>) -> Self {
        Self::new(SplitStrategy::Cached(store))
    }

    /// Applies the container limits of `options`. They are taken as given;
    /// a zero size limit rejects every container, so run
    /// [`DeltaOptions::validate`] first.
    pub fn with_options(mut self, options: &DeltaOptions) -> Self {
        self.max_container_size = options.max_container_size;
        self.verify_crc = options.verify_container_crc;
        self
    }

    /// Returns the strategy.
    pub fn strategy(&self) -> &SplitStrategy {
        &self.strategy
    }

    /// Splits the container `entry` of `archive`.
    ///
    /// Without a `keep` predicate a cached strategy answers from its store
    /// when it can, so an archive without local bytes (a remote dump) can
    /// still be split if its containers were seen before.
    ///
    /// # Errors
    ///
    /// - [`Error::ContainerUnavailable`](crate::Error::ContainerUnavailable)
    ///   if the bytes are needed but the archive has none
    /// - [`Error::MalformedDex`](crate::Error::MalformedDex),
    ///   [`Error::CrcMismatch`](crate::Error::CrcMismatch) and
    ///   [`Error::ResourceLimitExceeded`](crate::Error::ResourceLimitExceeded)
    ///   from reading the container
    pub fn split(
        &self,
        archive: &Archive,
        entry: &Entry,
        keep: Option<KeepBytes<'_>>,
    ) -> Result<Vec<CodeUnit>> {
        let key = ContainerKey::of(entry);
        if let (SplitStrategy::Cached(store), None) = (&self.strategy, keep) {
            if let Some(units) = store.get(&key) {
                log::trace!("unit store hit for {key}");
                return Ok(units);
            }
            log::trace!("unit store miss for {key}");
        }

        let data = archive.read_entry(&entry.path, self.max_container_size, self.verify_crc)?;
        let units = split_dex(&key.name, &data, keep)?;
        if let SplitStrategy::Cached(store) = &self.strategy {
            store.put(&key, &units);
        }
        Ok(units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(name: &str, checksum: u64) -> CodeUnit {
        CodeUnit {
            name: name.into(),
            checksum,
            bytes: Some(vec![1, 2, 3]),
            container: "base.apk/classes.dex".into(),
        }
    }

    #[test]
    fn test_memory_store_strips_bytes() {
        let store = MemoryUnitStore::default();
        let key = ContainerKey::new("base.apk/classes.dex", 7);
        store.put(&key, &[unit("LA;", 1), unit("LB;", 2)]);

        let units = store.get(&key).unwrap();
        assert_eq!(units.len(), 2);
        assert!(units.iter().all(|u| u.bytes.is_none()));
        assert!(store.get(&ContainerKey::new("base.apk/classes.dex", 8)).is_none());
    }

    #[test]
    fn test_memory_store_evicts() {
        let store = MemoryUnitStore::new(NonZeroUsize::new(1).unwrap());
        let first = ContainerKey::new("a", 1);
        let second = ContainerKey::new("b", 2);
        store.put(&first, &[unit("LA;", 1)]);
        store.put(&second, &[unit("LB;", 2)]);
        assert_eq!(store.len(), 1);
        assert!(!store.contains(&first));
        assert!(store.contains(&second));
    }

    #[test]
    fn test_container_key_display() {
        assert_eq!(ContainerKey::new("base.apk/classes.dex", 0xab).to_string(), "base.apk/classes.dex@000000ab");
    }
}
