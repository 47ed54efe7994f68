//! Archive snapshots: a name, a digest, and the CRC of every entry.
//!
//! An [`Archive`] is built either from a local file (memory-mapped
//! read-only), from an owned buffer, or from the pair of buffers a device
//! hands back for an installed package (central directory and signing
//! block). Only local archives keep their bytes; remote dumps carry just
//! enough to diff against.
//!
//! The archive digest is the lowercase hex SHA-1 of the signing block when
//! one is present, otherwise of the central directory. Two archives with
//! equal digests are treated as byte-identical.
//!
//! # Example
//!
//! ```rust,no_run
//! use apkdelta::Archive;
//!
//! # fn main() -> apkdelta::Result<()> {
//! let archive = Archive::open_path("app/build/outputs/base.apk")?;
//! println!("{} has digest {}", archive.name(), archive.checksum());
//! for entry in archive.entries().values() {
//!     println!("{:08x} {}", entry.crc32, entry.path);
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;

use crate::checksum::{Checksum, Crc32, sha1_hex};
use crate::diff::ChangeKind;
use crate::format::reader::le_u32;
use crate::format::{
    ArchiveMap, CD_SIGNATURE, CentralRecord, EOCD_MIN_SIZE, local, read_central_directory,
};
use crate::{Error, Result};

/// Bytes of a local archive, either memory-mapped or owned.
#[derive(Clone)]
pub enum ArchiveBytes {
    /// A read-only mapping, released when the last clone is dropped.
    Mapped(Arc<Mmap>),
    /// An owned buffer.
    Owned(Arc<[u8]>),
}

impl Deref for ArchiveBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            ArchiveBytes::Mapped(map) => &map[..],
            ArchiveBytes::Owned(buf) => &buf[..],
        }
    }
}

impl fmt::Debug for ArchiveBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            ArchiveBytes::Mapped(_) => "Mapped",
            ArchiveBytes::Owned(_) => "Owned",
        };
        f.debug_struct(kind).field("len", &self.len()).finish()
    }
}

/// Where an archive's bytes come from.
#[derive(Debug, Clone)]
pub enum ByteSource {
    /// The whole archive is available locally.
    Local {
        /// Path of the file, when the archive was opened from disk.
        path: Option<PathBuf>,
        /// The archive contents.
        bytes: ArchiveBytes,
    },
    /// Only the central directory (and signing block) was supplied by the
    /// device; entry data is not available.
    RemoteDump,
    /// A local archive whose bytes were released, see [`Archive::detached`].
    Detached,
}

/// One entry of an archive's central directory.
///
/// Entries are identified by `path` within an archive; paths are
/// case-sensitive. The layout fields are zero for entries built with
/// [`Entry::new`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Entry {
    /// Name of the archive this entry belongs to.
    pub archive: String,
    /// Archive-relative path.
    pub path: String,
    /// CRC-32 of the uncompressed data.
    pub crc32: u32,
    /// ZIP compression method.
    pub method: u16,
    /// Size of the stored data.
    pub compressed_size: u64,
    /// Size of the uncompressed data.
    pub uncompressed_size: u64,
    /// Offset of the local file header.
    pub local_header_offset: u64,
    /// Length of the central directory extra field.
    pub extra_len: u16,
}

impl Entry {
    /// Creates an entry with only a name and checksum.
    pub fn new(archive: impl Into<String>, path: impl Into<String>, crc32: u32) -> Self {
        Self {
            archive: archive.into(),
            path: path.into(),
            crc32,
            method: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            local_header_offset: 0,
            extra_len: 0,
        }
    }

    fn from_record(archive: &str, record: CentralRecord) -> Self {
        Self {
            archive: archive.to_string(),
            path: record.name,
            crc32: record.crc32,
            method: record.method,
            compressed_size: record.compressed_size,
            uncompressed_size: record.uncompressed_size,
            local_header_offset: record.local_header_offset,
            extra_len: record.extra_len,
        }
    }

    /// Returns `<archive>/<path>`, the key used by overlays.
    pub fn qualified_path(&self) -> String {
        format!("{}/{}", self.archive, self.path)
    }

    /// Classifies the entry by its path.
    pub fn kind(&self) -> ChangeKind {
        ChangeKind::of(&self.path)
    }

    /// Returns `true` if the two entries describe the same stored bytes at
    /// the same position of their archives.
    pub(crate) fn same_layout(&self, other: &Entry) -> bool {
        self.path == other.path
            && self.crc32 == other.crc32
            && self.method == other.method
            && self.local_header_offset == other.local_header_offset
            && self.compressed_size == other.compressed_size
            && self.extra_len == other.extra_len
    }
}

/// An immutable, indexed archive snapshot.
///
/// Cloning is cheap: entries and bytes are reference-counted.
#[derive(Clone)]
pub struct Archive {
    name: String,
    checksum: String,
    entries: Arc<BTreeMap<String, Entry>>,
    map: ArchiveMap,
    source: ByteSource,
}

impl Archive {
    /// Opens and indexes a local archive, naming it after its file name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be opened or mapped, and
    /// [`Error::MalformedArchive`] if its structure cannot be located.
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self::open_path_named(name, path)
    }

    /// Opens and indexes a local archive under an explicit name.
    pub fn open_path_named(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        if len < EOCD_MIN_SIZE as u64 {
            return Err(Error::malformed(format!(
                "{} is {len} bytes, too small to be an archive",
                path.display()
            )));
        }
        // Safety: the mapping is read-only and owned by the returned archive.
        let map = unsafe { Mmap::map(&file) }?;
        Self::index_local(
            name.into(),
            Some(path.to_path_buf()),
            ArchiveBytes::Mapped(Arc::new(map)),
        )
    }

    /// Indexes an archive held in memory.
    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes: Vec<u8> = bytes.into();
        Self::index_local(name.into(), None, ArchiveBytes::Owned(Arc::from(bytes)))
    }

    /// Builds an archive from the central directory and signing block bytes
    /// a device reported for an installed package.
    ///
    /// An empty or absent `signature` means the installed archive has no
    /// signing block and its digest is taken over the central directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedArchive`] if a non-empty central directory
    /// does not start with a central directory header.
    pub fn from_remote_dump(
        name: impl Into<String>,
        central_directory: Vec<u8>,
        signature: Option<Vec<u8>>,
    ) -> Result<Self> {
        let name = name.into();
        if !central_directory.is_empty() && le_u32(&central_directory, 0) != Some(CD_SIGNATURE) {
            return Err(Error::malformed(format!(
                "central directory dump of {name} does not start with a header signature"
            )));
        }

        let checksum = match signature.as_deref() {
            Some(sig) if !sig.is_empty() => sha1_hex(sig),
            _ => sha1_hex(&central_directory),
        };
        let entries = collect_entries(&name, &central_directory);
        log::debug!(
            "indexed remote dump {name}: {} entries, digest {checksum}",
            entries.len()
        );

        Ok(Self {
            name,
            checksum,
            entries: Arc::new(entries),
            map: ArchiveMap::default(),
            source: ByteSource::RemoteDump,
        })
    }

    fn index_local(name: String, path: Option<PathBuf>, bytes: ArchiveBytes) -> Result<Self> {
        let map = ArchiveMap::locate(&bytes)?;
        let cd = map
            .central_directory
            .and_then(|span| span.slice(&bytes))
            .ok_or_else(|| Error::malformed("central directory is not resolved"))?;

        let checksum = match map.signature.and_then(|span| span.slice(&bytes)) {
            Some(sig) => sha1_hex(sig),
            None => sha1_hex(cd),
        };
        let entries = collect_entries(&name, cd);
        log::debug!(
            "indexed {name}: {} bytes, {} entries, digest {checksum}",
            bytes.len(),
            entries.len()
        );

        Ok(Self {
            name,
            checksum,
            entries: Arc::new(entries),
            map,
            source: ByteSource::Local { path, bytes },
        })
    }

    /// Returns the archive name (usually its file name, e.g. `base.apk`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the hex digest identifying this archive.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// Returns all entries keyed by path.
    pub fn entries(&self) -> &BTreeMap<String, Entry> {
        &self.entries
    }

    /// Looks up one entry.
    pub fn entry(&self, path: &str) -> Option<&Entry> {
        self.entries.get(path)
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the archive has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns a `path -> crc32` view of the entries.
    pub fn checksums(&self) -> BTreeMap<String, u32> {
        self.entries
            .values()
            .map(|e| (e.path.clone(), e.crc32))
            .collect()
    }

    /// Returns the structural map. Unresolved for remote dumps.
    pub fn map(&self) -> &ArchiveMap {
        &self.map
    }

    /// Returns where the archive's bytes come from.
    pub fn source(&self) -> &ByteSource {
        &self.source
    }

    /// Returns the full archive bytes, if available locally.
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.source {
            ByteSource::Local { bytes, .. } => Some(&bytes[..]),
            ByteSource::RemoteDump | ByteSource::Detached => None,
        }
    }

    /// Returns the path the archive was opened from, if any.
    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            ByteSource::Local { path, .. } => path.as_deref(),
            ByteSource::RemoteDump | ByteSource::Detached => None,
        }
    }

    /// Returns the archive size in bytes, if available locally.
    pub fn size(&self) -> Option<u64> {
        self.bytes().map(|b| b.len() as u64)
    }

    /// Returns a copy that shares the index but drops the byte source, so
    /// that long-lived holders (caches, overlay identities) do not keep a
    /// file mapped.
    pub fn detached(&self) -> Self {
        let source = match self.source {
            ByteSource::RemoteDump => ByteSource::RemoteDump,
            ByteSource::Local { .. } | ByteSource::Detached => ByteSource::Detached,
        };
        Self {
            name: self.name.clone(),
            checksum: self.checksum.clone(),
            entries: Arc::clone(&self.entries),
            map: self.map,
            source,
        }
    }

    /// Reads and decodes one entry, verifying its CRC-32.
    ///
    /// # Errors
    ///
    /// - [`Error::EntryNotFound`] if there is no such entry
    /// - [`Error::ContainerUnavailable`] if the archive has no local bytes
    /// - [`Error::ResourceLimitExceeded`] if the entry inflates past `max_size`
    /// - [`Error::CrcMismatch`] if `verify_crc` is set and the data is corrupt
    pub fn read_entry(&self, path: &str, max_size: u64, verify_crc: bool) -> Result<Vec<u8>> {
        let entry = self.entry(path).ok_or_else(|| Error::EntryNotFound {
            path: format!("{}/{path}", self.name),
        })?;
        let bytes = self.bytes().ok_or_else(|| Error::ContainerUnavailable {
            name: entry.qualified_path(),
            checksum: entry.crc32,
        })?;

        let span = local::data_span(
            bytes,
            &entry.path,
            entry.local_header_offset,
            entry.compressed_size,
        )?;
        let raw = span
            .slice(bytes)
            .ok_or_else(|| Error::malformed(format!("data of {path} is out of range")))?;
        let data = local::decode(
            &entry.path,
            entry.method,
            raw,
            entry.uncompressed_size,
            max_size,
        )?;

        if verify_crc {
            let actual = Crc32::compute(&data);
            if actual != entry.crc32 {
                return Err(Error::CrcMismatch {
                    path: entry.qualified_path(),
                    expected: entry.crc32,
                    actual,
                });
            }
        }
        Ok(data)
    }
}

/// Archives are equal when their names and digests are.
impl PartialEq for Archive {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.checksum == other.checksum
    }
}

impl Eq for Archive {}

impl fmt::Debug for Archive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archive")
            .field("name", &self.name)
            .field("checksum", &self.checksum)
            .field("entries", &self.entries.len())
            .field("source", &self.source)
            .finish()
    }
}

fn collect_entries(archive: &str, cd: &[u8]) -> BTreeMap<String, Entry> {
    let mut entries = BTreeMap::new();
    for record in read_central_directory(cd) {
        let entry = Entry::from_record(archive, record);
        if let Some(previous) = entries.insert(entry.path.clone(), entry) {
            log::debug!("{archive}: duplicate entry {}, keeping the last", previous.path);
        }
    }
    entries
}

/// Finds an archive by name.
pub fn find_by_name<'a>(archives: &'a [Archive], name: &str) -> Option<&'a Archive> {
    archives.iter().find(|a| a.name() == name)
}

/// Opens and indexes several local archives.
///
/// With the `parallel` feature the files are indexed concurrently; the
/// result keeps the order of `paths` either way. The first failure is
/// returned.
#[cfg(feature = "parallel")]
pub fn index_local_archives<P>(paths: &[P]) -> Result<Vec<Archive>>
where
    P: AsRef<Path> + Sync,
{
    use rayon::prelude::*;

    paths.par_iter().map(Archive::open_path).collect()
}

/// Opens and indexes several local archives.
#[cfg(not(feature = "parallel"))]
pub fn index_local_archives<P>(paths: &[P]) -> Result<Vec<Archive>>
where
    P: AsRef<Path> + Sync,
{
    paths.iter().map(Archive::open_path).collect()
}
