//! Locating the structural regions of an archive.
//!
//! An APK is laid out as:
//!
//! ```text
//! [local headers + data ...][signing block?][central directory][EOCD + comment]
//! ```
//!
//! [`ArchiveMap::locate`] finds the end-of-central-directory record by
//! scanning backwards (the record is followed by a variable-length comment),
//! reads the central directory span from it, and then probes for a signing
//! block immediately before the central directory.

use super::reader::{le_u16, le_u32, le_u64};
use super::{
    CD_SIGNATURE, EOCD_MIN_SIZE, EOCD_SIGNATURE, SIGNING_BLOCK_MAGIC, SIGNING_BLOCK_MIN_SIZE,
    eocd_field,
};
use crate::{Error, Result};

/// A contiguous byte region of an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    /// Offset of the first byte.
    pub offset: u64,
    /// Length in bytes.
    pub size: u64,
}

impl Span {
    /// Creates a span.
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// Offset one past the last byte.
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    /// Returns the bytes covered by this span, if they lie inside `buf`.
    pub fn slice<'a>(&self, buf: &'a [u8]) -> Option<&'a [u8]> {
        let start = usize::try_from(self.offset).ok()?;
        let end = usize::try_from(self.end()).ok()?;
        buf.get(start..end)
    }
}

/// Structural offsets of an archive.
///
/// Every region is `None` until resolved. A map returned by
/// [`ArchiveMap::locate`] always has the end-of-central-directory record
/// and the central directory resolved; the signing block is resolved only
/// when its magic and both mirrored size fields check out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveMap {
    /// The end-of-central-directory record, including its comment.
    pub eocd: Option<Span>,
    /// The central directory.
    pub central_directory: Option<Span>,
    /// The APK signing block, including both size fields and the magic.
    pub signature: Option<Span>,
}

impl ArchiveMap {
    /// Locates the EOCD record, central directory and signing block of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedArchive`] if no EOCD signature is found, or
    /// if the central directory offset does not point at a central directory
    /// header. A missing or inconsistent signing block is not an error.
    pub fn locate(bytes: &[u8]) -> Result<Self> {
        let eocd_offset = find_eocd(bytes)?;
        let comment_len = le_u16(bytes, eocd_offset + eocd_field::COMMENT_LEN).unwrap_or(0);
        // The comment may be truncated or followed by garbage; only count what exists.
        let eocd_size = (EOCD_MIN_SIZE + comment_len as usize).min(bytes.len() - eocd_offset);

        let cd_size = le_u32(bytes, eocd_offset + eocd_field::CD_SIZE)
            .ok_or_else(|| Error::malformed("truncated end of central directory"))?;
        let cd_offset = le_u32(bytes, eocd_offset + eocd_field::CD_OFFSET)
            .ok_or_else(|| Error::malformed("truncated end of central directory"))?;
        let central_directory = Span::new(u64::from(cd_offset), u64::from(cd_size));

        if le_u32(bytes, cd_offset as usize) != Some(CD_SIGNATURE) {
            return Err(Error::malformed(format!(
                "no central directory header at offset {cd_offset:#x}"
            )));
        }
        if central_directory.slice(bytes).is_none() {
            return Err(Error::malformed(format!(
                "central directory {cd_offset:#x}+{cd_size:#x} exceeds archive size {:#x}",
                bytes.len()
            )));
        }

        let signature = find_signing_block(bytes, cd_offset as usize);
        log::trace!(
            "eocd at {:#x} ({} bytes), central directory at {:#x} ({} bytes), signing block {:?}",
            eocd_offset,
            eocd_size,
            cd_offset,
            cd_size,
            signature
        );

        Ok(Self {
            eocd: Some(Span::new(eocd_offset as u64, eocd_size as u64)),
            central_directory: Some(central_directory),
            signature,
        })
    }

    /// Returns `true` once the EOCD and central directory are resolved.
    pub fn is_resolved(&self) -> bool {
        self.eocd.is_some() && self.central_directory.is_some()
    }
}

/// Scans backwards from `len - 22` for the EOCD signature.
fn find_eocd(bytes: &[u8]) -> Result<usize> {
    if bytes.len() < EOCD_MIN_SIZE {
        return Err(Error::malformed(format!(
            "{} bytes is too small to hold an end of central directory record",
            bytes.len()
        )));
    }

    (0..=bytes.len() - EOCD_MIN_SIZE)
        .rev()
        .find(|&offset| le_u32(bytes, offset) == Some(EOCD_SIGNATURE))
        .ok_or_else(|| Error::malformed("end of central directory signature not found"))
}

/// Probes for a signing block ending right before `cd_offset`.
///
/// Layout, working backwards from the central directory:
///
/// ```text
/// [u64 size][id-value pairs ...][u64 size][magic: 16 bytes] | central directory
/// ^ block start = cd_offset - size - 8
/// ```
fn find_signing_block(bytes: &[u8], cd_offset: usize) -> Option<Span> {
    let magic_offset = cd_offset.checked_sub(SIGNING_BLOCK_MAGIC.len())?;
    if bytes.get(magic_offset..cd_offset)? != SIGNING_BLOCK_MAGIC {
        return None;
    }

    let size = le_u64(bytes, magic_offset.checked_sub(8)?)?;
    if size < SIGNING_BLOCK_MIN_SIZE {
        log::debug!("signing block size {size} is smaller than its own trailer, ignoring");
        return None;
    }
    let block_start = (cd_offset as u64).checked_sub(size)?.checked_sub(8)?;
    let mirrored = le_u64(bytes, usize::try_from(block_start).ok()?)?;
    if mirrored != size {
        log::debug!(
            "signing block size fields disagree ({mirrored} at {block_start:#x} vs {size}), ignoring"
        );
        return None;
    }

    Some(Span::new(block_start, size + 8))
}
