//! Local file headers and entry data.

use super::map::Span;
use super::reader::{le_u16, le_u32};
use super::{LOCAL_HEADER_SIZE, LOCAL_SIGNATURE, method};
use crate::{Error, Result};

/// The variable-length part of a local file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalHeader {
    /// Offset of the header inside the archive.
    pub offset: u64,
    /// File name length.
    pub name_len: u16,
    /// Extra field length. Alignment tools pad this, so it may differ from
    /// the central directory's copy.
    pub extra_len: u16,
}

impl LocalHeader {
    /// Total header length, including name and extra field.
    pub fn header_len(&self) -> u64 {
        LOCAL_HEADER_SIZE as u64 + u64::from(self.name_len) + u64::from(self.extra_len)
    }

    /// Offset of the first data byte.
    pub fn data_offset(&self) -> u64 {
        self.offset + self.header_len()
    }
}

/// Reads the local file header at `offset`, if one is there.
pub fn read_local_header(bytes: &[u8], offset: u64) -> Option<LocalHeader> {
    let pos = usize::try_from(offset).ok()?;
    if le_u32(bytes, pos)? != LOCAL_SIGNATURE {
        return None;
    }
    Some(LocalHeader {
        offset,
        name_len: le_u16(bytes, pos + 26)?,
        extra_len: le_u16(bytes, pos + 28)?,
    })
}

/// Returns the span of an entry's stored data.
pub fn data_span(
    bytes: &[u8],
    path: &str,
    local_header_offset: u64,
    compressed_size: u64,
) -> Result<Span> {
    let header = read_local_header(bytes, local_header_offset).ok_or_else(|| {
        Error::malformed(format!(
            "no local file header for {path} at offset {local_header_offset:#x}"
        ))
    })?;
    let span = Span::new(header.data_offset(), compressed_size);
    if span.slice(bytes).is_none() {
        return Err(Error::malformed(format!(
            "data of {path} ({:#x}+{compressed_size:#x}) exceeds archive size {:#x}",
            span.offset,
            bytes.len()
        )));
    }
    Ok(span)
}

/// Decodes stored entry data.
///
/// `max_size` bounds the decoded output; entries claiming or producing more
/// fail with [`Error::ResourceLimitExceeded`].
pub fn decode(
    path: &str,
    compression: u16,
    raw: &[u8],
    size_hint: u64,
    max_size: u64,
) -> Result<Vec<u8>> {
    if size_hint > max_size {
        return Err(Error::ResourceLimitExceeded(format!(
            "{path} inflates to {size_hint} bytes, limit is {max_size}"
        )));
    }

    match compression {
        method::STORED => Ok(raw.to_vec()),
        #[cfg(feature = "deflate")]
        method::DEFLATED => inflate(path, raw, size_hint, max_size),
        other => Err(Error::UnsupportedMethod {
            method: other,
            path: path.to_string(),
        }),
    }
}

#[cfg(feature = "deflate")]
fn inflate(path: &str, raw: &[u8], size_hint: u64, max_size: u64) -> Result<Vec<u8>> {
    use std::io::Read;

    let mut out = Vec::with_capacity(size_hint as usize);
    flate2::read::DeflateDecoder::new(raw)
        .take(max_size + 1)
        .read_to_end(&mut out)?;
    if out.len() as u64 > max_size {
        return Err(Error::ResourceLimitExceeded(format!(
            "{path} inflates past the {max_size} byte limit"
        )));
    }
    Ok(out)
}
