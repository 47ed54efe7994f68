//! Central directory walking.

use super::reader::{le_u16, le_u32};
use super::{CD_HEADER_SIZE, CD_SIGNATURE, cd_field};

/// One central directory file header, reduced to the fields the crate uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralRecord {
    /// Entry name (archive-relative path).
    pub name: String,
    /// CRC-32 of the uncompressed data.
    pub crc32: u32,
    /// ZIP compression method.
    pub method: u16,
    /// Size of the stored data.
    pub compressed_size: u64,
    /// Size of the data once inflated.
    pub uncompressed_size: u64,
    /// Offset of the entry's local file header.
    pub local_header_offset: u64,
    /// Length of the central directory extra field.
    pub extra_len: u16,
}

/// Walks the central directory sequentially and returns every record.
///
/// The walk stops cleanly, without error, as soon as fewer than a full
/// header remains or the next four bytes are not a central directory
/// signature. This tolerates trailing non-entry data such as a digital
/// signature record at the end of the directory.
pub fn read_central_directory(cd: &[u8]) -> Vec<CentralRecord> {
    let mut records = Vec::new();
    let mut pos = 0usize;

    while cd.len() - pos >= CD_HEADER_SIZE {
        if le_u32(cd, pos) != Some(CD_SIGNATURE) {
            log::trace!("central directory walk stopped at {pos:#x}: no header signature");
            break;
        }
        let Some((record, record_len)) = read_record(cd, pos) else {
            log::trace!("central directory walk stopped at {pos:#x}: truncated record");
            break;
        };
        records.push(record);
        pos += record_len;
    }

    records
}

fn read_record(cd: &[u8], pos: usize) -> Option<(CentralRecord, usize)> {
    let field = |offset: usize| pos + offset;

    let method = le_u16(cd, field(cd_field::METHOD))?;
    let crc32 = le_u32(cd, field(cd_field::CRC32))?;
    let compressed_size = le_u32(cd, field(cd_field::COMPRESSED_SIZE))?;
    let uncompressed_size = le_u32(cd, field(cd_field::UNCOMPRESSED_SIZE))?;
    let name_len = le_u16(cd, field(cd_field::NAME_LEN))? as usize;
    let extra_len = le_u16(cd, field(cd_field::EXTRA_LEN))?;
    let comment_len = le_u16(cd, field(cd_field::COMMENT_LEN))? as usize;
    let local_header_offset = le_u32(cd, field(cd_field::LOCAL_HEADER_OFFSET))?;

    let name_start = pos + CD_HEADER_SIZE;
    let name = cd.get(name_start..name_start + name_len)?;
    let record_len = CD_HEADER_SIZE + name_len + extra_len as usize + comment_len;
    if pos + record_len > cd.len() {
        return None;
    }

    Some((
        CentralRecord {
            name: String::from_utf8_lossy(name).into_owned(),
            crc32,
            method,
            compressed_size: u64::from(compressed_size),
            uncompressed_size: u64::from(uncompressed_size),
            local_header_offset: u64::from(local_header_offset),
            extra_len,
        },
        record_len,
    ))
}
