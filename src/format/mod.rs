//! ZIP/APK structural constants and low-level index parsing.
//!
//! Only the parts of the ZIP layout needed to fingerprint and diff an
//! archive are parsed: the end-of-central-directory record, the central
//! directory, the optional APK signing block sitting in front of it, and
//! local file headers (to locate entry data).

pub mod central;
pub mod local;
pub mod map;
pub mod reader;

pub use central::{CentralRecord, read_central_directory};
pub use map::{ArchiveMap, Span};

/// End-of-central-directory record signature (`PK\x05\x06`).
pub const EOCD_SIGNATURE: u32 = 0x0605_4b50;

/// Size of the fixed part of the end-of-central-directory record.
///
/// - 4 bytes: signature
/// - 4 x 2 bytes: disk numbers and entry counts (ignored)
/// - 4 bytes: central directory size
/// - 4 bytes: central directory offset
/// - 2 bytes: comment length
pub const EOCD_MIN_SIZE: usize = 22;

/// Central directory file header signature (`PK\x01\x02`).
pub const CD_SIGNATURE: u32 = 0x0201_4b50;

/// Size of the fixed part of a central directory file header.
pub const CD_HEADER_SIZE: usize = 46;

/// Local file header signature (`PK\x03\x04`).
pub const LOCAL_SIGNATURE: u32 = 0x0403_4b50;

/// Size of the fixed part of a local file header.
pub const LOCAL_HEADER_SIZE: usize = 30;

/// Magic trailing an APK signing block, immediately before the central directory.
pub const SIGNING_BLOCK_MAGIC: &[u8; 16] = b"APK Sig Block 42";

/// Smallest possible signing block payload: the trailing size field plus the magic.
pub const SIGNING_BLOCK_MIN_SIZE: u64 = 24;

/// Offsets of the fields inside a central directory file header.
pub mod cd_field {
    /// Compression method (u16).
    pub const METHOD: usize = 10;
    /// CRC-32 of the uncompressed data (u32).
    pub const CRC32: usize = 16;
    /// Compressed size (u32).
    pub const COMPRESSED_SIZE: usize = 20;
    /// Uncompressed size (u32).
    pub const UNCOMPRESSED_SIZE: usize = 24;
    /// File name length (u16).
    pub const NAME_LEN: usize = 28;
    /// Extra field length (u16).
    pub const EXTRA_LEN: usize = 30;
    /// File comment length (u16).
    pub const COMMENT_LEN: usize = 32;
    /// Offset of the entry's local file header (u32).
    pub const LOCAL_HEADER_OFFSET: usize = 42;
}

/// Offsets of the fields inside the end-of-central-directory record.
pub mod eocd_field {
    /// Central directory size (u32).
    pub const CD_SIZE: usize = 12;
    /// Central directory offset (u32).
    pub const CD_OFFSET: usize = 16;
    /// Comment length (u16).
    pub const COMMENT_LEN: usize = 20;
}

/// ZIP compression methods the crate can read.
pub mod method {
    /// No compression.
    pub const STORED: u16 = 0;
    /// Raw deflate.
    pub const DEFLATED: u16 = 8;
}
