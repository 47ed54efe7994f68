//! Byte-range patches between two snapshots of the same archive.
//!
//! A patch turns the bytes of the archive installed on the device (the
//! *source*) into the bytes of the freshly built archive (the
//! *destination*). It is a list of `(offset, length)` instructions into the
//! destination plus one blob holding the replacement bytes for every
//! instruction, in instruction order. Everything not covered by an
//! instruction is copied from the source at the same offset.
//!
//! # Overview
//!
//! - **[`PatchGenerator`]**: builds one [`Patch`] for an archive pair
//! - **[`PatchSetGenerator`]**: builds a [`PatchSet`] for a whole install
//! - **[`CleanAreaMap`]**: known-identical ranges and their inversion
//! - **[`apply`]**: the device-side semantics, for verification
//!
//! Oversized patches are reported through
//! [`PatchStatus::SizeThresholdExceeded`] rather than an error, and the
//! generator stops collecting data as soon as the budget is crossed.
//!
//! # Example
//!
//! ```rust
//! use apkdelta::patch::{Patch, PatchInstruction, PatchStatus, apply};
//!
//! let patch = Patch {
//!     status: PatchStatus::Ok,
//!     source_path: "base.apk".into(),
//!     destination_size: 6,
//!     instructions: vec![PatchInstruction::new(2, 2)],
//!     data: b"XY".to_vec(),
//! };
//! let out = apply(&patch, b"abcdefgh").unwrap();
//! assert_eq!(out, b"abXYef");
//!
//! let decoded = Patch::decode(&patch.encode()).unwrap();
//! assert_eq!(decoded, patch);
//! ```

mod apply;
mod areas;
mod generator;

use std::io::{self, Read, Write};

pub use apply::apply;
pub use areas::{AreaConflict, ByteRange, CleanAreaMap};
pub use generator::{PatchGenerator, PatchSet, PatchSetGenerator};

use crate::Result;

/// Default budget, in bytes, for instructions plus data.
pub const MAX_PATCH_SIZE: u64 = 40 * 1024 * 1024;

/// Wire size of one instruction.
pub(crate) const INSTRUCTION_SIZE: u64 = 8;

/// Outcome of patch generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatchStatus {
    /// The patch is usable.
    Ok,
    /// Every archive of the set is byte-identical to the installed one.
    NoChanges,
    /// The inputs could not be patched (mismatched sets, overlapping clean
    /// areas, offsets out of range, missing local bytes).
    Invalid,
    /// Instructions plus data would exceed the size budget.
    SizeThresholdExceeded,
}

/// One dirty range of the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PatchInstruction {
    /// Offset in the destination archive.
    pub offset: u32,
    /// Number of bytes taken from the patch data.
    pub length: u32,
}

impl PatchInstruction {
    /// Creates an instruction.
    pub fn new(offset: u32, length: u32) -> Self {
        Self { offset, length }
    }
}

/// Instructions turning one installed archive into its new version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    /// Generation outcome. Only [`PatchStatus::Ok`] patches are sent.
    pub status: PatchStatus,
    /// The installed archive the patch applies to.
    pub source_path: String,
    /// Size of the patched archive.
    pub destination_size: u64,
    /// Dirty ranges, ascending and non-overlapping.
    pub instructions: Vec<PatchInstruction>,
    /// Replacement bytes for every instruction, concatenated.
    pub data: Vec<u8>,
}

impl Patch {
    /// A patch that keeps the installed file as is.
    pub fn clean(source_path: impl Into<String>, destination_size: u64) -> Self {
        Self::with_status(PatchStatus::Ok, source_path, destination_size)
    }

    /// A patch carrying only a status and no instructions.
    pub(crate) fn with_status(
        status: PatchStatus,
        source_path: impl Into<String>,
        destination_size: u64,
    ) -> Self {
        Self {
            status,
            source_path: source_path.into(),
            destination_size,
            instructions: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Returns `true` for a usable patch with no instructions.
    pub fn is_clean(&self) -> bool {
        self.status == PatchStatus::Ok && self.instructions.is_empty()
    }

    /// Bytes counted against the budget: 8 per instruction plus the data.
    pub fn size(&self) -> u64 {
        self.instructions.len() as u64 * INSTRUCTION_SIZE + self.data.len() as u64
    }

    /// Writes the wire form:
    ///
    /// ```text
    /// u32 path length, path (UTF-8)
    /// u64 destination size
    /// u32 instruction count, (u32 offset, u32 length) per instruction
    /// u64 data length, data
    /// ```
    ///
    /// All integers are little-endian. The status is not part of the wire
    /// form.
    pub fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        let path = self.source_path.as_bytes();
        writer.write_all(&(path.len() as u32).to_le_bytes())?;
        writer.write_all(path)?;
        writer.write_all(&self.destination_size.to_le_bytes())?;
        writer.write_all(&(self.instructions.len() as u32).to_le_bytes())?;
        for instruction in &self.instructions {
            writer.write_all(&instruction.offset.to_le_bytes())?;
            writer.write_all(&instruction.length.to_le_bytes())?;
        }
        writer.write_all(&(self.data.len() as u64).to_le_bytes())?;
        writer.write_all(&self.data)?;
        Ok(())
    }

    /// Returns the wire form as a buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.source_path.len() + self.size() as usize + 24);
        // Writing into a Vec cannot fail.
        let _ = self.write_to(&mut out);
        out
    }

    /// Reads a patch in wire form. The decoded status is [`PatchStatus::Ok`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) on truncated input, a
    /// non-UTF-8 path, or data whose length does not match the
    /// instructions.
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self> {
        let path_len = read_u32(&mut reader)? as u64;
        let path = read_exact_vec(&mut reader, path_len)?;
        let source_path = String::from_utf8(path).map_err(|e| invalid_data(e.to_string()))?;
        let destination_size = read_u64(&mut reader)?;

        let count = read_u32(&mut reader)? as usize;
        let mut instructions = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            let offset = read_u32(&mut reader)?;
            let length = read_u32(&mut reader)?;
            instructions.push(PatchInstruction::new(offset, length));
        }

        let data_len = read_u64(&mut reader)?;
        let expected: u64 = instructions.iter().map(|i| u64::from(i.length)).sum();
        if data_len != expected {
            return Err(invalid_data(format!(
                "patch data is {data_len} bytes, instructions cover {expected}"
            ))
            .into());
        }
        let data = read_exact_vec(&mut reader, data_len)?;

        Ok(Self {
            status: PatchStatus::Ok,
            source_path,
            destination_size,
            instructions,
            data,
        })
    }

    /// Decodes a patch from a buffer.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Self::read_from(bytes)
    }
}

fn invalid_data(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Reads exactly `len` bytes without trusting `len` for the allocation.
fn read_exact_vec<R: Read>(reader: &mut R, len: u64) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    reader.take(len).read_to_end(&mut out)?;
    if (out.len() as u64) < len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("expected {len} bytes, got {}", out.len()),
        ));
    }
    Ok(out)
}
