use super::Patch;
use crate::{Error, Result};

/// Applies `patch` to the installed archive bytes `source`.
///
/// The source is truncated or zero-extended to the destination size, then
/// every instruction range is overwritten with the next slice of patch
/// data. A clean patch returns the source resized to the destination size.
///
/// # Errors
///
/// Returns [`Error::PreconditionViolation`] if an instruction reaches past
/// the destination size or the data does not match the instructions.
pub fn apply(patch: &Patch, source: &[u8]) -> Result<Vec<u8>> {
    let size = usize::try_from(patch.destination_size).map_err(|_| {
        Error::PreconditionViolation(format!(
            "destination size {} does not fit in memory",
            patch.destination_size
        ))
    })?;

    let mut out = source[..source.len().min(size)].to_vec();
    out.resize(size, 0);

    let mut data = patch.data.as_slice();
    for instruction in &patch.instructions {
        let start = instruction.offset as usize;
        let len = instruction.length as usize;
        let end = start + len;
        if end > size {
            return Err(Error::PreconditionViolation(format!(
                "instruction {start:#x}+{len:#x} exceeds destination size {size:#x}"
            )));
        }
        if data.len() < len {
            return Err(Error::PreconditionViolation(format!(
                "patch data ends {} bytes short of instruction at {start:#x}",
                len - data.len()
            )));
        }
        let (chunk, rest) = data.split_at(len);
        out[start..end].copy_from_slice(chunk);
        data = rest;
    }

    if !data.is_empty() {
        return Err(Error::PreconditionViolation(format!(
            "{} bytes of patch data left over",
            data.len()
        )));
    }
    Ok(out)
}
