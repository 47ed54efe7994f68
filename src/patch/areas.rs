//! Clean and dirty byte ranges of a destination archive.

use std::fmt;

/// A half-open byte range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ByteRange {
    /// First byte.
    pub start: u64,
    /// One past the last byte.
    pub end: u64,
}

impl ByteRange {
    /// Creates a range from a start offset and a length.
    pub fn new(start: u64, len: u64) -> Self {
        Self {
            start,
            end: start + len,
        }
    }

    /// Length in bytes.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Returns `true` for a zero-length range.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}, {:#x})", self.start, self.end)
    }
}

/// Clean areas that cannot be inverted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AreaConflict {
    /// Two clean areas share bytes.
    #[error("clean areas {first} and {second} overlap")]
    Overlap {
        /// The area that starts first.
        first: ByteRange,
        /// The area that starts inside `first`.
        second: ByteRange,
    },
    /// A clean area extends past the end of the archive.
    #[error("clean area {area} extends past the archive size {size:#x}")]
    OutOfBounds {
        /// The offending area.
        area: ByteRange,
        /// Archive size.
        size: u64,
    },
}

/// Ranges of a destination archive known to be identical in the source.
///
/// Callers mark clean areas in any order; everything else is dirty.
/// Clean areas must not overlap. [`dirty_ranges`](Self::dirty_ranges)
/// reports an overlap as an [`AreaConflict`] rather than merging the areas,
/// because overlapping input means the caller's notion of "unchanged" is
/// already inconsistent.
#[derive(Debug, Clone)]
pub struct CleanAreaMap {
    size: u64,
    areas: Vec<ByteRange>,
}

impl CleanAreaMap {
    /// Creates a map for an archive of `size` bytes with nothing clean.
    pub fn new(size: u64) -> Self {
        Self {
            size,
            areas: Vec::new(),
        }
    }

    /// Marks `len` bytes at `start` as clean. Empty areas are ignored.
    pub fn mark_clean(&mut self, start: u64, len: u64) {
        if len > 0 {
            self.areas.push(ByteRange::new(start, len));
        }
    }

    /// Returns the archive size.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns the number of clean areas marked.
    pub fn clean_count(&self) -> usize {
        self.areas.len()
    }

    /// Returns the total number of clean bytes.
    pub fn clean_bytes(&self) -> u64 {
        self.areas.iter().map(ByteRange::len).sum()
    }

    /// Inverts the clean areas into ascending dirty ranges.
    ///
    /// Sentinel areas at offset 0 and at the archive end make the leading
    /// and trailing gaps come out as dirty ranges too. Adjacent clean
    /// areas leave no gap between them.
    pub fn dirty_ranges(&self) -> Result<Vec<ByteRange>, AreaConflict> {
        let mut sorted = self.areas.clone();
        sorted.sort_unstable();

        if let Some(area) = sorted.iter().find(|a| a.end > self.size) {
            return Err(AreaConflict::OutOfBounds {
                area: *area,
                size: self.size,
            });
        }

        let mut dirty = Vec::new();
        let mut cursor = ByteRange::new(0, 0);
        let sentinel = ByteRange::new(self.size, 0);
        for next in sorted.iter().chain(std::iter::once(&sentinel)) {
            if next.start < cursor.end {
                return Err(AreaConflict::Overlap {
                    first: cursor,
                    second: *next,
                });
            }
            if next.start > cursor.end {
                dirty.push(ByteRange {
                    start: cursor.end,
                    end: next.start,
                });
            }
            cursor = *next;
        }
        Ok(dirty)
    }
}
