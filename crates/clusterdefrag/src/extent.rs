//! Core value types shared by the model, the I/O collaborator and the strategies.

use core::fmt;
use serde::{Deserialize, Serialize};

/// A contiguous run of clusters backing a contiguous run of a file's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Extent {
    /// Offset (in clusters) within the file where this run begins.
    pub vcn: u64,
    /// Starting physical cluster.
    pub lcn: u64,
    /// Length in clusters.
    pub size: u64,
}

impl Extent {
    /// Creates a new extent.
    pub fn new(vcn: u64, lcn: u64, size: u64) -> Self {
        Self { vcn, lcn, size }
    }

    /// First LCN past the end of this extent.
    pub fn lcn_end(&self) -> u64 {
        self.lcn + self.size
    }

    /// First VCN past the end of this extent.
    pub fn vcn_end(&self) -> u64 {
        self.vcn + self.size
    }

    /// Returns true if `next` continues this extent both logically and physically.
    pub fn is_adjacent_to(&self, next: &Extent) -> bool {
        self.vcn_end() == next.vcn && self.lcn_end() == next.lcn
    }

    /// Returns true if this extent shares at least one cluster with `[lcn, end)`.
    pub fn overlaps(&self, lcn: u64, end: u64) -> bool {
        self.lcn < end && lcn < self.lcn_end()
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Extent(vcn={}, lcn={}, size={})", self.vcn, self.lcn, self.size)
    }
}

/// Stable handle of an extent inside the model's extent arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExtentId(pub usize);

impl fmt::Display for ExtentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExtentId({})", self.0)
    }
}

/// Stable handle of a file record inside the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileId(pub usize);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", self.0)
    }
}

/// One maximal (or search-clipped) run of free clusters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FreeBlock {
    /// First free cluster.
    pub lcn: u64,
    /// Number of free clusters.
    pub size: u64,
}

impl FreeBlock {
    /// First LCN past the end of this block.
    pub fn end(&self) -> u64 {
        self.lcn + self.size
    }
}

/// A file as reported by the enumeration collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileExtents {
    /// Full path of the file.
    pub path: String,
    /// Extents in VCN order.
    pub extents: Vec<Extent>,
}

impl FileExtents {
    /// Creates a new file description.
    pub fn new(path: impl Into<String>, extents: Vec<Extent>) -> Self {
        Self {
            path: path.into(),
            extents,
        }
    }
}
