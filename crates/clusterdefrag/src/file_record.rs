//! Per-file extent list with derived placement summary.

use serde::{Deserialize, Serialize};

use crate::extent::{Extent, ExtentId};
use crate::extent_index::ExtentIndex;

/// A tracked file: its extent handles in VCN order plus derived fields.
///
/// `first_lcn` and `total_size` are recomputed by [`FileRecord::refresh`]
/// after every mutation the model performs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    path: String,
    extents: Vec<ExtentId>,
    first_lcn: u64,
    total_size: u64,
}

impl FileRecord {
    /// Creates a record over already-indexed extents and derives its summary.
    pub fn new(path: impl Into<String>, extents: Vec<ExtentId>, index: &ExtentIndex) -> Self {
        let mut record = Self {
            path: path.into(),
            extents,
            first_lcn: 0,
            total_size: 0,
        };
        record.refresh(index);
        record
    }

    /// Full path of the file.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Extent handles in VCN order.
    pub fn extents(&self) -> &[ExtentId] {
        &self.extents
    }

    /// Lowest LCN over all extents.
    pub fn first_lcn(&self) -> u64 {
        self.first_lcn
    }

    /// Total clusters over all extents.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Number of extents.
    pub fn fragment_count(&self) -> usize {
        self.extents.len()
    }

    /// Returns true if the file is split over more than one extent.
    pub fn is_fragmented(&self) -> bool {
        self.extents.len() > 1
    }

    /// Returns true if the handle belongs to this file.
    pub fn contains(&self, id: ExtentId) -> bool {
        self.extents.contains(&id)
    }

    /// Resolves the handles to extent values, in VCN order.
    pub fn resolve(&self, index: &ExtentIndex) -> Vec<Extent> {
        self.extents.iter().map(|id| *index.get(*id)).collect()
    }

    /// Recomputes `first_lcn` and `total_size` from the index.
    pub fn refresh(&mut self, index: &ExtentIndex) {
        self.first_lcn = self
            .extents
            .iter()
            .map(|id| index.get(*id).lcn)
            .min()
            .unwrap_or(0);
        self.total_size = self.extents.iter().map(|id| index.get(*id).size).sum();
    }

    pub(crate) fn remove_at(&mut self, position: usize) -> ExtentId {
        self.extents.remove(position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extent::FileId;

    #[test]
    fn test_derived_fields() {
        let mut index = ExtentIndex::new();
        let a = index.insert(Extent::new(0, 300, 4), FileId(0));
        let b = index.insert(Extent::new(4, 120, 6), FileId(0));
        let record = FileRecord::new("D:\\x.dat", vec![a, b], &index);

        assert_eq!(record.first_lcn(), 120);
        assert_eq!(record.total_size(), 10);
        assert_eq!(record.fragment_count(), 2);
        assert!(record.is_fragmented());
        assert!(record.contains(b));
        assert_eq!(record.resolve(&index)[1], Extent::new(4, 120, 6));
    }

    #[test]
    fn test_refresh_after_relocation() {
        let mut index = ExtentIndex::new();
        let a = index.insert(Extent::new(0, 300, 4), FileId(0));
        let mut record = FileRecord::new("f", vec![a], &index);
        assert!(!record.is_fragmented());

        index.relocate(a, 40);
        record.refresh(&index);
        assert_eq!(record.first_lcn(), 40);
        assert_eq!(record.total_size(), 4);
    }
}
