//! Extent arena and LCN index.
//!
//! Every tracked extent lives exactly once in the arena and is addressed by a
//! stable [`ExtentId`]. File records and the LCN map hold handles only, so a
//! relocation performed here is visible through every path at once.

use std::collections::BTreeMap;

use crate::extent::{Extent, ExtentId, FileId};

#[derive(Debug, Clone, PartialEq, Eq)]
struct ExtentSlot {
    extent: Extent,
    owner: FileId,
}

/// Arena of extents keyed by handle, plus a start-LCN lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtentIndex {
    slots: Vec<Option<ExtentSlot>>,
    by_lcn: BTreeMap<u64, ExtentId>,
}

impl ExtentIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live extents.
    pub fn len(&self) -> usize {
        self.by_lcn.len()
    }

    /// Returns true if no extent is tracked.
    pub fn is_empty(&self) -> bool {
        self.by_lcn.is_empty()
    }

    /// Adds an extent owned by `owner`. Panics if another extent already starts at its LCN.
    pub fn insert(&mut self, extent: Extent, owner: FileId) -> ExtentId {
        let id = ExtentId(self.slots.len());
        let previous = self.by_lcn.insert(extent.lcn, id);
        assert!(
            previous.is_none(),
            "LCN {} already indexed by {:?}",
            extent.lcn,
            previous
        );
        self.slots.push(Some(ExtentSlot { extent, owner }));
        id
    }

    fn slot(&self, id: ExtentId) -> &ExtentSlot {
        self.slots
            .get(id.0)
            .and_then(|s| s.as_ref())
            .unwrap_or_else(|| panic!("stale extent handle {}", id))
    }

    fn slot_mut(&mut self, id: ExtentId) -> &mut ExtentSlot {
        self.slots
            .get_mut(id.0)
            .and_then(|s| s.as_mut())
            .unwrap_or_else(|| panic!("stale extent handle {}", id))
    }

    /// Returns the extent behind a live handle.
    pub fn get(&self, id: ExtentId) -> &Extent {
        &self.slot(id).extent
    }

    /// Returns the extent behind a handle, or `None` once it was merged away.
    pub fn try_get(&self, id: ExtentId) -> Option<&Extent> {
        self.slots
            .get(id.0)
            .and_then(|s| s.as_ref())
            .map(|s| &s.extent)
    }

    /// Returns the file owning an extent.
    pub fn owner_of(&self, id: ExtentId) -> FileId {
        self.slot(id).owner
    }

    /// Extent starting exactly at `lcn`.
    pub fn at_lcn(&self, lcn: u64) -> Option<ExtentId> {
        self.by_lcn.get(&lcn).copied()
    }

    /// Extent containing the cluster `lcn`.
    pub fn covering(&self, lcn: u64) -> Option<ExtentId> {
        let (_, id) = self.by_lcn.range(..=lcn).next_back()?;
        (self.get(*id).lcn_end() > lcn).then_some(*id)
    }

    /// Extents sharing at least one cluster with `[start, end)`, in LCN order.
    pub fn overlapping(&self, start: u64, end: u64) -> Vec<ExtentId> {
        let mut found = Vec::new();
        if start >= end {
            return found;
        }
        if let Some((_, id)) = self.by_lcn.range(..start).next_back() {
            if self.get(*id).lcn_end() > start {
                found.push(*id);
            }
        }
        found.extend(self.by_lcn.range(start..end).map(|(_, id)| *id));
        found
    }

    /// Handles of extents starting at or after `lcn`, in LCN order.
    pub fn starting_from(&self, lcn: u64) -> impl Iterator<Item = ExtentId> + '_ {
        self.by_lcn.range(lcn..).map(|(_, id)| *id)
    }

    /// All live extents in LCN order.
    pub fn iter(&self) -> impl Iterator<Item = (ExtentId, &Extent)> + '_ {
        self.by_lcn.values().map(|id| (*id, self.get(*id)))
    }

    /// Re-keys an extent to `new_lcn` and updates it in place.
    pub fn relocate(&mut self, id: ExtentId, new_lcn: u64) {
        let old_lcn = self.get(id).lcn;
        if old_lcn == new_lcn {
            return;
        }
        let removed = self.by_lcn.remove(&old_lcn);
        assert_eq!(removed, Some(id), "LCN {} not keyed to {}", old_lcn, id);
        let previous = self.by_lcn.insert(new_lcn, id);
        assert!(
            previous.is_none(),
            "LCN {} already indexed by {:?}",
            new_lcn,
            previous
        );
        self.slot_mut(id).extent.lcn = new_lcn;
    }

    /// Changes the length of an extent.
    pub fn resize(&mut self, id: ExtentId, new_size: u64) {
        self.slot_mut(id).extent.size = new_size;
    }

    /// Drops an extent from the arena and the LCN map.
    pub fn remove(&mut self, id: ExtentId) -> Extent {
        let lcn = self.get(id).lcn;
        let removed = self.by_lcn.remove(&lcn);
        assert_eq!(removed, Some(id), "LCN {} not keyed to {}", lcn, id);
        let slot = self.slots[id.0].take();
        slot.map(|s| s.extent)
            .unwrap_or_else(|| panic!("stale extent handle {}", id))
    }
}
