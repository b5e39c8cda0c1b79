//! In-memory volume model for one planning run.
//!
//! [`VolumeModel`] owns the allocation bitmap, the extent index and every
//! tracked file record. All mutation goes through [`VolumeModel::move_file_data`]
//! and [`VolumeModel::compact_file_structure`], which update the three together
//! so that later free-space searches can trust the bitmap.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bitmap::ClusterBitmap;
use crate::error::{PlannerError, PlannerResult};
use crate::extent::{Extent, ExtentId, FileExtents, FileId, FreeBlock};
use crate::extent_index::ExtentIndex;
use crate::file_record::FileRecord;
use crate::io::VolumeIo;

/// Volume-wide fragmentation summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FragmentationReport {
    /// Clusters covered by the bitmap.
    pub total_clusters: u64,
    /// Allocated clusters.
    pub used_clusters: u64,
    /// Free clusters.
    pub free_clusters: u64,
    /// Allocated clusters not attributable to a tracked file.
    pub unmovable_clusters: u64,
    /// Number of maximal free runs.
    pub free_block_count: usize,
    /// Length of the longest free run.
    pub largest_free_block: u64,
    /// Tracked files.
    pub file_count: usize,
    /// Tracked files with more than one extent.
    pub fragmented_files: usize,
    /// Tracked extents.
    pub total_extents: usize,
    /// Mean extents per tracked file.
    pub average_fragments: f64,
    /// How scattered the free space is (0 = one run, towards 100 = many small runs).
    pub free_space_fragmentation: f64,
}

/// Bitmap, extent index and file records of one volume snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeModel {
    bitmap: ClusterBitmap,
    index: ExtentIndex,
    files: Vec<FileRecord>,
    by_path: HashMap<String, FileId>,
    unmovable: BTreeMap<u64, u64>,
    skipped_files: usize,
}

/// Builds a model from a bitmap and an enumerated file list.
pub fn build_model(bitmap: ClusterBitmap, files: Vec<FileExtents>) -> VolumeModel {
    VolumeModel::build(bitmap, files)
}

fn validate_extents(
    extents: &[Extent],
    bitmap: &ClusterBitmap,
    index: &ExtentIndex,
) -> Result<(), String> {
    let mut expected_vcn = 0;
    for e in extents {
        if e.size == 0 {
            return Err(format!("zero-length extent at vcn {}", e.vcn));
        }
        if e.vcn != expected_vcn {
            return Err(format!("expected vcn {}, found {}", expected_vcn, e.vcn));
        }
        if !bitmap.contains_range(e.lcn, e.size) {
            return Err(format!("{} lies outside the bitmap", e));
        }
        if !index.overlapping(e.lcn, e.lcn_end()).is_empty() {
            return Err(format!("{} overlaps another file", e));
        }
        expected_vcn = e.vcn_end();
    }

    let mut by_lcn: Vec<&Extent> = extents.iter().collect();
    by_lcn.sort_by_key(|e| e.lcn);
    if by_lcn.windows(2).any(|w| w[0].lcn_end() > w[1].lcn) {
        return Err("extents overlap each other".to_string());
    }
    Ok(())
}

fn derive_unmovable(bitmap: &ClusterBitmap, index: &ExtentIndex) -> BTreeMap<u64, u64> {
    let mut regions = BTreeMap::new();
    let mut lcn = bitmap.starting_lcn();
    while let Some(start) = bitmap.next_used(lcn) {
        let end = bitmap.next_free(start).unwrap_or(bitmap.end());
        let mut cursor = start;
        for id in index.overlapping(start, end) {
            let e = index.get(id);
            if e.lcn > cursor {
                regions.insert(cursor, e.lcn - cursor);
            }
            cursor = cursor.max(e.lcn_end());
        }
        if cursor < end {
            regions.insert(cursor, end - cursor);
        }
        lcn = end;
    }
    regions
}

impl VolumeModel {
    /// Builds the model from a snapshot.
    ///
    /// Empty files are excluded. Files whose extent lists are malformed, leave
    /// the bitmap or collide with an already accepted file are skipped, and
    /// their clusters end up in the unmovable set. Clusters of accepted extents
    /// that the bitmap reports free are marked allocated.
    pub fn build(mut bitmap: ClusterBitmap, files: Vec<FileExtents>) -> Self {
        let mut index = ExtentIndex::new();
        let mut records: Vec<FileRecord> = Vec::new();
        let mut by_path = HashMap::new();
        let mut skipped_files = 0;

        for FileExtents { path, mut extents } in files {
            if extents.is_empty() {
                continue;
            }
            if by_path.contains_key(&path) {
                warn!("Skipping duplicate file record {}", path);
                skipped_files += 1;
                continue;
            }
            extents.sort_by_key(|e| e.vcn);
            if let Err(reason) = validate_extents(&extents, &bitmap, &index) {
                warn!("Skipping {}: {}", path, reason);
                skipped_files += 1;
                continue;
            }

            let id = FileId(records.len());
            let mut handles = Vec::with_capacity(extents.len());
            for e in &extents {
                if !(e.lcn..e.lcn_end()).all(|c| bitmap.get(c)) {
                    debug!("Bitmap reports part of {} of {} free, marking used", e, path);
                    bitmap.set_range(e.lcn, e.size, true);
                }
                handles.push(index.insert(*e, id));
            }
            records.push(FileRecord::new(path.clone(), handles, &index));
            by_path.insert(path, id);
        }

        let unmovable = derive_unmovable(&bitmap, &index);

        info!(
            "Volume model built: {} clusters from LCN {}, {} files, {} extents, {} unmovable regions, {} skipped files",
            bitmap.len(),
            bitmap.starting_lcn(),
            records.len(),
            index.len(),
            unmovable.len(),
            skipped_files
        );

        Self {
            bitmap,
            index,
            files: records,
            by_path,
            unmovable,
            skipped_files,
        }
    }

    /// Fetches the bitmap and the file list concurrently, then builds the model.
    pub async fn load<E: VolumeIo>(io: &E) -> PlannerResult<Self> {
        let (bitmap, files) = tokio::try_join!(io.get_volume_bitmap(), io.enumerate_files())?;
        Ok(Self::build(bitmap, files))
    }

    /// The allocation bitmap.
    pub fn bitmap(&self) -> &ClusterBitmap {
        &self.bitmap
    }

    /// The extent index.
    pub fn index(&self) -> &ExtentIndex {
        &self.index
    }

    /// Number of tracked files.
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Records skipped while building the model.
    pub fn skipped_files(&self) -> usize {
        self.skipped_files
    }

    /// A tracked file. Panics on a handle this model did not issue.
    pub fn file(&self, id: FileId) -> &FileRecord {
        &self.files[id.0]
    }

    /// Looks a file up by path.
    pub fn file_by_path(&self, path: &str) -> Option<FileId> {
        self.by_path.get(path).copied()
    }

    /// All tracked files in build order.
    pub fn files(&self) -> impl Iterator<Item = (FileId, &FileRecord)> + '_ {
        self.files.iter().enumerate().map(|(i, f)| (FileId(i), f))
    }

    /// Files whose path starts with `prefix`, sorted by path.
    pub fn files_with_prefix(&self, prefix: &str) -> Vec<FileId> {
        let mut ids: Vec<FileId> = self
            .files()
            .filter(|(_, f)| f.path().starts_with(prefix))
            .map(|(id, _)| id)
            .collect();
        ids.sort_by(|a, b| self.file(*a).path().cmp(self.file(*b).path()));
        ids
    }

    /// The extent behind a handle.
    pub fn extent(&self, id: ExtentId) -> &Extent {
        self.index.get(id)
    }

    /// A file's extents in VCN order.
    pub fn file_extents(&self, id: FileId) -> Vec<Extent> {
        self.file(id).resolve(&self.index)
    }

    /// Allocated-but-untracked runs (start LCN -> length), fixed at build time.
    pub fn unmovable_regions(&self) -> &BTreeMap<u64, u64> {
        &self.unmovable
    }

    /// Returns true if `[start, end)` shares a cluster with an unmovable region.
    pub fn overlaps_unmovable(&self, start: u64, end: u64) -> bool {
        match self.unmovable.range(..end).next_back() {
            Some((lcn, len)) => lcn + len > start,
            None => false,
        }
    }

    /// Current file list in the collaborator's format.
    pub fn snapshot(&self) -> Vec<FileExtents> {
        self.files
            .iter()
            .map(|f| FileExtents::new(f.path(), f.resolve(&self.index)))
            .collect()
    }

    /// First free run of at least `min_size` clusters at or after `start_lcn`.
    ///
    /// The run may begin exactly at `start_lcn`, even inside a larger free run.
    /// Shorter runs on the way are skipped. Cluster 0 is never returned and a
    /// `min_size` of 0 is treated as 1.
    pub fn find_free_block(&self, start_lcn: u64, min_size: u64) -> Option<FreeBlock> {
        let min_size = min_size.max(1);
        let mut cursor = start_lcn.max(1);
        loop {
            let lcn = self.bitmap.next_free(cursor)?;
            let end = self.bitmap.next_used(lcn).unwrap_or(self.bitmap.end());
            if end - lcn >= min_size {
                return Some(FreeBlock {
                    lcn,
                    size: end - lcn,
                });
            }
            cursor = end;
        }
    }

    /// Lazily yields successive free runs of at least `min_size` clusters.
    pub fn find_free_blocks(&self, start_lcn: u64, min_size: u64) -> FreeBlocks<'_> {
        FreeBlocks {
            model: self,
            next: start_lcn,
            min_size,
        }
    }

    /// Relocates one extent of `file` to `new_lcn`.
    ///
    /// The physical move is delegated to `io`. If the collaborator refuses, the
    /// model is left untouched and [`PlannerError::MoveRejected`] is returned.
    /// Panics if `extent` is not one of the file's extents.
    pub async fn move_file_data<E: VolumeIo>(
        &mut self,
        io: &E,
        file: FileId,
        extent: ExtentId,
        new_lcn: u64,
    ) -> PlannerResult<()> {
        let record = &self.files[file.0];
        assert!(
            record.contains(extent),
            "{} is not an extent of {}",
            extent,
            record.path()
        );

        let current = *self.index.get(extent);
        if current.lcn == new_lcn {
            return Ok(());
        }
        if !self.bitmap.contains_range(new_lcn, current.size) {
            return Err(PlannerError::DestinationOutOfRange {
                destination: new_lcn,
                size: current.size,
                bitmap_end: self.bitmap.end(),
            });
        }
        self.check_destination(&current, new_lcn)?;
        let count = u32::try_from(current.size)
            .map_err(|_| PlannerError::ExtentTooLarge { size: current.size })?;

        let path = record.path().to_string();
        if let Err(e) = io.move_extent(&path, current.vcn, new_lcn, count).await {
            warn!(
                "Move of {} of {} to LCN {} rejected: {}",
                current, path, new_lcn, e
            );
            return Err(PlannerError::MoveRejected {
                path,
                vcn: current.vcn,
                destination: new_lcn,
                reason: e.to_string(),
            });
        }

        self.bitmap.set_range(current.lcn, current.size, false);
        self.bitmap.set_range(new_lcn, current.size, true);
        self.index.relocate(extent, new_lcn);
        self.files[file.0].refresh(&self.index);

        debug!(
            "Moved {} of {} from LCN {} to LCN {}",
            extent, path, current.lcn, new_lcn
        );
        Ok(())
    }

    // Destination clusters must be free, except those the extent already occupies.
    fn check_destination(&self, current: &Extent, new_lcn: u64) -> PlannerResult<()> {
        let end = new_lcn + current.size;
        let mut cursor = new_lcn;
        while let Some(used) = self.bitmap.next_used(cursor) {
            if used >= end {
                break;
            }
            if used >= current.lcn && used < current.lcn_end() {
                cursor = current.lcn_end();
                continue;
            }
            return Err(PlannerError::DestinationInUse {
                destination: new_lcn,
                size: current.size,
            });
        }
        Ok(())
    }

    /// Merges consecutive extents of `file` that are adjacent both in VCN and
    /// in LCN. Returns the number of merges performed.
    pub fn compact_file_structure(&mut self, file: FileId) -> usize {
        let mut merged = 0;
        let mut pos = 0;
        loop {
            let extents = self.files[file.0].extents();
            if pos + 1 >= extents.len() {
                break;
            }
            let (a_id, b_id) = (extents[pos], extents[pos + 1]);
            let a = *self.index.get(a_id);
            let b = *self.index.get(b_id);
            if a.is_adjacent_to(&b) {
                self.index.remove(b_id);
                self.index.resize(a_id, a.size + b.size);
                self.files[file.0].remove_at(pos + 1);
                merged += 1;
            } else {
                pos += 1;
            }
        }
        self.files[file.0].refresh(&self.index);

        if merged > 0 {
            debug!(
                "Compacted {}: merged {} extents, {} remain",
                self.files[file.0].path(),
                merged,
                self.files[file.0].fragment_count()
            );
        }
        merged
    }

    /// Summarizes allocation and fragmentation.
    pub fn analyze(&self) -> FragmentationReport {
        let used_clusters = self.bitmap.count_used();
        let free_clusters = self.bitmap.len() - used_clusters;

        let mut free_block_count = 0;
        let mut largest_free_block = 0;
        for block in self.find_free_blocks(0, 1) {
            free_block_count += 1;
            largest_free_block = largest_free_block.max(block.size);
        }

        let fragmented_files = self.files.iter().filter(|f| f.is_fragmented()).count();
        let total_extents = self.index.len();
        let average_fragments = if self.files.is_empty() {
            0.0
        } else {
            total_extents as f64 / self.files.len() as f64
        };
        let free_space_fragmentation = if free_clusters > 0 {
            100.0 * (1.0 - largest_free_block as f64 / free_clusters as f64)
        } else {
            0.0
        };

        let report = FragmentationReport {
            total_clusters: self.bitmap.len(),
            used_clusters,
            free_clusters,
            unmovable_clusters: self.unmovable.values().sum(),
            free_block_count,
            largest_free_block,
            file_count: self.files.len(),
            fragmented_files,
            total_extents,
            average_fragments,
            free_space_fragmentation,
        };

        debug!(
            "Fragmentation analysis: {}/{} files fragmented, {} free blocks, largest {}",
            report.fragmented_files,
            report.file_count,
            report.free_block_count,
            report.largest_free_block
        );
        report
    }

    /// Checks that bitmap, index and file records agree.
    pub fn verify_consistency(&self) -> Result<(), String> {
        let mut tracked = 0;
        for (fid, record) in self.files() {
            let mut expected_vcn = 0;
            for id in record.extents() {
                let e = self
                    .index
                    .try_get(*id)
                    .ok_or_else(|| format!("{} holds stale {}", record.path(), id))?;
                if self.index.owner_of(*id) != fid {
                    return Err(format!("{} of {} owned by another file", id, record.path()));
                }
                if self.index.at_lcn(e.lcn) != Some(*id) {
                    return Err(format!("{} not keyed at LCN {}", id, e.lcn));
                }
                if e.vcn != expected_vcn {
                    return Err(format!("{} has a VCN gap before {}", record.path(), e));
                }
                if let Some(free) = self.bitmap.next_free(e.lcn) {
                    if free < e.lcn_end() {
                        return Err(format!("cluster {} of {} is free in the bitmap", free, e));
                    }
                }
                expected_vcn = e.vcn_end();
                tracked += 1;
            }

            let mut fresh = record.clone();
            fresh.refresh(&self.index);
            if fresh != *record {
                return Err(format!("derived fields of {} are stale", record.path()));
            }
        }

        if tracked != self.index.len() {
            return Err(format!(
                "index holds {} extents, files reference {}",
                self.index.len(),
                tracked
            ));
        }

        let mut prev_end = 0;
        for (id, e) in self.index.iter() {
            if e.lcn < prev_end {
                return Err(format!("{} overlaps its predecessor", id));
            }
            prev_end = e.lcn_end();
        }
        Ok(())
    }
}

/// Iterator over successive free runs, see [`VolumeModel::find_free_blocks`].
pub struct FreeBlocks<'a> {
    model: &'a VolumeModel,
    next: u64,
    min_size: u64,
}

impl Iterator for FreeBlocks<'_> {
    type Item = FreeBlock;

    fn next(&mut self) -> Option<FreeBlock> {
        let block = self.model.find_free_block(self.next, self.min_size)?;
        self.next = block.end();
        Some(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MockVolumeIo;

    fn bitmap_from(pattern: &str) -> ClusterBitmap {
        let bits: Vec<bool> = pattern.chars().map(|c| c == '1').collect();
        ClusterBitmap::from_bools(0, &bits)
    }

    fn two_fragment_volume() -> (MockVolumeIo, VolumeModel) {
        let files = vec![FileExtents::new(
            "f",
            vec![Extent::new(0, 100, 5), Extent::new(5, 200, 5)],
        )];
        let io = MockVolumeIo::with_layout(600, &[(0, 100), (105, 95), (205, 295), (510, 90)], files.clone());
        let model = VolumeModel::build(io.bitmap(), files);
        (io, model)
    }

    #[test]
    fn test_find_free_block_inclusive_start() {
        let model = VolumeModel::build(bitmap_from("1000011000"), vec![]);
        // Starting inside a free run returns the remainder of that run.
        assert_eq!(model.find_free_block(2, 1), Some(FreeBlock { lcn: 2, size: 3 }));
        assert_eq!(model.find_free_block(1, 1), Some(FreeBlock { lcn: 1, size: 4 }));
    }

    #[test]
    fn test_find_free_block_skips_short_runs() {
        let model = VolumeModel::build(bitmap_from("1001000011"), vec![]);
        assert_eq!(model.find_free_block(0, 3), Some(FreeBlock { lcn: 4, size: 4 }));
        assert_eq!(model.find_free_block(0, 5), None);
    }

    #[test]
    fn test_find_free_block_zero_start_normalized() {
        let model = VolumeModel::build(bitmap_from("0001"), vec![]);
        assert_eq!(model.find_free_block(0, 1), Some(FreeBlock { lcn: 1, size: 2 }));
        assert_eq!(model.find_free_block(0, 0), Some(FreeBlock { lcn: 1, size: 2 }));
    }

    #[test]
    fn test_find_free_block_trailing_run() {
        let model = VolumeModel::build(bitmap_from("1110000"), vec![]);
        assert_eq!(model.find_free_block(0, 4), Some(FreeBlock { lcn: 3, size: 4 }));
        assert_eq!(model.find_free_block(7, 1), None);
    }

    #[test]
    fn test_find_free_blocks_sequence() {
        let model = VolumeModel::build(bitmap_from("10011000101100"), vec![]);
        let blocks: Vec<FreeBlock> = model.find_free_blocks(0, 1).collect();
        assert_eq!(
            blocks,
            vec![
                FreeBlock { lcn: 1, size: 2 },
                FreeBlock { lcn: 5, size: 3 },
                FreeBlock { lcn: 9, size: 1 },
                FreeBlock { lcn: 12, size: 2 },
            ]
        );
        let large: Vec<FreeBlock> = model.find_free_blocks(0, 2).collect();
        assert_eq!(large.len(), 3);
        // Re-invoking with the same start restarts the sequence.
        assert_eq!(model.find_free_blocks(0, 1).count(), 4);
    }

    #[test]
    fn test_build_derives_unmovable_regions() {
        let bitmap = bitmap_from("1111111100001111");
        let files = vec![FileExtents::new("a", vec![Extent::new(0, 2, 3)])];
        let model = VolumeModel::build(bitmap, files);

        let regions: Vec<(u64, u64)> = model.unmovable_regions().iter().map(|(k, v)| (*k, *v)).collect();
        assert_eq!(regions, vec![(0, 2), (5, 3), (12, 4)]);
        assert!(model.overlaps_unmovable(6, 7));
        assert!(!model.overlaps_unmovable(2, 5));
        assert!(!model.overlaps_unmovable(8, 12));
        assert!(model.verify_consistency().is_ok());
    }

    #[test]
    fn test_build_skips_bad_records() {
        let bitmap = ClusterBitmap::new(0, 100);
        let files = vec![
            FileExtents::new("empty", vec![]),
            FileExtents::new("good", vec![Extent::new(0, 10, 5)]),
            FileExtents::new("overlap", vec![Extent::new(0, 12, 5)]),
            FileExtents::new("gap", vec![Extent::new(0, 30, 2), Extent::new(5, 40, 2)]),
            FileExtents::new("outside", vec![Extent::new(0, 98, 5)]),
            FileExtents::new("good", vec![Extent::new(0, 50, 1)]),
        ];
        let model = VolumeModel::build(bitmap, files);

        assert_eq!(model.file_count(), 1);
        assert_eq!(model.skipped_files(), 4);
        assert!(model.file_by_path("empty").is_none());
        // Clusters of accepted extents are marked used even if the bitmap said free.
        assert!(model.bitmap().get(10));
        assert!(model.bitmap().get(14));
        assert!(model.verify_consistency().is_ok());
    }

    #[test]
    fn test_build_sorts_extents_by_vcn() {
        let bitmap = ClusterBitmap::new(0, 100);
        let files = vec![FileExtents::new(
            "a",
            vec![Extent::new(4, 10, 4), Extent::new(0, 50, 4)],
        )];
        let model = VolumeModel::build(bitmap, files);
        let id = model.file_by_path("a").unwrap();
        assert_eq!(model.file_extents(id)[0], Extent::new(0, 50, 4));
        assert_eq!(model.file(id).first_lcn(), 10);
        assert_eq!(model.file(id).total_size(), 8);
    }

    #[tokio::test]
    async fn test_load_from_collaborator() {
        let (io, expected) = two_fragment_volume();
        let model = VolumeModel::load(&io).await.unwrap();
        assert_eq!(model, expected);
    }

    #[tokio::test]
    async fn test_move_file_data_updates_everything() {
        let (io, mut model) = two_fragment_volume();
        let fid = model.file_by_path("f").unwrap();
        let second = model.file(fid).extents()[1];

        model.move_file_data(&io, fid, second, 500).await.unwrap();

        assert!(model.bitmap().is_range_free(200, 5));
        assert!((500..505).all(|c| model.bitmap().get(c)));
        assert_eq!(model.index().at_lcn(500), Some(second));
        assert_eq!(model.index().at_lcn(200), None);
        assert_eq!(model.extent(second).lcn, 500);
        assert_eq!(model.file(fid).first_lcn(), 100);
        assert!(model.verify_consistency().is_ok());
        assert_eq!(io.file("f").unwrap()[1], Extent::new(5, 500, 5));
    }

    #[tokio::test]
    async fn test_move_failure_leaves_model_unchanged() {
        let (io, mut model) = two_fragment_volume();
        let fid = model.file_by_path("f").unwrap();
        let first = model.file(fid).extents()[0];
        let before = model.clone();

        io.lock_file("f");
        let result = model.move_file_data(&io, fid, first, 500).await;

        assert!(matches!(result, Err(PlannerError::MoveRejected { .. })));
        assert_eq!(model, before);
    }

    #[tokio::test]
    async fn test_move_rejects_bad_destinations() {
        let (io, mut model) = two_fragment_volume();
        let fid = model.file_by_path("f").unwrap();
        let first = model.file(fid).extents()[0];

        let result = model.move_file_data(&io, fid, first, 598).await;
        assert!(matches!(result, Err(PlannerError::DestinationOutOfRange { .. })));

        let result = model.move_file_data(&io, fid, first, 198).await;
        assert!(matches!(result, Err(PlannerError::DestinationInUse { .. })));
        assert_eq!(io.stats().moves_requested, 0);
    }

    #[tokio::test]
    async fn test_move_to_same_lcn_is_noop() {
        let (io, mut model) = two_fragment_volume();
        let fid = model.file_by_path("f").unwrap();
        let first = model.file(fid).extents()[0];
        model.move_file_data(&io, fid, first, 100).await.unwrap();
        assert_eq!(io.stats().moves_requested, 0);
    }

    #[tokio::test]
    #[should_panic(expected = "is not an extent of")]
    async fn test_move_foreign_extent_panics() {
        let bitmap = ClusterBitmap::new(0, 100);
        let files = vec![
            FileExtents::new("a", vec![Extent::new(0, 10, 2)]),
            FileExtents::new("b", vec![Extent::new(0, 20, 2)]),
        ];
        let io = MockVolumeIo::new(bitmap.clone(), files.clone());
        let mut model = VolumeModel::build(bitmap, files);
        let a = model.file_by_path("a").unwrap();
        let b_extent = model.file(model.file_by_path("b").unwrap()).extents()[0];
        let _ = model.move_file_data(&io, a, b_extent, 50).await;
    }

    #[tokio::test]
    async fn test_compact_merges_chain_and_is_idempotent() {
        let bitmap = ClusterBitmap::new(0, 100);
        let files = vec![FileExtents::new(
            "a",
            vec![
                Extent::new(0, 10, 2),
                Extent::new(2, 12, 3),
                Extent::new(5, 15, 1),
                Extent::new(6, 40, 4),
            ],
        )];
        let mut model = VolumeModel::build(bitmap, files);
        let fid = model.file_by_path("a").unwrap();

        assert_eq!(model.compact_file_structure(fid), 2);
        assert_eq!(
            model.file_extents(fid),
            vec![Extent::new(0, 10, 6), Extent::new(6, 40, 4)]
        );
        assert_eq!(model.index().len(), 2);
        assert!(model.verify_consistency().is_ok());

        let once = model.clone();
        assert_eq!(model.compact_file_structure(fid), 0);
        assert_eq!(model, once);
    }

    #[test]
    fn test_analyze() {
        let bitmap = bitmap_from("1111000011000000");
        let files = vec![
            FileExtents::new("a", vec![Extent::new(0, 1, 2), Extent::new(2, 8, 2)]),
            FileExtents::new("b", vec![Extent::new(0, 3, 1)]),
        ];
        let model = VolumeModel::build(bitmap, files);
        let report = model.analyze();

        assert_eq!(report.total_clusters, 16);
        assert_eq!(report.used_clusters, 6);
        assert_eq!(report.free_clusters, 10);
        assert_eq!(report.unmovable_clusters, 1);
        assert_eq!(report.free_block_count, 2);
        assert_eq!(report.largest_free_block, 6);
        assert_eq!(report.file_count, 2);
        assert_eq!(report.fragmented_files, 1);
        assert_eq!(report.total_extents, 3);
        assert!((report.average_fragments - 1.5).abs() < f64::EPSILON);
        assert!((report.free_space_fragmentation - 40.0).abs() < 1e-9);
    }
}
