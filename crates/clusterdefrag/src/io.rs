//! Volume I/O collaborator interface.
//!
//! The planner never touches a device directly. It consumes the three calls of
//! [`VolumeIo`]: fetch the allocation bitmap, enumerate files with their extent
//! lists, and relocate one run of clusters. [`MockVolumeIo`] is an in-memory
//! volume used by tests and dry runs.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bitmap::ClusterBitmap;
use crate::error::{PlannerError, PlannerResult};
use crate::extent::{Extent, FileExtents};

/// Trait for the device-facing side of a planning run.
/// Implementations can talk to a real volume or simulate one.
pub trait VolumeIo: Send + Sync {
    /// Fetch the full allocation bitmap.
    fn get_volume_bitmap(&self) -> impl Future<Output = PlannerResult<ClusterBitmap>> + Send;

    /// Fetch every file's extent list.
    fn enumerate_files(&self) -> impl Future<Output = PlannerResult<Vec<FileExtents>>> + Send;

    /// Relocate `cluster_count` clusters of `path`, starting at `starting_vcn`,
    /// to `destination_lcn`. The implementation opens and locks the file.
    fn move_extent(
        &self,
        path: &str,
        starting_vcn: u64,
        destination_lcn: u64,
        cluster_count: u32,
    ) -> impl Future<Output = PlannerResult<()>> + Send;
}

/// Move statistics tracked by [`MockVolumeIo`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveStats {
    /// Move requests received.
    pub moves_requested: u64,
    /// Moves performed.
    pub moves_completed: u64,
    /// Moves refused.
    pub moves_rejected: u64,
    /// Clusters relocated by completed moves.
    pub clusters_moved: u64,
}

struct MockVolume {
    bitmap: ClusterBitmap,
    files: BTreeMap<String, Vec<Extent>>,
    locked: HashSet<String>,
    fail_next: u32,
}

impl MockVolume {
    fn move_run(
        &mut self,
        path: &str,
        vcn: u64,
        destination: u64,
        count: u64,
    ) -> PlannerResult<()> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(PlannerError::Device {
                reason: "injected failure".to_string(),
            });
        }
        if self.locked.contains(path) {
            return Err(PlannerError::Device {
                reason: format!("{} is in use", path),
            });
        }
        if count == 0 {
            return Err(PlannerError::Device {
                reason: "zero-length move".to_string(),
            });
        }
        let extents = self.files.get_mut(path).ok_or_else(|| PlannerError::Device {
            reason: format!("{} does not exist", path),
        })?;

        let pos = extents
            .iter()
            .position(|e| e.vcn <= vcn && vcn + count <= e.vcn_end())
            .ok_or_else(|| PlannerError::Device {
                reason: format!("no run of {} clusters at vcn {} in {}", count, vcn, path),
            })?;
        let source = extents[pos];
        let source_lcn = source.lcn + (vcn - source.vcn);

        if !self.bitmap.contains_range(destination, count) {
            return Err(PlannerError::Device {
                reason: format!("destination {} + {} leaves the volume", destination, count),
            });
        }
        let blocked = (destination..destination + count)
            .any(|c| self.bitmap.get(c) && !(source_lcn..source_lcn + count).contains(&c));
        if blocked {
            return Err(PlannerError::Device {
                reason: format!("destination {} + {} is not free", destination, count),
            });
        }

        self.bitmap.set_range(source_lcn, count, false);
        self.bitmap.set_range(destination, count, true);

        let mut pieces = Vec::with_capacity(3);
        if vcn > source.vcn {
            pieces.push(Extent::new(source.vcn, source.lcn, vcn - source.vcn));
        }
        pieces.push(Extent::new(vcn, destination, count));
        if vcn + count < source.vcn_end() {
            let tail = vcn + count - source.vcn;
            pieces.push(Extent::new(vcn + count, source.lcn + tail, source.size - tail));
        }
        extents.splice(pos..=pos, pieces);
        merge_adjacent(extents);
        Ok(())
    }
}

fn merge_adjacent(extents: &mut Vec<Extent>) {
    let mut i = 0;
    while i + 1 < extents.len() {
        if extents[i].is_adjacent_to(&extents[i + 1]) {
            extents[i].size += extents[i + 1].size;
            extents.remove(i + 1);
        } else {
            i += 1;
        }
    }
}

/// In-memory volume for testing.
/// Keeps its own bitmap and extent lists and validates every move against them.
pub struct MockVolumeIo {
    volume: Mutex<MockVolume>,
    stats: Mutex<MoveStats>,
}

impl MockVolumeIo {
    /// Create a mock volume from a bitmap and file list.
    pub fn new(bitmap: ClusterBitmap, files: Vec<FileExtents>) -> Self {
        let files = files.into_iter().map(|f| (f.path, f.extents)).collect();
        Self {
            volume: Mutex::new(MockVolume {
                bitmap,
                files,
                locked: HashSet::new(),
                fail_next: 0,
            }),
            stats: Mutex::new(MoveStats::default()),
        }
    }

    /// Create a volume of `len` clusters holding `files`. Clusters of `reserved`
    /// runs are allocated without belonging to any file.
    pub fn with_layout(len: u64, reserved: &[(u64, u64)], files: Vec<FileExtents>) -> Self {
        let mut bitmap = ClusterBitmap::new(0, len);
        for (lcn, size) in reserved {
            bitmap.set_range(*lcn, *size, true);
        }
        for file in &files {
            for e in &file.extents {
                bitmap.set_range(e.lcn, e.size, true);
            }
        }
        Self::new(bitmap, files)
    }

    /// Refuse every move of `path` until unlocked.
    pub fn lock_file(&self, path: &str) {
        self.volume.lock().locked.insert(path.to_string());
    }

    /// Allow moves of `path` again.
    pub fn unlock_file(&self, path: &str) {
        self.volume.lock().locked.remove(path);
    }

    /// Refuse the next `count` move requests.
    pub fn fail_next_moves(&self, count: u32) {
        self.volume.lock().fail_next = count;
    }

    /// Current extents of a file as the volume sees them.
    pub fn file(&self, path: &str) -> Option<Vec<Extent>> {
        self.volume.lock().files.get(path).cloned()
    }

    /// Current allocation bitmap as the volume sees it.
    pub fn bitmap(&self) -> ClusterBitmap {
        self.volume.lock().bitmap.clone()
    }

    /// Get current move statistics.
    pub fn stats(&self) -> MoveStats {
        self.stats.lock().clone()
    }
}

impl VolumeIo for MockVolumeIo {
    async fn get_volume_bitmap(&self) -> PlannerResult<ClusterBitmap> {
        let bitmap = self.volume.lock().bitmap.clone();
        debug!(
            "Mock bitmap: {} clusters from LCN {}",
            bitmap.len(),
            bitmap.starting_lcn()
        );
        Ok(bitmap)
    }

    async fn enumerate_files(&self) -> PlannerResult<Vec<FileExtents>> {
        let volume = self.volume.lock();
        debug!("Mock enumerate: {} files", volume.files.len());
        Ok(volume
            .files
            .iter()
            .map(|(path, extents)| FileExtents::new(path.clone(), extents.clone()))
            .collect())
    }

    async fn move_extent(
        &self,
        path: &str,
        starting_vcn: u64,
        destination_lcn: u64,
        cluster_count: u32,
    ) -> PlannerResult<()> {
        debug!(
            "Mock move: path={}, vcn={}, dest={}, count={}",
            path, starting_vcn, destination_lcn, cluster_count
        );

        let result = self.volume.lock().move_run(
            path,
            starting_vcn,
            destination_lcn,
            cluster_count as u64,
        );

        let mut stats = self.stats.lock();
        stats.moves_requested += 1;
        match &result {
            Ok(()) => {
                stats.moves_completed += 1;
                stats.clusters_moved += cluster_count as u64;
            }
            Err(_) => stats.moves_rejected += 1,
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume() -> MockVolumeIo {
        MockVolumeIo::with_layout(
            64,
            &[(0, 4)],
            vec![FileExtents::new(
                "a",
                vec![Extent::new(0, 10, 4), Extent::new(4, 20, 4)],
            )],
        )
    }

    #[tokio::test]
    async fn test_enumerate_and_bitmap() {
        let io = volume();
        let files = io.enumerate_files().await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].extents.len(), 2);

        let bitmap = io.get_volume_bitmap().await.unwrap();
        assert_eq!(bitmap.count_used(), 12);
    }

    #[tokio::test]
    async fn test_move_merges_adjacent_runs() {
        let io = volume();
        io.move_extent("a", 4, 14, 4).await.unwrap();

        assert_eq!(io.file("a").unwrap(), vec![Extent::new(0, 10, 8)]);
        let bitmap = io.bitmap();
        assert!(bitmap.is_range_free(20, 4));
        assert!(!bitmap.is_range_free(14, 4));

        let stats = io.stats();
        assert_eq!(stats.moves_completed, 1);
        assert_eq!(stats.clusters_moved, 4);
    }

    #[tokio::test]
    async fn test_move_partial_run_splits() {
        let io = volume();
        io.move_extent("a", 1, 40, 2).await.unwrap();
        assert_eq!(
            io.file("a").unwrap(),
            vec![
                Extent::new(0, 10, 1),
                Extent::new(1, 40, 2),
                Extent::new(3, 13, 1),
                Extent::new(4, 20, 4),
            ]
        );
    }

    #[tokio::test]
    async fn test_move_onto_used_rejected() {
        let io = volume();
        let result = io.move_extent("a", 0, 2, 4).await;
        assert!(matches!(result, Err(PlannerError::Device { .. })));
        assert_eq!(io.stats().moves_rejected, 1);
        assert_eq!(io.file("a").unwrap()[0], Extent::new(0, 10, 4));
    }

    #[tokio::test]
    async fn test_overlapping_shift_allowed() {
        let io = volume();
        io.move_extent("a", 0, 8, 4).await.unwrap();
        assert_eq!(io.file("a").unwrap()[0], Extent::new(0, 8, 4));
        let bitmap = io.bitmap();
        assert!(bitmap.get(8));
        assert!(bitmap.get(11));
        assert!(!bitmap.get(12));
    }

    #[tokio::test]
    async fn test_locked_file_and_injected_failure() {
        let io = volume();
        io.lock_file("a");
        assert!(io.move_extent("a", 0, 40, 4).await.is_err());
        io.unlock_file("a");

        io.fail_next_moves(1);
        assert!(io.move_extent("a", 0, 40, 4).await.is_err());
        assert!(io.move_extent("a", 0, 40, 4).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_file_and_vcn() {
        let io = volume();
        assert!(io.move_extent("missing", 0, 40, 1).await.is_err());
        assert!(io.move_extent("a", 2, 40, 4).await.is_err());
    }
}
