//! Large-file best-fit relocation.
//!
//! For every fragmented file above the size threshold, each free block is
//! tried as the start of a contiguous target range. Ranges touching an
//! unmovable region are rejected. Among the rest, the one displacing the
//! fewest clusters wins (first found on ties). Displaced extents are moved out
//! first, then the file is written into the cleared range.

use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::config::PlannerConfig;
use crate::error::PlannerError;
use crate::extent::{ExtentId, FileId, FreeBlock};
use crate::io::VolumeIo;
use crate::model::VolumeModel;
use crate::strategy::report::{DefragReport, FileOutcome, FileState, MovePurpose, StrategyKind};
use crate::strategy::{apply_move, settled_state};

/// Relocates large fragmented files into single contiguous ranges.
#[derive(Debug, Clone)]
pub struct LargeFileRelocation {
    threshold: u64,
    max_moves: usize,
}

/// Chosen target range for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Target {
    start: u64,
    end: u64,
    displaced_clusters: u64,
}

impl LargeFileRelocation {
    /// Creates the strategy from the planner configuration.
    pub fn new(config: &PlannerConfig) -> Self {
        Self {
            threshold: config.large_file_threshold,
            max_moves: config.max_moves_per_run,
        }
    }

    /// Processes every file larger than the threshold with more than one extent,
    /// in path order.
    pub async fn run<E: VolumeIo>(&self, model: &mut VolumeModel, io: &E) -> DefragReport {
        let mut candidates: Vec<FileId> = model
            .files()
            .filter(|(_, f)| f.total_size() > self.threshold && f.is_fragmented())
            .map(|(id, _)| id)
            .collect();
        candidates.sort_by(|a, b| model.file(*a).path().cmp(model.file(*b).path()));

        info!(
            "Large-file relocation: {} candidates above {} clusters",
            candidates.len(),
            self.threshold
        );

        let mut report = DefragReport::new(StrategyKind::LargeFileRelocation);
        for file in candidates {
            if report.budget_exhausted(self.max_moves) {
                let record = model.file(file);
                debug!("Move budget exhausted, leaving {} as is", record.path());
                report.record_outcome(FileOutcome {
                    path: record.path().to_string(),
                    fragments_before: record.fragment_count(),
                    fragments_after: record.fragment_count(),
                    state: FileState::Fragmented,
                    reason: Some("move budget exhausted".to_string()),
                });
                continue;
            }
            self.relocate_file(model, io, file, &mut report).await;
        }

        info!(
            "Large-file relocation done: {} moves ({} failed), {} clusters moved",
            report.stats.moves_attempted, report.stats.moves_failed, report.stats.clusters_moved
        );
        report
    }

    fn choose_target(&self, model: &VolumeModel, file: FileId) -> Option<Target> {
        let total = model.file(file).total_size();
        let mut best: Option<Target> = None;

        for block in model.find_free_blocks(0, 1) {
            let start = block.lcn;
            if !model.bitmap().contains_range(start, total) {
                continue;
            }
            let end = start + total;
            if model.overlaps_unmovable(start, end) {
                continue;
            }

            let displaced_clusters = displaced(model, file, start, end)
                .into_iter()
                .map(|id| model.extent(id).size)
                .sum();

            if best.map_or(true, |b| displaced_clusters < b.displaced_clusters) {
                best = Some(Target {
                    start,
                    end,
                    displaced_clusters,
                });
                if displaced_clusters == 0 {
                    break;
                }
            }
        }
        best
    }

    /// Smallest usable free run of `size` clusters outside `[start, end)`.
    /// A block colliding with the range is clipped, keeping the part after
    /// the range when it is large enough and the part before it otherwise.
    fn displacement_destination(
        &self,
        model: &VolumeModel,
        size: u64,
        start: u64,
        end: u64,
    ) -> Option<u64> {
        let mut best: Option<FreeBlock> = None;
        for block in model.find_free_blocks(0, size) {
            let usable = if block.lcn < end && start < block.end() {
                let after = FreeBlock {
                    lcn: end.max(block.lcn),
                    size: block.end().saturating_sub(end),
                };
                let before = FreeBlock {
                    lcn: block.lcn,
                    size: start.saturating_sub(block.lcn),
                };
                if after.size >= size {
                    after
                } else if before.size >= size {
                    before
                } else {
                    continue;
                }
            } else {
                block
            };

            if best.map_or(true, |b| usable.size < b.size) {
                best = Some(usable);
            }
        }
        best.map(|b| b.lcn)
    }

    async fn relocate_file<E: VolumeIo>(
        &self,
        model: &mut VolumeModel,
        io: &E,
        file: FileId,
        report: &mut DefragReport,
    ) {
        let path = model.file(file).path().to_string();
        let fragments_before = model.file(file).fragment_count();

        let Some(target) = self.choose_target(model, file) else {
            debug!("No target range for {} avoids unmovable regions", path);
            report.record_outcome(FileOutcome {
                reason: Some(PlannerError::NoDisplacementSolution { path: path.clone() }.to_string()),
                path,
                fragments_before,
                fragments_after: fragments_before,
                state: FileState::NoDisplacementSolution,
            });
            return;
        };

        debug!(
            "Target for {}: LCN {}..{}, displacing {} clusters",
            path, target.start, target.end, target.displaced_clusters
        );

        let mut touched = BTreeSet::new();
        let abort = self
            .clear_target(model, io, report, file, target, &mut touched)
            .await
            .err();
        let abort = match abort {
            Some(failure) => Some(failure),
            None => self.place_file(model, io, report, file, target).await.err(),
        };

        model.compact_file_structure(file);
        for owner in touched {
            if owner != file {
                model.compact_file_structure(owner);
            }
        }

        let fragments_after = model.file(file).fragment_count();
        let (state, reason) = match abort {
            Some((state, reason)) => (state, Some(reason)),
            None => (settled_state(fragments_after, false), None),
        };
        report.record_outcome(FileOutcome {
            path,
            fragments_before,
            fragments_after,
            state,
            reason,
        });
    }

    // Moves every displaced extent somewhere outside the target range.
    async fn clear_target<E: VolumeIo>(
        &self,
        model: &mut VolumeModel,
        io: &E,
        report: &mut DefragReport,
        file: FileId,
        target: Target,
        touched: &mut BTreeSet<FileId>,
    ) -> Result<(), (FileState, String)> {
        for extent in displaced(model, file, target.start, target.end) {
            if report.budget_exhausted(self.max_moves) {
                return Err((FileState::MoveFailed, "move budget exhausted".to_string()));
            }
            let size = model.extent(extent).size;
            let Some(destination) =
                self.displacement_destination(model, size, target.start, target.end)
            else {
                return Err((
                    FileState::NoFreeSpaceFound,
                    PlannerError::NoFreeSpace { min_size: size }.to_string(),
                ));
            };

            let owner = model.index().owner_of(extent);
            touched.insert(owner);
            apply_move(model, io, report, owner, extent, destination, MovePurpose::Displace)
                .await
                .map_err(|e| (FileState::MoveFailed, e.to_string()))?;
        }
        Ok(())
    }

    // Writes the file's extents, in VCN order, into the cleared range.
    async fn place_file<E: VolumeIo>(
        &self,
        model: &mut VolumeModel,
        io: &E,
        report: &mut DefragReport,
        file: FileId,
        target: Target,
    ) -> Result<(), (FileState, String)> {
        let mut destination = target.start;
        for extent in model.file(file).extents().to_vec() {
            if report.budget_exhausted(self.max_moves) {
                return Err((FileState::MoveFailed, "move budget exhausted".to_string()));
            }
            let size = model.extent(extent).size;
            apply_move(model, io, report, file, extent, destination, MovePurpose::Place)
                .await
                .map_err(|e| (FileState::MoveFailed, e.to_string()))?;
            destination += size;
        }
        Ok(())
    }
}

/// Extents that must leave `[start, end)` before `file` can be written there.
/// Extents of `file` already sitting at their final offset stay put.
fn displaced(model: &VolumeModel, file: FileId, start: u64, end: u64) -> Vec<ExtentId> {
    let index = model.index();
    index
        .overlapping(start, end)
        .into_iter()
        .filter(|id| {
            let e = index.get(*id);
            index.owner_of(*id) != file || e.lcn != start + e.vcn
        })
        .collect()
}
