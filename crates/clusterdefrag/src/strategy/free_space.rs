//! Free-space consolidation sweep.
//!
//! A disk pointer walks from the start of the volume. At each free block the
//! sweep pulls in the largest extent from further up the volume that still
//! fits. When nothing fits, the extent directly behind the block is parked
//! elsewhere so the block grows. Files whose moves keep failing are ignored
//! until the next successful move.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, info};

use crate::config::PlannerConfig;
use crate::extent::{ExtentId, FileId, FreeBlock};
use crate::io::VolumeIo;
use crate::model::VolumeModel;
use crate::strategy::report::{DefragReport, FileOutcome, FileState, MovePurpose, StrategyKind};
use crate::strategy::{apply_move, settled_state};

/// Sweeps free space towards the start of the volume.
#[derive(Debug, Clone)]
pub struct FreeSpaceConsolidation {
    max_moves: usize,
    failures_before_ignore: u32,
}

#[derive(Debug, Default)]
struct Tally {
    fragments_before: usize,
    succeeded: usize,
    last_error: Option<String>,
}

struct Sweep {
    pointer: u64,
    ignored: HashSet<FileId>,
    failures: HashMap<FileId, u32>,
    tallies: BTreeMap<FileId, Tally>,
}

impl Sweep {
    fn touch(&mut self, model: &VolumeModel, file: FileId) -> &mut Tally {
        self.tallies.entry(file).or_insert_with(|| Tally {
            fragments_before: model.file(file).fragment_count(),
            ..Tally::default()
        })
    }

    fn reset_patience(&mut self) {
        self.ignored.clear();
        self.failures.clear();
    }

    fn record_failure(&mut self, file: FileId, threshold: u32, error: String) {
        let count = self.failures.entry(file).or_insert(0);
        *count += 1;
        if *count >= threshold {
            debug!("Ignoring {} for the current gap after {} failures", file, count);
            self.ignored.insert(file);
        }
        if let Some(tally) = self.tallies.get_mut(&file) {
            tally.last_error = Some(error);
        }
    }
}

impl FreeSpaceConsolidation {
    /// Creates the strategy from the planner configuration.
    pub fn new(config: &PlannerConfig) -> Self {
        Self {
            max_moves: config.max_moves_per_run,
            failures_before_ignore: config.failures_before_ignore.max(1),
        }
    }

    /// Runs the sweep until no free block or no extent beyond the pointer remains.
    pub async fn run<E: VolumeIo>(&self, model: &mut VolumeModel, io: &E) -> DefragReport {
        let mut report = DefragReport::new(StrategyKind::FreeSpaceConsolidation);
        let mut sweep = Sweep {
            pointer: 0,
            ignored: HashSet::new(),
            failures: HashMap::new(),
            tallies: BTreeMap::new(),
        };

        info!(
            "Starting free-space sweep over {} clusters, {} files",
            model.bitmap().len(),
            model.file_count()
        );

        while !report.budget_exhausted(self.max_moves) {
            let Some(block) = model.find_free_block(sweep.pointer, 1) else {
                debug!("No free block at or after LCN {}", sweep.pointer);
                break;
            };
            if model.index().starting_from(block.end()).next().is_none() {
                debug!("No extents beyond free block at LCN {}", block.lcn);
                break;
            }

            if let Some(candidate) = self.best_fit(model, &sweep, block) {
                self.fill(model, io, &mut report, &mut sweep, block, candidate)
                    .await;
            } else if !self.park_obstruction(model, io, &mut report, &mut sweep, block).await {
                sweep.pointer = block.end();
                sweep.reset_patience();
            }
        }

        for (file, tally) in sweep.tallies {
            let fragments_after = model.file(file).fragment_count();
            let state = if tally.succeeded > 0 {
                settled_state(fragments_after, false)
            } else {
                FileState::MoveFailed
            };
            report.record_outcome(FileOutcome {
                path: model.file(file).path().to_string(),
                fragments_before: tally.fragments_before,
                fragments_after,
                state,
                reason: tally.last_error,
            });
        }

        info!(
            "Free-space sweep done: {} moves ({} failed), {} clusters moved, {} files touched",
            report.stats.moves_attempted,
            report.stats.moves_failed,
            report.stats.clusters_moved,
            report.outcomes.len()
        );
        report
    }

    // Largest extent beyond the block that fits into it; ties go to the higher LCN.
    fn best_fit(&self, model: &VolumeModel, sweep: &Sweep, block: FreeBlock) -> Option<ExtentId> {
        let index = model.index();
        index
            .starting_from(block.end())
            .filter(|id| !sweep.ignored.contains(&index.owner_of(*id)))
            .map(|id| (id, index.get(id)))
            .filter(|(_, e)| e.size <= block.size)
            .max_by_key(|(_, e)| (e.size, e.lcn))
            .map(|(id, _)| id)
    }

    async fn fill<E: VolumeIo>(
        &self,
        model: &mut VolumeModel,
        io: &E,
        report: &mut DefragReport,
        sweep: &mut Sweep,
        block: FreeBlock,
        extent: ExtentId,
    ) {
        let owner = model.index().owner_of(extent);
        let size = model.extent(extent).size;
        sweep.touch(model, owner);

        match apply_move(model, io, report, owner, extent, block.lcn, MovePurpose::Consolidate).await
        {
            Ok(()) => {
                sweep.reset_patience();
                sweep.pointer = block.lcn + size;
                model.compact_file_structure(owner);
                sweep.touch(model, owner).succeeded += 1;
            }
            Err(e) => sweep.record_failure(owner, self.failures_before_ignore, e.to_string()),
        }
    }

    // Moves the extent right behind the block out of the way. Returns false
    // when there is nothing to park or nowhere to park it.
    async fn park_obstruction<E: VolumeIo>(
        &self,
        model: &mut VolumeModel,
        io: &E,
        report: &mut DefragReport,
        sweep: &mut Sweep,
        block: FreeBlock,
    ) -> bool {
        let Some(extent) = model.index().at_lcn(block.end()) else {
            return false;
        };
        let owner = model.index().owner_of(extent);
        if sweep.ignored.contains(&owner) {
            return false;
        }

        let obstruction = *model.extent(extent);
        let Some(scratch) = model
            .find_free_block(obstruction.lcn_end(), obstruction.size)
            .or_else(|| model.find_free_block(0, obstruction.size))
        else {
            debug!("No scratch space for {}", obstruction);
            return false;
        };

        debug!(
            "Parking {} at LCN {} to grow free block at LCN {}",
            obstruction, scratch.lcn, block.lcn
        );
        sweep.touch(model, owner);
        match apply_move(model, io, report, owner, extent, scratch.lcn, MovePurpose::Park).await {
            Ok(()) => {
                sweep.reset_patience();
                model.compact_file_structure(owner);
                sweep.touch(model, owner).succeeded += 1;
            }
            Err(e) => sweep.record_failure(owner, self.failures_before_ignore, e.to_string()),
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extent::{Extent, FileExtents};
    use crate::io::MockVolumeIo;

    fn setup(len: u64, reserved: &[(u64, u64)], files: Vec<FileExtents>) -> (MockVolumeIo, VolumeModel) {
        let io = MockVolumeIo::with_layout(len, reserved, files.clone());
        let model = VolumeModel::build(io.bitmap(), files);
        (io, model)
    }

    fn three_files() -> Vec<FileExtents> {
        vec![
            FileExtents::new("a", vec![Extent::new(0, 1, 2)]),
            FileExtents::new("b", vec![Extent::new(0, 6, 2)]),
            FileExtents::new("c", vec![Extent::new(0, 10, 3)]),
        ]
    }

    fn lcn_of(model: &VolumeModel, path: &str) -> u64 {
        model.file(model.file_by_path(path).unwrap()).first_lcn()
    }

    #[tokio::test]
    async fn test_largest_fitting_extent_fills_gap() {
        let (io, mut model) = setup(32, &[(0, 1)], three_files());
        let sweep = FreeSpaceConsolidation::new(&PlannerConfig::default());

        let report = sweep.run(&mut model, &io).await;

        assert_eq!(lcn_of(&model, "c"), 3);
        assert_eq!(lcn_of(&model, "b"), 6);
        assert_eq!(report.stats.moves_succeeded, 1);
        assert_eq!(report.moves[0].purpose, MovePurpose::Consolidate);
        assert!(model.find_free_block(0, 1).unwrap().lcn >= 8);
        assert!(model.verify_consistency().is_ok());
        assert_eq!(io.file("c").unwrap(), vec![Extent::new(0, 3, 3)]);
    }

    #[tokio::test]
    async fn test_obstruction_is_parked_then_pulled_in() {
        let files = vec![
            FileExtents::new("a", vec![Extent::new(0, 1, 2)]),
            FileExtents::new("b", vec![Extent::new(0, 4, 4)]),
        ];
        let (io, mut model) = setup(40, &[(0, 1), (8, 2)], files);
        let sweep = FreeSpaceConsolidation::new(&PlannerConfig::default());

        let report = sweep.run(&mut model, &io).await;

        let purposes: Vec<MovePurpose> = report.moves.iter().map(|m| m.purpose).collect();
        assert_eq!(purposes, vec![MovePurpose::Park, MovePurpose::Consolidate]);
        assert_eq!(report.moves[0].to_lcn, 10);
        assert_eq!(lcn_of(&model, "b"), 3);
        assert!(model.bitmap().is_range_free(7, 1));
        assert!(model.bitmap().is_range_free(10, 30));
        assert!(model.verify_consistency().is_ok());
    }

    #[tokio::test]
    async fn test_failing_file_is_ignored_until_progress() {
        let (io, mut model) = setup(32, &[(0, 1)], three_files());
        io.lock_file("c");
        let sweep = FreeSpaceConsolidation::new(&PlannerConfig::default());

        let report = sweep.run(&mut model, &io).await;

        // c fails, b fills the gap, c is offered again at the next gap and fails again.
        let attempted: Vec<&str> = report.moves.iter().map(|m| m.path.as_str()).collect();
        assert_eq!(attempted, vec!["c", "b", "c"]);
        assert_eq!(report.stats.moves_failed, 2);
        assert_eq!(lcn_of(&model, "b"), 3);
        assert_eq!(lcn_of(&model, "c"), 10);

        let c = report.outcome_for("c").unwrap();
        assert_eq!(c.state, FileState::MoveFailed);
        assert!(c.reason.as_deref().unwrap().contains("in use"));
        assert_eq!(report.outcome_for("b").unwrap().state, FileState::Defragmented);
        assert!(report.outcome_for("a").is_none());
        assert!(model.verify_consistency().is_ok());
    }

    #[tokio::test]
    async fn test_move_budget_caps_sweep() {
        let (io, mut model) = setup(32, &[(0, 1)], three_files());
        io.lock_file("c");
        io.lock_file("b");
        let config = PlannerConfig {
            max_moves_per_run: 1,
            ..PlannerConfig::default()
        };

        let report = FreeSpaceConsolidation::new(&config).run(&mut model, &io).await;
        assert_eq!(report.stats.moves_attempted, 1);
        assert_eq!(report.strategy, StrategyKind::FreeSpaceConsolidation);
    }

    #[tokio::test]
    async fn test_packed_volume_makes_no_moves() {
        let files = vec![
            FileExtents::new("a", vec![Extent::new(0, 1, 4)]),
            FileExtents::new("b", vec![Extent::new(0, 5, 3)]),
        ];
        let (io, mut model) = setup(16, &[(0, 1)], files);
        let report = FreeSpaceConsolidation::new(&PlannerConfig::default())
            .run(&mut model, &io)
            .await;

        assert!(report.moves.is_empty());
        assert!(report.outcomes.is_empty());
        assert_eq!(io.stats().moves_requested, 0);
    }

    #[tokio::test]
    async fn test_ignore_threshold_allows_retries_in_gap() {
        let (io, mut model) = setup(32, &[(0, 1)], three_files());
        io.lock_file("c");
        let config = PlannerConfig {
            failures_before_ignore: 2,
            ..PlannerConfig::default()
        };

        let report = FreeSpaceConsolidation::new(&config).run(&mut model, &io).await;

        // Two attempts on c per gap before b gets its turn.
        let attempted: Vec<&str> = report.moves.iter().map(|m| m.path.as_str()).collect();
        assert_eq!(attempted, vec!["c", "c", "b", "c", "c"]);
        assert_eq!(report.stats.moves_failed, 4);
        assert_eq!(report.moves[0].to_lcn, 3);
        assert_eq!(report.moves[1].to_lcn, 3);
        assert_eq!(lcn_of(&model, "b"), 3);
        assert_eq!(report.outcome_for("c").unwrap().state, FileState::MoveFailed);
        assert!(model.verify_consistency().is_ok());
    }

    #[tokio::test]
    async fn test_park_falls_back_to_space_before_obstruction() {
        // Gap at 1..4, unmovable cluster 4, gap at 5, x at 6..9, unmovable tail.
        let files = vec![FileExtents::new("x", vec![Extent::new(0, 6, 3)])];
        let (io, mut model) = setup(16, &[(0, 1), (4, 1), (9, 7)], files);
        // The first attempt to pull x into the front gap fails, so the
        // pointer moves past it and x becomes the obstruction of the next gap.
        io.fail_next_moves(1);

        let report = FreeSpaceConsolidation::new(&PlannerConfig::default())
            .run(&mut model, &io)
            .await;

        let purposes: Vec<MovePurpose> = report.moves.iter().map(|m| m.purpose).collect();
        assert_eq!(purposes, vec![MovePurpose::Consolidate, MovePurpose::Park]);
        assert!(!report.moves[0].succeeded());
        assert!(report.moves[1].succeeded());
        assert_eq!(report.moves[1].to_lcn, 1);
        assert_eq!(lcn_of(&model, "x"), 1);
        assert!(model.bitmap().is_range_free(5, 4));
        assert!(model.verify_consistency().is_ok());
        assert_eq!(io.file("x").unwrap(), vec![Extent::new(0, 1, 3)]);
    }
}
