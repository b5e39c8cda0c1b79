//! Single-file defragmentation.
//!
//! Finds one free run large enough for the whole file and moves every extent,
//! in VCN order, into consecutive sub-ranges of it. The first refused move
//! stops the file; whatever moved stays moved and the file is compacted.

use tracing::{debug, info};

use crate::config::PlannerConfig;
use crate::error::{PlannerError, PlannerResult};
use crate::extent::FileId;
use crate::io::VolumeIo;
use crate::model::VolumeModel;
use crate::strategy::report::{DefragReport, FileOutcome, FileState, MovePurpose, StrategyKind};
use crate::strategy::{apply_move, settled_state};

/// Makes individual files contiguous.
#[derive(Debug, Clone)]
pub struct SingleFileDefrag {
    max_moves: usize,
}

impl SingleFileDefrag {
    /// Creates the strategy from the planner configuration.
    pub fn new(config: &PlannerConfig) -> Self {
        Self {
            max_moves: config.max_moves_per_run,
        }
    }

    /// Defragments the file at `path`.
    pub async fn run<E: VolumeIo>(
        &self,
        model: &mut VolumeModel,
        io: &E,
        path: &str,
    ) -> PlannerResult<DefragReport> {
        let file = model
            .file_by_path(path)
            .ok_or_else(|| PlannerError::FileNotFound {
                path: path.to_string(),
            })?;

        let mut report = DefragReport::new(StrategyKind::SingleFile);
        self.defragment_file(model, io, file, &mut report).await;
        Ok(report)
    }

    /// Defragments every file whose path starts with `prefix`, in path order.
    pub async fn run_directory<E: VolumeIo>(
        &self,
        model: &mut VolumeModel,
        io: &E,
        prefix: &str,
    ) -> DefragReport {
        let files = model.files_with_prefix(prefix);
        info!("Defragmenting {} files under {}", files.len(), prefix);

        let mut report = DefragReport::new(StrategyKind::Directory);
        for file in files {
            self.defragment_file(model, io, file, &mut report).await;
        }

        info!(
            "Directory pass done: {} moves ({} failed), {} clusters moved",
            report.stats.moves_attempted, report.stats.moves_failed, report.stats.clusters_moved
        );
        report
    }

    async fn defragment_file<E: VolumeIo>(
        &self,
        model: &mut VolumeModel,
        io: &E,
        file: FileId,
        report: &mut DefragReport,
    ) {
        let record = model.file(file);
        let path = record.path().to_string();
        let fragments_before = record.fragment_count();
        let needed = record.total_size();

        if fragments_before <= 1 {
            debug!("{} is already contiguous", path);
            report.record_outcome(FileOutcome {
                path,
                fragments_before,
                fragments_after: fragments_before,
                state: FileState::AlreadyContiguous,
                reason: None,
            });
            return;
        }

        let Some(block) = model.find_free_block(0, needed) else {
            debug!("No free run of {} clusters for {}", needed, path);
            report.record_outcome(FileOutcome {
                path,
                fragments_before,
                fragments_after: fragments_before,
                state: FileState::NoFreeSpaceFound,
                reason: Some(PlannerError::NoFreeSpace { min_size: needed }.to_string()),
            });
            return;
        };

        debug!(
            "Moving {} ({} fragments, {} clusters) to LCN {}",
            path, fragments_before, needed, block.lcn
        );

        let mut failure = None;
        let mut destination = block.lcn;
        for extent in model.file(file).extents().to_vec() {
            if report.budget_exhausted(self.max_moves) {
                failure = Some("move budget exhausted".to_string());
                break;
            }
            let size = model.extent(extent).size;
            match apply_move(model, io, report, file, extent, destination, MovePurpose::Defragment)
                .await
            {
                Ok(()) => destination += size,
                Err(e) => {
                    failure = Some(e.to_string());
                    break;
                }
            }
        }

        model.compact_file_structure(file);
        let fragments_after = model.file(file).fragment_count();

        report.record_outcome(FileOutcome {
            path,
            fragments_before,
            fragments_after,
            state: settled_state(fragments_after, failure.is_some()),
            reason: failure,
        });
    }
}
