//! Placement strategies.
//!
//! Each strategy drives a [`VolumeModel`] through a sequence of extent moves
//! and reports what happened per file and per move. Moves are issued one at a
//! time, and each destination is chosen against the bitmap as left by the
//! previous move. Nothing is rolled back: partial progress is kept.

pub mod free_space;
pub mod large_file;
pub mod report;
pub mod single_file;

pub use free_space::FreeSpaceConsolidation;
pub use large_file::LargeFileRelocation;
pub use report::{
    DefragReport, DefragStats, ExtentMove, FileOutcome, FileState, MovePurpose, StrategyKind,
};
pub use single_file::SingleFileDefrag;

use crate::error::PlannerResult;
use crate::extent::{ExtentId, FileId};
use crate::io::VolumeIo;
use crate::model::VolumeModel;

/// Moves one extent through the model and records the attempt in `report`.
/// A move to the extent's current LCN is not recorded.
pub(crate) async fn apply_move<E: VolumeIo>(
    model: &mut VolumeModel,
    io: &E,
    report: &mut DefragReport,
    file: FileId,
    extent: ExtentId,
    destination: u64,
    purpose: MovePurpose,
) -> PlannerResult<()> {
    let before = *model.extent(extent);
    if before.lcn == destination {
        return Ok(());
    }
    let path = model.file(file).path().to_string();
    let result = model.move_file_data(io, file, extent, destination).await;
    report.record_move(ExtentMove {
        path,
        vcn: before.vcn,
        from_lcn: before.lcn,
        to_lcn: destination,
        size: before.size,
        purpose,
        error: result.as_ref().err().map(|e| e.to_string()),
    });
    result
}

/// Final state of a file the strategy moved data of.
pub(crate) fn settled_state(fragments_after: usize, failure: bool) -> FileState {
    if failure {
        FileState::MoveFailed
    } else if fragments_after <= 1 {
        FileState::Defragmented
    } else {
        FileState::MoveSucceeded
    }
}
