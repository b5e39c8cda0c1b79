//! Per-file and per-extent outcome reports produced by the strategies.

use serde::{Deserialize, Serialize};

/// Which strategy produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyKind {
    /// One file made contiguous.
    SingleFile,
    /// Every file under a path prefix made contiguous.
    Directory,
    /// Free space swept towards the start of the volume.
    FreeSpaceConsolidation,
    /// Large files placed by best-fit displacement.
    LargeFileRelocation,
}

/// Where a file ended up in the planning state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileState {
    /// Still fragmented; left untouched, e.g. once the move budget ran out.
    Fragmented,
    /// Already a single extent; left alone.
    AlreadyContiguous,
    /// No free run large enough was found.
    NoFreeSpaceFound,
    /// No placement avoids unmovable regions.
    NoDisplacementSolution,
    /// At least one move was refused; later moves for this file were abandoned.
    MoveFailed,
    /// Moves succeeded but the file still has several extents.
    MoveSucceeded,
    /// The file now has exactly one extent.
    Defragmented,
}

/// Why an extent was moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MovePurpose {
    /// Part of making a file contiguous.
    Defragment,
    /// Filling a gap near the start of the volume.
    Consolidate,
    /// Temporarily parked out of the way of a gap.
    Park,
    /// Evicted from a large file's target range.
    Displace,
    /// A large file's extent written into its target range.
    Place,
}

/// One attempted extent relocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtentMove {
    /// Path of the owning file.
    pub path: String,
    /// Starting VCN of the extent.
    pub vcn: u64,
    /// LCN before the move.
    pub from_lcn: u64,
    /// Requested destination LCN.
    pub to_lcn: u64,
    /// Length in clusters.
    pub size: u64,
    /// Why the move was issued.
    pub purpose: MovePurpose,
    /// Failure description, `None` on success.
    pub error: Option<String>,
}

impl ExtentMove {
    /// Returns true if the move was carried out.
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Final outcome for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOutcome {
    /// Path of the file.
    pub path: String,
    /// Extent count before the strategy touched the file.
    pub fragments_before: usize,
    /// Extent count afterwards.
    pub fragments_after: usize,
    /// Final state.
    pub state: FileState,
    /// Failure description, if any.
    pub reason: Option<String>,
}

/// Move counters for one strategy invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefragStats {
    /// Moves handed to the model.
    pub moves_attempted: usize,
    /// Moves the model applied.
    pub moves_succeeded: usize,
    /// Moves refused by the model or the collaborator.
    pub moves_failed: usize,
    /// Clusters relocated by successful moves.
    pub clusters_moved: u64,
}

/// Everything a strategy did during one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefragReport {
    /// Producing strategy.
    pub strategy: StrategyKind,
    /// One entry per file the strategy considered.
    pub outcomes: Vec<FileOutcome>,
    /// Every attempted move, in order.
    pub moves: Vec<ExtentMove>,
    /// Aggregate counters.
    pub stats: DefragStats,
}

impl DefragReport {
    /// Creates an empty report.
    pub fn new(strategy: StrategyKind) -> Self {
        Self {
            strategy,
            outcomes: Vec::new(),
            moves: Vec::new(),
            stats: DefragStats::default(),
        }
    }

    /// Appends a move and updates the counters.
    pub fn record_move(&mut self, mv: ExtentMove) {
        self.stats.moves_attempted += 1;
        if mv.succeeded() {
            self.stats.moves_succeeded += 1;
            self.stats.clusters_moved += mv.size;
        } else {
            self.stats.moves_failed += 1;
        }
        self.moves.push(mv);
    }

    /// Appends a file outcome.
    pub fn record_outcome(&mut self, outcome: FileOutcome) {
        self.outcomes.push(outcome);
    }

    /// Outcome recorded for `path`.
    pub fn outcome_for(&self, path: &str) -> Option<&FileOutcome> {
        self.outcomes.iter().find(|o| o.path == path)
    }

    /// Returns true once `max_moves` moves have been attempted.
    pub fn budget_exhausted(&self, max_moves: usize) -> bool {
        self.stats.moves_attempted >= max_moves
    }

    /// Serializes the report as JSON for logging.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
