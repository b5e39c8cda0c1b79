#![warn(missing_docs)]

//! Cluster defragmentation planner: allocation bitmap, extent index and placement strategies
//!
//! This crate plans and applies extent relocations on an in-memory snapshot of
//! a volume. A [`VolumeModel`] keeps the cluster bitmap, the extent index and
//! the per-file extent lists consistent across moves. The placement strategies
//! drive the model through one-file compaction, a free-space sweep and
//! best-fit relocation of large files. Physical I/O goes through the
//! [`VolumeIo`] collaborator trait.

pub mod bitmap;
pub mod config;
pub mod error;
pub mod extent;
pub mod extent_index;
pub mod file_record;
pub mod io;
pub mod model;
pub mod strategy;

pub use bitmap::ClusterBitmap;
pub use config::PlannerConfig;
pub use error::{PlannerError, PlannerResult};
pub use extent::{Extent, ExtentId, FileExtents, FileId, FreeBlock};
pub use extent_index::ExtentIndex;
pub use file_record::FileRecord;
pub use io::{MockVolumeIo, MoveStats, VolumeIo};
pub use model::{build_model, FragmentationReport, FreeBlocks, VolumeModel};
pub use strategy::{
    DefragReport, DefragStats, ExtentMove, FileOutcome, FileState, FreeSpaceConsolidation,
    LargeFileRelocation, MovePurpose, SingleFileDefrag, StrategyKind,
};
