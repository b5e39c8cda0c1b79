//! Error types for the defragmentation planner.

use thiserror::Error;

/// Result type alias for planner operations.
pub type PlannerResult<T> = Result<T, PlannerError>;

/// Error variants for planner operations.
///
/// Broken model invariants (an extent handed to the model that its file does
/// not own, an out-of-range bitmap access) are bugs and panic instead of
/// surfacing here.
#[derive(Debug, Error)]
pub enum PlannerError {
    /// Wraps standard I/O errors (configuration loading).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The bitmap holds no free run of the requested length.
    #[error("No free space: no free run of at least {min_size} clusters")]
    NoFreeSpace {
        /// Minimum run length that was searched for.
        min_size: u64,
    },

    /// The I/O collaborator refused to relocate an extent.
    #[error("Move rejected for {path} (vcn {vcn} -> lcn {destination}): {reason}")]
    MoveRejected {
        /// Path of the file owning the extent.
        path: String,
        /// Starting VCN of the extent.
        vcn: u64,
        /// Requested destination LCN.
        destination: u64,
        /// Description reported by the collaborator.
        reason: String,
    },

    /// No free block can host a large file without displacing unmovable clusters.
    #[error("No displacement solution for {path}")]
    NoDisplacementSolution {
        /// Path of the file that could not be placed.
        path: String,
    },

    /// The destination run extends past the end of the bitmap.
    #[error("Destination out of range: lcn {destination} + {size} clusters exceeds bitmap end {bitmap_end}")]
    DestinationOutOfRange {
        /// Requested destination LCN.
        destination: u64,
        /// Length of the run in clusters.
        size: u64,
        /// First LCN past the end of the bitmap.
        bitmap_end: u64,
    },

    /// The destination run overlaps allocated clusters.
    #[error("Destination in use: lcn {destination} + {size} clusters overlaps allocated space")]
    DestinationInUse {
        /// Requested destination LCN.
        destination: u64,
        /// Length of the run in clusters.
        size: u64,
    },

    /// The extent cannot be expressed in a single move request.
    #[error("Extent too large for a single move: {size} clusters")]
    ExtentTooLarge {
        /// Length of the extent in clusters.
        size: u64,
    },

    /// The requested file is not tracked by the model.
    #[error("File not found: {path}")]
    FileNotFound {
        /// The path that was looked up.
        path: String,
    },

    /// Failure reported by the device layer.
    #[error("Device error: {reason}")]
    Device {
        /// Description of the error.
        reason: String,
    },

    /// Configuration could not be parsed.
    #[error("Config error: {reason}")]
    Config {
        /// Description of the error.
        reason: String,
    },
}

impl PlannerError {
    /// Returns true for errors a strategy records and moves past.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, PlannerError::Io(_) | PlannerError::Config { .. })
    }
}
