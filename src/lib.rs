//! # find-duplicates
//!
//! Finds byte-identical files under a directory and moves the extra copies into a
//! separate tree, keeping one original of each in place.
//!
//! File metadata lives in a Polars DataFrame ([`ScanState`]) that a small set of
//! systems fill in turn: discovery, size grouping, then content hashing. Only
//! files that share a size with another file are ever read.

pub mod cache;
pub mod data;
pub mod detector;
pub mod error;
pub mod paths;
pub mod query;
pub mod relocate;
pub mod systems;

// Re-export main API types
pub use data::{DuplicateGroup, RelationStore, ScanState};
pub use detector::{DetectorConfig, DuplicateDetector, PathFilter};
pub use error::{DetectorError, DetectorResult};
pub use query::Query;
pub use relocate::{MoveLog, MoveOutcome, RelocationPlan, RelocationReport, Relocator};
pub use systems::HashAlgorithm;
