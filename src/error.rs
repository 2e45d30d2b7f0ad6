//! Error types for the duplicate detection system

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error for detector operations.
///
/// Failures on individual files (an unreadable file during hashing, a move that
/// could not be completed) are not surfaced through this type. They are logged
/// and collected into reports so one bad file never aborts a whole run.
///
/// ```rust
/// use find_duplicates::{DetectorConfig, DetectorError, DuplicateDetector};
/// use std::path::PathBuf;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let mut detector = DuplicateDetector::new(DetectorConfig::default())?;
///
/// match detector.find_duplicates(PathBuf::from("./data")).await {
///     Ok(groups) => println!("{} duplicate groups", groups.len()),
///     Err(DetectorError::SourceNotFound { path }) => {
///         eprintln!("nothing to scan at {}", path.display());
///     }
///     Err(err) => eprintln!("scan failed: {err}"),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Error)]
pub enum DetectorError {
	/// File system I/O errors
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// Polars DataFrame operation errors during data processing
	#[error("Polars error: {0}")]
	Polars(#[from] polars::error::PolarsError),

	/// The directory to scan does not exist or is not a directory
	#[error("Source directory does not exist: {}", path.display())]
	SourceNotFound { path: PathBuf },

	/// Cache-related errors including corruption and version mismatches
	#[error("Cache error: {0}")]
	Cache(#[from] CacheError),

	/// Failures raised by a processing system
	#[error("System error: {0}")]
	System(#[from] SystemError),

	/// Failures preparing the relocation target
	#[error("Relocation error: {0}")]
	Relocation(#[from] RelocationError),

	/// Configuration validation errors with descriptive messages
	#[error("Configuration error: {0}")]
	Config(String),

	/// Invalid glob pattern syntax in path filters
	#[error("Invalid glob pattern '{pattern}': {reason}")]
	InvalidGlobPattern { pattern: String, reason: String },

	/// Data serialization/deserialization errors
	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

/// Cache-specific errors
#[derive(Debug, Error)]
pub enum CacheError {
	#[error("Cache file corrupted: {}", path.display())]
	Corrupted { path: PathBuf },

	#[error("Cache version mismatch: expected {expected}, found {found}")]
	VersionMismatch { expected: u32, found: u32 },

	#[error("Cache I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Cache Polars error: {0}")]
	Polars(#[from] polars::error::PolarsError),

	#[error("Cache JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

/// System processing errors
#[derive(Debug, Error)]
pub enum SystemError {
	#[error("System dependency not met: {system} requires {dependency}")]
	DependencyNotMet { system: String, dependency: String },

	#[error("System execution failed: {system} - {reason}")]
	ExecutionFailed { system: String, reason: String },

	#[error("System cancelled: {system}")]
	Cancelled { system: String },
}

/// Errors while moving a single duplicate or preparing the target tree
#[derive(Debug, Error)]
pub enum RelocationError {
	#[error("Destination already exists: {}", path.display())]
	DestinationExists { path: PathBuf },

	#[error("Target directory {} is not a directory", path.display())]
	TargetNotDirectory { path: PathBuf },

	#[error("Failed to create target directory {}: {source}", path.display())]
	CreateTarget {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("Failed to move {} to {}: {source}", from.display(), to.display())]
	MoveFailed {
		from: PathBuf,
		to: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("Failed to write log {}: {source}", path.display())]
	LogWrite {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
}

/// Convenience type alias for Results in the duplicate detection system.
pub type DetectorResult<T> = Result<T, DetectorError>;

/// Convenience type alias for cache operation results.
pub type CacheResult<T> = Result<T, CacheError>;

/// Convenience type alias for system operation results.
pub type SystemResult<T> = Result<T, SystemError>;

/// Convenience type alias for relocation results.
pub type RelocationResult<T> = Result<T, RelocationError>;
