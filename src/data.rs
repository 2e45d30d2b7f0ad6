//! Core data structures using Polars DataFrames

use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{DetectorError, DetectorResult};
use crate::paths::path_key;

/// File type classification used for scan summaries.
///
/// ```rust
/// use find_duplicates::data::FileKind;
///
/// assert_eq!(FileKind::Text.to_string(), "text");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
	/// Text files (source code, documents, configuration files)
	Text,
	/// Image files (JPEG, PNG, GIF, etc.)
	Image,
	/// Audio files (MP3, WAV, FLAC, etc.)
	Audio,
	/// Video files (MP4, AVI, MKV, etc.)
	Video,
	/// Archive files (ZIP, TAR, RAR, etc.)
	Archive,
	/// Binary executable files and libraries
	Binary,
	/// Files with unknown or unrecognized types
	Unknown,
}

impl std::fmt::Display for FileKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			FileKind::Text => write!(f, "text"),
			FileKind::Image => write!(f, "image"),
			FileKind::Audio => write!(f, "audio"),
			FileKind::Video => write!(f, "video"),
			FileKind::Archive => write!(f, "archive"),
			FileKind::Binary => write!(f, "binary"),
			FileKind::Unknown => write!(f, "unknown"),
		}
	}
}

/// Per-file metadata and processing state for one scan.
///
/// ## DataFrame Schema
///
/// - **`path`**: absolute file path (primary key)
/// - **`size`**: file size in bytes
/// - **`modified`**: mtime in nanoseconds since the Unix epoch
/// - **`file_type`**: [`FileKind`] as a lowercase string
/// - **`seq`**: discovery order, used to pick the original of a group
/// - **`candidate`**: another file shares this size, so it needs hashing
/// - **`hashed`**: `content_hash` holds a digest of the current contents
/// - **`content_hash`**: hex digest, null until hashed
/// - **`scan_id`**: scan session identifier
#[derive(Debug, Clone)]
pub struct ScanState {
	/// Primary DataFrame containing all file data
	pub data: DataFrame,
	/// Current scan identifier for tracking processing sessions
	pub scan_id: u32,
	/// Timestamp when the current scan session started
	pub scan_started: DateTime<Utc>,
	next_seq: u64,
}

/// One row of [`ScanState`] pulled out of the DataFrame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRow {
	pub path: String,
	pub size: u64,
	pub file_type: String,
	pub seq: u64,
	pub candidate: bool,
	pub hashed: bool,
	pub content_hash: Option<String>,
}

impl ScanState {
	/// Create a new empty ScanState
	pub fn new() -> DetectorResult<Self> {
		let data = Self::create_empty_dataframe()?;
		Ok(ScanState {
			data,
			scan_id: 1,
			scan_started: Utc::now(),
			next_seq: 0,
		})
	}

	/// Wrap a previously persisted frame (see [`crate::cache::CacheManager`])
	pub fn from_parts(data: DataFrame, scan_id: u32, scan_started: DateTime<Utc>) -> Self {
		let next_seq = data.height() as u64;
		Self {
			data,
			scan_id,
			scan_started,
			next_seq,
		}
	}

	/// Create the schema for the main DataFrame
	fn create_empty_dataframe() -> PolarsResult<DataFrame> {
		df! {
			"path" => Vec::<String>::new(),
			"size" => Vec::<u64>::new(),
			"modified" => Vec::<i64>::new(),
			"file_type" => Vec::<String>::new(),
			"seq" => Vec::<u64>::new(),

			// Processing state flags
			"candidate" => Vec::<bool>::new(),
			"hashed" => Vec::<bool>::new(),

			"content_hash" => Vec::<Option<String>>::new(),
			"scan_id" => Vec::<u32>::new(),
		}
	}

	/// Add files to the scan state, deduplicating by path
	pub fn add_files(&mut self, files: Vec<FileRecord>) -> DetectorResult<()> {
		if files.is_empty() {
			return Ok(());
		}

		let new_df = self.files_to_dataframe(files)?;

		if self.data.height() == 0 {
			self.data = new_df;
			return Ok(());
		}

		// A re-discovered path replaces its old row
		let combined = self.data.vstack(&new_df)?;
		self.data = combined
			.lazy()
			.unique_stable(Some(vec!["path".to_string()]), UniqueKeepStrategy::Last)
			.collect()?;

		Ok(())
	}

	/// Convert file records to DataFrame
	fn files_to_dataframe(&mut self, files: Vec<FileRecord>) -> PolarsResult<DataFrame> {
		let count = files.len();
		let paths: Vec<String> = files
			.iter()
			.map(|f| path_key(&f.path))
			.collect();
		let sizes: Vec<u64> = files.iter().map(|f| f.size).collect();
		let modified: Vec<i64> = files
			.iter()
			.map(|f| f.modified.timestamp_nanos_opt().unwrap_or(0))
			.collect();
		let file_types: Vec<String> = files.iter().map(|f| f.file_type.to_string()).collect();
		let seqs: Vec<u64> = (self.next_seq..self.next_seq + count as u64).collect();
		self.next_seq += count as u64;

		df! {
			"path" => paths,
			"size" => sizes,
			"modified" => modified,
			"file_type" => file_types,
			"seq" => seqs,
			"candidate" => vec![false; count],
			"hashed" => vec![false; count],
			"content_hash" => vec![None::<String>; count],
			"scan_id" => vec![self.scan_id; count],
		}
	}

	/// Get files that need processing by a specific system
	pub fn files_needing_processing(&self, system_name: &str) -> DetectorResult<DataFrame> {
		let filter_expr = match system_name {
			"content_hash" => col("candidate").and(col("hashed").eq(lit(false))),
			_ => {
				return Err(DetectorError::Config(format!(
					"Unknown system: {}",
					system_name
				)));
			}
		};

		Ok(self.data.clone().lazy().filter(filter_expr).collect()?)
	}

	/// Flag every file whose size is shared with at least one other file.
	///
	/// Returns the number of candidates.
	pub fn mark_candidates(&mut self) -> DetectorResult<usize> {
		let sizes: Vec<u64> = self
			.data
			.column("size")?
			.u64()?
			.into_iter()
			.map(|s| s.unwrap_or(0))
			.collect();

		let mut peers: HashMap<u64, usize> = HashMap::new();
		for size in &sizes {
			*peers.entry(*size).or_insert(0) += 1;
		}

		let flags: Vec<bool> = sizes.iter().map(|s| peers[s] > 1).collect();
		let candidates = flags.iter().filter(|f| **f).count();
		self.data.with_column(Series::new("candidate", flags))?;
		Ok(candidates)
	}

	/// Record digests for files. A `None` digest leaves the file unhashed.
	pub fn update_hashes(
		&mut self,
		paths: Vec<String>,
		hashes: Vec<Option<String>>,
	) -> DetectorResult<()> {
		if paths.len() != hashes.len() {
			return Err(DetectorError::Config(
				"Paths and hashes length mismatch".to_string(),
			));
		}
		if paths.is_empty() {
			return Ok(());
		}

		let flags: Vec<bool> = hashes.iter().map(Option::is_some).collect();
		let update_df = df! {
			"path" => paths,
			"content_hash" => hashes,
			"hashed" => flags,
		}?;

		// Merge updates into state using a left join and coalesce
		let updated = self
			.data
			.clone()
			.lazy()
			.left_join(update_df.lazy(), col("path"), col("path"))
			.with_columns([
				when(col("content_hash_right").is_not_null())
					.then(col("content_hash_right"))
					.otherwise(col("content_hash"))
					.alias("content_hash"),
				when(col("hashed_right").is_not_null())
					.then(col("hashed_right"))
					.otherwise(col("hashed"))
					.alias("hashed"),
			])
			.select([all().exclude(["content_hash_right", "hashed_right"])])
			.collect()?;

		self.data = updated;
		Ok(())
	}

	/// Copy digests from an earlier scan for files whose size and mtime are unchanged.
	///
	/// Returns how many files picked up a cached digest.
	pub fn reuse_hashes_from(&mut self, previous: &DataFrame) -> DetectorResult<usize> {
		if previous.height() == 0 || self.data.height() == 0 {
			return Ok(0);
		}
		let before = self.hashed_count();

		let cached = previous
			.clone()
			.lazy()
			.filter(col("hashed").eq(lit(true)))
			.select([
				col("path"),
				col("size"),
				col("modified"),
				col("content_hash"),
			]);

		let unchanged = col("content_hash_right")
			.is_not_null()
			.and(col("size_right").eq(col("size")))
			.and(col("modified_right").eq(col("modified")));

		let updated = self
			.data
			.clone()
			.lazy()
			.left_join(cached, col("path"), col("path"))
			.with_columns([
				when(unchanged.clone())
					.then(col("content_hash_right"))
					.otherwise(col("content_hash"))
					.alias("content_hash"),
				when(unchanged)
					.then(lit(true))
					.otherwise(col("hashed"))
					.alias("hashed"),
			])
			.select([all().exclude(["size_right", "modified_right", "content_hash_right"])])
			.collect()?;

		self.data = updated;
		Ok(self.hashed_count().saturating_sub(before))
	}

	fn hashed_count(&self) -> usize {
		self.data
			.column("hashed")
			.ok()
			.and_then(|s| s.bool().ok())
			.map(|b| b.into_iter().filter(|v| matches!(v, Some(true))).count())
			.unwrap_or(0)
	}

	/// Materialize every row, ordered by discovery sequence.
	pub fn rows(&self) -> DetectorResult<Vec<FileRow>> {
		let df = &self.data;
		let paths = df.column("path")?.str()?;
		let sizes = df.column("size")?.u64()?;
		let types = df.column("file_type")?.str()?;
		let seqs = df.column("seq")?.u64()?;
		let candidates = df.column("candidate")?.bool()?;
		let hashed = df.column("hashed")?.bool()?;
		let digests = df.column("content_hash")?.str()?;

		let mut rows = Vec::with_capacity(df.height());
		for i in 0..df.height() {
			let Some(path) = paths.get(i) else { continue };
			rows.push(FileRow {
				path: path.to_string(),
				size: sizes.get(i).unwrap_or(0),
				file_type: types.get(i).unwrap_or("unknown").to_string(),
				seq: seqs.get(i).unwrap_or(u64::MAX),
				candidate: candidates.get(i).unwrap_or(false),
				hashed: hashed.get(i).unwrap_or(false),
				content_hash: digests.get(i).map(str::to_string),
			});
		}
		rows.sort_by_key(|r| r.seq);
		Ok(rows)
	}
}

/// Individual file record for initial discovery
#[derive(Debug, Clone)]
pub struct FileRecord {
	pub path: PathBuf,
	pub size: u64,
	pub modified: DateTime<Utc>,
	pub file_type: FileKind,
}

/// One set of byte-identical files.
///
/// `files[0]` is the original that stays in place; the rest are the copies to move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
	pub hash: String,
	pub size: u64,
	pub files: Vec<PathBuf>,
}

impl DuplicateGroup {
	pub fn original(&self) -> &PathBuf {
		&self.files[0]
	}

	pub fn duplicates(&self) -> &[PathBuf] {
		&self.files[1..]
	}

	/// Bytes freed if every copy except the original went away.
	pub fn wasted_bytes(&self) -> u64 {
		self.size * self.duplicates().len() as u64
	}
}

/// Summary of exact-duplicate relations, one row per group.
///
/// Columns: `hash_value`, `hash_type`, `file_count`, `total_size`, `wasted_bytes`.
#[derive(Debug, Clone)]
pub struct RelationStore {
	pub hash_relations: DataFrame,
}

impl RelationStore {
	/// Create a new empty RelationStore
	pub fn new() -> DetectorResult<Self> {
		Ok(RelationStore {
			hash_relations: Self::create_hash_relations_schema()?,
		})
	}

	fn create_hash_relations_schema() -> PolarsResult<DataFrame> {
		df! {
			"hash_value" => Vec::<String>::new(),
			"hash_type" => Vec::<String>::new(),
			"file_count" => Vec::<u32>::new(),
			"total_size" => Vec::<u64>::new(),
			"wasted_bytes" => Vec::<u64>::new(),
		}
	}

	/// Build the relation table from computed groups
	pub fn from_groups(groups: &[DuplicateGroup], hash_type: &str) -> DetectorResult<Self> {
		if groups.is_empty() {
			return Self::new();
		}
		let hashes: Vec<String> = groups.iter().map(|g| g.hash.clone()).collect();
		let counts: Vec<u32> = groups.iter().map(|g| g.files.len() as u32).collect();
		let totals: Vec<u64> = groups
			.iter()
			.map(|g| g.size * g.files.len() as u64)
			.collect();
		let wasted: Vec<u64> = groups.iter().map(DuplicateGroup::wasted_bytes).collect();
		let hash_relations = df! {
			"hash_value" => hashes,
			"hash_type" => vec![hash_type.to_string(); groups.len()],
			"file_count" => counts,
			"total_size" => totals,
			"wasted_bytes" => wasted,
		}?;
		Ok(Self { hash_relations })
	}

	pub fn group_count(&self) -> usize {
		self.hash_relations.height()
	}
}
