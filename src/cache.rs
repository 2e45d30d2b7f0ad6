//! Disk caching and persistence (Parquet + JSON metadata)

use chrono::Utc;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::data::ScanState;
use crate::error::{CacheError, CacheResult};
use crate::systems::HashAlgorithm;

pub const CACHE_VERSION: u32 = 1;

const REQUIRED_COLUMNS: [&str; 5] = ["path", "size", "modified", "hashed", "content_hash"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanMetadata {
	pub version: u32,
	pub scan_id: u32,
	pub last_scan_time: i64,
	pub file_count: usize,
	pub hash_algorithm: HashAlgorithm,
}

#[derive(Debug, Clone)]
pub struct CacheManager {
	pub cache_dir: PathBuf,
}

impl CacheManager {
	pub fn new(cache_dir: PathBuf) -> Self {
		Self { cache_dir }
	}

	fn meta_path(&self) -> PathBuf {
		self.cache_dir.join("meta.json")
	}

	fn state_path(&self) -> PathBuf {
		self.cache_dir.join("state.parquet")
	}

	pub fn ensure_dir(&self) -> CacheResult<()> {
		fs::create_dir_all(&self.cache_dir)?;
		Ok(())
	}

	pub fn cache_exists(&self) -> bool {
		self.state_path().exists() && self.meta_path().exists()
	}

	/// Persist the scan. Metadata is written last so a torn save is never loaded.
	pub fn save(&self, state: &ScanState, algorithm: HashAlgorithm) -> CacheResult<()> {
		self.ensure_dir()?;

		atomic_write_parquet(&self.state_path(), state.data.clone())?;

		let meta = ScanMetadata {
			version: CACHE_VERSION,
			scan_id: state.scan_id,
			last_scan_time: Utc::now().timestamp_millis(),
			file_count: state.data.height(),
			hash_algorithm: algorithm,
		};
		let meta_json = serde_json::to_vec_pretty(&meta)?;
		atomic_write(&self.meta_path(), &meta_json)?;

		debug!(
			"Cache: saved {} rows to {}",
			meta.file_count,
			self.cache_dir.display()
		);
		Ok(())
	}

	/// Load a previous scan made with `algorithm`.
	///
	/// Returns `Ok(None)` when nothing is cached or the digests are not comparable.
	pub fn load(&self, algorithm: HashAlgorithm) -> CacheResult<Option<ScanState>> {
		if !self.cache_exists() {
			return Ok(None);
		}

		let meta_bytes = fs::read(self.meta_path())?;
		let meta: ScanMetadata = serde_json::from_slice(&meta_bytes)?;
		if meta.version != CACHE_VERSION {
			return Err(CacheError::VersionMismatch {
				expected: CACHE_VERSION,
				found: meta.version,
			});
		}
		if meta.hash_algorithm != algorithm {
			info!(
				"Cache: ignoring {} digests, this run uses {}",
				meta.hash_algorithm, algorithm
			);
			return Ok(None);
		}

		let state_df = ParquetReader::new(File::open(self.state_path())?).finish()?;
		if REQUIRED_COLUMNS
			.iter()
			.any(|c| state_df.column(c).is_err())
		{
			return Err(CacheError::Corrupted {
				path: self.state_path(),
			});
		}

		let started =
			chrono::DateTime::from_timestamp_millis(meta.last_scan_time).unwrap_or_else(Utc::now);
		debug!("Cache: loaded {} rows", state_df.height());
		Ok(Some(ScanState::from_parts(state_df, meta.scan_id, started)))
	}

	/// Remove cached files for this root
	pub fn clear(&self) -> CacheResult<()> {
		for path in [self.state_path(), self.meta_path()] {
			if path.exists() {
				fs::remove_file(path)?;
			}
		}
		Ok(())
	}
}

// Write to a temp file and rename into place
fn atomic_write_parquet(path: &Path, mut df: DataFrame) -> CacheResult<()> {
	let tmp = path.with_extension("parquet.tmp");
	let mut f = File::create(&tmp)?;
	ParquetWriter::new(&mut f)
		.with_compression(ParquetCompression::Zstd(None))
		.finish(&mut df)?;
	f.flush()?;
	f.sync_all()?;
	drop(f);

	cross_platform_atomic_rename(&tmp, path)
}

fn atomic_write(path: &Path, bytes: &[u8]) -> CacheResult<()> {
	let tmp = path.with_extension("json.tmp");
	fs::write(&tmp, bytes)?;
	cross_platform_atomic_rename(&tmp, path)
}

fn cross_platform_atomic_rename(from: &Path, to: &Path) -> CacheResult<()> {
	#[cfg(windows)]
	{
		// rename does not replace an existing file on Windows
		if to.exists() {
			fs::remove_file(to)?;
		}
	}
	fs::rename(from, to)?;
	Ok(())
}
