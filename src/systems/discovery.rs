//! File discovery system for scanning filesystem

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

use crate::data::{FileKind, FileRecord, ScanState};
use crate::detector::PathFilter;
use crate::error::{SystemError, SystemResult};
use crate::systems::{
	System, SystemContext, SystemProgress, SystemRunner, yield_periodically_with_cancellation,
};

/// Discovery progress is reported once per this many files.
pub const PROGRESS_EVERY: usize = 100;

/// System for discovering files in the filesystem
#[derive(Debug, Clone)]
pub struct FileDiscoverySystem {
	/// Paths to scan
	pub scan_paths: Vec<PathBuf>,
	/// Whether to follow symbolic links
	pub follow_links: bool,
	/// Maximum depth to scan (None for unlimited)
	pub max_depth: Option<usize>,
	/// Minimum file size to include (in bytes)
	pub min_file_size: u64,
	/// Maximum file size to include (in bytes, None for unlimited)
	pub max_file_size: Option<u64>,
	/// Glob-based path filtering
	pub path_filter: Option<PathFilter>,
	/// Directory trees never entered
	pub exclude_dirs: Vec<PathBuf>,
}

impl FileDiscoverySystem {
	/// Create a new file discovery system
	pub fn new(scan_paths: Vec<PathBuf>) -> Self {
		Self {
			scan_paths,
			follow_links: false,
			max_depth: None,
			min_file_size: 0,
			max_file_size: None,
			path_filter: None,
			exclude_dirs: Vec::new(),
		}
	}

	/// Configure whether to follow symbolic links
	pub fn follow_links(mut self, follow: bool) -> Self {
		self.follow_links = follow;
		self
	}

	/// Set maximum scan depth
	pub fn max_depth(mut self, depth: Option<usize>) -> Self {
		self.max_depth = depth;
		self
	}

	/// Set file size limits
	pub fn file_size_range(mut self, min: u64, max: Option<u64>) -> Self {
		self.min_file_size = min;
		self.max_file_size = max;
		self
	}

	/// Set path filter for glob-based filtering
	pub fn with_path_filter(mut self, filter: PathFilter) -> Self {
		self.path_filter = Some(filter);
		self
	}

	/// Skip everything below `dir`
	pub fn exclude_dir(mut self, dir: PathBuf) -> Self {
		self.exclude_dirs.push(dir);
		self
	}

	/// Discover files in the configured paths
	pub async fn discover_files(&self, context: &SystemContext) -> SystemResult<Vec<FileRecord>> {
		info!(
			"Discovery: starting scan of {} paths",
			self.scan_paths.len()
		);
		let mut all_files = Vec::new();
		let mut progress = SystemProgress::new(self.name().to_string(), 0);
		let mut last_yield = Instant::now();
		let mut seen = 0usize;

		for scan_path in &self.scan_paths {
			debug!("Discovery: scanning {}", scan_path.display());
			let files = self
				.discover_files_in_path(
					scan_path,
					context,
					&mut progress,
					&mut last_yield,
					&mut seen,
				)
				.await?;
			all_files.extend(files);
		}

		progress.total_items = seen;
		progress.update(seen, None);
		context.report_progress(progress);
		info!(
			"Discovery: finished, {} files seen, {} kept",
			seen,
			all_files.len()
		);
		Ok(all_files)
	}

	async fn discover_files_in_path(
		&self,
		path: &Path,
		context: &SystemContext,
		progress: &mut SystemProgress,
		last_yield: &mut Instant,
		seen: &mut usize,
	) -> SystemResult<Vec<FileRecord>> {
		let mut files = Vec::new();

		let mut walker = WalkDir::new(path)
			.follow_links(self.follow_links)
			.sort_by_file_name();

		if let Some(max_depth) = self.max_depth {
			walker = walker.max_depth(max_depth);
		}

		let walker = walker
			.into_iter()
			.filter_entry(|e| !(e.file_type().is_dir() && self.is_excluded_dir(e.path())));

		for entry in walker {
			yield_periodically_with_cancellation(
				last_yield,
				context.yield_interval,
				context,
				self.name(),
			)
			.await?;

			let entry = match entry {
				Ok(e) => e,
				Err(e) => {
					warn!("FileDiscovery walk error: {}", e);
					continue;
				}
			};

			if !entry.file_type().is_file() {
				continue;
			}

			let path = entry.path();

			*seen += 1;
			if *seen % PROGRESS_EVERY == 0 {
				info!("Discovery: scanned {} files...", seen);
				progress.update(*seen, Some(path.to_string_lossy().to_string()));
				context.report_progress(progress.clone());
			}

			if let Some(ref filter) = self.path_filter
				&& !filter.should_include(path)
			{
				trace!("Discovery: filtered out {}", path.display());
				continue;
			}

			let metadata = match entry.metadata() {
				Ok(m) => m,
				Err(e) => {
					warn!("Skipping {} (metadata error: {})", path.display(), e);
					continue;
				}
			};

			let size = metadata.len();

			if size < self.min_file_size {
				continue;
			}

			if let Some(max_size) = self.max_file_size
				&& size > max_size
			{
				continue;
			}

			let modified = match metadata.modified() {
				Ok(ts) => DateTime::<Utc>::from(ts),
				Err(e) => {
					warn!("Skipping {} (mtime error: {})", path.display(), e);
					continue;
				}
			};

			files.push(FileRecord {
				path: path.to_path_buf(),
				size,
				modified,
				file_type: determine_file_type(path),
			});
			trace!("Discovery: found {} ({} bytes)", path.display(), size);
		}

		Ok(files)
	}

	fn is_excluded_dir(&self, dir: &Path) -> bool {
		self.exclude_dirs.iter().any(|ex| dir.starts_with(ex))
	}
}

/// Classify a file by MIME sniffing, falling back to its extension
pub fn determine_file_type(path: &Path) -> FileKind {
	let mime = tree_magic_mini::from_filepath(path).unwrap_or("");

	match mime {
		mime if mime.starts_with("text/") => FileKind::Text,
		mime if mime.starts_with("image/") => FileKind::Image,
		mime if mime.starts_with("audio/") => FileKind::Audio,
		mime if mime.starts_with("video/") => FileKind::Video,
		"application/zip"
		| "application/x-tar"
		| "application/gzip"
		| "application/x-rar-compressed"
		| "application/x-7z-compressed" => FileKind::Archive,
		_ => kind_from_extension(path),
	}
}

fn kind_from_extension(path: &Path) -> FileKind {
	let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
		return FileKind::Unknown;
	};
	match ext.to_lowercase().as_str() {
		"txt" | "md" | "rs" | "py" | "js" | "html" | "css" | "json" | "xml" | "yaml" | "toml"
		| "csv" | "log" => FileKind::Text,
		"jpg" | "jpeg" | "png" | "gif" | "bmp" | "tiff" | "webp" | "svg" | "heic" => {
			FileKind::Image
		}
		"mp3" | "wav" | "flac" | "ogg" | "m4a" | "aac" => FileKind::Audio,
		"mp4" | "avi" | "mkv" | "mov" | "wmv" | "flv" | "webm" => FileKind::Video,
		"zip" | "tar" | "gz" | "bz2" | "xz" | "7z" | "rar" => FileKind::Archive,
		_ => FileKind::Binary,
	}
}

#[async_trait]
impl SystemRunner for FileDiscoverySystem {
	async fn run(&self, state: &mut ScanState, context: &SystemContext) -> SystemResult<()> {
		let files = self.discover_files(context).await?;

		state
			.add_files(files)
			.map_err(|e| SystemError::ExecutionFailed {
				system: self.name().to_string(),
				reason: format!("Failed to add files to state: {}", e),
			})?;

		Ok(())
	}

	fn can_run(&self, _state: &ScanState) -> bool {
		// Discovery creates the initial data
		true
	}

	fn priority(&self) -> u8 {
		255
	}

	fn name(&self) -> &'static str {
		"FileDiscovery"
	}
}

impl System for FileDiscoverySystem {
	fn required_columns(&self) -> &[&'static str] {
		&[]
	}

	fn produced_columns(&self) -> &[&'static str] {
		&["path", "size", "modified", "file_type", "seq"]
	}

	fn description(&self) -> &'static str {
		"Discovers files in the filesystem and populates initial metadata"
	}
}
