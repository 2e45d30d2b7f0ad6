//! Main API for duplicate detection

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, info, warn};

use crate::cache::CacheManager;
use crate::data::{DuplicateGroup, RelationStore, ScanState};
use crate::error::{DetectorError, DetectorResult};
use crate::paths::{absolutize, cache_dir_for, is_within};
use crate::query::Query;
use crate::relocate::{RelocationPlan, RelocationReport, Relocator};
use crate::systems::{
	ContentHashSystem, FileDiscoverySystem, HashAlgorithm, ProgressCallback, SizeGroupingSystem,
	SystemContext, SystemScheduler,
};

/// Include/exclude glob lists applied during discovery.
///
/// Patterns are matched against the full path and against the file name, so both
/// `**/node_modules/**` and `*.tmp` behave as expected. An empty include list
/// means "everything"; excludes always win.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
	include: Option<GlobSet>,
	exclude: Option<GlobSet>,
	pub include_patterns: Vec<String>,
	pub exclude_patterns: Vec<String>,
}

impl PathFilter {
	pub fn new(
		include_patterns: Vec<String>,
		exclude_patterns: Vec<String>,
	) -> DetectorResult<Self> {
		Ok(Self {
			include: build_glob_set(&include_patterns)?,
			exclude: build_glob_set(&exclude_patterns)?,
			include_patterns,
			exclude_patterns,
		})
	}

	pub fn is_empty(&self) -> bool {
		self.include.is_none() && self.exclude.is_none()
	}

	pub fn should_include(&self, path: &Path) -> bool {
		let matches = |set: &GlobSet| {
			set.is_match(path) || path.file_name().is_some_and(|name| set.is_match(name))
		};

		if let Some(ref exclude) = self.exclude
			&& matches(exclude)
		{
			return false;
		}

		match self.include {
			Some(ref include) => matches(include),
			None => true,
		}
	}
}

fn build_glob_set(patterns: &[String]) -> DetectorResult<Option<GlobSet>> {
	if patterns.is_empty() {
		return Ok(None);
	}
	let mut builder = GlobSetBuilder::new();
	for pattern in patterns {
		let glob = Glob::new(pattern).map_err(|e| DetectorError::InvalidGlobPattern {
			pattern: pattern.clone(),
			reason: e.kind().to_string(),
		})?;
		builder.add(glob);
	}
	builder
		.build()
		.map(Some)
		.map_err(|e| DetectorError::Config(e.to_string()))
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
	pub algorithm: HashAlgorithm,
	/// Files smaller than this are ignored
	pub min_file_size: u64,
	pub max_file_size: Option<u64>,
	pub path_filter: Option<PathFilter>,
	pub follow_links: bool,
	pub max_depth: Option<usize>,
	/// Files hashed at once
	pub max_concurrent_files: usize,
	/// Base directory for the hash cache; `None` disables caching
	pub cache_dir: Option<PathBuf>,
	/// Directory trees skipped during discovery
	pub exclude_dirs: Vec<PathBuf>,
}

impl Default for DetectorConfig {
	fn default() -> Self {
		Self {
			algorithm: HashAlgorithm::default(),
			min_file_size: 0,
			max_file_size: None,
			path_filter: None,
			follow_links: false,
			max_depth: None,
			max_concurrent_files: num_cpus::get(),
			cache_dir: None,
			exclude_dirs: Vec::new(),
		}
	}
}

impl DetectorConfig {
	pub fn validate(&self) -> DetectorResult<()> {
		if self.max_concurrent_files == 0 {
			return Err(DetectorError::Config(
				"max_concurrent_files must be greater than 0".to_string(),
			));
		}
		if let Some(max) = self.max_file_size
			&& max < self.min_file_size
		{
			return Err(DetectorError::Config(format!(
				"max file size {max} is below min file size {}",
				self.min_file_size
			)));
		}
		Ok(())
	}
}

pub struct DuplicateDetector {
	pub config: DetectorConfig,
	pub state: ScanState,
	pub relations: RelationStore,
	pub scheduler: SystemScheduler,
	context: SystemContext,
	source_root: Option<PathBuf>,
}

impl DuplicateDetector {
	pub fn new(config: DetectorConfig) -> DetectorResult<Self> {
		config.validate()?;
		let context = SystemContext::new().with_max_concurrent_files(config.max_concurrent_files);
		Ok(Self {
			config,
			state: ScanState::new()?,
			relations: RelationStore::new()?,
			scheduler: SystemScheduler::new(),
			context,
			source_root: None,
		})
	}

	pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
		self.context = self.context.with_progress_callback(callback);
		self
	}

	/// Token that aborts the running scan when set
	pub fn cancellation_token(&self) -> Arc<AtomicBool> {
		self.context.cancellation_token.clone()
	}

	/// Absolute root of the last scan
	pub fn source_root(&self) -> Option<&Path> {
		self.source_root.as_deref()
	}

	fn prepare_source(&mut self, path: &Path) -> DetectorResult<PathBuf> {
		let root = absolutize(path)?;
		if !root.is_dir() {
			return Err(DetectorError::SourceNotFound { path: root });
		}
		self.state = ScanState::new()?;
		self.relations = RelationStore::new()?;
		self.source_root = Some(root.clone());
		Ok(root)
	}

	fn discovery_for(&self, root: &Path, nested_target: Option<&Path>) -> FileDiscoverySystem {
		let mut discovery = FileDiscoverySystem::new(vec![root.to_path_buf()])
			.follow_links(self.config.follow_links)
			.max_depth(self.config.max_depth)
			.file_size_range(self.config.min_file_size, self.config.max_file_size);
		if let Some(ref filter) = self.config.path_filter
			&& !filter.is_empty()
		{
			discovery = discovery.with_path_filter(filter.clone());
		}
		for dir in self.config.exclude_dirs.iter().map(PathBuf::as_path).chain(nested_target) {
			discovery = discovery.exclude_dir(dir.to_path_buf());
		}
		discovery
	}

	fn cache_manager(&self, root: &Path) -> Option<CacheManager> {
		self.config
			.cache_dir
			.as_ref()
			.map(|base| CacheManager::new(cache_dir_for(base, root)))
	}

	/// Walk `path` and record file metadata without hashing anything
	pub async fn scan_directory(&mut self, path: PathBuf) -> DetectorResult<()> {
		self.discover(&path, None).await
	}

	async fn discover(
		&mut self,
		path: &Path,
		nested_target: Option<&Path>,
	) -> DetectorResult<()> {
		let root = self.prepare_source(path)?;
		info!("Detector: scan_directory {}", root.display());

		let discovery = self.discovery_for(&root, nested_target);
		self.scheduler.clear();
		self.scheduler.add_system(discovery);
		self.scheduler.add_system(SizeGroupingSystem);
		self.scheduler
			.run_all(&mut self.state, &self.context)
			.await
			.map_err(DetectorError::from)
	}

	/// Walk `path` and hash every file that could have a duplicate
	pub async fn scan_and_hash(&mut self, path: PathBuf) -> DetectorResult<()> {
		self.scan_directory(path).await?;
		self.hash_candidates().await
	}

	async fn hash_candidates(&mut self) -> DetectorResult<()> {
		let Some(root) = self.source_root.clone() else {
			return Ok(());
		};

		self.load_cache(&root);

		self.scheduler.clear();
		self.scheduler
			.add_system(ContentHashSystem::new(self.config.algorithm));
		self.scheduler
			.run_all(&mut self.state, &self.context)
			.await?;

		self.save_cache(&root);
		Ok(())
	}

	/// Scan, hash and group. Returns the duplicate groups, originals first.
	pub async fn find_duplicates(&mut self, path: PathBuf) -> DetectorResult<Vec<DuplicateGroup>> {
		self.scan_and_hash(path).await?;
		self.group_duplicates()
	}

	fn group_duplicates(&mut self) -> DetectorResult<Vec<DuplicateGroup>> {
		let groups = self.query().duplicate_groups()?;
		self.relations = RelationStore::from_groups(&groups, self.config.algorithm.as_str())?;
		info!(
			"Detector: {} files scanned, {} duplicate groups",
			self.total_files(),
			groups.len()
		);
		Ok(groups)
	}

	/// Move every duplicate found by the last scan into `target`
	pub fn move_duplicates(
		&self,
		target: &Path,
		dry_run: bool,
	) -> DetectorResult<RelocationReport> {
		let Some(ref root) = self.source_root else {
			return Err(DetectorError::Config(
				"move_duplicates called before a scan".to_string(),
			));
		};
		let target = absolutize(target)?;
		let groups = self.query().duplicate_groups()?;
		let plan = RelocationPlan::new(&groups, root, &target);
		info!(
			"Detector: relocating {} duplicates to {}{}",
			plan.move_count(),
			target.display(),
			if dry_run { " (dry run)" } else { "" }
		);
		Relocator::new(dry_run).execute(&plan)
	}

	/// The whole tool in one call: find duplicates under `source`, move them into `target`.
	///
	/// `target` is left out of the scan when it sits inside `source`. When nothing is
	/// duplicated the target is not created and no log is written.
	pub async fn find_and_move(
		&mut self,
		source: PathBuf,
		target: PathBuf,
		dry_run: bool,
	) -> DetectorResult<(Vec<DuplicateGroup>, RelocationReport)> {
		let source_abs = absolutize(&source)?;
		let target_abs = absolutize(&target)?;
		let nested_target = is_within(&target_abs, &source_abs).then_some(target_abs.as_path());
		if let Some(dir) = nested_target {
			debug!("Detector: excluding nested target {}", dir.display());
		}

		self.discover(&source_abs, nested_target).await?;
		self.hash_candidates().await?;
		let groups = self.group_duplicates()?;
		if groups.is_empty() {
			return Ok((groups, RelocationReport::empty(dry_run)));
		}
		let report = self.move_duplicates(&target_abs, dry_run)?;
		Ok((groups, report))
	}

	pub fn query(&self) -> Query<'_> {
		Query::new(&self.state, &self.relations)
	}

	/// Merge digests from the cache for `root` into the current state.
	///
	/// The cache only saves work; a broken cache is logged and skipped.
	pub fn load_cache(&mut self, root: &Path) {
		let Some(cache) = self.cache_manager(root) else {
			return;
		};
		match cache.load(self.config.algorithm) {
			Ok(Some(previous)) => match self.state.reuse_hashes_from(&previous.data) {
				Ok(reused) => {
					info!("Cache: reused {} digests", reused);
					self.state.scan_id = previous.scan_id + 1;
				}
				Err(e) => warn!("Cache: could not merge previous scan: {}", e),
			},
			Ok(None) => debug!("Cache: nothing usable in {}", cache.cache_dir.display()),
			Err(e) => warn!("Cache: ignoring unreadable cache: {}", e),
		}
	}

	pub fn save_cache(&self, root: &Path) {
		if let Some(cache) = self.cache_manager(root)
			&& let Err(e) = cache.save(&self.state, self.config.algorithm)
		{
			warn!("Cache: could not save: {}", e);
		}
	}

	pub fn total_files(&self) -> usize {
		self.state.data.height()
	}

	pub fn files_pending_hash(&self) -> usize {
		self.state
			.files_needing_processing("content_hash")
			.map(|df| df.height())
			.unwrap_or(0)
	}

	pub fn files_by_type_counts(&self) -> HashMap<String, usize> {
		let mut map = HashMap::new();
		if let Ok(s) = self.state.data.column("file_type")
			&& let Ok(utf8) = s.str()
		{
			for v in utf8.into_iter().flatten() {
				*map.entry(v.to_string()).or_insert(0) += 1;
			}
		}
		map
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use tempfile::TempDir;

	#[test]
	fn test_path_filter() {
		let filter = PathFilter::new(
			vec!["*.jpg".to_string(), "*.png".to_string()],
			vec!["**/thumbs/**".to_string()],
		)
		.unwrap();

		assert!(filter.should_include(Path::new("/photos/a.jpg")));
		assert!(!filter.should_include(Path::new("/photos/a.txt")));
		assert!(!filter.should_include(Path::new("/photos/thumbs/a.jpg")));

		let everything = PathFilter::default();
		assert!(everything.is_empty());
		assert!(everything.should_include(Path::new("/any/thing")));
	}

	#[test]
	fn test_invalid_glob() {
		let err = PathFilter::new(vec!["a[".to_string()], vec![]).unwrap_err();
		assert!(matches!(err, DetectorError::InvalidGlobPattern { .. }));
	}

	#[test]
	fn test_config_validation() {
		let config = DetectorConfig {
			max_concurrent_files: 0,
			..DetectorConfig::default()
		};
		assert!(matches!(
			DuplicateDetector::new(config),
			Err(DetectorError::Config(_))
		));

		let config = DetectorConfig {
			min_file_size: 10,
			max_file_size: Some(5),
			..DetectorConfig::default()
		};
		assert!(config.validate().is_err());
	}

	#[smol_potat::test]
	async fn test_missing_source() {
		let tmp = TempDir::new().unwrap();
		let mut detector = DuplicateDetector::new(DetectorConfig::default()).unwrap();
		let err = detector
			.find_duplicates(tmp.path().join("nope"))
			.await
			.unwrap_err();
		assert!(matches!(err, DetectorError::SourceNotFound { .. }));
	}

	#[test]
	fn test_move_requires_scan() {
		let detector = DuplicateDetector::new(DetectorConfig::default()).unwrap();
		assert!(matches!(
			detector.move_duplicates(Path::new("/tmp/x"), true),
			Err(DetectorError::Config(_))
		));
	}

	#[smol_potat::test]
	async fn test_scan_counts() {
		let tmp = TempDir::new().unwrap();
		fs::write(tmp.path().join("a.txt"), "one").unwrap();
		fs::write(tmp.path().join("b.txt"), "two").unwrap();
		fs::write(tmp.path().join("c.txt"), "three").unwrap();

		let mut detector = DuplicateDetector::new(DetectorConfig::default()).unwrap();
		detector
			.scan_directory(tmp.path().to_path_buf())
			.await
			.unwrap();

		assert_eq!(detector.total_files(), 3);
		assert_eq!(detector.files_pending_hash(), 2);
		let counts: usize = detector.files_by_type_counts().values().sum();
		assert_eq!(counts, 3);

		detector
			.scan_and_hash(tmp.path().to_path_buf())
			.await
			.unwrap();
		assert_eq!(detector.files_pending_hash(), 0);
		assert!(detector.query().duplicate_groups().unwrap().is_empty());
	}

	#[smol_potat::test]
	async fn test_find_and_move_without_duplicates_leaves_target_alone() {
		let tmp = TempDir::new().unwrap();
		let source = tmp.path().join("src");
		let target = tmp.path().join("dups");
		fs::create_dir(&source).unwrap();
		fs::write(source.join("a"), "one").unwrap();
		fs::write(source.join("b"), "two").unwrap();

		let mut detector = DuplicateDetector::new(DetectorConfig::default()).unwrap();
		let (groups, report) = detector
			.find_and_move(source, target.clone(), false)
			.await
			.unwrap();
		assert!(groups.is_empty());
		assert!(report.groups.is_empty());
		assert!(report.log_path.is_none());
		assert!(!target.exists());
	}

	#[smol_potat::test]
	async fn test_nested_target_is_not_scanned() {
		let tmp = TempDir::new().unwrap();
		let source = tmp.path().join("src");
		let target = source.join("dups");
		fs::create_dir_all(&target).unwrap();
		fs::write(source.join("a"), "same").unwrap();
		fs::write(source.join("b"), "same").unwrap();
		// Left over from an earlier run
		fs::write(target.join("old"), "same").unwrap();

		let mut detector = DuplicateDetector::new(DetectorConfig::default()).unwrap();
		let (groups, report) = detector
			.find_and_move(source.clone(), target.clone(), false)
			.await
			.unwrap();
		assert_eq!(groups.len(), 1);
		assert_eq!(groups[0].files.len(), 2);
		assert_eq!(report.moved(), 1);
		assert!(source.join("a").exists());
		assert!(target.join("b").exists());
		assert!(target.join("old").exists());
	}

	#[smol_potat::test]
	async fn test_target_spelled_with_parent_dir_is_excluded() {
		let tmp = TempDir::new().unwrap();
		let source = tmp.path().join("src");
		fs::create_dir_all(source.join("x")).unwrap();
		fs::write(source.join("a"), "same").unwrap();
		fs::write(source.join("b"), "same").unwrap();
		let target = source.join("x").join("..").join("dups");

		let mut detector = DuplicateDetector::new(DetectorConfig::default()).unwrap();
		let (_, report) = detector
			.find_and_move(source.clone(), target.clone(), false)
			.await
			.unwrap();
		assert_eq!(report.moved(), 1);
		assert!(source.join("dups/b").exists());

		// A new copy appears; the earlier output must stay where it is
		fs::write(source.join("c"), "same").unwrap();
		let mut again = DuplicateDetector::new(DetectorConfig::default()).unwrap();
		let (groups, report) = again
			.find_and_move(source.clone(), target, false)
			.await
			.unwrap();
		assert_eq!(groups.len(), 1);
		assert_eq!(
			groups[0].files,
			vec![source.join("a"), source.join("c")]
		);
		assert_eq!(report.moved(), 1);
		assert!(source.join("dups/b").exists());
		assert!(source.join("dups/c").exists());
		assert!(!source.join("dups/dups").exists());
	}

	#[smol_potat::test]
	async fn test_reused_detector_does_not_keep_old_targets_excluded() {
		let tmp = TempDir::new().unwrap();
		let source = tmp.path().join("src");
		fs::create_dir(&source).unwrap();
		fs::write(source.join("a"), "same").unwrap();
		fs::write(source.join("b"), "same").unwrap();

		let mut detector = DuplicateDetector::new(DetectorConfig::default()).unwrap();
		detector
			.find_and_move(source.clone(), source.join("dups"), false)
			.await
			.unwrap();
		assert!(detector.config.exclude_dirs.is_empty());

		// Same detector, target outside: the old nested target is scanned again
		let (groups, report) = detector
			.find_and_move(source.clone(), tmp.path().join("elsewhere"), true)
			.await
			.unwrap();
		assert_eq!(groups.len(), 1);
		assert_eq!(
			groups[0].files,
			vec![source.join("a"), source.join("dups").join("b")]
		);
		assert_eq!(report.planned(), 1);
	}

	#[smol_potat::test]
	async fn test_cache_reuses_digests() {
		let tmp = TempDir::new().unwrap();
		let source = tmp.path().join("src");
		fs::create_dir(&source).unwrap();
		fs::write(source.join("a"), "same").unwrap();
		fs::write(source.join("b"), "same").unwrap();

		let config = DetectorConfig {
			cache_dir: Some(tmp.path().join("cache")),
			..DetectorConfig::default()
		};

		let mut first = DuplicateDetector::new(config.clone()).unwrap();
		assert_eq!(first.find_duplicates(source.clone()).await.unwrap().len(), 1);

		let mut second = DuplicateDetector::new(config).unwrap();
		second.scan_directory(source.clone()).await.unwrap();
		let root = second.source_root().unwrap().to_path_buf();
		second.load_cache(&root);
		// Digests came from the cache; nothing left to hash
		assert_eq!(second.files_pending_hash(), 0);
		assert_eq!(second.state.scan_id, 2);
	}
}
