//! Moving duplicates out of the source tree and logging what happened

use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::data::DuplicateGroup;
use crate::error::{DetectorResult, RelocationError, RelocationResult};
use crate::paths::relative_to;

/// One file to move and where it goes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedMove {
	pub from: PathBuf,
	pub to: PathBuf,
}

/// The original that stays put and the copies leaving
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedGroup {
	pub original: PathBuf,
	pub moves: Vec<PlannedMove>,
}

/// Every move a run would make, computed up front
#[derive(Debug, Clone, Serialize)]
pub struct RelocationPlan {
	pub source_root: PathBuf,
	pub target_root: PathBuf,
	pub groups: Vec<PlannedGroup>,
}

impl RelocationPlan {
	/// Map each duplicate to `target_root/<path relative to source_root>`.
	///
	/// A duplicate outside `source_root` (possible when following links) lands
	/// directly under `target_root` by file name.
	pub fn new(groups: &[DuplicateGroup], source_root: &Path, target_root: &Path) -> Self {
		let groups = groups
			.iter()
			.map(|group| PlannedGroup {
				original: group.original().clone(),
				moves: group
					.duplicates()
					.iter()
					.map(|dup| PlannedMove {
						from: dup.clone(),
						to: destination_for(dup, source_root, target_root),
					})
					.collect(),
			})
			.collect();

		Self {
			source_root: source_root.to_path_buf(),
			target_root: target_root.to_path_buf(),
			groups,
		}
	}

	pub fn move_count(&self) -> usize {
		self.groups.iter().map(|g| g.moves.len()).sum()
	}

	pub fn is_empty(&self) -> bool {
		self.move_count() == 0
	}
}

fn destination_for(file: &Path, source_root: &Path, target_root: &Path) -> PathBuf {
	match relative_to(file, source_root) {
		Some(rel) => target_root.join(rel),
		None => target_root.join(file.file_name().unwrap_or(file.as_os_str())),
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "lowercase")]
pub enum MoveOutcome {
	Moved,
	/// Dry run; nothing touched
	Planned,
	Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct MoveResult {
	pub from: PathBuf,
	pub to: PathBuf,
	pub outcome: MoveOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupReport {
	pub original: PathBuf,
	pub results: Vec<MoveResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelocationReport {
	pub dry_run: bool,
	pub groups: Vec<GroupReport>,
	/// Where the move log was written, when one was
	pub log_path: Option<PathBuf>,
	/// Set when the move log could not be written; the moves themselves stand
	pub log_error: Option<String>,
}

impl RelocationReport {
	/// Report for a run with nothing to move
	pub fn empty(dry_run: bool) -> Self {
		Self {
			dry_run,
			groups: Vec::new(),
			log_path: None,
			log_error: None,
		}
	}

	fn results(&self) -> impl Iterator<Item = &MoveResult> {
		self.groups.iter().flat_map(|g| g.results.iter())
	}

	pub fn moved(&self) -> usize {
		self.results()
			.filter(|r| r.outcome == MoveOutcome::Moved)
			.count()
	}

	pub fn planned(&self) -> usize {
		self.results()
			.filter(|r| r.outcome == MoveOutcome::Planned)
			.count()
	}

	pub fn failed(&self) -> usize {
		self.results()
			.filter(|r| matches!(r.outcome, MoveOutcome::Failed(_)))
			.count()
	}
}

/// Carries out a [`RelocationPlan`]
#[derive(Debug, Clone, Copy, Default)]
pub struct Relocator {
	pub dry_run: bool,
}

impl Relocator {
	pub fn new(dry_run: bool) -> Self {
		Self { dry_run }
	}

	/// Execute every planned move. A failed move is recorded and the run continues.
	pub fn execute(&self, plan: &RelocationPlan) -> DetectorResult<RelocationReport> {
		if !self.dry_run {
			prepare_target(&plan.target_root)?;
		}

		let mut groups = Vec::with_capacity(plan.groups.len());
		for group in &plan.groups {
			let mut results = Vec::with_capacity(group.moves.len());
			for planned in &group.moves {
				let outcome = if self.dry_run {
					info!(
						"Would move: {} --> {}",
						planned.from.display(),
						planned.to.display()
					);
					MoveOutcome::Planned
				} else {
					match move_file(&planned.from, &planned.to) {
						Ok(()) => {
							info!(
								"Moved: {} --> {}",
								planned.from.display(),
								planned.to.display()
							);
							MoveOutcome::Moved
						}
						Err(e) => {
							warn!("Could not move {}: {}", planned.from.display(), e);
							MoveOutcome::Failed(e.to_string())
						}
					}
				};
				results.push(MoveResult {
					from: planned.from.clone(),
					to: planned.to.clone(),
					outcome,
				});
			}
			groups.push(GroupReport {
				original: group.original.clone(),
				results,
			});
		}

		let mut report = RelocationReport {
			dry_run: self.dry_run,
			groups,
			log_path: None,
			log_error: None,
		};

		if !self.dry_run {
			match MoveLog::write(&report, &plan.target_root, Local::now()) {
				Ok(path) => {
					info!("Log written: {}", path.display());
					report.log_path = Some(path);
				}
				Err(e) => {
					warn!("{}", e);
					report.log_error = Some(e.to_string());
				}
			}
		}

		Ok(report)
	}
}

fn prepare_target(target: &Path) -> RelocationResult<()> {
	if target.exists() && !target.is_dir() {
		return Err(RelocationError::TargetNotDirectory {
			path: target.to_path_buf(),
		});
	}
	fs::create_dir_all(target).map_err(|source| RelocationError::CreateTarget {
		path: target.to_path_buf(),
		source,
	})
}

/// Move one file, never replacing an existing destination.
///
/// The new name is created with a hard link, or with a `create_new` copy when
/// linking fails (for example across devices). Either way the filesystem
/// refuses an existing destination, even one that appears mid-move.
pub fn move_file(from: &Path, to: &Path) -> RelocationResult<()> {
	let exists = || RelocationError::DestinationExists {
		path: to.to_path_buf(),
	};
	if to.symlink_metadata().is_ok() {
		return Err(exists());
	}

	let failed = |source: io::Error| RelocationError::MoveFailed {
		from: from.to_path_buf(),
		to: to.to_path_buf(),
		source,
	};

	if let Some(parent) = to.parent() {
		fs::create_dir_all(parent).map_err(failed)?;
	}

	match fs::hard_link(from, to) {
		Ok(()) => {}
		Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Err(exists()),
		Err(link_err) => {
			debug!(
				"hard link {} failed ({}), copying instead",
				from.display(),
				link_err
			);
			match copy_new(from, to) {
				Ok(()) => {}
				Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Err(exists()),
				Err(e) => return Err(failed(e)),
			}
		}
	}

	if let Err(e) = fs::remove_file(from) {
		// Keep exactly one copy; `to` is ours since it was created above
		let _ = fs::remove_file(to);
		return Err(failed(e));
	}
	Ok(())
}

/// Copy `from` into a file that must not exist yet
fn copy_new(from: &Path, to: &Path) -> io::Result<()> {
	let mut src = File::open(from)?;
	let mut dst = OpenOptions::new().write(true).create_new(true).open(to)?;
	let copied = io::copy(&mut src, &mut dst)
		.and_then(|_| dst.sync_all())
		.and_then(|_| fs::set_permissions(to, src.metadata()?.permissions()));
	if copied.is_err() {
		drop(dst);
		let _ = fs::remove_file(to);
	}
	copied
}

/// The plain-text record of a relocation run
pub struct MoveLog;

impl MoveLog {
	/// `duplicates_log_<YYYY-MM-DD_HH-MM-SS>.txt`
	pub fn file_name(now: DateTime<Local>) -> String {
		format!("duplicates_log_{}.txt", now.format("%Y-%m-%d_%H-%M-%S"))
	}

	pub fn render(report: &RelocationReport) -> String {
		let mut out = String::new();
		for group in &report.groups {
			let _ = writeln!(out, "Original: {}", group.original.display());
			for result in &group.results {
				match &result.outcome {
					MoveOutcome::Moved | MoveOutcome::Planned => {
						let _ = writeln!(out, "  Duplicate: {}", result.from.display());
						let _ = writeln!(out, "  Moved to: {}", result.to.display());
					}
					MoveOutcome::Failed(err) => {
						let _ = writeln!(
							out,
							"  Failed to move: {}. Error: {}",
							result.from.display(),
							err
						);
					}
				}
			}
			out.push('\n');
		}
		out
	}

	/// Write the log into `dir`, returning its path
	pub fn write(
		report: &RelocationReport,
		dir: &Path,
		now: DateTime<Local>,
	) -> RelocationResult<PathBuf> {
		let path = dir.join(Self::file_name(now));
		fs::write(&path, Self::render(report)).map_err(|source| RelocationError::LogWrite {
			path: path.clone(),
			source,
		})?;
		Ok(path)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;
	use tempfile::TempDir;

	fn group(files: &[&Path]) -> DuplicateGroup {
		DuplicateGroup {
			hash: "h".to_string(),
			size: 4,
			files: files.iter().map(|p| p.to_path_buf()).collect(),
		}
	}

	#[test]
	fn test_plan_preserves_relative_layout() {
		let source = Path::new("/src");
		let target = Path::new("/dups");
		let groups = vec![group(&[
			Path::new("/src/a.txt"),
			Path::new("/src/x/y/a.txt"),
			Path::new("/elsewhere/a.txt"),
		])];

		let plan = RelocationPlan::new(&groups, source, target);
		assert_eq!(plan.move_count(), 2);
		assert_eq!(plan.groups[0].original, PathBuf::from("/src/a.txt"));
		assert_eq!(plan.groups[0].moves[0].to, PathBuf::from("/dups/x/y/a.txt"));
		assert_eq!(plan.groups[0].moves[1].to, PathBuf::from("/dups/a.txt"));
	}

	#[test_log::test]
	fn test_execute_moves_and_logs() {
		let tmp = TempDir::new().unwrap();
		let source = tmp.path().join("src");
		let target = tmp.path().join("dups");
		fs::create_dir_all(source.join("sub")).unwrap();
		fs::write(source.join("a.txt"), "same").unwrap();
		fs::write(source.join("sub/b.txt"), "same").unwrap();

		let groups = vec![group(&[&source.join("a.txt"), &source.join("sub/b.txt")])];
		let plan = RelocationPlan::new(&groups, &source, &target);
		let report = Relocator::new(false).execute(&plan).unwrap();

		assert_eq!(report.moved(), 1);
		assert_eq!(report.failed(), 0);
		assert!(source.join("a.txt").exists());
		assert!(!source.join("sub/b.txt").exists());
		assert_eq!(fs::read_to_string(target.join("sub/b.txt")).unwrap(), "same");

		let log_path = report.log_path.unwrap();
		assert!(log_path.starts_with(&target));
		let log = fs::read_to_string(log_path).unwrap();
		assert!(log.contains(&format!("Original: {}", source.join("a.txt").display())));
		assert!(log.contains(&format!("Moved to: {}", target.join("sub/b.txt").display())));
	}

	#[test_log::test]
	fn test_existing_destination_is_not_overwritten() {
		let tmp = TempDir::new().unwrap();
		let source = tmp.path().join("src");
		let target = tmp.path().join("dups");
		fs::create_dir_all(&source).unwrap();
		fs::create_dir_all(&target).unwrap();
		fs::write(source.join("a"), "same").unwrap();
		fs::write(source.join("b"), "same").unwrap();
		fs::write(target.join("b"), "keep me").unwrap();

		let groups = vec![group(&[&source.join("a"), &source.join("b")])];
		let plan = RelocationPlan::new(&groups, &source, &target);
		let report = Relocator::new(false).execute(&plan).unwrap();

		assert_eq!(report.failed(), 1);
		assert!(source.join("b").exists());
		assert_eq!(fs::read_to_string(target.join("b")).unwrap(), "keep me");
		let log = fs::read_to_string(report.log_path.unwrap()).unwrap();
		assert!(log.contains("Failed to move"));
	}

	#[test]
	fn test_move_file_refuses_existing_destination() {
		let tmp = TempDir::new().unwrap();
		let from = tmp.path().join("a");
		let to = tmp.path().join("out/a");
		fs::create_dir_all(tmp.path().join("out")).unwrap();
		fs::write(&from, "new").unwrap();
		fs::write(&to, "old").unwrap();

		let err = move_file(&from, &to).unwrap_err();
		assert!(matches!(err, RelocationError::DestinationExists { .. }));
		assert_eq!(fs::read_to_string(&from).unwrap(), "new");
		assert_eq!(fs::read_to_string(&to).unwrap(), "old");
	}

	#[test]
	fn test_copy_new_never_overwrites() {
		let tmp = TempDir::new().unwrap();
		let from = tmp.path().join("a");
		let to = tmp.path().join("b");
		fs::write(&from, "new").unwrap();
		fs::write(&to, "old").unwrap();

		let err = copy_new(&from, &to).unwrap_err();
		assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
		assert_eq!(fs::read_to_string(&to).unwrap(), "old");

		fs::remove_file(&to).unwrap();
		copy_new(&from, &to).unwrap();
		assert_eq!(fs::read_to_string(&to).unwrap(), "new");
		assert!(from.exists());
	}

	#[test]
	fn test_move_file_creates_parents_and_removes_source() {
		let tmp = TempDir::new().unwrap();
		let from = tmp.path().join("a");
		let to = tmp.path().join("deep/er/a");
		fs::write(&from, "data").unwrap();

		move_file(&from, &to).unwrap();
		assert!(!from.exists());
		assert_eq!(fs::read_to_string(&to).unwrap(), "data");
	}

	#[test]
	fn test_dry_run_touches_nothing() {
		let tmp = TempDir::new().unwrap();
		let source = tmp.path().join("src");
		let target = tmp.path().join("dups");
		fs::create_dir_all(&source).unwrap();
		fs::write(source.join("a"), "same").unwrap();
		fs::write(source.join("b"), "same").unwrap();

		let groups = vec![group(&[&source.join("a"), &source.join("b")])];
		let plan = RelocationPlan::new(&groups, &source, &target);
		let report = Relocator::new(true).execute(&plan).unwrap();

		assert_eq!(report.planned(), 1);
		assert!(report.log_path.is_none());
		assert!(source.join("b").exists());
		assert!(!target.exists());
	}

	#[test]
	fn test_target_must_be_a_directory() {
		let tmp = TempDir::new().unwrap();
		let target = tmp.path().join("not-a-dir");
		fs::write(&target, "x").unwrap();

		let plan = RelocationPlan::new(&[], tmp.path(), &target);
		let err = Relocator::new(false).execute(&plan).unwrap_err();
		assert!(matches!(
			err,
			crate::DetectorError::Relocation(RelocationError::TargetNotDirectory { .. })
		));
	}

	#[test]
	fn test_log_file_name_and_render() {
		let now = Local.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
		assert_eq!(
			MoveLog::file_name(now),
			"duplicates_log_2024-03-05_07-08-09.txt"
		);

		let report = RelocationReport {
			dry_run: false,
			groups: vec![GroupReport {
				original: PathBuf::from("/s/a"),
				results: vec![
					MoveResult {
						from: PathBuf::from("/s/b"),
						to: PathBuf::from("/t/b"),
						outcome: MoveOutcome::Moved,
					},
					MoveResult {
						from: PathBuf::from("/s/c"),
						to: PathBuf::from("/t/c"),
						outcome: MoveOutcome::Failed("denied".to_string()),
					},
				],
			}],
			log_path: None,
			log_error: None,
		};
		assert_eq!(
			MoveLog::render(&report),
			concat!(
				"Original: /s/a\n",
				"  Duplicate: /s/b\n",
				"  Moved to: /t/b\n",
				"  Failed to move: /s/c. Error: denied\n",
				"\n",
			)
		);
	}
}
