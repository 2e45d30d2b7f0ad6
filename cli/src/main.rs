use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, subscriber::set_global_default};
use tracing_subscriber::EnvFilter;

use find_duplicates::paths::default_cache_dir;
use find_duplicates::systems::SystemProgress;
use find_duplicates::{
	DetectorConfig, DuplicateDetector, DuplicateGroup, HashAlgorithm, MoveOutcome, PathFilter,
	RelocationReport,
};

fn init_tracing(verbose: u8, quiet: u8) {
	// Default WARN; each -v raises, each -q lowers
	let level = match 1 + i16::from(verbose) - i16::from(quiet) {
		i16::MIN..=0 => Level::ERROR,
		1 => Level::WARN,
		2 => Level::INFO,
		3 => Level::DEBUG,
		_ => Level::TRACE,
	};

	let env_filter = EnvFilter::from_default_env().add_directive(level.into());

	let subscriber = tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(std::io::stderr)
		.with_target(false)
		.with_level(true)
		.compact()
		.finish();

	let _ = set_global_default(subscriber);
}

fn main() {
	let opts = Opts::parse();
	init_tracing(opts.verbose, opts.quiet);
	smol::block_on(async move {
		if let Err(e) = run(opts).await {
			eprintln!("error: {e:#}");
			std::process::exit(1);
		}
	});
}

/// Every 100 files during the walk, unless `-q`
fn print_discovery_progress(progress: SystemProgress) {
	// The closing report repeats the final count, with `total_items` filled in
	if progress.system_name == "FileDiscovery"
		&& progress.processed_items > 0
		&& progress.processed_items % 100 == 0
		&& progress.processed_items != progress.total_items
	{
		eprintln!("Scanned {} files...", progress.processed_items);
	}
}

fn build_detector(scan: ScanArgs, show_progress: bool) -> anyhow::Result<DuplicateDetector> {
	let detector = DuplicateDetector::new(scan.into_config()?)?;
	Ok(if show_progress {
		detector.with_progress_callback(Arc::new(print_discovery_progress))
	} else {
		detector
	})
}

async fn run(opts: Opts) -> anyhow::Result<()> {
	let show_progress = opts.quiet == 0;
	match opts.command {
		Command::Scan { path, json, scan } => {
			let mut detector = build_detector(scan, show_progress)?;
			let groups = detector.find_duplicates(path).await?;
			if json {
				let out = serde_json::json!({
					"total_files": detector.total_files(),
					"groups": groups,
				});
				println!("{}", serde_json::to_string_pretty(&out)?);
			} else {
				print_groups(detector.total_files(), &groups);
			}
		}
		Command::Move {
			source,
			target,
			dry_run,
			json,
			scan,
		} => {
			if !json {
				println!("Source: {}", source.display());
				println!("Target: {}", target.display());
			}
			let mut detector = build_detector(scan, show_progress)?;
			let (groups, report) = detector.find_and_move(source, target, dry_run).await?;
			if json {
				println!("{}", serde_json::to_string_pretty(&report)?);
			} else if groups.is_empty() {
				println!("Scanned {} files.", detector.total_files());
				println!("No duplicate files found.");
			} else {
				print_report(detector.total_files(), &groups, &report);
			}
		}
	}
	Ok(())
}

fn print_groups(total_files: usize, groups: &[DuplicateGroup]) {
	println!("Scanned {total_files} files.");
	if groups.is_empty() {
		println!("No duplicate files found.");
		return;
	}
	let duplicates: usize = groups.iter().map(|g| g.duplicates().len()).sum();
	let wasted: u64 = groups.iter().map(DuplicateGroup::wasted_bytes).sum();
	println!(
		"Found {duplicates} duplicate files in {} groups ({wasted} bytes reclaimable).",
		groups.len()
	);
	for group in groups {
		println!();
		println!("{} ({} bytes)", &group.hash[..group.hash.len().min(16)], group.size);
		println!("  keep: {}", group.original().display());
		for dup in group.duplicates() {
			println!("  dup:  {}", dup.display());
		}
	}
}

fn print_report(total_files: usize, groups: &[DuplicateGroup], report: &RelocationReport) {
	let duplicates: usize = groups.iter().map(|g| g.duplicates().len()).sum();
	println!("Scanned {total_files} files.");
	println!("Found {duplicates} duplicate files.");
	for group in &report.groups {
		for result in &group.results {
			match &result.outcome {
				MoveOutcome::Moved => {
					println!("Moved: {} --> {}", result.from.display(), result.to.display())
				}
				MoveOutcome::Planned => println!(
					"Would move: {} --> {}",
					result.from.display(),
					result.to.display()
				),
				MoveOutcome::Failed(err) => {
					println!("Failed: {}: {}", result.from.display(), err)
				}
			}
		}
	}
	if report.dry_run {
		println!("Dry run: {} files would be moved.", report.planned());
		return;
	}
	println!("Moved {} files, {} failed.", report.moved(), report.failed());
	match (&report.log_path, &report.log_error) {
		(Some(path), _) => println!("Log written: {}", path.display()),
		(None, Some(err)) => eprintln!("warning: {err}"),
		(None, None) => {}
	}
}

#[derive(Parser)]
#[command(version, about = "Find duplicate files and move the extra copies aside")]
pub struct Opts {
	/// Increase verbosity (-v, -vv, -vvv). Default WARN.
	#[arg(short = 'v', action = clap::ArgAction::Count, global = true)]
	pub verbose: u8,
	/// Decrease verbosity (-q). Also hides the "Scanned N files..." progress lines.
	#[arg(short = 'q', action = clap::ArgAction::Count, global = true)]
	pub quiet: u8,

	#[command(subcommand)]
	pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
	/// Report duplicate files without touching anything
	Scan {
		/// Folder to scan
		path: PathBuf,
		/// Print the groups as JSON
		#[arg(long)]
		json: bool,
		#[command(flatten)]
		scan: ScanArgs,
	},
	/// Move duplicates into a target folder, keeping one original of each
	Move {
		/// Folder to scan
		source: PathBuf,
		/// Folder that receives the duplicates (relative layout is preserved)
		target: PathBuf,
		/// Show what would move without moving anything
		#[arg(long)]
		dry_run: bool,
		/// Print the relocation report as JSON
		#[arg(long)]
		json: bool,
		#[command(flatten)]
		scan: ScanArgs,
	},
}

#[derive(Args)]
pub struct ScanArgs {
	/// Content digest (blake3 or sha256)
	#[arg(long, default_value_t = HashAlgorithm::Blake3)]
	pub algorithm: HashAlgorithm,
	/// Ignore files smaller than this many bytes
	#[arg(long, default_value_t = 0)]
	pub min_size: u64,
	/// Ignore files larger than this many bytes
	#[arg(long)]
	pub max_size: Option<u64>,
	/// Only consider paths matching this glob (repeatable)
	#[arg(long)]
	pub include: Vec<String>,
	/// Skip paths matching this glob (repeatable)
	#[arg(long)]
	pub exclude: Vec<String>,
	/// Follow symbolic links
	#[arg(long)]
	pub follow_links: bool,
	/// Maximum directory depth
	#[arg(long)]
	pub max_depth: Option<usize>,
	/// Files hashed concurrently (default: CPU count)
	#[arg(short, long)]
	pub jobs: Option<usize>,
	/// Do not read or write the hash cache
	#[arg(long)]
	pub no_cache: bool,
	/// Hash cache location
	#[arg(long, env = "FIND_DUPLICATES_CACHE_DIR")]
	pub cache_dir: Option<PathBuf>,
}

impl ScanArgs {
	fn into_config(self) -> anyhow::Result<DetectorConfig> {
		let defaults = DetectorConfig::default();
		let path_filter = if self.include.is_empty() && self.exclude.is_empty() {
			None
		} else {
			Some(PathFilter::new(self.include, self.exclude)?)
		};
		let cache_dir = if self.no_cache {
			None
		} else {
			self.cache_dir.or_else(default_cache_dir)
		};
		Ok(DetectorConfig {
			algorithm: self.algorithm,
			min_file_size: self.min_size,
			max_file_size: self.max_size,
			path_filter,
			follow_links: self.follow_links,
			max_depth: self.max_depth,
			max_concurrent_files: self.jobs.unwrap_or(defaults.max_concurrent_files),
			cache_dir,
			exclude_dirs: Vec::new(),
		})
	}
}
