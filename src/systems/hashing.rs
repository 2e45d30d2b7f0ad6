//! Content hashing system

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, trace, warn};

use crate::data::ScanState;
use crate::error::{SystemError, SystemResult};
use crate::paths::path_from_key;
use crate::systems::{System, SystemContext, SystemProgress, SystemRunner};

/// Files are read in blocks of this size; whole files are never buffered.
pub const BLOCK_SIZE: usize = 64 * 1024;

/// Digest used to decide content equality
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
	#[default]
	Blake3,
	Sha256,
}

impl HashAlgorithm {
	pub fn as_str(&self) -> &'static str {
		match self {
			HashAlgorithm::Blake3 => "blake3",
			HashAlgorithm::Sha256 => "sha256",
		}
	}
}

impl fmt::Display for HashAlgorithm {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for HashAlgorithm {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"blake3" => Ok(HashAlgorithm::Blake3),
			"sha256" | "sha-256" => Ok(HashAlgorithm::Sha256),
			other => Err(format!(
				"unknown hash algorithm '{other}' (expected blake3 or sha256)"
			)),
		}
	}
}

/// Hash a file's contents, streaming it in [`BLOCK_SIZE`] chunks
pub fn hash_file(path: &Path, algorithm: HashAlgorithm) -> io::Result<String> {
	let mut file = File::open(path)?;
	let mut buf = vec![0u8; BLOCK_SIZE];

	match algorithm {
		HashAlgorithm::Blake3 => {
			let mut hasher = blake3::Hasher::new();
			loop {
				let n = file.read(&mut buf)?;
				if n == 0 {
					break;
				}
				hasher.update(&buf[..n]);
			}
			Ok(hasher.finalize().to_hex().to_string())
		}
		HashAlgorithm::Sha256 => {
			let mut hasher = Sha256::new();
			loop {
				let n = file.read(&mut buf)?;
				if n == 0 {
					break;
				}
				hasher.update(&buf[..n]);
			}
			Ok(hex::encode(hasher.finalize()))
		}
	}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ContentHashSystem {
	pub algorithm: HashAlgorithm,
}

impl ContentHashSystem {
	pub fn new(algorithm: HashAlgorithm) -> Self {
		Self { algorithm }
	}
}

#[async_trait]
impl SystemRunner for ContentHashSystem {
	async fn run(&self, state: &mut ScanState, context: &SystemContext) -> SystemResult<()> {
		let exec_err = |e: &dyn fmt::Display| SystemError::ExecutionFailed {
			system: self.name().into(),
			reason: e.to_string(),
		};

		let to_hash_df = state
			.files_needing_processing("content_hash")
			.map_err(|e| exec_err(&e))?;
		info!("Hashing: {} files pending", to_hash_df.height());

		if to_hash_df.height() == 0 {
			return Ok(());
		}

		let paths: Vec<String> = to_hash_df
			.column("path")
			.map_err(|e| exec_err(&e))?
			.str()
			.map_err(|e| exec_err(&e))?
			.into_iter()
			.flatten()
			.map(str::to_string)
			.collect();

		let mut upd_hashes: Vec<Option<String>> = Vec::with_capacity(paths.len());
		let mut progress = SystemProgress::new(self.name().to_string(), paths.len());
		let mut failures = 0usize;

		for batch in paths.chunks(context.max_concurrent_files.max(1)) {
			if context.is_cancelled() {
				return Err(SystemError::Cancelled {
					system: self.name().into(),
				});
			}

			// Each read runs on the blocking pool; tasks start as soon as they are created
			let tasks: Vec<_> = batch
				.iter()
				.map(|key| {
					let path = path_from_key(key);
					let algorithm = self.algorithm;
					smol::unblock(move || {
						let digest = hash_file(&path, algorithm);
						(path, digest)
					})
				})
				.collect();

			for task in tasks {
				let (path, digest) = task.await;
				match digest {
					Ok(digest) => {
						trace!("Hashed {}", path.display());
						upd_hashes.push(Some(digest));
					}
					Err(e) => {
						// Left unhashed so the file never joins a group
						warn!("Hashing: failed to read {}: {}", path.display(), e);
						failures += 1;
						upd_hashes.push(None);
					}
				}
			}

			progress.update(
				upd_hashes.len(),
				batch.last().map(|key| path_from_key(key).display().to_string()),
			);
			context.report_progress(progress.clone());
			debug!("Hashing: {}/{} done", upd_hashes.len(), paths.len());
		}

		if failures > 0 {
			warn!("Hashing: {} files could not be read", failures);
		}

		state
			.update_hashes(paths, upd_hashes)
			.map_err(|e| exec_err(&e))?;
		Ok(())
	}

	fn can_run(&self, state: &ScanState) -> bool {
		state.data.height() > 0
	}

	fn priority(&self) -> u8 {
		200
	}

	fn name(&self) -> &'static str {
		"ContentHash"
	}
}

impl System for ContentHashSystem {
	fn required_columns(&self) -> &[&'static str] {
		&["path", "candidate"]
	}

	fn produced_columns(&self) -> &[&'static str] {
		&["content_hash", "hashed"]
	}

	fn description(&self) -> &'static str {
		"Computes content digests for files that share a size with another file"
	}
}
