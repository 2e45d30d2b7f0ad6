//! Query interface for accessing data and relations

use std::collections::HashMap;

use polars::prelude::*;

use crate::data::{DuplicateGroup, RelationStore, ScanState};
use crate::error::DetectorResult;
use crate::paths::path_from_key;

/// Read-only view over a scan.
///
/// ```rust
/// use find_duplicates::{DetectorConfig, DuplicateDetector};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let detector = DuplicateDetector::new(DetectorConfig::default())?;
/// let query = detector.query();
///
/// let images = query.files_by_type("image")?;
/// println!("Found {} image files", images.height());
///
/// for group in query.duplicate_groups()? {
///     println!("{} copies of {}", group.duplicates().len(), group.original().display());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Query<'a> {
	pub state: &'a ScanState,
	pub relations: &'a RelationStore,
}

impl<'a> Query<'a> {
	pub fn new(state: &'a ScanState, relations: &'a RelationStore) -> Self {
		Self { state, relations }
	}

	pub fn files_by_type(&self, file_type: &str) -> PolarsResult<DataFrame> {
		self.state
			.data
			.clone()
			.lazy()
			.filter(col("file_type").eq(lit(file_type)))
			.collect()
	}

	pub fn files_needing_hashing(&self) -> DetectorResult<DataFrame> {
		self.state.files_needing_processing("content_hash")
	}

	/// Group hashed files by digest.
	///
	/// Groups come out in the discovery order of their originals, and members keep
	/// discovery order, so `files[0]` is always the first copy the walk reached.
	pub fn duplicate_groups(&self) -> DetectorResult<Vec<DuplicateGroup>> {
		let mut groups: Vec<DuplicateGroup> = Vec::new();
		let mut by_hash: HashMap<String, usize> = HashMap::new();

		for row in self.state.rows()? {
			let Some(hash) = row.content_hash.filter(|_| row.hashed) else {
				continue;
			};
			match by_hash.get(&hash) {
				Some(&idx) => groups[idx].files.push(path_from_key(&row.path)),
				None => {
					by_hash.insert(hash.clone(), groups.len());
					groups.push(DuplicateGroup {
						hash,
						size: row.size,
						files: vec![path_from_key(&row.path)],
					});
				}
			}
		}

		groups.retain(|g| g.files.len() > 1);
		Ok(groups)
	}

	/// Number of files that are extra copies of something else
	pub fn total_duplicates(&self) -> DetectorResult<usize> {
		Ok(self
			.duplicate_groups()?
			.iter()
			.map(|g| g.duplicates().len())
			.sum())
	}

	pub fn wasted_bytes(&self) -> DetectorResult<u64> {
		Ok(self
			.duplicate_groups()?
			.iter()
			.map(DuplicateGroup::wasted_bytes)
			.sum())
	}

	/// Groups recorded in the relation store by the last completed scan
	pub fn recorded_group_count(&self) -> usize {
		self.relations.group_count()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::path::PathBuf;
	use crate::data::{FileKind, FileRecord};
	use chrono::Utc;

	fn state_with(files: &[(&str, u64, Option<&str>)]) -> ScanState {
		let mut state = ScanState::new().unwrap();
		state
			.add_files(
				files
					.iter()
					.map(|(p, size, _)| FileRecord {
						path: PathBuf::from(p),
						size: *size,
						modified: Utc::now(),
						file_type: if p.ends_with(".txt") {
							FileKind::Text
						} else {
							FileKind::Binary
						},
					})
					.collect(),
			)
			.unwrap();
		state
			.update_hashes(
				files.iter().map(|(p, _, _)| p.to_string()).collect(),
				files.iter().map(|(_, _, h)| h.map(str::to_string)).collect(),
			)
			.unwrap();
		state
	}

	#[test]
	fn test_duplicate_groups_keep_discovery_order() {
		let state = state_with(&[
			("/s/z.txt", 3, Some("aaa")),
			("/s/y.bin", 5, Some("bbb")),
			("/s/x.txt", 3, Some("aaa")),
			("/s/w.bin", 5, Some("bbb")),
			("/s/v.bin", 5, Some("bbb")),
			("/s/u.bin", 9, Some("ccc")),
			("/s/t.bin", 9, None),
		]);
		let relations = RelationStore::new().unwrap();
		let query = Query::new(&state, &relations);

		let groups = query.duplicate_groups().unwrap();
		assert_eq!(groups.len(), 2);
		assert_eq!(groups[0].hash, "aaa");
		assert_eq!(
			groups[0].files,
			vec![PathBuf::from("/s/z.txt"), PathBuf::from("/s/x.txt")]
		);
		assert_eq!(groups[1].original(), &PathBuf::from("/s/y.bin"));
		assert_eq!(groups[1].duplicates().len(), 2);

		assert_eq!(query.total_duplicates().unwrap(), 3);
		assert_eq!(query.wasted_bytes().unwrap(), 3 + 10);
		assert_eq!(query.recorded_group_count(), 0);
	}

	#[test]
	fn test_files_by_type() {
		let state = state_with(&[("/a.txt", 1, None), ("/b.bin", 1, None)]);
		let relations = RelationStore::new().unwrap();
		let query = Query::new(&state, &relations);

		assert_eq!(query.files_by_type("text").unwrap().height(), 1);
		assert_eq!(query.files_by_type("image").unwrap().height(), 0);
	}
}
