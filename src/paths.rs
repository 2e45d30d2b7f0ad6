//! Path helpers for cache locations and relocation targets

use dirs::cache_dir;
use std::ffi::OsString;
use std::io;
use std::path::{Component, Path, PathBuf};

// Marks a key holding hex-encoded raw bytes; NUL never appears in a real path
const RAW_KEY_PREFIX: char = '\0';

/// Per-user cache root for this tool
pub fn default_cache_dir() -> Option<PathBuf> {
	cache_dir().map(|mut p| {
		p.push("find-duplicates");
		p
	})
}

/// Cache directory for one scanned root: `<cache>/<blake3 of the root path>`.
///
/// Scans of different roots never share or clobber each other's cache.
pub fn cache_dir_for(base: &Path, root: &Path) -> PathBuf {
	let digest = blake3::hash(path_key(root).as_bytes());
	base.join(&digest.to_hex().as_str()[..16])
}

/// Make a path absolute without requiring it to exist.
///
/// `.` and `..` are resolved lexically, so `/a/src/x/../dups` becomes `/a/src/dups`.
/// Symlinks are not followed.
pub fn absolutize(path: &Path) -> io::Result<PathBuf> {
	Ok(normalize(&std::path::absolute(path)?))
}

fn normalize(path: &Path) -> PathBuf {
	let mut out = PathBuf::new();
	for component in path.components() {
		match component {
			Component::CurDir => {}
			Component::ParentDir => {
				// `..` at the root stays at the root
				if matches!(out.components().next_back(), Some(Component::Normal(_))) {
					out.pop();
				}
			}
			other => out.push(other.as_os_str()),
		}
	}
	out
}

/// String key for a path in the scan frame.
///
/// UTF-8 paths are stored as-is. Anything else is stored as its raw OS bytes in
/// hex behind a NUL marker, so [`path_from_key`] gets the exact path back.
pub fn path_key(path: &Path) -> String {
	match path.to_str() {
		Some(s) => s.to_string(),
		None => format!("{RAW_KEY_PREFIX}{}", hex::encode(os_bytes(path.as_os_str()))),
	}
}

/// Inverse of [`path_key`]
pub fn path_from_key(key: &str) -> PathBuf {
	if let Some(encoded) = key.strip_prefix(RAW_KEY_PREFIX)
		&& let Ok(bytes) = hex::decode(encoded)
		&& let Some(os) = os_string_from_bytes(bytes)
	{
		return PathBuf::from(os);
	}
	PathBuf::from(key)
}

#[cfg(unix)]
fn os_bytes(s: &std::ffi::OsStr) -> Vec<u8> {
	use std::os::unix::ffi::OsStrExt;
	s.as_bytes().to_vec()
}

#[cfg(unix)]
fn os_string_from_bytes(bytes: Vec<u8>) -> Option<OsString> {
	use std::os::unix::ffi::OsStringExt;
	Some(OsString::from_vec(bytes))
}

#[cfg(windows)]
fn os_bytes(s: &std::ffi::OsStr) -> Vec<u8> {
	use std::os::windows::ffi::OsStrExt;
	s.encode_wide().flat_map(u16::to_le_bytes).collect()
}

#[cfg(windows)]
fn os_string_from_bytes(bytes: Vec<u8>) -> Option<OsString> {
	use std::os::windows::ffi::OsStringExt;
	if bytes.len() % 2 != 0 {
		return None;
	}
	let wide: Vec<u16> = bytes
		.chunks_exact(2)
		.map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
		.collect();
	Some(OsString::from_wide(&wide))
}

#[cfg(not(any(unix, windows)))]
fn os_bytes(s: &std::ffi::OsStr) -> Vec<u8> {
	s.to_string_lossy().into_owned().into_bytes()
}

#[cfg(not(any(unix, windows)))]
fn os_string_from_bytes(bytes: Vec<u8>) -> Option<OsString> {
	String::from_utf8(bytes).ok().map(OsString::from)
}

/// `path` relative to `base`, when `path` lives under `base`
pub fn relative_to(path: &Path, base: &Path) -> Option<PathBuf> {
	path.strip_prefix(base).ok().map(Path::to_path_buf)
}

/// Whether `path` is `base` or lies below it
pub fn is_within(path: &Path, base: &Path) -> bool {
	path.starts_with(base)
}
