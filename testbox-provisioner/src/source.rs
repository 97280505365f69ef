//! Copying the project tree into an image.
//!
//! The copy is total: every file under the source root lands at the same relative
//! path under the destination, replacing whatever was there.
//! Exclusion patterns use ignore-file syntax, matched relative to the source root:
//! `*.pyc` matches at any depth, `/build` only at the top, `.tox/**` everything below `.tox`.

use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CopyStats {
	pub files: u64,
	pub dirs: u64,
	pub symlinks: u64,
}

fn copy_error(path: &Path, cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Error {
	Error::SourceCopy {
		path: path.to_owned(),
		cause: cause.into(),
	}
}

/// Removes whatever is at `path` (file, symlink, or directory tree), if anything.
fn clear(path: &Path) -> std::io::Result<()> {
	match path.symlink_metadata() {
		Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
		Ok(_) => fs::remove_file(path),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
		Err(e) => Err(e),
	}
}

/// Copies the tree at `from` into `dest`.
///
/// `skip` lists host paths never copied, even when they are inside `from`;
/// the build uses it to keep its own output out of the image.
pub fn copy_source(from: &Path, exclude: &[String], skip: &[PathBuf], dest: &Path) -> Result<CopyStats> {
	let meta = fs::metadata(from).map_err(|e| copy_error(from, e))?;
	if !meta.is_dir() {
		return Err(copy_error(from, "source must be a directory"));
	}

	let mut patterns = vec!["**".to_owned()];
	for pattern in exclude {
		patterns.push(format!("!{pattern}"));
		// Everything below a directory is excluded, so the directory itself goes too.
		if let Some(dir) = pattern.strip_suffix("/**").filter(|d| !d.is_empty()) {
			patterns.push(format!("!{dir}"));
		}
	}
	for skipped in skip {
		if let Ok(relative) = skipped.strip_prefix(from) {
			patterns.push(format!("!/{}", relative.display()));
			patterns.push(format!("!/{}/**", relative.display()));
		}
	}

	let walker = globwalk::GlobWalkerBuilder::from_patterns(from, &patterns)
		.follow_links(false)
		.build()
		.map_err(|e| copy_error(from, e))?;

	fs::create_dir_all(dest).map_err(|e| copy_error(dest, e))?;

	let mut stats = CopyStats::default();
	for entry in walker {
		let entry = entry.map_err(|e| copy_error(from, e))?;
		let path = entry.path();
		if skip.iter().any(|s| path.starts_with(s)) {
			continue;
		}
		// Directories only leading to a skipped path appear once something else inside them is copied.
		let file_type = entry.file_type();
		if file_type.is_dir() && skip.iter().any(|s| s.starts_with(path)) {
			continue;
		}
		let relative = match path.strip_prefix(from) {
			Ok(relative) if relative.as_os_str().is_empty() => continue,
			Ok(relative) => relative,
			Err(e) => return Err(copy_error(path, e)),
		};
		let target = dest.join(relative);
		if let Some(parent) = target.parent() {
			fs::create_dir_all(parent).map_err(|e| copy_error(parent, e))?;
		}

		if file_type.is_dir() {
			// A directory replaces a non-directory, but merges into an existing directory.
			if !target.is_dir() || target.symlink_metadata().map(|m| m.file_type().is_symlink()).unwrap_or(false) {
				clear(&target).map_err(|e| copy_error(&target, e))?;
				fs::create_dir(&target).map_err(|e| copy_error(&target, e))?;
			}
			let permissions = fs::metadata(path).map_err(|e| copy_error(path, e))?.permissions();
			fs::set_permissions(&target, permissions).map_err(|e| copy_error(&target, e))?;
			stats.dirs += 1;
		} else if file_type.is_symlink() {
			let link = fs::read_link(path).map_err(|e| copy_error(path, e))?;
			clear(&target).map_err(|e| copy_error(&target, e))?;
			symlink(&link, &target).map_err(|e| copy_error(&target, e))?;
			stats.symlinks += 1;
		} else if file_type.is_file() {
			clear(&target).map_err(|e| copy_error(&target, e))?;
			fs::copy(path, &target).map_err(|e| copy_error(path, e))?;
			stats.files += 1;
		}
		// Sockets, fifos and devices in a project tree are runtime leftovers; they aren't copied.
	}

	Ok(stats)
}
