use std::fs;
use std::path::{Path, PathBuf};

use file_mode::ModePath;
use testbox_api::image::{ImageCapsule, ImageManifest, MANIFEST_FILENAME, ROOTFS_DIRNAME};

use crate::{Error, Result};

/// A built image on disk: a directory with a root filesystem and a manifest.
#[derive(Clone, Debug)]
pub struct Image {
	pub dir: PathBuf,
	pub manifest: ImageManifest,
}

impl Image {
	/// Reads the image at `dir`.
	/// Fails with [Error::InvalidImage] when the manifest or rootfs is missing or unreadable.
	pub fn load(dir: impl AsRef<Path>) -> Result<Image> {
		let dir = dir.as_ref();
		let invalid = |msg: String| Error::InvalidImage {
			path: dir.to_owned(),
			msg,
		};

		let manifest_path = dir.join(MANIFEST_FILENAME);
		let contents = fs::read(&manifest_path)
			.map_err(|e| invalid(format!("cannot read {MANIFEST_FILENAME}: {e}")))?;
		let ImageCapsule::V1(manifest) = serde_json::from_slice(&contents)
			.map_err(|e| invalid(format!("cannot parse {MANIFEST_FILENAME}: {e}")))?;

		if !dir.join(ROOTFS_DIRNAME).is_dir() {
			return Err(invalid(format!("no {ROOTFS_DIRNAME} directory")));
		}

		Ok(Image {
			dir: dir.to_owned(),
			manifest,
		})
	}

	pub fn rootfs(&self) -> PathBuf {
		self.dir.join(ROOTFS_DIRNAME)
	}

	/// Whether `dir` looks like something a build produced.
	pub fn is_image_dir(dir: &Path) -> bool {
		dir.join(MANIFEST_FILENAME).is_file()
	}
}

/// Writes the manifest for an image whose rootfs is already in place.
pub(crate) fn write_manifest(dir: &Path, manifest: &ImageManifest) -> Result<()> {
	let capsule = ImageCapsule::V1(manifest.clone());
	let json = serde_json::to_vec_pretty(&capsule).map_err(|e| Error::Catchall {
		msg: "unable to serialize image manifest".to_owned(),
		cause: Box::new(e),
	})?;
	fs::write(dir.join(MANIFEST_FILENAME), json)
		.map_err(|e| Error::from_io("couldn't write image manifest", e))
}

/// Deletes a directory tree, including directories that were left without write permission.
///
/// Image root filesystems routinely contain those (`/usr/share/empty` and friends),
/// and a plain recursive remove can't empty them.
pub(crate) fn remove_tree(path: &Path) -> Result<()> {
	let meta = match path.symlink_metadata() {
		Ok(meta) => meta,
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
		Err(e) => return Err(Error::from_io("couldn't inspect directory for removal", e)),
	};
	if !meta.is_dir() {
		return fs::remove_file(path).map_err(|e| Error::from_io("couldn't remove file", e));
	}
	unlock_dirs(path)?;
	fs::remove_dir_all(path).map_err(|e| Error::from_io("couldn't remove directory", e))
}

fn unlock_dirs(dir: &Path) -> Result<()> {
	path_set_mode(dir, 0o700)?;
	let entries = fs::read_dir(dir).map_err(|e| Error::from_io("couldn't list directory", e))?;
	for entry in entries {
		let entry = entry.map_err(|e| Error::from_io("couldn't list directory", e))?;
		let file_type = entry.file_type().map_err(|e| Error::from_io("couldn't list directory", e))?;
		if file_type.is_dir() {
			unlock_dirs(&entry.path())?;
		}
	}
	Ok(())
}

pub(crate) fn path_set_mode(path: &Path, mode: u32) -> Result<()> {
	path.set_mode(mode).map_err(|e| Error::Catchall {
		msg: format!("couldn't change mode of {}", path.display()),
		cause: Box::new(e),
	})?;
	Ok(())
}
