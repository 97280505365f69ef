//! Fetching base images and unpacking them into a root filesystem.
//!
//! Layers are applied in order, the way [umoci] and container engines do it,
//! including whiteout files, so the rootfs matches what the image describes.
//!
//! [umoci]: https://github.com/opencontainers/umoci

use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use flate2::read::GzDecoder;
use indexmap::IndexMap;
use oci_client::{
	client::ClientConfig,
	manifest::{
		IMAGE_DOCKER_LAYER_GZIP_MEDIA_TYPE, IMAGE_DOCKER_LAYER_TAR_MEDIA_TYPE,
		IMAGE_LAYER_GZIP_MEDIA_TYPE, IMAGE_LAYER_MEDIA_TYPE,
	},
	secrets::RegistryAuth,
	Client, Reference,
};
use oci_spec::image::ImageConfiguration;
use testbox_api::reference::BaseRef;

use crate::{Error, Result};

const LAYER_MEDIA_TYPES: &[&str] = &[
	IMAGE_LAYER_MEDIA_TYPE,
	IMAGE_LAYER_GZIP_MEDIA_TYPE,
	IMAGE_DOCKER_LAYER_TAR_MEDIA_TYPE,
	IMAGE_DOCKER_LAYER_GZIP_MEDIA_TYPE,
];

const WHITEOUT_PREFIX: &str = ".wh.";
const WHITEOUT_OPAQUE: &str = ".wh..wh..opq";

fn is_gzip(media_type: &str) -> bool {
	media_type == IMAGE_LAYER_GZIP_MEDIA_TYPE || media_type == IMAGE_DOCKER_LAYER_GZIP_MEDIA_TYPE
}

/// What the build learns from the base image besides its files.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MaterializedBase {
	pub manifest_digest: String,
	/// Environment from the image config, e.g. a PATH that puts the image's tools first.
	pub environment: IndexMap<String, String>,
}

/// Source of base images.
#[async_trait]
pub trait Registry: Send + Sync {
	/// Fetches `base` and unpacks its filesystem into `rootfs`, which must exist and be empty.
	async fn materialize(&self, base: &BaseRef, rootfs: &Path) -> Result<MaterializedBase>;
}

/// Pulls from OCI distribution registries.
pub struct OciRegistry {
	pub auth: RegistryAuth,
}

impl Default for OciRegistry {
	fn default() -> Self {
		Self {
			auth: RegistryAuth::Anonymous,
		}
	}
}

fn resolution_error(base: &BaseRef, cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Error {
	Error::BaseResolution {
		reference: base.to_string(),
		cause: cause.into(),
	}
}

#[async_trait]
impl Registry for OciRegistry {
	async fn materialize(&self, base: &BaseRef, rootfs: &Path) -> Result<MaterializedBase> {
		let reference: Reference = base
			.to_string()
			.parse()
			.map_err(|e| resolution_error(base, e))?;

		let client = Client::new(ClientConfig::default());
		let image_data = client
			.pull(&reference, &self.auth, LAYER_MEDIA_TYPES.to_vec())
			.await
			.map_err(|e| resolution_error(base, e))?;

		let config: ImageConfiguration = serde_json::from_slice(&image_data.config.data)
			.map_err(|e| resolution_error(base, e))?;
		if config.rootfs().typ() != "layers" {
			return Err(resolution_error(
				base,
				format!("unsupported rootfs.type: {}", config.rootfs().typ()),
			));
		}

		for layer in &image_data.layers {
			let result = if is_gzip(&layer.media_type) {
				apply_layer(GzDecoder::new(&layer.data[..]), rootfs)
			} else {
				apply_layer(&layer.data[..], rootfs)
			};
			result.map_err(|e| resolution_error(base, e))?;
		}

		let environment = config
			.config()
			.as_ref()
			.and_then(|c| c.env().clone())
			.map(|env| parse_env(&env))
			.unwrap_or_default();

		Ok(MaterializedBase {
			manifest_digest: image_data.digest.unwrap_or_default(),
			environment,
		})
	}
}

/// Parses `NAME=value` strings as found in image configs.
/// Entries without `=` are dropped.
pub fn parse_env(entries: &[String]) -> IndexMap<String, String> {
	(entries.iter())
		.filter_map(|entry| entry.split_once('='))
		.map(|(k, v)| (k.to_owned(), v.to_owned()))
		.collect()
}

/// Unpacks one layer tarball on top of `rootfs`.
pub fn apply_layer(reader: impl Read, rootfs: &Path) -> std::io::Result<()> {
	let mut archive = tar::Archive::new(reader);
	archive.set_preserve_permissions(true);
	archive.set_overwrite(true);

	for entry in archive.entries()? {
		let mut entry = entry?;
		let path = entry.path()?.into_owned();
		if path.components().any(|c| matches!(c, Component::ParentDir)) {
			return Err(std::io::Error::new(
				std::io::ErrorKind::InvalidData,
				format!("layer entry escapes the rootfs: {}", path.display()),
			));
		}

		let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();

		if file_name == WHITEOUT_OPAQUE {
			// The directory hides everything lower layers put in it.
			if let Some(parent) = whiteout_parent(rootfs, &path)? {
				for child in fs::read_dir(&parent)? {
					remove_any(&child?.path())?;
				}
			}
			continue;
		}
		if let Some(hidden) = file_name.strip_prefix(WHITEOUT_PREFIX) {
			if let Some(parent) = whiteout_parent(rootfs, &path)? {
				let target = parent.join(hidden);
				if target.symlink_metadata().is_ok() {
					remove_any(&target)?;
				}
			}
			continue;
		}

		// Device nodes can't be created without privileges, and runtimes supply /dev anyway.
		let kind = entry.header().entry_type();
		if kind.is_block_special() || kind.is_character_special() {
			continue;
		}

		entry.unpack_in(rootfs)?;
	}
	Ok(())
}

/// Finds the real directory a whiteout entry applies to, inside `rootfs`.
///
/// Every ancestor is checked without following links: a symlink left by a lower
/// layer would otherwise point the removal outside the rootfs.
/// Returns `None` when the directory doesn't exist, since there's nothing to hide.
fn whiteout_parent(rootfs: &Path, entry: &Path) -> std::io::Result<Option<PathBuf>> {
	let mut dir = rootfs.to_path_buf();
	for component in entry.parent().unwrap_or(Path::new("")).components() {
		match component {
			Component::Normal(name) => dir.push(name),
			Component::CurDir | Component::RootDir => continue,
			_ => {
				return Err(std::io::Error::new(
					std::io::ErrorKind::InvalidData,
					format!("layer entry escapes the rootfs: {}", entry.display()),
				))
			}
		}
		match dir.symlink_metadata() {
			Ok(meta) if meta.file_type().is_symlink() => {
				return Err(std::io::Error::new(
					std::io::ErrorKind::InvalidData,
					format!("layer whiteout reaches through a symlink: {}", entry.display()),
				))
			}
			Ok(meta) if meta.is_dir() => {}
			Ok(_) => return Ok(None),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(e),
		}
	}
	Ok(Some(dir))
}

fn remove_any(path: &Path) -> std::io::Result<()> {
	if path.symlink_metadata()?.is_dir() {
		fs::remove_dir_all(path)
	} else {
		fs::remove_file(path)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn layer(entries: &[(&str, Option<&str>)]) -> Vec<u8> {
		layer_with_links(entries, &[])
	}

	fn layer_with_links(entries: &[(&str, Option<&str>)], links: &[(&str, &Path)]) -> Vec<u8> {
		let mut builder = tar::Builder::new(Vec::new());
		for (path, target) in links {
			let mut header = tar::Header::new_gnu();
			header.set_entry_type(tar::EntryType::Symlink);
			header.set_size(0);
			header.set_mode(0o777);
			builder.append_link(&mut header, path, target).unwrap();
		}
		for (path, contents) in entries {
			let mut header = tar::Header::new_gnu();
			match contents {
				Some(data) => {
					header.set_entry_type(tar::EntryType::Regular);
					header.set_size(data.len() as u64);
					header.set_mode(0o644);
					builder.append_data(&mut header, path, data.as_bytes()).unwrap();
				}
				None => {
					header.set_entry_type(tar::EntryType::Directory);
					header.set_size(0);
					header.set_mode(0o755);
					builder.append_data(&mut header, path, std::io::empty()).unwrap();
				}
			}
		}
		builder.into_inner().unwrap()
	}

	#[test]
	fn layers_apply_in_order_with_whiteouts() {
		let temp_dir = tempfile::TempDir::new().unwrap();
		let rootfs = temp_dir.path();

		let lower = layer(&[
			("etc", None),
			("etc/os-release", Some("lower")),
			("opt", None),
			("opt/app", None),
			("opt/app/a.txt", Some("a")),
			("opt/app/b.txt", Some("b")),
			("usr", None),
			("usr/old", Some("old")),
		]);
		let upper = layer(&[
			("etc/os-release", Some("upper")),
			("opt/app/.wh..wh..opq", Some("")),
			("opt/app/c.txt", Some("c")),
			("usr/.wh.old", Some("")),
		]);
		apply_layer(&lower[..], rootfs).unwrap();
		apply_layer(&upper[..], rootfs).unwrap();

		assert_eq!(fs::read_to_string(rootfs.join("etc/os-release")).unwrap(), "upper");
		assert!(!rootfs.join("opt/app/a.txt").exists());
		assert!(!rootfs.join("opt/app/b.txt").exists());
		assert_eq!(fs::read_to_string(rootfs.join("opt/app/c.txt")).unwrap(), "c");
		assert!(!rootfs.join("usr/old").exists());
		assert!(!rootfs.join("usr/.wh.old").exists());
	}

	#[test]
	fn whiteouts_never_follow_symlinks_out_of_the_rootfs() {
		let temp_dir = tempfile::TempDir::new().unwrap();
		let rootfs = temp_dir.path().join("rootfs");
		let host = temp_dir.path().join("host");
		fs::create_dir_all(&rootfs).unwrap();
		fs::create_dir_all(&host).unwrap();
		fs::write(host.join("precious"), "keep").unwrap();
		fs::write(host.join("other"), "keep").unwrap();

		let lower = layer_with_links(&[], &[("etc", host.as_path())]);
		apply_layer(&lower[..], &rootfs).unwrap();
		assert!(rootfs.join("etc").symlink_metadata().unwrap().file_type().is_symlink());

		let single = layer(&[("etc/.wh.precious", Some(""))]);
		let err = apply_layer(&single[..], &rootfs).unwrap_err();
		assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);

		let opaque = layer(&[("etc/.wh..wh..opq", Some(""))]);
		let err = apply_layer(&opaque[..], &rootfs).unwrap_err();
		assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);

		assert_eq!(fs::read_to_string(host.join("precious")).unwrap(), "keep");
		assert_eq!(fs::read_to_string(host.join("other")).unwrap(), "keep");
	}

	#[test]
	fn whiteout_may_remove_a_symlink_itself() {
		let temp_dir = tempfile::TempDir::new().unwrap();
		let rootfs = temp_dir.path().join("rootfs");
		let host = temp_dir.path().join("host");
		fs::create_dir_all(&rootfs).unwrap();
		fs::create_dir_all(&host).unwrap();
		fs::write(host.join("precious"), "keep").unwrap();

		let lower = layer_with_links(&[], &[("etc", host.as_path())]);
		apply_layer(&lower[..], &rootfs).unwrap();
		let upper = layer(&[(".wh.etc", Some(""))]);
		apply_layer(&upper[..], &rootfs).unwrap();

		assert!(rootfs.join("etc").symlink_metadata().is_err());
		assert_eq!(fs::read_to_string(host.join("precious")).unwrap(), "keep");
	}

	#[test]
	fn env_entries_parse() {
		let env = parse_env(&[
			"PATH=/opt/app-root/bin:/usr/bin".to_string(),
			"EMPTY=".to_string(),
			"BROKEN".to_string(),
			"EQ=a=b".to_string(),
		]);
		assert_eq!(
			env,
			IndexMap::from([
				("PATH".to_string(), "/opt/app-root/bin:/usr/bin".to_string()),
				("EMPTY".to_string(), "".to_string()),
				("EQ".to_string(), "a=b".to_string()),
			])
		);
	}

	#[tokio::test]
	#[ignore = "requires network access to docker.io"]
	async fn pulls_busybox() {
		let temp_dir = tempfile::TempDir::new().unwrap();
		let base: BaseRef = "docker.io/library/busybox:latest".parse().unwrap();
		let materialized = OciRegistry::default()
			.materialize(&base, temp_dir.path())
			.await
			.unwrap();
		assert!(materialized.manifest_digest.starts_with("sha256:"));
		assert!(temp_dir.path().join("bin/sh").symlink_metadata().is_ok());
	}

	#[tokio::test]
	#[ignore = "requires network access to docker.io"]
	async fn unresolvable_base_is_a_resolution_error() {
		let temp_dir = tempfile::TempDir::new().unwrap();
		let base: BaseRef = "docker.io/library/no-such-image-testbox:nope".parse().unwrap();
		let err = OciRegistry::default()
			.materialize(&base, temp_dir.path())
			.await
			.unwrap_err();
		assert!(matches!(err, Error::BaseResolution { .. }), "{err}");
	}
}
