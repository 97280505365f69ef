//! Builds test environment images from recipes, and runs them.
//!
//! A build starts from a base image fetched through a [registry::Registry],
//! runs each installation step in a container through a [runner::ContainerRunner],
//! copies the project source in, and records the default command in a manifest.
//! See [pipeline::Provisioner].

use std::path::Path;

use indexmap::IndexMap;
use testbox_api::identity::ExecutionIdentity;

mod errors;
mod events;
pub mod context;
pub mod execute;
pub mod image;
pub mod launch;
mod oci;
pub mod pipeline;
pub mod registry;
pub mod runner;
pub mod source;
pub mod state;


pub use errors::{BuildError, Error, Result};
pub use events::{Event, EventBody, BUILD_TOPIC};

/// This struct contains the parameters of a container execution.
/// It's lower-level than a recipe (we never expose this API to users).
///
/// All paths are already host paths: the rootfs exists, and every mount source is in place.
#[derive(Clone, Debug)]
pub struct ContainerParams {
	pub ident: String,
	pub command: Vec<String>,
	/// Working directory inside the container.
	pub cwd: String,
	pub identity: ExecutionIdentity,
	/// Mounts, mapped by destination.
	pub mounts: IndexMap<String, MountSpec>,
	pub environment: IndexMap<String, String>,
	pub root_path: String,
	/// Installation steps write into the rootfs; launched images don't.
	pub root_readonly: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MountSpec {
	/// The destination mount path.  Should be absolute.
	destination: String,

	/// Typical mount types include "overlay", "tmpfs", "bind".
	kind: String,

	/// Often, "none", or repeats the kind.
	/// For bind mounts, this is another path.
	source: String,

	/// Comma separated in the end, so don't put commas or colons in here.
	/// For overlayfs, several paths go in here.
	options: Vec<String>,
}

/// Host paths all end up in JSON for the container runtime, which needs UTF-8.
pub(crate) fn path_to_string(path: impl AsRef<Path>) -> Result<String> {
	let path = path.as_ref();
	path.to_str().map(ToOwned::to_owned).ok_or_else(|| Error::SystemSetupCauseless {
		msg: format!("path is not valid UTF-8: {}", path.display()),
	})
}

impl MountSpec {
	pub fn new_overlayfs(
		dest: impl AsRef<Path>,
		lowerdir: impl AsRef<Path>,
		upperdir: impl AsRef<Path>,
		workdir: impl AsRef<Path>,
	) -> Result<Self> {
		Ok(MountSpec {
			destination: path_to_string(dest)?,
			kind: "overlay".into(),
			source: "overlay".into(),
			options: vec![
				format!("lowerdir={}", path_to_string(lowerdir)?),
				format!("upperdir={}", path_to_string(upperdir)?),
				format!("workdir={}", path_to_string(workdir)?),
			],
		})
	}

	pub fn new_bind(path: impl AsRef<Path>, dest: impl AsRef<Path>, read_only: bool) -> Result<Self> {
		let mut options = vec!["rbind".into()];
		if read_only {
			options.push("ro".into())
		};
		Ok(MountSpec {
			destination: path_to_string(dest)?,
			kind: "bind".into(),
			source: path_to_string(path)?,
			options,
		})
	}

	pub fn new_tmpfs(dest: impl AsRef<Path>) -> Result<Self> {
		Ok(MountSpec {
			destination: path_to_string(dest)?,
			kind: "tmpfs".into(),
			source: "tmpfs".into(),
			options: vec!["nosuid".into(), "nodev".into(), "mode=1777".into()],
		})
	}

	pub fn destination(&self) -> &str {
		&self.destination
	}
}
