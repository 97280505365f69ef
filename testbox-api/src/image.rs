use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::identity::ExecutionIdentity;
use crate::recipe::{Invocation, WorkDir};
use crate::reference::BaseRef;

/// File name of the manifest inside an image directory.
/// A directory without this file is not an image.
pub const MANIFEST_FILENAME: &str = "image.json";

/// Directory holding the image's root filesystem, next to the manifest.
pub const ROOTFS_DIRNAME: &str = "rootfs";

#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum ImageCapsule {
	#[serde(rename = "image.v1")]
	V1(ImageManifest),
}

/// Everything needed to launch a built image, and a record of how it was built.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ImageManifest {
	pub base: ResolvedBase,
	pub workdir: WorkDir,
	pub identity: ExecutionIdentity,
	/// Base image variables overlaid with the recipe's.
	pub environment: IndexMap<String, String>,
	pub command: Invocation,
	pub steps: Vec<StepRecord>,
	pub recipe_digest: String,
}

/// The base reference as written, plus what it resolved to when the build ran.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ResolvedBase {
	pub reference: BaseRef,
	pub manifest_digest: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct StepRecord {
	pub argv: Vec<String>,
	pub exit_code: i32,
}

impl ImageManifest {
	/// The argv to run: the override when one is given, the default command otherwise.
	pub fn invocation(&self, command_override: Option<&[String]>) -> Vec<String> {
		match command_override {
			Some(argv) if !argv.is_empty() => argv.to_vec(),
			_ => self.command.argv(),
		}
	}

	pub fn env_list(&self) -> Vec<String> {
		(self.environment.iter())
			.map(|(k, v)| format!("{k}={v}"))
			.collect()
	}
}
