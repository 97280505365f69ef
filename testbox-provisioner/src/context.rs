use std::path::PathBuf;

use crate::{Error, Result};

/// Host-side settings for builds and runs.
#[derive(Clone, Default, Debug)]
pub struct Context {
	/// Path to OCI Runtime executable used to run containers in this context.
	pub runtime: PathBuf,

	/// Where container bundles are generated.
	pub ersatz_dir: PathBuf,

	/// Where the container runtime writes its logs.
	pub log_dir: PathBuf,
}

impl Context {
	/// Resolves every setting through testbox-cfg: environment variables first, XDG dirs otherwise.
	pub fn from_env() -> Result<Self> {
		let cfg_error = |e: testbox_cfg::Error| Error::SystemSetupError {
			msg: "cannot determine testbox state directories".into(),
			cause: Box::new(e),
		};
		Ok(Context {
			runtime: testbox_cfg::get_runtime(),
			ersatz_dir: testbox_cfg::get_container_ersatz_basedir().map_err(cfg_error)?,
			log_dir: testbox_cfg::get_log_dir().map_err(cfg_error)?,
		})
	}
}
