//! Where testbox keeps its scratch state on the host, and which runtime it drives.
//!
//! Every value has an environment variable override, checked first,
//! and an XDG-derived default.

use std::env;
use std::path::PathBuf;

pub const ENV_RUNTIME: &str = "TESTBOX_RUNTIME";
pub const ENV_ERSATZ_DIR: &str = "TESTBOX_ERSATZ_DIR";
pub const ENV_LOG_DIR: &str = "TESTBOX_LOG_DIR";

const DEFAULT_RUNTIME: &str = "runc";

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("cannot determine base directories: {0}")]
	BaseDirectories(#[from] xdg::BaseDirectoriesError),
}

fn from_env(var: &str) -> Option<PathBuf> {
	env::var_os(var).filter(|v| !v.is_empty()).map(PathBuf::from)
}

/// The OCI runtime binary used to run containers.
/// Either a bare name resolved through $PATH, or a path.
pub fn get_runtime() -> PathBuf {
	from_env(ENV_RUNTIME).unwrap_or_else(|| PathBuf::from(DEFAULT_RUNTIME))
}

/// Returns a path where testbox will create container bundle dirs.
/// The default is to take a directory within XDG_RUNTIME_DIR,
/// since such path will have permissions of 0700 and be owned by the current user.
///
/// Typically, this will come out to something like "/run/user/{uid}/testbox/ersatz/".
pub fn get_container_ersatz_basedir() -> Result<PathBuf, Error> {
	if let Some(dir) = from_env(ENV_ERSATZ_DIR) {
		return Ok(dir);
	}
	let dirs = xdg::BaseDirectories::new()?;
	Ok(dirs.get_runtime_directory()?.join("testbox/ersatz"))
}

/// Returns a path where container runtime logs are written.
/// Logs are only diagnostics, so they live in the cache home.
pub fn get_log_dir() -> Result<PathBuf, Error> {
	if let Some(dir) = from_env(ENV_LOG_DIR) {
		return Ok(dir);
	}
	let dirs = xdg::BaseDirectories::new()?;
	Ok(dirs.get_cache_home().join("testbox/logs"))
}

#[cfg(test)]
mod tests {
	use super::*;

	// Single test, since the process environment is shared between test threads.
	#[test]
	fn env_overrides() {
		env::remove_var(ENV_RUNTIME);
		assert_eq!(get_runtime(), PathBuf::from("runc"));
		env::set_var(ENV_RUNTIME, "/usr/local/bin/crun");
		assert_eq!(get_runtime(), PathBuf::from("/usr/local/bin/crun"));
		env::set_var(ENV_RUNTIME, "");
		assert_eq!(get_runtime(), PathBuf::from("runc"));
		env::remove_var(ENV_RUNTIME);

		env::set_var(ENV_ERSATZ_DIR, "/tmp/testbox-ersatz");
		assert_eq!(get_container_ersatz_basedir().unwrap(), PathBuf::from("/tmp/testbox-ersatz"));
		env::remove_var(ENV_ERSATZ_DIR);

		env::set_var(ENV_LOG_DIR, "/tmp/testbox-logs");
		assert_eq!(get_log_dir().unwrap(), PathBuf::from("/tmp/testbox-logs"));
		env::remove_var(ENV_LOG_DIR);
	}
}
