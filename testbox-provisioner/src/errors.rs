use std::path::PathBuf;

use crate::state::BuildState;

pub type Result<T> = std::result::Result<T, Error>;

pub(crate) type ErrorCause = Box<dyn ::std::error::Error + Send + Sync>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
	/// The recipe failed validation; the build never started.
	#[error(transparent)]
	Recipe(#[from] testbox_api::Error),

	/// The base reference couldn't be parsed, fetched, or unpacked.
	/// Nothing else in the build has run when this happens.
	#[error("cannot resolve base image \"{reference}\": {cause}")]
	BaseResolution { reference: String, cause: ErrorCause },

	/// An installation step ran and exited non-zero, or was killed.
	/// The step's own output has already been relayed as events.
	#[error("installation step {} (`{description}`) failed with {}", .index + 1, describe_exit(.exit_code))]
	InstallationFailed {
		index: usize,
		description: String,
		exit_code: Option<i32>,
	},

	#[error("failed to copy source at {path}: {cause}")]
	SourceCopy { path: PathBuf, cause: ErrorCause },

	#[error("not a usable image at {path}: {msg}")]
	InvalidImage { path: PathBuf, msg: String },

	#[error("build cannot go from {from} to {to}")]
	InvalidTransition { from: BuildState, to: String },

	/// Something about the host is wrong: missing runtime binary, unwritable directories, and so on.
	#[error("{msg}: {cause}")]
	SystemSetupError { msg: String, cause: ErrorCause },

	#[error("{msg}")]
	SystemSetupCauseless { msg: String },

	#[error("{msg}: {cause}")]
	SystemRuntimeError { msg: String, cause: ErrorCause },

	#[error("{msg}: {cause}")]
	Catchall { msg: String, cause: ErrorCause },
}

fn describe_exit(exit_code: &Option<i32>) -> String {
	match exit_code {
		Some(code) => format!("exit code {code}"),
		None => "no exit code".to_owned(),
	}
}

impl Error {
	/// Classifies an io error by whether a human needs to fix the host.
	pub(crate) fn from_io(msg: impl Into<String>, err: std::io::Error) -> Self {
		let msg = msg.into();
		match err.kind() {
			std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
				Error::SystemSetupError {
					msg,
					cause: Box::new(err),
				}
			}
			_ => Error::SystemRuntimeError {
				msg,
				cause: Box::new(err),
			},
		}
	}
}

/// A failed build: the error, and the state the build ended in.
/// The state is always [BuildState::Failed].
#[derive(thiserror::Error, Debug)]
#[error("build failed ({state}): {error}")]
pub struct BuildError {
	pub state: BuildState,
	#[source]
	pub error: Error,
}
