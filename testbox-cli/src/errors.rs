use testbox_provisioner::BuildError;

type ErrorCause = Box<dyn ::std::error::Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
	// InvalidArguments is for CLI level parse errors.  Don't use it any deeper inside.
	#[error("invalid arguments: {cause}")]
	InvalidArguments { cause: ErrorCause },

	/// BizarreEnvironment means human intervention is required on the host:
	/// unusable state directories, missing environment, and the like.
	///
	/// Make sure the cause describes itself well, since this error's display message preamble provides little information itself.
	#[error("halting due to strange environment: {cause}")]
	BizarreEnvironment { cause: ErrorCause },

	/// MissingPlugin indicates that a program we drive isn't on the host,
	/// typically the container runtime.
	#[error(
		"missing a plugin for {subsystem}: could not find or initialize {missing_plugin}: {cause}"
	)]
	MissingPlugin {
		/// The subsystem's descriptive name, e.g. "container engine".
		subsystem: String,
		/// A more specific name of what exactly we're missing, e.g. "runc".
		missing_plugin: String,
		cause: ErrorCause,
	},

	/// The recipe file couldn't be read, parsed, or didn't pass validation.
	#[error("invalid recipe: {cause}")]
	InvalidRecipe { cause: ErrorCause },

	#[error("{cause}")]
	BaseResolution { cause: ErrorCause },

	#[error("{cause}")]
	InstallationFailed { cause: ErrorCause },

	#[error("{cause}")]
	SourceCopy { cause: ErrorCause },

	#[error("{cause}")]
	InvalidImage { cause: ErrorCause },

	/// Something failed that the user probably can't fix.  Bug reports welcome.
	#[error("internal error: {cause}")]
	Internal { cause: ErrorCause },
}

impl Error {
	pub fn code(&self) -> i32 {
		match self {
			Error::InvalidArguments { .. } => 1,
			Error::BizarreEnvironment { .. } => 4,
			Error::Internal { .. } => 5,
			Error::MissingPlugin { .. } => 7,
			Error::InvalidRecipe { .. } => 10,
			Error::BaseResolution { .. } => 20,
			Error::InstallationFailed { .. } => 21,
			Error::SourceCopy { .. } => 22,
			Error::InvalidImage { .. } => 23,
		}
	}
}

/// Picks the error class for a provisioner error.
fn class_of(error: &testbox_provisioner::Error) -> fn(ErrorCause) -> Error {
	use testbox_provisioner::Error as E;
	match error {
		E::Recipe(_) => |cause| Error::InvalidRecipe { cause },
		E::BaseResolution { .. } => |cause| Error::BaseResolution { cause },
		E::InstallationFailed { .. } => |cause| Error::InstallationFailed { cause },
		E::SourceCopy { .. } => |cause| Error::SourceCopy { cause },
		E::InvalidImage { .. } => |cause| Error::InvalidImage { cause },
		E::SystemSetupError { .. } | E::SystemSetupCauseless { .. } => {
			|cause| Error::BizarreEnvironment { cause }
		}
		E::InvalidTransition { .. } | E::SystemRuntimeError { .. } | E::Catchall { .. } => {
			|cause| Error::Internal { cause }
		}
	}
}

impl From<testbox_provisioner::Error> for Error {
	fn from(err: testbox_provisioner::Error) -> Self {
		class_of(&err)(Box::new(err))
	}
}

/// The build state stays in the message, so users see which stage failed.
impl From<BuildError> for Error {
	fn from(err: BuildError) -> Self {
		class_of(&err.error)(Box::new(err))
	}
}
