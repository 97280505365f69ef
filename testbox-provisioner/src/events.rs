use crate::state::Stage;

/// Event is the type used to shuttle infomation produced during builds and runs.
/// It contains either a line from a container's stdout or stderr,
/// a container's exit code, or notice that a build stage has started.
///
/// Output lines have their trailing linebreak removed.
#[derive(Debug)]
pub struct Event {
	/// The container ident, or [BUILD_TOPIC] for build-level events.
	pub topic: String,
	pub body: EventBody,
}

pub const BUILD_TOPIC: &str = "build";

#[derive(Debug)]
pub enum EventBody {
	Output {
		/// Follows the convention of unix fd's: 1 is stdout, 2 is stderr.
		channel: i32,
		val: String,
	},
	ExitCode(Option<i32>),
	StageStarted {
		/// One-based position of the stage within the build.
		position: u64,
		total: u64,
		stage: Stage,
		description: String,
	},
}
