use std::fmt::{self, Display, Formatter};

use testbox_api::recipe::Recipe;

use crate::{Error, Result};

/// One step of a build, in the order builds perform them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
	SelectBase,
	SetWorkingDirectory,
	SetExecutionIdentity,
	/// Installation step, by index into the recipe's list.
	Install(usize),
	CopySource,
	BindCommand,
	Finalize,
}

impl Stage {
	/// The full, ordered list of stages a recipe builds with.
	pub fn plan(recipe: &Recipe) -> Vec<Stage> {
		let mut stages = vec![
			Stage::SelectBase,
			Stage::SetWorkingDirectory,
			Stage::SetExecutionIdentity,
		];
		stages.extend((0..recipe.install.len()).map(Stage::Install));
		stages.extend([Stage::CopySource, Stage::BindCommand, Stage::Finalize]);
		stages
	}
}

impl Display for Stage {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match self {
			Stage::SelectBase => write!(f, "select base"),
			Stage::SetWorkingDirectory => write!(f, "set working directory"),
			Stage::SetExecutionIdentity => write!(f, "set execution identity"),
			Stage::Install(n) => write!(f, "installation step {}", n + 1),
			Stage::CopySource => write!(f, "copy source"),
			Stage::BindCommand => write!(f, "bind default command"),
			Stage::Finalize => write!(f, "finalize"),
		}
	}
}

/// Where a build is.
///
/// The states form a single chain, one edge per stage:
/// `Pending → BaseSelected → DirectorySet → IdentityElevated → Installed(n) → SourceCopied → CommandBound → Built`.
/// `Failed` is reachable from every state that isn't terminal, and nothing leaves it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildState {
	Pending,
	BaseSelected,
	DirectorySet,
	IdentityElevated,
	/// The first `n` installation steps have completed.
	Installed(usize),
	SourceCopied,
	CommandBound,
	Built,
	Failed { during: Stage },
}

impl BuildState {
	pub fn is_terminal(&self) -> bool {
		matches!(self, BuildState::Built | BuildState::Failed { .. })
	}

	/// The state after `stage` completes, if `stage` is the one that may run next.
	///
	/// `declared_installs` is how many installation steps the recipe has;
	/// copying the source is only allowed once all of them are done.
	pub fn advance(self, stage: Stage, declared_installs: usize) -> Result<BuildState> {
		use BuildState::*;

		let next = match (self, stage) {
			(Pending, Stage::SelectBase) => Some(BaseSelected),
			(BaseSelected, Stage::SetWorkingDirectory) => Some(DirectorySet),
			(DirectorySet, Stage::SetExecutionIdentity) => Some(IdentityElevated),
			(IdentityElevated, Stage::Install(0)) => Some(Installed(1)),
			(Installed(done), Stage::Install(n)) if n == done => Some(Installed(done + 1)),
			(IdentityElevated, Stage::CopySource) if declared_installs == 0 => Some(SourceCopied),
			(Installed(done), Stage::CopySource) if done == declared_installs => Some(SourceCopied),
			(SourceCopied, Stage::BindCommand) => Some(CommandBound),
			(CommandBound, Stage::Finalize) => Some(Built),
			_ => None,
		};

		next.ok_or_else(|| Error::InvalidTransition {
			from: self,
			to: stage.to_string(),
		})
	}

	/// The state after `stage` fails.
	/// Terminal states stay as they are.
	pub fn fail(self, stage: Stage) -> BuildState {
		if self.is_terminal() {
			return self;
		}
		BuildState::Failed { during: stage }
	}
}

impl Display for BuildState {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match self {
			BuildState::Pending => write!(f, "pending"),
			BuildState::BaseSelected => write!(f, "base selected"),
			BuildState::DirectorySet => write!(f, "directory set"),
			BuildState::IdentityElevated => write!(f, "identity elevated"),
			BuildState::Installed(n) => write!(f, "installed {n}"),
			BuildState::SourceCopied => write!(f, "source copied"),
			BuildState::CommandBound => write!(f, "command bound"),
			BuildState::Built => write!(f, "built"),
			BuildState::Failed { during } => write!(f, "failed during {during}"),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn walk(stages: &[Stage], declared_installs: usize) -> Result<BuildState> {
		stages
			.iter()
			.try_fold(BuildState::Pending, |state, stage| state.advance(*stage, declared_installs))
	}

	#[test]
	fn full_chain_reaches_built() {
		let stages = [
			Stage::SelectBase,
			Stage::SetWorkingDirectory,
			Stage::SetExecutionIdentity,
			Stage::Install(0),
			Stage::Install(1),
			Stage::CopySource,
			Stage::BindCommand,
			Stage::Finalize,
		];
		assert_eq!(walk(&stages, 2).unwrap(), BuildState::Built);
	}

	#[test]
	fn no_installs_goes_straight_to_copy() {
		let stages = [
			Stage::SelectBase,
			Stage::SetWorkingDirectory,
			Stage::SetExecutionIdentity,
			Stage::CopySource,
		];
		assert_eq!(walk(&stages, 0).unwrap(), BuildState::SourceCopied);
	}

	#[test]
	fn out_of_order_is_rejected() {
		let err = BuildState::Pending
			.advance(Stage::SetWorkingDirectory, 0)
			.unwrap_err();
		assert_eq!(err.to_string(), "build cannot go from pending to set working directory");

		// Skipping an install.
		let err = BuildState::Installed(1).advance(Stage::Install(2), 3).unwrap_err();
		assert!(matches!(err, Error::InvalidTransition { .. }));

		// Copying before every install is done.
		assert!(BuildState::Installed(1).advance(Stage::CopySource, 2).is_err());
		assert!(BuildState::IdentityElevated.advance(Stage::CopySource, 1).is_err());
	}

	#[test]
	fn terminal_states_are_absorbing() {
		assert!(BuildState::Built.advance(Stage::SelectBase, 0).is_err());

		let failed = BuildState::Installed(1).fail(Stage::Install(1));
		assert_eq!(failed, BuildState::Failed { during: Stage::Install(1) });
		assert!(failed.is_terminal());
		assert_eq!(failed.fail(Stage::CopySource), failed);
		assert!(failed.advance(Stage::CopySource, 2).is_err());
		assert_eq!(failed.to_string(), "failed during installation step 2");
	}

	#[test]
	fn plan_lists_every_stage_once() {
		let recipe = crate::tests::tox_recipe();
		assert_eq!(
			Stage::plan(&recipe),
			vec![
				Stage::SelectBase,
				Stage::SetWorkingDirectory,
				Stage::SetExecutionIdentity,
				Stage::Install(0),
				Stage::Install(1),
				Stage::CopySource,
				Stage::BindCommand,
				Stage::Finalize,
			]
		);
	}
}
