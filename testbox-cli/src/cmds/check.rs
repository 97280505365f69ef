use std::path::PathBuf;

use testbox_terminal::logln;

use crate::cmds::{load_recipe, report_problems, Root};
use crate::Error;

#[derive(clap::Args, Debug)]
pub struct Cmd {
	/// Path to a recipe file, or a directory containing testbox.json.
	pub recipe: PathBuf,
}

pub async fn execute(cli: &Root, cmd: &Cmd) -> Result<i32, Error> {
	let loaded = load_recipe(&cmd.recipe)?;
	report_problems(loaded.recipe.validate())?;
	if cli.verbosity >= 1 {
		logln!("recipe digest: {}", loaded.recipe.digest());
	}
	logln!("recipe ok");
	Ok(0)
}
