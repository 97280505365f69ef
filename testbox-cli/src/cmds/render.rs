use std::path::PathBuf;

use testbox_api::render::{render_containerfile, render_ignore_file};
use testbox_terminal::log;

use crate::cmds::{load_recipe, Root};
use crate::Error;

#[derive(clap::Args, Debug)]
pub struct Cmd {
	/// Path to a recipe file, or a directory containing testbox.json.
	pub recipe: PathBuf,

	/// Print the ignore file matching the recipe's source exclusions instead.
	#[arg(long)]
	pub ignore_file: bool,
}

pub async fn execute(_cli: &Root, cmd: &Cmd) -> Result<i32, Error> {
	let loaded = load_recipe(&cmd.recipe)?;
	if cmd.ignore_file {
		log!("{}", render_ignore_file(&loaded.recipe));
	} else {
		log!("{}", render_containerfile(&loaded.recipe));
	}
	Ok(0)
}
