use std::env::current_dir;
use std::path::PathBuf;

use testbox_api::constants::DEFAULT_IMAGE_DIR;
use testbox_provisioner::pipeline::Provisioner;
use testbox_provisioner::registry::OciRegistry;
use testbox_provisioner::runner::RuntimeRunner;
use testbox_terminal::logln;

use crate::cmds::{host_context, load_recipe, report_problems, Root};
use crate::{relay, Error};

#[derive(clap::Args, Debug)]
pub struct Cmd {
	/// Path to a recipe file, or a directory containing testbox.json.
	pub recipe: PathBuf,

	/// Where to put the image.  Defaults to `.testbox/image` in the current directory.
	///
	/// A previous image at this path is replaced once the build succeeds.
	#[arg(short, long)]
	pub output: Option<PathBuf>,
}

/// The image location: `--output` if given, otherwise under the current directory.
fn output_path(cmd: &Cmd) -> Result<PathBuf, Error> {
	match &cmd.output {
		Some(output) => Ok(output.clone()),
		None => Ok(current_dir()
			.map_err(|e| Error::BizarreEnvironment { cause: Box::new(e) })?
			.join(DEFAULT_IMAGE_DIR)),
	}
}

pub async fn execute(cli: &Root, cmd: &Cmd) -> Result<i32, Error> {
	let loaded = load_recipe(&cmd.recipe)?;
	report_problems(loaded.recipe.validate())?;

	let output = output_path(cmd)?;
	let context = host_context()?;
	if cli.verbosity >= 2 {
		logln!("context: {context:?}");
	}

	let registry = OciRegistry::default();
	let runner = RuntimeRunner::new(&context);
	let (outbox, relay_handle) = relay::start(cli.verbosity);
	let provisioner = Provisioner {
		registry: &registry,
		runner: &runner,
		outbox,
	};

	let result = provisioner
		.build(&loaded.recipe, &loaded.source_dir(), &output)
		.await;
	drop(provisioner);
	let _ = relay_handle.await;

	let image = result?;
	logln!(
		"built {} ({} installation steps, recipe {})",
		image.dir.display(),
		image.manifest.steps.len(),
		image.manifest.recipe_digest
	);
	Ok(0)
}
