use std::path::PathBuf;

use testbox_api::constants::DEFAULT_IMAGE_DIR;
use testbox_provisioner::image::Image;
use testbox_provisioner::launch::launch;
use testbox_provisioner::runner::{container_ident, RuntimeRunner};
use testbox_terminal::logln;

use crate::cmds::{host_context, Root};
use crate::{relay, Error};

#[derive(clap::Args, Debug)]
pub struct Cmd {
	/// Image directory written by `testbox build`.
	#[arg(default_value = DEFAULT_IMAGE_DIR)]
	pub image: PathBuf,

	/// Command to run instead of the image's default command.
	#[arg(last = true)]
	pub command: Vec<String>,
}

/// Runs the image and hands back its command's exit code, which becomes ours.
pub async fn execute(cli: &Root, cmd: &Cmd) -> Result<i32, Error> {
	let image = Image::load(&cmd.image)?;
	let context = host_context()?;

	let command_override = (!cmd.command.is_empty()).then_some(cmd.command.as_slice());
	if cli.verbosity >= 1 {
		logln!("running {}", image.manifest.invocation(command_override).join(" "));
	}

	let runner = RuntimeRunner::new(&context);
	let scratch = context.ersatz_dir.join(container_ident("scratch"));
	let (outbox, relay_handle) = relay::start(cli.verbosity);

	let result = launch(&image, command_override, &runner, &scratch, outbox).await;
	let _ = relay_handle.await;
	Ok(result?)
}
