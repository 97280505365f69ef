use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};

use testbox_terminal::logln;
use testbox_terminal::Logger;

mod cmds;
mod errors;
mod relay;

use errors::*;

#[tokio::main]
async fn main() {
	Logger::set_global(Logger::new_local()).unwrap();

	let code = match main2().await {
		Ok(code) => code,
		Err(e) => {
			logln!("{}", e);
			e.code()
		}
	};

	// Wait for all messages to be printed to stdout.
	let _ = Logger::get_global().unwrap().close().await;

	std::process::exit(code);
}

/// Returns the exit code for the process.
/// That's 0 after a successful build, and the test command's own exit code after `run`.
async fn main2() -> Result<i32, Error> {
	let cli = match cmds::Root::try_parse() {
		Ok(arguments) => arguments,
		Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
			logln!("{e}");
			return Ok(0);
		}
		Err(e) => return Err(Error::InvalidArguments { cause: Box::new(e) }),
	};

	if cli.verbosity >= 2 {
		logln!("args: {cli:?}");
	}

	match &cli.subcommand {
		Some(cmds::Subcommands::Build(cmd)) => cmds::build::execute(&cli, cmd).await,
		Some(cmds::Subcommands::Run(cmd)) => cmds::run::execute(&cli, cmd).await,
		Some(cmds::Subcommands::Render(cmd)) => cmds::render::execute(&cli, cmd).await,
		Some(cmds::Subcommands::Check(cmd)) => cmds::check::execute(&cli, cmd).await,
		None => {
			logln!("{}", cmds::Root::command().render_help());
			Ok(0)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn verify_cli() {
		cmds::Root::command().debug_assert()
	}

	#[test]
	fn run_takes_override_after_separator() {
		let cli = cmds::Root::try_parse_from(["testbox", "-v", "run", "out/image", "--", "tox", "-e", "lint"]).unwrap();
		assert_eq!(cli.verbosity, 1);
		let Some(cmds::Subcommands::Run(cmd)) = cli.subcommand else {
			panic!("expected run subcommand");
		};
		assert_eq!(cmd.image, std::path::PathBuf::from("out/image"));
		assert_eq!(cmd.command, vec!["tox", "-e", "lint"]);
	}

	#[test]
	fn run_defaults_to_local_image() {
		let cli = cmds::Root::try_parse_from(["testbox", "run"]).unwrap();
		let Some(cmds::Subcommands::Run(cmd)) = cli.subcommand else {
			panic!("expected run subcommand");
		};
		assert_eq!(cmd.image, std::path::PathBuf::from(".testbox/image"));
		assert!(cmd.command.is_empty());
	}

	#[test]
	fn build_takes_output_flag() {
		let cli = cmds::Root::try_parse_from(["testbox", "build", "testbox.json", "-o", "/tmp/img"]).unwrap();
		let Some(cmds::Subcommands::Build(cmd)) = cli.subcommand else {
			panic!("expected build subcommand");
		};
		assert_eq!(cmd.output, Some(std::path::PathBuf::from("/tmp/img")));
	}
}
