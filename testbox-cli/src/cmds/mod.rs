use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use testbox_api::constants::MAGIC_FILENAME_RECIPE;
use testbox_api::recipe::{Recipe, RecipeCapsule};
use testbox_api::validate::ValidationReport;
use testbox_provisioner::context::Context;
use testbox_terminal::logln;

use crate::Error;

pub mod build;
pub mod check;
pub mod render;
pub mod run;

#[derive(clap::Parser, Debug)]
#[command(name = "testbox", about = "Builds and runs reproducible test environments.")]
pub struct Root {
	#[command(subcommand)]
	pub subcommand: Option<Subcommands>,

	/// Raise verbosity by specifying this flag repeatedly.
	#[arg(short, action = clap::ArgAction::Count, global = true)]
	pub verbosity: u8,
}

#[derive(clap::Subcommand, Debug)]
pub enum Subcommands {
	/// Build an image from a recipe: fetch the base, run the installation steps, copy the source in.
	Build(build::Cmd),

	/// Run a built image's default command (or the command given after `--`),
	/// and exit with its exit code.
	Run(run::Cmd),

	/// Print the Containerfile equivalent of a recipe.
	Render(render::Cmd),

	/// Validate a recipe and report problems without building anything.
	Check(check::Cmd),
}

/// A recipe, and the directory paths in it are relative to.
pub struct LoadedRecipe {
	pub recipe: Recipe,
	pub base_dir: PathBuf,
}

impl LoadedRecipe {
	/// The host tree the recipe's source snapshot copies.
	pub fn source_dir(&self) -> PathBuf {
		// Joining an absolute path replaces the base.
		self.base_dir.join(&self.recipe.source.from)
	}
}

/// Reads a recipe file, or the recipe file in a directory.
pub fn load_recipe(target: &Path) -> Result<LoadedRecipe, Error> {
	let meta = fs::metadata(target).map_err(|e| Error::InvalidArguments { cause: Box::new(e) })?;
	let path = if meta.is_dir() {
		target.join(MAGIC_FILENAME_RECIPE)
	} else {
		target.to_owned()
	};

	let file = File::open(&path).map_err(|e| Error::InvalidArguments {
		cause: format!("cannot open recipe {}: {e}", path.display()).into(),
	})?;
	let capsule: RecipeCapsule =
		serde_json::from_reader(BufReader::new(file)).map_err(|e| Error::InvalidRecipe {
			cause: format!("{}: {e}", path.display()).into(),
		})?;

	let base_dir = match path.parent() {
		Some(parent) if !parent.as_os_str().is_empty() => parent.to_owned(),
		_ => PathBuf::from("."),
	};
	Ok(LoadedRecipe {
		recipe: capsule.into_recipe(),
		base_dir,
	})
}

/// Logs every problem in `report`, and turns errors into a failure.
pub fn report_problems(report: ValidationReport) -> Result<(), Error> {
	for warning in &report.warnings {
		logln!("warning: {warning}");
	}
	for error in &report.errors {
		logln!("error: {error}");
	}
	if report.is_ok() {
		return Ok(());
	}
	Err(Error::InvalidRecipe {
		cause: Box::new(testbox_api::Error::InvalidRecipe {
			problems: report.errors,
		}),
	})
}

/// Loads host settings and makes sure the container runtime can be found.
pub fn host_context() -> Result<Context, Error> {
	resolve_runtime(Context::from_env()?)
}

/// Pins the runtime to the executable it names: paths as given, bare names through $PATH.
fn resolve_runtime(mut context: Context) -> Result<Context, Error> {
	context.runtime = which::which(&context.runtime).map_err(|e| Error::MissingPlugin {
		subsystem: "container engine".into(),
		missing_plugin: context.runtime.display().to_string(),
		cause: format!("{e} (set TESTBOX_RUNTIME to choose another runtime)").into(),
	})?;
	Ok(context)
}

#[cfg(test)]
mod tests {
	use tempfile::TempDir;

	use super::*;

	const RECIPE: &str = r#"{
		"recipe.v1": {
			"base": "registry.access.redhat.com/ubi9/python-39:latest",
			"workdir": "/rbac",
			"identity": "root",
			"environment": {"PIP_DEFAULT_TIMEOUT": "100"},
			"install": [
				{"pip": {"package": "pip", "upgrade": true}},
				{"pip": {"package": "tox"}}
			],
			"source": {"from": "."},
			"command": {"exec": {"command": ["tox"]}}
		}
	}"#;

	#[test]
	fn loads_recipe_from_directory() {
		let dir = TempDir::new().unwrap();
		fs::write(dir.path().join(MAGIC_FILENAME_RECIPE), RECIPE).unwrap();

		let loaded = load_recipe(dir.path()).unwrap();
		assert_eq!(loaded.recipe.install.len(), 2);
		assert_eq!(loaded.base_dir, dir.path());
		assert_eq!(loaded.source_dir(), dir.path().join("."));
	}

	#[test]
	fn absolute_source_stays_absolute() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("ci.json");
		fs::write(&path, RECIPE.replace(r#""from": ".""#, r#""from": "/srv/project""#)).unwrap();

		let loaded = load_recipe(&path).unwrap();
		assert_eq!(loaded.source_dir(), PathBuf::from("/srv/project"));
	}

	#[test]
	fn malformed_recipe_is_reported() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("broken.json");
		fs::write(&path, r#"{"recipe.v1": {"base": "python:3.9"}}"#).unwrap();

		let err = load_recipe(&path).err().unwrap();
		assert_eq!(err.code(), 10);
	}

	#[test]
	fn runtime_resolves_through_path() {
		let context = resolve_runtime(Context {
			runtime: PathBuf::from("sh"),
			..Context::default()
		})
		.unwrap();
		assert!(context.runtime.is_absolute(), "{}", context.runtime.display());
	}

	#[test]
	fn missing_runtime_is_a_missing_plugin() {
		let err = resolve_runtime(Context {
			runtime: PathBuf::from("testbox-no-such-runtime"),
			..Context::default()
		})
		.unwrap_err();
		assert!(matches!(err, Error::MissingPlugin { .. }), "{err}");
		assert_eq!(err.code(), 7);
	}

	#[test]
	fn non_executable_runtime_is_rejected() {
		use std::os::unix::fs::PermissionsExt;

		let dir = TempDir::new().unwrap();
		let runtime = dir.path().join("runc");
		fs::write(&runtime, "#!/bin/sh\n").unwrap();
		fs::set_permissions(&runtime, fs::Permissions::from_mode(0o644)).unwrap();

		let err = resolve_runtime(Context {
			runtime: runtime.clone(),
			..Context::default()
		})
		.unwrap_err();
		assert!(matches!(err, Error::MissingPlugin { .. }), "{err}");

		fs::set_permissions(&runtime, fs::Permissions::from_mode(0o755)).unwrap();
		let context = resolve_runtime(Context {
			runtime: runtime.clone(),
			..Context::default()
		})
		.unwrap();
		assert_eq!(context.runtime, runtime);
	}
}
