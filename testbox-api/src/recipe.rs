use std::path::PathBuf;

use derive_more::Display;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use sha2::{Digest, Sha256};

use crate::identity::ExecutionIdentity;
use crate::reference::BaseRef;
use crate::Error;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum RecipeCapsule {
	#[serde(rename = "recipe.v1")]
	V1(Recipe),
}

impl RecipeCapsule {
	pub fn into_recipe(self) -> Recipe {
		let RecipeCapsule::V1(recipe) = self;
		recipe
	}
}

/// A declarative description of a test environment image.
///
/// The order of fields is the order the build applies them in:
/// the base is selected, the working directory is set, the identity is set,
/// installation steps run, the source is copied, and the default command is bound.
/// `environment` applies to every installation step and to the finished image.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Recipe {
	pub base: BaseRef,
	pub workdir: WorkDir,
	#[serde(default)]
	pub identity: ExecutionIdentity,
	#[serde(default, skip_serializing_if = "IndexMap::is_empty")]
	pub environment: IndexMap<String, String>,
	#[serde(default)]
	pub install: Vec<InstallStep>,
	pub source: SourceSpec,
	pub command: Invocation,
	/// Reject installation steps that don't pin a version.
	#[serde(default, skip_serializing_if = "std::ops::Not::not")]
	pub strict_pins: bool,
}

impl Recipe {
	/// SHA-256 over the compact JSON form of the recipe.
	///
	/// Field order is fixed by the struct and maps keep insertion order,
	/// so identical recipes always hash the same.
	pub fn digest(&self) -> String {
		let bytes = serde_json::to_vec(&RecipeCapsule::V1(self.clone()))
			.expect("recipe serialization cannot fail");
		format!("sha256:{:x}", Sha256::digest(&bytes))
	}
}

/// Absolute path inside the image.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Display, SerializeDisplay, DeserializeFromStr)]
pub struct WorkDir(String);

impl WorkDir {
	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// The path with the leading slash removed, for joining onto a host rootfs path.
	pub fn relative(&self) -> &str {
		self.0.trim_start_matches('/')
	}
}

impl std::str::FromStr for WorkDir {
	type Err = Error;

	fn from_str(value: &str) -> Result<Self, Self::Err> {
		let reason = if !value.starts_with('/') {
			Some("must be absolute")
		} else if value.split('/').any(|c| c == "..") {
			Some("must not contain '..'")
		} else if value.contains('\0') {
			Some("must not contain NUL")
		} else {
			None
		};
		if let Some(reason) = reason {
			return Err(Error::InvalidWorkDir {
				value: value.to_owned(),
				reason: reason.to_owned(),
			});
		}

		// Collapse repeated and trailing slashes.
		let parts: Vec<&str> = value.split('/').filter(|c| !c.is_empty() && *c != ".").collect();
		Ok(WorkDir(format!("/{}", parts.join("/"))))
	}
}

/// A command, either as an argv or as a shell script.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum Invocation {
	#[serde(rename = "exec")]
	Exec(ActionExec),
	#[serde(rename = "shell")]
	Shell(ActionShell),
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ActionExec {
	pub command: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ActionShell {
	pub script: String,
}

pub const SHELL: &str = "/bin/sh";

impl Invocation {
	pub fn exec<I, S>(command: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Invocation::Exec(ActionExec {
			command: command.into_iter().map(Into::into).collect(),
		})
	}

	pub fn shell(script: impl Into<String>) -> Self {
		Invocation::Shell(ActionShell {
			script: script.into(),
		})
	}

	/// The argv handed to the container runtime.
	pub fn argv(&self) -> Vec<String> {
		match self {
			Invocation::Exec(a) => a.command.clone(),
			Invocation::Shell(a) => vec![SHELL.into(), "-c".into(), a.script.clone()],
		}
	}
}

/// One environment-mutating step, run during the build.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum InstallStep {
	#[serde(rename = "exec")]
	Exec(ActionExec),
	#[serde(rename = "shell")]
	Shell(ActionShell),
	#[serde(rename = "pip")]
	Pip(PipInstall),
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct PipInstall {
	pub package: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub version: Option<String>,
	#[serde(default, skip_serializing_if = "std::ops::Not::not")]
	pub upgrade: bool,
}

impl PipInstall {
	pub fn requirement(&self) -> String {
		match &self.version {
			Some(version) => format!("{}=={}", self.package, version),
			None => self.package.clone(),
		}
	}
}

impl InstallStep {
	pub fn pip(package: impl Into<String>) -> Self {
		InstallStep::Pip(PipInstall {
			package: package.into(),
			version: None,
			upgrade: false,
		})
	}

	pub fn pip_upgrade(package: impl Into<String>) -> Self {
		InstallStep::Pip(PipInstall {
			package: package.into(),
			version: None,
			upgrade: true,
		})
	}

	pub fn argv(&self) -> Vec<String> {
		match self {
			InstallStep::Exec(a) => a.command.clone(),
			InstallStep::Shell(a) => vec![SHELL.into(), "-c".into(), a.script.clone()],
			InstallStep::Pip(p) => {
				let mut argv = vec!["pip".to_string(), "install".to_string()];
				if p.upgrade {
					argv.push("--upgrade".into());
				}
				argv.push(p.requirement());
				argv
			}
		}
	}

	/// Short human-readable form, used in logs and rendered recipes.
	pub fn describe(&self) -> String {
		match self {
			InstallStep::Shell(a) => a.script.clone(),
			_ => self.argv().join(" "),
		}
	}

	/// Whether the step names exactly what it installs.
	/// Only structured package steps can be judged; free-form commands count as pinned.
	pub fn is_pinned(&self) -> bool {
		match self {
			InstallStep::Pip(p) => p.version.is_some(),
			_ => true,
		}
	}
}

/// Where the source snapshot comes from.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SourceSpec {
	/// Host directory, relative to the recipe file's directory unless absolute.
	pub from: PathBuf,
	/// Glob patterns, relative to `from`, of paths left out of the copy.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub exclude: Vec<String>,
}

/// Assembles a [Recipe] one declaration at a time.
///
/// Calls may come in any order; the build always applies them in the fixed order.
/// Installation steps keep the order they were added in.
#[derive(Clone, Debug, Default)]
pub struct RecipeBuilder {
	base: Option<BaseRef>,
	workdir: Option<WorkDir>,
	identity: Option<ExecutionIdentity>,
	environment: IndexMap<String, String>,
	install: Vec<InstallStep>,
	source: Option<SourceSpec>,
	command: Option<Invocation>,
	strict_pins: bool,
}

impl RecipeBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn select_base(mut self, base: BaseRef) -> Self {
		self.base = Some(base);
		self
	}

	pub fn set_working_directory(mut self, workdir: WorkDir) -> Self {
		self.workdir = Some(workdir);
		self
	}

	pub fn set_execution_identity(mut self, identity: ExecutionIdentity) -> Self {
		self.identity = Some(identity);
		self
	}

	pub fn set_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.environment.insert(name.into(), value.into());
		self
	}

	pub fn run_installation_step(mut self, step: InstallStep) -> Self {
		self.install.push(step);
		self
	}

	pub fn copy_source(mut self, from: impl Into<PathBuf>, exclude: Vec<String>) -> Self {
		self.source = Some(SourceSpec {
			from: from.into(),
			exclude,
		});
		self
	}

	/// Replaces any previously set default command.
	pub fn set_default_command(mut self, command: Invocation) -> Self {
		self.command = Some(command);
		self
	}

	pub fn strict_pins(mut self, strict: bool) -> Self {
		self.strict_pins = strict;
		self
	}

	pub fn finish(self) -> Result<Recipe, Error> {
		let missing = |field: &str| Error::IncompleteRecipe {
			missing: field.to_owned(),
		};
		let recipe = Recipe {
			base: self.base.ok_or_else(|| missing("base"))?,
			workdir: self.workdir.ok_or_else(|| missing("workdir"))?,
			identity: self.identity.unwrap_or_default(),
			environment: self.environment,
			install: self.install,
			source: self.source.ok_or_else(|| missing("source"))?,
			command: self.command.ok_or_else(|| missing("command"))?,
			strict_pins: self.strict_pins,
		};
		let report = recipe.validate();
		if !report.errors.is_empty() {
			return Err(Error::InvalidRecipe {
				problems: report.errors,
			});
		}
		Ok(recipe)
	}
}
