//! The build pipeline.
//!
//! A build runs the stages of [Stage::plan] strictly in order, each awaited before the next.
//! The first failing stage ends the build: its staging directory is discarded
//! and whatever was at the output path before is left alone.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use testbox_api::identity::ExecutionIdentity;
use testbox_api::image::{ImageManifest, ResolvedBase, StepRecord, ROOTFS_DIRNAME};
use testbox_api::recipe::{InstallStep, Invocation, Recipe, WorkDir};
use tokio::sync::mpsc::Sender;

use crate::image::{path_set_mode, remove_tree, write_manifest, Image};
use crate::registry::Registry;
use crate::runner::{container_ident, ContainerRunner};
use crate::source::{copy_source, CopyStats};
use crate::state::{BuildState, Stage};
use crate::{
	path_to_string, BuildError, ContainerParams, Error, Event, EventBody, MountSpec, Result,
	BUILD_TOPIC,
};

/// Host file bound into installation containers so package installers can resolve names.
const RESOLV_CONF: &str = "/etc/resolv.conf";

/// Everything a build has established so far.
///
/// Stages don't modify a context: each one takes the current context and returns the next.
#[derive(Clone, Debug)]
pub struct BuildContext {
	pub state: BuildState,
	/// Host path of the root filesystem being built.
	pub rootfs: PathBuf,
	pub base: Option<ResolvedBase>,
	/// Base image variables overlaid with the recipe's.
	pub environment: IndexMap<String, String>,
	pub workdir: Option<WorkDir>,
	pub identity: Option<ExecutionIdentity>,
	pub steps: Vec<StepRecord>,
	pub copied: Option<CopyStats>,
	pub command: Option<Invocation>,
	pub manifest: Option<ImageManifest>,
}

impl BuildContext {
	pub fn new(rootfs: PathBuf) -> Self {
		BuildContext {
			state: BuildState::Pending,
			rootfs,
			base: None,
			environment: IndexMap::new(),
			workdir: None,
			identity: None,
			steps: Vec::new(),
			copied: None,
			command: None,
			manifest: None,
		}
	}

	/// Host path of the working directory inside the rootfs.
	fn workdir_path(&self, stage: Stage) -> Result<PathBuf> {
		let workdir = self.workdir.as_ref().ok_or_else(|| self.premature(stage))?;
		Ok(self.rootfs.join(workdir.relative()))
	}

	fn premature(&self, stage: Stage) -> Error {
		Error::InvalidTransition {
			from: self.state,
			to: stage.to_string(),
		}
	}
}

/// Paths one build works with.
struct BuildJob<'a> {
	recipe: &'a Recipe,
	source_dir: &'a Path,
	output: &'a Path,
	staging: PathBuf,
}

/// Builds images, fetching bases through `registry` and running steps through `runner`.
///
/// Progress goes to `outbox`: a [EventBody::StageStarted] as each stage begins,
/// and the console output of every installation step.
pub struct Provisioner<'a> {
	pub registry: &'a dyn Registry,
	pub runner: &'a dyn ContainerRunner,
	pub outbox: Sender<Event>,
}

/// Where a build for `output` stages its work: a hidden sibling directory.
pub fn staging_path(output: &Path) -> Result<PathBuf> {
	let name = output.file_name().ok_or_else(|| Error::SystemSetupCauseless {
		msg: format!("output path {} has no final component", output.display()),
	})?;
	let mut staging_name = std::ffi::OsString::from(".");
	staging_name.push(name);
	staging_name.push(".staging");
	Ok(parent_dir(output).join(staging_name))
}

fn parent_dir(path: &Path) -> &Path {
	match path.parent() {
		Some(parent) if !parent.as_os_str().is_empty() => parent,
		_ => Path::new("."),
	}
}

impl Provisioner<'_> {
	/// Builds `recipe` into an image directory at `output`.
	///
	/// `source_dir` is the host tree the recipe's source snapshot copies,
	/// already resolved against wherever the recipe came from.
	pub async fn build(&self, recipe: &Recipe, source_dir: &Path, output: &Path) -> std::result::Result<Image, BuildError> {
		let report = recipe.validate();
		if !report.is_ok() {
			return Err(BuildError {
				state: BuildState::Pending.fail(Stage::SelectBase),
				error: testbox_api::Error::InvalidRecipe {
					problems: report.errors,
				}
				.into(),
			});
		}

		let plan = Stage::plan(recipe);
		let first_failure = |error| BuildError {
			state: BuildState::Pending.fail(plan[0]),
			error,
		};
		let staging = staging_path(output).map_err(first_failure)?;
		prepare_staging(&staging).map_err(first_failure)?;

		let job = BuildJob {
			recipe,
			source_dir,
			output,
			staging,
		};

		let total = plan.len() as u64;
		let mut ctx = BuildContext::new(job.staging.join(ROOTFS_DIRNAME));
		for (position, stage) in plan.iter().copied().enumerate() {
			self.announce(position as u64 + 1, total, stage, &job).await;
			let state = ctx.state;
			ctx = match self.run_stage(stage, ctx, &job).await {
				Ok(next) => next,
				Err(error) => {
					// The staging dir is garbage now; failing to remove it doesn't change the outcome.
					let _ = remove_tree(&job.staging);
					return Err(BuildError {
						state: state.fail(stage),
						error,
					});
				}
			};
		}

		match ctx.manifest {
			Some(manifest) if ctx.state == BuildState::Built => Ok(Image {
				dir: output.to_owned(),
				manifest,
			}),
			_ => Err(BuildError {
				state: ctx.state.fail(Stage::Finalize),
				error: ctx.premature(Stage::Finalize),
			}),
		}
	}

	async fn announce(&self, position: u64, total: u64, stage: Stage, job: &BuildJob<'_>) {
		let recipe = job.recipe;
		let description = match stage {
			Stage::SelectBase => recipe.base.to_string(),
			Stage::SetWorkingDirectory => recipe.workdir.to_string(),
			Stage::SetExecutionIdentity => recipe.identity.to_string(),
			Stage::Install(index) => recipe.install[index].describe(),
			Stage::CopySource => job.source_dir.display().to_string(),
			Stage::BindCommand => recipe.command.argv().join(" "),
			Stage::Finalize => job.output.display().to_string(),
		};
		let _ = self
			.outbox
			.send(Event {
				topic: BUILD_TOPIC.to_owned(),
				body: EventBody::StageStarted {
					position,
					total,
					stage,
					description,
				},
			})
			.await;
	}

	/// Runs one stage, if the context is ready for it, and returns the context after it.
	async fn run_stage(&self, stage: Stage, ctx: BuildContext, job: &BuildJob<'_>) -> Result<BuildContext> {
		let recipe = job.recipe;
		let next_state = ctx.state.advance(stage, recipe.install.len())?;
		let ctx = match stage {
			Stage::SelectBase => self.select_base(ctx, recipe).await?,
			Stage::SetWorkingDirectory => set_working_directory(ctx, &recipe.workdir)?,
			Stage::SetExecutionIdentity => set_execution_identity(ctx, recipe.identity),
			Stage::Install(index) => self.run_installation_step(ctx, index, &recipe.install[index]).await?,
			Stage::CopySource => copy_into_workdir(ctx, job)?,
			Stage::BindCommand => bind_command(ctx, &recipe.command),
			Stage::Finalize => finalize(ctx, job)?,
		};
		Ok(BuildContext {
			state: next_state,
			..ctx
		})
	}

	async fn select_base(&self, ctx: BuildContext, recipe: &Recipe) -> Result<BuildContext> {
		fs::create_dir_all(&ctx.rootfs).map_err(|e| Error::from_io("couldn't create rootfs dir", e))?;
		let materialized = self.registry.materialize(&recipe.base, &ctx.rootfs).await?;

		let mut environment = materialized.environment;
		environment.extend(recipe.environment.iter().map(|(k, v)| (k.clone(), v.clone())));

		Ok(BuildContext {
			base: Some(ResolvedBase {
				reference: recipe.base.clone(),
				manifest_digest: materialized.manifest_digest,
			}),
			environment,
			..ctx
		})
	}

	async fn run_installation_step(&self, ctx: BuildContext, index: usize, step: &InstallStep) -> Result<BuildContext> {
		let stage = Stage::Install(index);
		let workdir = ctx.workdir.as_ref().ok_or_else(|| ctx.premature(stage))?;
		let identity = ctx.identity.ok_or_else(|| ctx.premature(stage))?;

		let mut mounts = IndexMap::new();
		if Path::new(RESOLV_CONF).is_file() {
			mounts.insert(RESOLV_CONF.to_owned(), MountSpec::new_bind(RESOLV_CONF, RESOLV_CONF, true)?);
		}

		let argv = step.argv();
		let params = ContainerParams {
			ident: container_ident(&format!("step{}", index + 1)),
			command: argv.clone(),
			cwd: workdir.as_str().to_owned(),
			identity,
			mounts,
			environment: ctx.environment.clone(),
			root_path: path_to_string(&ctx.rootfs)?,
			root_readonly: false,
		};

		match self.runner.run(&params, self.outbox.clone()).await? {
			Some(0) => {
				let mut steps = ctx.steps;
				steps.push(StepRecord { argv, exit_code: 0 });
				Ok(BuildContext { steps, ..ctx })
			}
			exit_code => Err(Error::InstallationFailed {
				index,
				description: step.describe(),
				exit_code,
			}),
		}
	}
}

fn prepare_staging(staging: &Path) -> Result<()> {
	remove_tree(staging)?;
	fs::create_dir_all(staging).map_err(|e| Error::from_io("couldn't create staging dir", e))?;
	path_set_mode(staging, 0o700)
}

fn set_working_directory(ctx: BuildContext, workdir: &WorkDir) -> Result<BuildContext> {
	let path = ctx.rootfs.join(workdir.relative());
	fs::create_dir_all(&path).map_err(|e| Error::from_io("couldn't create working directory in rootfs", e))?;
	Ok(BuildContext {
		workdir: Some(workdir.clone()),
		..ctx
	})
}

fn set_execution_identity(ctx: BuildContext, identity: ExecutionIdentity) -> BuildContext {
	BuildContext {
		identity: Some(identity),
		..ctx
	}
}

fn copy_into_workdir(ctx: BuildContext, job: &BuildJob<'_>) -> Result<BuildContext> {
	let dest = ctx.workdir_path(Stage::CopySource)?;
	let source_error = |e: std::io::Error| Error::SourceCopy {
		path: job.source_dir.to_owned(),
		cause: Box::new(e),
	};
	let from = fs::canonicalize(job.source_dir).map_err(source_error)?;

	// The build's own output must not end up inside the image it builds.
	let output_parent = fs::canonicalize(parent_dir(&job.staging)).map_err(source_error)?;
	let mut skip = vec![];
	for path in [job.staging.as_path(), job.output] {
		if let Some(name) = path.file_name() {
			skip.push(output_parent.join(name));
		}
	}

	let copied = copy_source(&from, &job.recipe.source.exclude, &skip, &dest)?;
	Ok(BuildContext {
		copied: Some(copied),
		..ctx
	})
}

fn bind_command(ctx: BuildContext, command: &Invocation) -> BuildContext {
	BuildContext {
		command: Some(command.clone()),
		..ctx
	}
}

fn finalize(ctx: BuildContext, job: &BuildJob<'_>) -> Result<BuildContext> {
	let (Some(base), Some(workdir), Some(identity), Some(command)) =
		(ctx.base.clone(), ctx.workdir.clone(), ctx.identity, ctx.command.clone())
	else {
		return Err(ctx.premature(Stage::Finalize));
	};
	let manifest = ImageManifest {
		base,
		workdir,
		identity,
		environment: ctx.environment.clone(),
		command,
		steps: ctx.steps.clone(),
		recipe_digest: job.recipe.digest(),
	};
	write_manifest(&job.staging, &manifest)?;
	publish(&job.staging, job.output)?;
	Ok(BuildContext {
		manifest: Some(manifest),
		..ctx
	})
}

/// Moves a finished staging dir to `output`, replacing a previous image there.
///
/// Anything at `output` that isn't an image or an empty directory is left alone, and the build fails.
fn publish(staging: &Path, output: &Path) -> Result<()> {
	publish_with(staging, output, |from, to| fs::rename(from, to))
}

pub(crate) fn publish_with(
	staging: &Path,
	output: &Path,
	rename: impl Fn(&Path, &Path) -> std::io::Result<()>,
) -> Result<()> {
	if output.symlink_metadata().is_err() {
		return rename(staging, output).map_err(|e| Error::from_io("couldn't move image into place", e));
	}

	let empty_dir = fs::read_dir(output)
		.map(|mut entries| entries.next().is_none())
		.unwrap_or(false);
	if !empty_dir && !Image::is_image_dir(output) {
		return Err(Error::SystemSetupCauseless {
			msg: format!("refusing to replace {}: it exists and is not an image", output.display()),
		});
	}

	// Swap the old image out of the way first, so the output path is never half-deleted.
	let mut retired = staging.as_os_str().to_owned();
	retired.push(".old");
	let retired = PathBuf::from(retired);
	remove_tree(&retired)?;
	rename(output, &retired).map_err(|e| Error::from_io("couldn't move previous image aside", e))?;
	if let Err(e) = rename(staging, output) {
		// Put the previous image back where it was.
		if let Err(restore) = rename(&retired, output) {
			return Err(Error::SystemSetupError {
				msg: format!(
					"couldn't move image into place ({e}), and the previous image is left at {}",
					retired.display()
				),
				cause: Box::new(restore),
			});
		}
		return Err(Error::from_io("couldn't move image into place", e));
	}

	// The new image is in place; a leftover retired copy is cleared by the next build.
	let _ = remove_tree(&retired);
	Ok(())
}
