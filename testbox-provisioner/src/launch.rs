use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use tokio::sync::mpsc::Sender;

use crate::image::{path_set_mode, remove_tree, Image};
use crate::runner::{container_ident, ContainerRunner};
use crate::{path_to_string, ContainerParams, Error, Event, MountSpec, Result};

/// Builds the container parameters for running `image`.
///
/// The image's rootfs is mounted read-only. The working directory gets an overlay
/// whose writable layer lives under `scratch`, and `/tmp` is a tmpfs,
/// so a run can write where tests expect to without changing the image.
pub fn launch_params(image: &Image, command_override: Option<&[String]>, scratch: &Path) -> Result<ContainerParams> {
	let manifest = &image.manifest;
	let rootfs = image.rootfs();
	let workdir = manifest.workdir.as_str();

	let upper = scratch.join("upper");
	let work = scratch.join("work");
	for dir in [&upper, &work] {
		fs::create_dir_all(dir).map_err(|e| Error::from_io("couldn't create overlay dirs", e))?;
	}

	let mut mounts = IndexMap::new();
	mounts.insert(
		workdir.to_owned(),
		MountSpec::new_overlayfs(workdir, rootfs.join(manifest.workdir.relative()), &upper, &work)?,
	);
	mounts.insert("/tmp".to_owned(), MountSpec::new_tmpfs("/tmp")?);

	Ok(ContainerParams {
		ident: container_ident("run"),
		command: manifest.invocation(command_override),
		cwd: workdir.to_owned(),
		identity: manifest.identity,
		mounts,
		environment: manifest.environment.clone(),
		root_path: path_to_string(&rootfs)?,
		root_readonly: true,
	})
}

/// Runs `image` and returns the exit code of its command.
///
/// With no override (or an empty one) the image's default command runs.
/// Console output goes to `outbox` as it happens. A non-zero exit code is a result, not an error.
pub async fn launch(
	image: &Image,
	command_override: Option<&[String]>,
	runner: &dyn ContainerRunner,
	scratch: &Path,
	outbox: Sender<Event>,
) -> Result<i32> {
	fs::create_dir_all(scratch).map_err(|e| Error::from_io("couldn't create scratch dir", e))?;
	path_set_mode(scratch, 0o700)?;

	let result = async {
		let params = launch_params(image, command_override, scratch)?;
		runner.run(&params, outbox).await
	}
	.await;
	// Whatever the run wrote is discarded along with the scratch dir.
	let _ = remove_tree(scratch);

	match result? {
		Some(code) => Ok(code),
		None => Err(Error::SystemRuntimeError {
			msg: "container exited without an exit code".to_owned(),
			cause: format!("image at {}", image.dir.display()).into(),
		}),
	}
}
