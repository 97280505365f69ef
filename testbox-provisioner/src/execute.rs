use std::fs;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Stdio;

use str_cat::os_str_cat;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::Sender;

use crate::events::EventBody;
use crate::oci::{runtime_config, HostIds};
use crate::{ContainerParams, Error, Event, Result};

/// Runs containers with an OCI runtime binary.
pub struct Executor {
	/// OCI compatible container runtime, e.g. "runc".
	pub runtime: PathBuf,

	/// Path to use for the generated short-lived container bundle dirs.
	/// Each container gets a subdirectory named after its ident.
	pub ersatz_dir: PathBuf,

	/// File the runtime writes its own logs to.
	pub log_file: PathBuf,
}

impl Executor {
	/// Runs the container to completion and returns its exit code.
	///
	/// Output lines and the exit code are also sent to `outbox` as they happen.
	/// A container killed by a signal reports `128 + signal`, the shell convention.
	pub async fn run(&self, task: &ContainerParams, outbox: Sender<Event>) -> Result<Option<i32>> {
		self.prep_bundledir(task)?;
		let result = self.container_exec(task, outbox).await;
		// The bundle only matters while the container runs.
		let _ = fs::remove_dir_all(self.ersatz_dir.join(&task.ident));
		result
	}

	fn prep_bundledir(&self, task: &ContainerParams) -> Result<()> {
		let spec = runtime_config(task, HostIds::current())?;

		let cfg_dir = self.ersatz_dir.join(&task.ident);
		fs::create_dir_all(&cfg_dir).map_err(|e| {
			Error::from_io("failed during executor internals: couldn't create bundle dir", e)
		})?;
		if let Some(log_dir) = self.log_file.parent() {
			fs::create_dir_all(log_dir).map_err(|e| {
				Error::from_io("failed during executor internals: couldn't create log dir", e)
			})?;
		}
		let f = fs::File::create(cfg_dir.join("config.json")) // Must literally be this name within bundle dir.
			.map_err(|e| Error::Catchall {
				msg:
					"failed during executor internals: couldn't open bundle config file for writing"
						.to_owned(),
				cause: Box::new(e),
			})?;
		serde_json::to_writer_pretty(f, &spec).map_err(|e| {
			if e.is_io() {
				return Error::Catchall {
					msg: "failed during executor internals: io error writing config file"
						.to_owned(),
					cause: Box::new(Into::<std::io::Error>::into(e)),
				};
			}
			Error::Catchall {
				msg: "unable to serialize OCI spec file".to_owned(),
				cause: Box::new(e),
			}
		})?;
		Ok(())
	}

	async fn container_exec(&self, task: &ContainerParams, outbox: Sender<Event>) -> Result<Option<i32>> {
		let mut cmd = Command::new(&self.runtime);
		cmd.arg(os_str_cat!("--log=", self.log_file));
		cmd.arg("run");
		cmd.arg(os_str_cat!("--bundle=", self.ersatz_dir.join(&task.ident)));
		cmd.arg(&task.ident); // container name.

		cmd.stdin(Stdio::null());
		cmd.stdout(Stdio::piped());
		cmd.stderr(Stdio::piped());
		cmd.kill_on_drop(true);

		let mut child = cmd
			.spawn()
			.map_err(|e| Error::from_io("failed to spawn containerization process", e))?;

		let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
			return Err(Error::SystemSetupCauseless {
				msg: "containerization process has no output handles".into(),
			});
		};

		let stderr_handle = {
			let outbox = outbox.clone();
			let ident = task.ident.clone();
			tokio::spawn(async move { send_container_output(&ident, &outbox, 2, BufReader::new(stderr)).await })
		};

		send_container_output(&task.ident, &outbox, 1, BufReader::new(stdout))
			.await
			.map_err(|e| Error::Catchall {
				msg: "failed to read stdout from container".to_owned(),
				cause: Box::new(e),
			})?;

		stderr_handle
			.await
			.map_err(|e| Error::SystemRuntimeError {
				msg: "stderr reader task failed".to_owned(),
				cause: Box::new(e),
			})?
			.map_err(|e| Error::Catchall {
				msg: "failed to read stderr from container".to_owned(),
				cause: Box::new(e),
			})?;

		let status = child.wait().await.map_err(|err| Error::SystemRuntimeError {
			msg: "failed to get child exit code".into(),
			cause: Box::new(err),
		})?;
		let code = status.code().or_else(|| status.signal().map(|s| 128 + s));

		// Nobody listening is fine; the caller gets the code either way.
		let _ = outbox
			.send(Event {
				topic: task.ident.clone(),
				body: EventBody::ExitCode(code),
			})
			.await;

		Ok(code)
	}
}

async fn send_container_output<R: AsyncBufRead + Unpin>(
	ident: &str,
	outbox: &Sender<Event>,
	channel: i32,
	mut reader: R,
) -> std::io::Result<()> {
	let mut line = Vec::new();
	// Output is opaque bytes; undecodable ones are replaced rather than ending the stream.
	while reader.read_until(b'\n', &mut line).await? > 0 {
		if line.ends_with(b"\n") {
			line.pop();
			if line.ends_with(b"\r") {
				line.pop();
			}
		}
		let val = String::from_utf8_lossy(&line).into_owned();
		line.clear();
		// Keep draining even without a listener, or the child blocks on a full pipe.
		let _ = outbox
			.send(Event {
				topic: ident.to_owned(),
				body: EventBody::Output { channel, val },
			})
			.await;
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use std::os::unix::fs::PermissionsExt;

	use indexmap::IndexMap;
	use tempfile::TempDir;
	use testbox_api::identity::ExecutionIdentity;
	use tokio::sync::mpsc;

	use super::*;

	/// Stands in for runc: reads the bundle's config, prints its args, and exits 3.
	fn fake_runtime(dir: &std::path::Path) -> PathBuf {
		scripted_runtime(dir, "echo \"out:$*\"\necho \"err line\" >&2\nexit 3\n")
	}

	fn scripted_runtime(dir: &std::path::Path, body: &str) -> PathBuf {
		let path = dir.join("fake-runc");
		let script = format!(
			"#!/bin/sh\n\
			 for arg in \"$@\"; do case $arg in --bundle=*) bundle=${{arg#--bundle=}};; esac; done\n\
			 test -f \"$bundle/config.json\" || exit 99\n\
			 {body}"
		);
		fs::write(&path, script).unwrap();
		fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
		path
	}

	fn params_for(ident: &str, dir: &std::path::Path) -> ContainerParams {
		ContainerParams {
			ident: ident.into(),
			command: vec!["true".into()],
			cwd: "/".into(),
			identity: ExecutionIdentity::ROOT,
			mounts: IndexMap::new(),
			environment: IndexMap::new(),
			root_path: dir.join("rootfs").display().to_string(),
			root_readonly: true,
		}
	}

	#[tokio::test]
	async fn relays_output_and_exit_code() {
		let temp_dir = TempDir::new().unwrap();
		let executor = Executor {
			runtime: fake_runtime(temp_dir.path()),
			ersatz_dir: temp_dir.path().join("run"),
			log_file: temp_dir.path().join("logs/runtime.log"),
		};
		let params = ContainerParams {
			ident: "testbox-fake".into(),
			command: vec!["true".into()],
			cwd: "/".into(),
			identity: ExecutionIdentity::ROOT,
			mounts: IndexMap::new(),
			environment: IndexMap::new(),
			root_path: temp_dir.path().join("rootfs").display().to_string(),
			root_readonly: true,
		};

		let (sender, mut receiver) = mpsc::channel(32);
		let code = executor.run(&params, sender).await.unwrap();
		assert_eq!(code, Some(3));

		let mut stdout = vec![];
		let mut stderr = vec![];
		let mut exit = None;
		while let Some(evt) = receiver.recv().await {
			assert_eq!(evt.topic, "testbox-fake");
			match evt.body {
				EventBody::Output { channel: 1, val } => stdout.push(val),
				EventBody::Output { channel: 2, val } => stderr.push(val),
				EventBody::ExitCode(code) => exit = code,
				other => panic!("unexpected event {other:?}"),
			}
		}
		assert_eq!(exit, Some(3));
		assert_eq!(stderr, vec!["err line"]);
		assert_eq!(stdout.len(), 1);
		assert!(stdout[0].starts_with("out:--log="), "{}", stdout[0]);
		assert!(stdout[0].ends_with(" testbox-fake"), "{}", stdout[0]);

		// The bundle is cleaned up afterwards.
		assert!(!temp_dir.path().join("run/testbox-fake").exists());
	}

	#[tokio::test]
	async fn undecodable_output_keeps_the_exit_code() {
		let temp_dir = TempDir::new().unwrap();
		let executor = Executor {
			runtime: scripted_runtime(temp_dir.path(), "printf 'caf\\351 ok\\r\\n'\nprintf 'tail'\nexit 0\n"),
			ersatz_dir: temp_dir.path().join("run"),
			log_file: temp_dir.path().join("logs/runtime.log"),
		};
		let params = params_for("testbox-latin1", temp_dir.path());

		let (sender, mut receiver) = mpsc::channel(32);
		let code = executor.run(&params, sender).await.unwrap();
		assert_eq!(code, Some(0));

		let mut stdout = vec![];
		while let Some(evt) = receiver.recv().await {
			if let EventBody::Output { channel: 1, val } = evt.body {
				stdout.push(val);
			}
		}
		assert_eq!(stdout, vec!["caf\u{FFFD} ok".to_string(), "tail".to_string()]);
	}

	#[tokio::test]
	async fn missing_runtime_is_a_setup_error() {
		let temp_dir = TempDir::new().unwrap();
		let executor = Executor {
			runtime: temp_dir.path().join("no-such-runtime"),
			ersatz_dir: temp_dir.path().join("run"),
			log_file: temp_dir.path().join("log"),
		};
		let params = ContainerParams {
			ident: "testbox-missing".into(),
			command: vec!["true".into()],
			cwd: "/".into(),
			identity: ExecutionIdentity::ROOT,
			mounts: IndexMap::new(),
			environment: IndexMap::new(),
			root_path: "/nonexistent".into(),
			root_readonly: true,
		};
		let (sender, _receiver) = mpsc::channel(32);
		let err = executor.run(&params, sender).await.unwrap_err();
		assert!(matches!(err, Error::SystemSetupError { .. }), "{err}");
	}
}
