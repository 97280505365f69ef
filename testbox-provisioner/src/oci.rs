use serde_json::json;

use crate::{ContainerParams, Error, MountSpec, Result};

pub trait ToOCIMount {
	fn to_oci_mount(&self) -> serde_json::Value;
}

impl ToOCIMount for MountSpec {
	fn to_oci_mount(&self) -> serde_json::Value {
		json!({
			"destination": self.destination,
			"type": self.kind,
			"source": self.source,
			"options": self.options,
		})
	}
}

// Below are the defaults and templates for OCI container config,
// which is what "runc" and compatible runtimes read from a bundle's config.json.
//
// We use json values because that's what they are when they get sent to the subprocess.
// Per-container values get stacked on with JSON Patch.

fn oci_spec_default_caps() -> serde_json::Value {
	json!([
		"CAP_AUDIT_WRITE",
		"CAP_CHOWN",
		"CAP_DAC_OVERRIDE",
		"CAP_FOWNER",
		"CAP_FSETID",
		"CAP_KILL",
		"CAP_NET_BIND_SERVICE",
		"CAP_SETGID",
		"CAP_SETUID",
	])
}

// Values not included in this, but definitely needed, include:
//    "process":{"args": [...]}, "root":{"path": ...}
pub fn oci_spec_base() -> serde_json::Value {
	json!({
		"ociVersion": "1.0.0",
		"process": {
			"terminal": false,
			"user": {"uid": 0, "gid": 0},
			"env": [],
			"cwd": "/",
			"capabilities": {
				"bounding": oci_spec_default_caps(),
				"effective": oci_spec_default_caps(),
				"permitted": oci_spec_default_caps(),
			},
			"rlimits": [{
				"type": "RLIMIT_NOFILE",
				"hard": 1024,
				"soft": 1024,
			}],
			"noNewPrivileges": true
		},
		"root": {
			"path": "REPLACEME",
			"readonly": true,
		},
		"hostname": "testbox",
		"mounts": [
			{
				"destination": "/proc",
				"type": "proc",
				"source": "proc"
			},
			{
				"destination": "/dev",
				"type": "tmpfs",
				"source": "tmpfs",
				"options": ["nosuid", "strictatime", "mode=755", "size=65536k"]
			}
		],
		"linux": {
			// Rootless operation requires UID and GID mappings and a "user" ns;
			// those are added per container.
			// There is deliberately no "network" ns: installation steps need the host network.
			"namespaces": [
				{"type": "pid"},
				{"type": "ipc"},
				{"type": "uts"},
				{"type": "mount"},
			]
		}
	})
}

/// The user and group the current process runs as on the host.
#[derive(Clone, Copy, Debug)]
pub(crate) struct HostIds {
	pub uid: usize,
	pub gid: usize,
}

impl HostIds {
	pub fn current() -> Self {
		use syscalls::{syscall, Sysno};
		// Both syscalls are infallible on Linux; 0 is only a fallback.
		let uid = unsafe { syscall!(Sysno::getuid) }.unwrap_or(0);
		let gid = unsafe { syscall!(Sysno::getgid) }.unwrap_or(0);
		HostIds { uid, gid }
	}
}

fn apply(spec: &mut serde_json::Value, ops: serde_json::Value) -> Result<()> {
	let p: json_patch::Patch = serde_json::from_value(ops).map_err(|e| Error::Catchall {
		msg: "failed during executor internals: invalid config patch".to_owned(),
		cause: Box::new(e),
	})?;
	json_patch::patch(spec, &p).map_err(|e| Error::Catchall {
		msg: "failed during executor internals: couldn't patch OCI config".to_owned(),
		cause: Box::new(e),
	})
}

/// Assembles the full runtime config for one container.
pub(crate) fn runtime_config(task: &ContainerParams, host: HostIds) -> Result<serde_json::Value> {
	let mut spec = oci_spec_base();

	let env: Vec<String> = (task.environment.iter())
		.map(|(var, val)| format!("{var}={val}"))
		.collect();

	apply(
		&mut spec,
		json!([
			{ "op": "add", "path": "/process/args", "value": task.command },
			{ "op": "replace", "path": "/process/cwd", "value": task.cwd },
			{ "op": "replace", "path": "/process/env", "value": env },
			{ "op": "replace", "path": "/process/user", "value":
			   {"uid": task.identity.uid, "gid": task.identity.gid}},
			{ "op": "replace", "path": "/root/path", "value": task.root_path },
			{ "op": "replace", "path": "/root/readonly", "value": task.root_readonly },
			// Only the container identity is mapped, onto whoever we are on the host.
			{ "op": "add", "path": "/linux/uidMappings", "value":
			   [{"containerID": task.identity.uid, "hostID": host.uid, "size": 1}]},
			{ "op": "add", "path": "/linux/gidMappings", "value":
			   [{"containerID": task.identity.gid, "hostID": host.gid, "size": 1}]},
			{ "op": "add", "path": "/linux/namespaces/-", "value": {"type": "user"}},
		]),
	)?;

	for ms in task.mounts.values() {
		apply(
			&mut spec,
			json!([{ "op": "add", "path": "/mounts/-", "value": ms.to_oci_mount() }]),
		)?;
	}

	Ok(spec)
}

#[cfg(test)]
mod tests {
	use expect_test::expect;
	use indexmap::IndexMap;
	use testbox_api::identity::ExecutionIdentity;

	use super::*;

	#[test]
	fn runtime_config_for_install_step() {
		let params = ContainerParams {
			ident: "testbox-step-1".into(),
			command: vec!["pip".into(), "install".into(), "tox".into()],
			cwd: "/rbac".into(),
			identity: ExecutionIdentity { uid: 1001, gid: 0 },
			mounts: IndexMap::from([(
				"/tmp".to_string(),
				MountSpec::new_tmpfs("/tmp").unwrap(),
			)]),
			environment: IndexMap::from([("PIP_DEFAULT_TIMEOUT".to_string(), "100".to_string())]),
			root_path: "/var/tmp/staging/rootfs".into(),
			root_readonly: false,
		};
		let spec = runtime_config(&params, HostIds { uid: 1000, gid: 1000 }).unwrap();

		let expect = expect![[r#"
            {
              "args": [
                "pip",
                "install",
                "tox"
              ],
              "cwd": "/rbac",
              "env": [
                "PIP_DEFAULT_TIMEOUT=100"
              ],
              "user": {
                "uid": 1001,
                "gid": 0
              }
            }"#]];
		let process = json!({
			"args": spec["process"]["args"],
			"cwd": spec["process"]["cwd"],
			"env": spec["process"]["env"],
			"user": spec["process"]["user"],
		});
		expect.assert_eq(&serde_json::to_string_pretty(&process).unwrap());

		assert_eq!(spec["root"], json!({"path": "/var/tmp/staging/rootfs", "readonly": false}));
		assert_eq!(
			spec["linux"]["uidMappings"],
			json!([{"containerID": 1001, "hostID": 1000, "size": 1}])
		);
		assert_eq!(spec["linux"]["namespaces"].as_array().unwrap().len(), 5);
		let mounts = spec["mounts"].as_array().unwrap();
		assert_eq!(mounts.len(), 3);
		assert_eq!(mounts[2]["destination"], "/tmp");
		assert_eq!(mounts[2]["type"], "tmpfs");
	}
}
