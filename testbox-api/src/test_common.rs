use expect_test::Expect;
use serde::{Deserialize, Serialize};

use crate::constants::PIP_DEFAULT_TIMEOUT;
use crate::recipe::{InstallStep, Invocation, Recipe, RecipeBuilder};

#[inline]
pub(crate) fn json_roundtrip<'a, T: Deserialize<'a> + Serialize>(input: &'a str) -> String {
	let object: T = serde_json::from_str(input).expect("deserialization shouldn't fail");
	serde_json::to_string_pretty(&object).expect("serialization shouldn't fail")
}

#[inline]
pub(crate) fn assert_eq_json_roundtrip<'a, T: Deserialize<'a> + Serialize>(expect: &'a Expect) {
	let actual = json_roundtrip::<T>(expect.data());
	expect.assert_eq(&actual);
}

/// The classic "pip, tox, copy, run tox" environment.
pub(crate) fn tox_recipe() -> Recipe {
	RecipeBuilder::new()
		.select_base("registry.access.redhat.com/ubi9/python-39:latest".parse().unwrap())
		.set_working_directory("/rbac".parse().unwrap())
		.set_execution_identity("root".parse().unwrap())
		.set_env("PIP_DEFAULT_TIMEOUT", PIP_DEFAULT_TIMEOUT)
		.run_installation_step(InstallStep::pip_upgrade("pip"))
		.run_installation_step(InstallStep::pip("tox"))
		.copy_source(".", vec![".tox/**".into()])
		.set_default_command(Invocation::exec(["tox"]))
		.finish()
		.unwrap()
}
