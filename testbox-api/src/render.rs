//! Renders a recipe as a Containerfile, so the same environment can be produced
//! by a conventional image builder.

use std::fmt::Write;

use crate::recipe::{InstallStep, Invocation, Recipe, SHELL};

fn json_argv(argv: &[String]) -> String {
	serde_json::to_string(argv).expect("string arrays always serialize")
}

fn env_value(value: &str) -> String {
	if !value.is_empty() && value.chars().all(|c| c.is_ascii_alphanumeric() || "._-/:,".contains(c)) {
		value.to_owned()
	} else {
		serde_json::to_string(value).expect("strings always serialize")
	}
}

fn shell_or_exec(script: &str) -> String {
	if script.contains('\n') {
		json_argv(&[SHELL.to_owned(), "-c".to_owned(), script.to_owned()])
	} else {
		script.to_owned()
	}
}

pub fn render_containerfile(recipe: &Recipe) -> String {
	let mut out = String::new();
	// Writing to a String can't fail.
	let _ = writeln!(out, "FROM {}", recipe.base);
	for (name, value) in &recipe.environment {
		let _ = writeln!(out, "ENV {name}={}", env_value(value));
	}
	let _ = writeln!(out, "WORKDIR {}", recipe.workdir);
	let _ = writeln!(out, "USER {}", recipe.identity);
	for step in &recipe.install {
		let line = match step {
			InstallStep::Exec(a) => json_argv(&a.command),
			InstallStep::Shell(a) => shell_or_exec(&a.script),
			InstallStep::Pip(_) => step.describe(),
		};
		let _ = writeln!(out, "RUN {line}");
	}
	let _ = writeln!(out, "COPY {} {}", recipe.source.from.display(), recipe.workdir);
	let cmd = match &recipe.command {
		Invocation::Exec(a) => json_argv(&a.command),
		Invocation::Shell(a) => shell_or_exec(&a.script),
	};
	let _ = writeln!(out, "CMD {cmd}");
	out
}

/// The recipe's source exclusions in ignore-file form, one pattern per line.
pub fn render_ignore_file(recipe: &Recipe) -> String {
	recipe.source.exclude.iter().map(|p| format!("{p}\n")).collect()
}
