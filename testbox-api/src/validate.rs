use std::fmt::{self, Display, Formatter};

use crate::recipe::{InstallStep, Invocation, Recipe};

/// One thing wrong (or suspicious) about a recipe, and where.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Problem {
	/// Dotted location within the recipe, e.g. `install.1.pip.version`.
	pub location: String,
	pub message: String,
}

impl Display for Problem {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		write!(f, "{}: {}", self.location, self.message)
	}
}

#[derive(Debug, Default)]
pub struct ValidationReport {
	pub errors: Vec<Problem>,
	pub warnings: Vec<Problem>,
}

impl ValidationReport {
	pub fn is_ok(&self) -> bool {
		self.errors.is_empty()
	}

	fn error(&mut self, location: impl Into<String>, message: impl Into<String>) {
		self.errors.push(Problem {
			location: location.into(),
			message: message.into(),
		});
	}

	fn warn(&mut self, location: impl Into<String>, message: impl Into<String>) {
		self.warnings.push(Problem {
			location: location.into(),
			message: message.into(),
		});
	}
}

impl Recipe {
	/// Checks everything that can be checked without touching a registry or the host.
	/// All problems are collected; nothing stops at the first one.
	pub fn validate(&self) -> ValidationReport {
		let mut report = ValidationReport::default();

		if !self.base.is_pinned() {
			report.warn(
				"base",
				format!("'{}' is not pinned by digest; the tag may move between builds", self.base),
			);
		}

		for name in self.environment.keys() {
			if name.is_empty() || name.contains('=') {
				report.error(format!("environment.{name}"), "variable names must be non-empty and contain no '='");
			}
		}

		for (n, step) in self.install.iter().enumerate() {
			match step {
				InstallStep::Exec(a) if a.command.is_empty() => {
					report.error(format!("install.{n}.exec.command"), "command is empty");
				}
				InstallStep::Shell(a) if a.script.trim().is_empty() => {
					report.error(format!("install.{n}.shell.script"), "script is empty");
				}
				InstallStep::Pip(p) if p.package.trim().is_empty() => {
					report.error(format!("install.{n}.pip.package"), "package name is empty");
				}
				InstallStep::Pip(p) if p.version.is_none() => {
					let message = format!("'{}' is installed without a version pin", p.package);
					if self.strict_pins {
						report.error(format!("install.{n}.pip.version"), message);
					} else {
						report.warn(format!("install.{n}.pip.version"), message);
					}
				}
				_ => {}
			}
		}

		match &self.command {
			Invocation::Exec(a) if a.command.is_empty() => {
				report.error("command.exec.command", "default command is empty");
			}
			Invocation::Shell(a) if a.script.trim().is_empty() => {
				report.error("command.shell.script", "default command is empty");
			}
			_ => {}
		}

		report
	}
}
