use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde_with::{DeserializeFromStr, SerializeDisplay};

use crate::Error;

/// Reference to the image a build starts from.
///
/// The textual form is `[registry/]repository[:tag][@algorithm:hex]`,
/// the same shape container registries and tools accept.
/// We only check the syntax here; whether the reference actually resolves
/// is up to the registry at build time.
#[derive(Clone, Debug, PartialEq, Eq, Hash, SerializeDisplay, DeserializeFromStr)]
pub struct BaseRef {
	pub registry: Option<String>,
	pub repository: String,
	pub tag: Option<String>,
	pub digest: Option<String>,
}

impl BaseRef {
	/// A reference is pinned when it names content by digest.
	/// Tags can move; digests can't.
	pub fn is_pinned(&self) -> bool {
		self.digest.is_some()
	}
}

fn invalid(value: &str, reason: impl Into<String>) -> Error {
	Error::InvalidBaseRef {
		value: value.to_owned(),
		reason: reason.into(),
	}
}

fn is_registry_host(component: &str) -> bool {
	component.contains('.') || component.contains(':') || component == "localhost"
}

fn check_digest(value: &str, digest: &str) -> Result<(), Error> {
	let Some((algorithm, hex)) = digest.split_once(':') else {
		return Err(invalid(value, "digest must have the form 'algorithm:hex'"));
	};
	if algorithm.is_empty()
		|| !(algorithm.chars()).all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "+._-".contains(c))
	{
		return Err(invalid(value, "digest algorithm is malformed"));
	}
	if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()) {
		return Err(invalid(value, "digest must be lowercase hex"));
	}
	if algorithm == "sha256" && hex.len() != 64 {
		return Err(invalid(value, "sha256 digests are 64 hex characters"));
	}
	Ok(())
}

fn check_tag(value: &str, tag: &str) -> Result<(), Error> {
	if tag.is_empty() {
		return Err(invalid(value, "tag is empty"));
	}
	if tag.len() > 128 {
		return Err(invalid(value, "tag is longer than 128 characters"));
	}
	if tag.starts_with(['.', '-']) || !tag.chars().all(|c| c.is_ascii_alphanumeric() || "_.-".contains(c)) {
		return Err(invalid(value, "tag contains invalid characters"));
	}
	Ok(())
}

fn check_repository(value: &str, repository: &str) -> Result<(), Error> {
	if repository.is_empty() {
		return Err(invalid(value, "repository is empty"));
	}
	for component in repository.split('/') {
		if component.is_empty() {
			return Err(invalid(value, "repository has an empty path component"));
		}
		if !(component.chars()).all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "._-".contains(c)) {
			return Err(invalid(
				value,
				format!("repository component '{component}' must be lowercase alphanumerics and separators"),
			));
		}
	}
	Ok(())
}

impl FromStr for BaseRef {
	type Err = Error;

	fn from_str(value: &str) -> Result<Self, Self::Err> {
		let (name_and_tag, digest) = match value.rsplit_once('@') {
			Some((rest, digest)) => {
				check_digest(value, digest)?;
				(rest, Some(digest.to_owned()))
			}
			None => (value, None),
		};

		// A colon after the last slash separates the tag.
		// Colons before it belong to a registry port.
		let last_slash = name_and_tag.rfind('/').map_or(0, |i| i + 1);
		let (name, tag) = match name_and_tag[last_slash..].rfind(':') {
			Some(i) => {
				let split = last_slash + i;
				let tag = &name_and_tag[split + 1..];
				check_tag(value, tag)?;
				(&name_and_tag[..split], Some(tag.to_owned()))
			}
			None => (name_and_tag, None),
		};

		let (registry, repository) = match name.split_once('/') {
			Some((first, rest)) if is_registry_host(first) => (Some(first.to_owned()), rest),
			_ => (None, name),
		};
		check_repository(value, repository)?;

		Ok(BaseRef {
			registry,
			repository: repository.to_owned(),
			tag,
			digest,
		})
	}
}

impl Display for BaseRef {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		if let Some(registry) = &self.registry {
			write!(f, "{registry}/")?;
		}
		write!(f, "{}", self.repository)?;
		if let Some(tag) = &self.tag {
			write!(f, ":{tag}")?;
		}
		if let Some(digest) = &self.digest {
			write!(f, "@{digest}")?;
		}
		Ok(())
	}
}
