use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde_with::{DeserializeFromStr, SerializeDisplay};

use crate::Error;

/// The user and group that steps run as inside the container.
///
/// Written as `root`, `<uid>`, or `<uid>:<gid>`.
/// A bare uid implies the group with the same number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, SerializeDisplay, DeserializeFromStr)]
pub struct ExecutionIdentity {
	pub uid: u32,
	pub gid: u32,
}

impl ExecutionIdentity {
	pub const ROOT: ExecutionIdentity = ExecutionIdentity { uid: 0, gid: 0 };

	pub fn is_root(&self) -> bool {
		self.uid == 0
	}
}

impl Default for ExecutionIdentity {
	fn default() -> Self {
		Self::ROOT
	}
}

impl FromStr for ExecutionIdentity {
	type Err = Error;

	fn from_str(value: &str) -> Result<Self, Self::Err> {
		if value == "root" {
			return Ok(Self::ROOT);
		}
		let parse = |s: &str| {
			s.parse::<u32>().map_err(|e| Error::InvalidIdentity {
				value: value.to_owned(),
				cause: Box::new(e),
			})
		};
		match value.split_once(':') {
			Some((uid, gid)) => Ok(ExecutionIdentity {
				uid: parse(uid)?,
				gid: parse(gid)?,
			}),
			None => {
				let uid = parse(value)?;
				Ok(ExecutionIdentity { uid, gid: uid })
			}
		}
	}
}

impl Display for ExecutionIdentity {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match self {
			ExecutionIdentity { uid: 0, gid: 0 } => write!(f, "root"),
			ExecutionIdentity { uid, gid } if uid == gid => write!(f, "{uid}"),
			ExecutionIdentity { uid, gid } => write!(f, "{uid}:{gid}"),
		}
	}
}
