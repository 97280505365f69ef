use crate::validate::Problem;

type ErrorCause = Box<dyn ::std::error::Error + Send + Sync>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("invalid base reference \"{value}\": {reason}")]
	InvalidBaseRef { value: String, reason: String },

	#[error("invalid working directory \"{value}\": {reason}")]
	InvalidWorkDir { value: String, reason: String },

	#[error("invalid execution identity \"{value}\": {cause}")]
	InvalidIdentity { value: String, cause: ErrorCause },

	#[error("recipe is incomplete: no {missing} was declared")]
	IncompleteRecipe { missing: String },

	#[error("recipe is invalid: {}", join_problems(.problems))]
	InvalidRecipe { problems: Vec<Problem> },
}

fn join_problems(problems: &[Problem]) -> String {
	(problems.iter())
		.map(ToString::to_string)
		.collect::<Vec<_>>()
		.join("; ")
}
