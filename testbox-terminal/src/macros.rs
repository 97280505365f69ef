use crate::Logger;

/// Hands a finished line to the process-wide [`Logger`].
///
/// This is what [`log!`] and [`logln!`] expand to.
///
/// # Panics
///
/// When [`Logger::set_global`] was never called, or [`Logger::close`] already ran.
pub fn log_global(message: impl Into<String>) {
	let Some(logger) = Logger::get_global() else {
		panic!("testbox output was written before Logger::set_global");
	};
	if let Err(e) = logger.log(message) {
		panic!("testbox output was written after the logger closed: {e}");
	}
}

/// Writes to the global logger without adding a newline.
///
/// Useful for relaying container output that arrives in pieces,
/// or for printing rendered files that end with their own newline.
///
/// ```
/// use testbox_terminal::{log, Logger};
///
/// Logger::set_global(Logger::new_local()).unwrap();
///
/// let containerfile = "FROM python:3.9\nWORKDIR /rbac\n";
/// log!("{containerfile}");
/// log!("[{}] ", "install 1/2");
/// log!("pip install --upgrade pip\n");
/// ```
#[macro_export]
macro_rules! log {
	($($arg:tt)+) => { $crate::log_global(format!($($arg)+)) };
}

/// Writes one line to the global logger.
///
/// Takes [`format!`] arguments; with none, writes an empty line.
///
/// ```
/// use testbox_terminal::{logln, Logger};
///
/// Logger::set_global(Logger::new_local()).unwrap();
///
/// let digest = "sha256:3f1c";
/// logln!("recipe digest: {digest}");
/// logln!();
/// logln!("built {} ({} installation steps)", ".testbox/image", 2);
/// ```
#[macro_export]
macro_rules! logln {
	() => { $crate::log_global("\n") };
	($($arg:tt)+) => { $crate::log_global(format!("{}\n", format_args!($($arg)+))) };
}
