//! Console output for testbox.
//!
//! All output goes through a [Logger], which hands messages to a renderer thread.
//! The renderer interleaves plain log lines with a progress bar for the build stages,
//! so container output never tears the bar.

mod errors;
mod macros;
mod render;

use std::sync::OnceLock;

use crossbeam_channel::Sender;
use tokio::sync::oneshot;

pub use crate::errors::{Error, Result};
pub use crate::macros::log_global;
use crate::render::TerminalRenderer;

static GLOBAL_LOGGER: OnceLock<Logger> = OnceLock::new();

#[derive(Clone)]
pub struct Logger {
	channel: Sender<Message>,
}

#[derive(Debug)]
pub(crate) enum Message {
	Log(String),
	SetStage(String),
	SetStagePosition(u64),
	SetStageMax(u64),
	FinishStages,
	Close(oneshot::Sender<()>),
}

impl Logger {
	/// Creates a logger rendering to this process's terminal.
	pub fn new_local() -> Self {
		let (sender, receiver) = crossbeam_channel::unbounded();
		TerminalRenderer::start(receiver);
		Self { channel: sender }
	}

	pub fn set_global(logger: Logger) -> Result<()> {
		GLOBAL_LOGGER
			.set(logger)
			.map_err(|_| Error::GlobalAlreadySet)
	}

	pub fn get_global() -> Option<&'static Logger> {
		GLOBAL_LOGGER.get()
	}

	pub fn log(&self, message: impl Into<String>) -> Result<()> {
		self.send(Message::Log(message.into()))
	}

	/// Shows `message` next to the stage progress bar.
	pub fn set_stage(&self, message: impl Into<String>) -> Result<()> {
		self.send(Message::SetStage(message.into()))
	}

	pub fn set_stage_position(&self, position: u64) -> Result<()> {
		self.send(Message::SetStagePosition(position))
	}

	pub fn set_stage_max(&self, max: u64) -> Result<()> {
		self.send(Message::SetStageMax(max))
	}

	/// Removes the stage progress bar.
	pub fn finish_stages(&self) -> Result<()> {
		self.send(Message::FinishStages)
	}

	/// Waits until every message sent before this call has been rendered,
	/// then stops the renderer.
	pub async fn close(&self) -> Result<()> {
		let (notify, done) = oneshot::channel();
		self.send(Message::Close(notify))?;
		done.await.map_err(|_| Error::ChannelInternal)
	}

	fn send(&self, message: Message) -> Result<()> {
		self.channel
			.send(message)
			.map_err(|_| Error::ChannelInternal)
	}
}
