use std::{env::args, thread, time::Duration};

use crossbeam_channel::Receiver;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::oneshot;

use crate::Message;

pub(crate) struct TerminalRenderer {
	multi_progress: Option<MultiProgress>,
	prompt: Option<ProgressBar>,
	stage_bar: Option<ProgressBar>,

	channel: Receiver<Message>,
}

impl TerminalRenderer {
	pub(crate) fn start(channel: Receiver<Message>) {
		thread::spawn(move || {
			let notify = Self {
				multi_progress: None,
				prompt: None,
				stage_bar: None,
				channel,
			}
			.run();
			// The renderer (and with it the receiver) is dropped by now,
			// so anyone woken here sees a closed channel.
			if let Some(notify) = notify {
				let _ = notify.send(());
			}
		});
	}

	#[inline]
	fn add_multiprogress(&mut self) {
		if self.multi_progress.is_some() {
			return;
		}

		let multi_progress = MultiProgress::new();

		let prompt = multi_progress.add(
			ProgressBar::new(1)
				.with_style(
					ProgressStyle::with_template("{prefix:.green} {msg}")
						.expect("invalid indicatif template"),
				)
				.with_prefix("$")
				.with_message(args().collect::<Vec<_>>().join(" ")),
		);
		prompt.tick();

		self.multi_progress = Some(multi_progress);
		self.prompt = Some(prompt);
	}

	#[inline]
	fn style() -> ProgressStyle {
		ProgressStyle::with_template("[{elapsed_precise}] [{bar:30.green}] {pos:>2}/{len:2} {msg}")
			.expect("invalid indicatif template")
			.progress_chars("##-")
	}

	fn stage_bar(&mut self) -> &ProgressBar {
		if self.stage_bar.is_none() {
			self.add_multiprogress();
			let multi_progress = self.multi_progress.as_ref().expect("multiprogress was just added");
			self.stage_bar = Some(multi_progress.add(ProgressBar::new(1).with_style(Self::style())));
		}
		self.stage_bar.as_ref().expect("stage bar was just added")
	}

	fn print(&self, message: &str) {
		match &self.multi_progress {
			Some(multi_progress) => multi_progress.suspend(|| print!("{message}")),
			None => print!("{message}"),
		}
	}

	fn finish_stages(&mut self) {
		if let Some(bar) = self.stage_bar.take() {
			bar.finish_and_clear();
		}
		if let Some(prompt) = self.prompt.take() {
			prompt.finish_and_clear();
		}
		self.multi_progress = None;
	}

	/// Renders until told to close or until every sender is gone.
	/// Returns the close notification, if there was one.
	fn run(mut self) -> Option<oneshot::Sender<()>> {
		loop {
			let timeout = Duration::from_secs(1);
			let message = match self.channel.recv_timeout(timeout) {
				Ok(message) => message,
				Err(err) => {
					if err.is_timeout() {
						// Redraw at least every second so elapsed time stays current.
						if let Some(bar) = &self.stage_bar {
							bar.tick();
						}
						continue;
					} else {
						debug_assert!(err.is_disconnected());
						self.finish_stages();
						return None;
					}
				}
			};

			match message {
				Message::Log(message) => self.print(&message),
				Message::SetStage(message) => self.stage_bar().set_message(message),
				Message::SetStageMax(max) => self.stage_bar().set_length(max),
				Message::SetStagePosition(position) => {
					let bar = self.stage_bar();
					if bar.position() != position {
						bar.set_position(position);
						bar.reset_elapsed();
					}
				}
				Message::FinishStages => self.finish_stages(),
				Message::Close(notify) => {
					self.finish_stages();
					return Some(notify);
				}
			}
		}
	}
}
