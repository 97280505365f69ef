use testbox_provisioner::{Event, EventBody};
use testbox_terminal::{logln, Logger};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;

/// Forwards provisioner events to the terminal until every sender is dropped.
///
/// Container output is always shown. Exit codes of individual containers only at verbosity 1 and up.
pub fn start(verbosity: u8) -> (Sender<Event>, JoinHandle<()>) {
	let (sender, receiver) = mpsc::channel(64);
	let handle = tokio::spawn(relay(receiver, verbosity));
	(sender, handle)
}

async fn relay(mut receiver: Receiver<Event>, verbosity: u8) {
	let logger = Logger::get_global();
	while let Some(evt) = receiver.recv().await {
		match evt.body {
			EventBody::StageStarted {
				position,
				total,
				stage,
				description,
			} => {
				if let Some(logger) = logger {
					let _ = logger.set_stage_max(total);
					let _ = logger.set_stage_position(position);
					let _ = logger.set_stage(format!("{stage}: {description}"));
				}
				if verbosity >= 1 {
					logln!("[{position}/{total}] {stage}: {description}");
				}
			}
			EventBody::Output { val, .. } => {
				logln!("[container] {val}");
			}
			EventBody::ExitCode(code) => {
				if verbosity >= 1 {
					match code {
						Some(code) => logln!("[container] {} exited with code {code}", evt.topic),
						None => logln!("[container] {} exited without a code", evt.topic),
					}
				}
			}
		}
	}
	if let Some(logger) = logger {
		let _ = logger.finish_stages();
	}
}
