use async_trait::async_trait;
use tokio::sync::mpsc::Sender;

use crate::context::Context;
use crate::execute::Executor;
use crate::{ContainerParams, Event, Result};

/// Something that can run a container to completion.
///
/// Implementations send the container's output lines as [Event]s while it runs,
/// and return its exit code. `None` means the container produced no exit code.
#[async_trait]
pub trait ContainerRunner: Send + Sync {
	async fn run(&self, params: &ContainerParams, outbox: Sender<Event>) -> Result<Option<i32>>;
}

/// Runs containers through an OCI runtime binary.
pub struct RuntimeRunner {
	executor: Executor,
}

impl RuntimeRunner {
	pub fn new(context: &Context) -> Self {
		RuntimeRunner {
			executor: Executor {
				runtime: context.runtime.clone(),
				ersatz_dir: context.ersatz_dir.clone(),
				log_file: context.log_dir.join("runtime.log"),
			},
		}
	}
}

#[async_trait]
impl ContainerRunner for RuntimeRunner {
	async fn run(&self, params: &ContainerParams, outbox: Sender<Event>) -> Result<Option<i32>> {
		self.executor.run(params, outbox).await
	}
}

/// A container name that won't collide with other builds or runs on this host.
pub fn container_ident(purpose: &str) -> String {
	format!("testbox-{purpose}-{:016x}", rand::random::<u64>())
}
