//! Embedded bus twin for tests and the `memory://` mode.

// crates.io
use async_trait::async_trait;
use tokio::sync::broadcast;
// self
use crate::{
	_prelude::*,
	bus::{RenderJob, WorkerBus},
};

/// In-process bus: published jobs fan out to test subscribers.
///
/// There is no worker pool behind it, so replies only arrive when a test (or
/// a co-located worker task) feeds them to the registry directly.
pub struct MemoryBus {
	jobs: broadcast::Sender<RenderJob>,
}
impl MemoryBus {
	/// Create a bus with a small fan-out buffer.
	pub fn new() -> Self {
		let (jobs, _) = broadcast::channel(64);

		Self { jobs }
	}

	/// Observe every published job.
	pub fn subscribe_jobs(&self) -> broadcast::Receiver<RenderJob> {
		self.jobs.subscribe()
	}
}
impl Default for MemoryBus {
	fn default() -> Self {
		Self::new()
	}
}
#[async_trait]
impl WorkerBus for MemoryBus {
	async fn publish(&self, job: &RenderJob) -> Result<()> {
		// Fire-and-forget; a missing subscriber is not an error.
		let _ = self.jobs.send(job.clone());

		Ok(())
	}
}
