//! Redis pub/sub transport for render jobs and replies.

// crates.io
use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use tokio::task::JoinHandle;
// self
use crate::{
	_prelude::*,
	bus::{JOB_TOPIC, RenderJob, RenderReply, WorkerBus},
	render::pending::PendingRenders,
};

/// Publishing half of the bus over a multiplexed writer connection.
#[derive(Clone)]
pub struct RedisBus {
	writer: ConnectionManager,
}
impl RedisBus {
	/// Open the writer connection.
	pub async fn connect(writer_url: &str) -> Result<Self> {
		let client = redis::Client::open(writer_url)?;
		let writer = client.get_connection_manager().await?;

		Ok(Self { writer })
	}

	/// Subscribe the exclusive reply topic and pump decoded replies into the
	/// registry until the task is aborted.
	///
	/// Malformed payloads are logged and dropped; replies for unknown
	/// correlation ids are discarded idempotently by the registry.
	pub async fn spawn_reply_pump(
		reader_url: &str,
		topic: String,
		registry: PendingRenders,
	) -> Result<JoinHandle<()>> {
		let client = redis::Client::open(reader_url)?;
		let mut pubsub = client.get_async_pubsub().await?;

		pubsub.subscribe(&topic).await?;

		tracing::info!(topic, "reply subscription established");

		Ok(tokio::spawn(async move {
			let mut stream = pubsub.on_message();

			while let Some(message) = stream.next().await {
				let payload: String = match message.get_payload() {
					Ok(payload) => payload,
					Err(err) => {
						tracing::warn!(error = %err, "unreadable reply payload");
						continue;
					},
				};

				match serde_json::from_str::<RenderReply>(&payload) {
					Ok(reply) =>
						if let Err(err) = registry.complete(reply).await {
							tracing::error!(error = %err, "failed to apply render reply");
						},
					Err(err) => {
						tracing::warn!(error = %err, "malformed reply payload");
					},
				}
			}

			tracing::debug!(topic, "reply subscription closed");
		}))
	}
}
#[async_trait]
impl WorkerBus for RedisBus {
	async fn publish(&self, job: &RenderJob) -> Result<()> {
		let payload = serde_json::to_string(job)?;
		let mut writer = self.writer.clone();
		let _: () = redis::cmd("PUBLISH")
			.arg(JOB_TOPIC)
			.arg(payload)
			.query_async(&mut writer)
			.await?;

		tracing::debug!(
			correlation_id = %job.correlation_id,
			url = %job.url,
			"render job published"
		);

		Ok(())
	}
}
