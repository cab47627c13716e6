//! Message-bus contracts between the gateway and the render worker pool.

pub mod memory;
pub mod redis;

// crates.io
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
// self
use crate::{
	_prelude::*,
	snapshot::{DeviceType, RenderType, RenderedPage, SnapshotKey},
};

/// Topic carrying render jobs; workers are competing consumers.
pub const JOB_TOPIC: &str = "render_jobs";

/// Build this process's exclusive reply topic name.
///
/// The random suffix keeps topics distinct across pid reuse, e.g. in
/// containers that always start the gateway as pid 1.
pub fn reply_topic() -> String {
	let suffix: u32 = rand::rng().random();

	format!("render_reply.{}-{suffix:08x}", std::process::id())
}

/// Job envelope published to the worker pool.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderJob {
	/// Correlates the eventual reply with the pending entry.
	pub correlation_id: String,
	/// Topic the worker must reply on.
	pub reply_topic: String,
	/// Absolute URL to render.
	pub url: String,
	/// Device class to emulate.
	pub device_type: DeviceType,
	/// Artifact kind to produce.
	#[serde(rename = "type")]
	pub render_type: RenderType,
	/// Callback the gateway notifies once the render settles.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub callback_url: Option<String>,
	/// Reply may omit the rendered body.
	#[serde(default)]
	pub meta_only: bool,
}

/// Reply envelope received from a worker.
///
/// `snapshot` carries the rendered artifact inline. When the payload would
/// exceed the bus size budget the worker persists the snapshot itself and
/// sets `key` instead.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderReply {
	/// Correlation id of the originating job.
	pub correlation_id: String,
	/// Whether the render succeeded.
	pub ok: bool,
	/// Rendered artifact, when it fits on the bus.
	#[serde(default)]
	pub snapshot: Option<RenderedPage>,
	/// Key of a worker-persisted snapshot.
	#[serde(default)]
	pub key: Option<SnapshotKey>,
	/// Wire error kind for failed renders.
	#[serde(default)]
	pub error_kind: Option<String>,
	/// Human-readable failure detail.
	#[serde(default)]
	pub error_message: Option<String>,
}

/// Outbound half of the bus; publishing is fire-and-forget with
/// at-least-once delivery from the bus itself.
#[async_trait]
pub trait WorkerBus: Send + Sync {
	/// Publish a job to [`JOB_TOPIC`].
	async fn publish(&self, job: &RenderJob) -> Result<()>;
}
