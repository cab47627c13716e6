//! Callback notification with bounded retries.

// crates.io
use reqwest::Client;
use serde::Serialize;
use tokio::time;
// self
use crate::{_prelude::*, snapshot::SnapshotKey};

/// Retry configuration for callback POSTs.
#[derive(Clone, Debug)]
pub struct CallbackPolicy {
	/// Retries performed after the initial attempt.
	pub max_retries: u32,
	/// Timeout applied to each individual POST.
	pub attempt_timeout: Duration,
	/// Delay before the first retry.
	pub initial_backoff: Duration,
	/// Multiplier applied to the backoff between retries.
	pub backoff_factor: u32,
}
impl CallbackPolicy {
	/// Backoff before retry `attempt` (0-based): 1 s, 4 s, 16 s with defaults.
	pub fn compute_backoff(&self, attempt: u32) -> Duration {
		self.initial_backoff * self.backoff_factor.pow(attempt.min(8))
	}
}
impl Default for CallbackPolicy {
	fn default() -> Self {
		Self {
			max_retries: 3,
			attempt_timeout: Duration::from_secs(10),
			initial_backoff: Duration::from_secs(1),
			backoff_factor: 4,
		}
	}
}

/// Body POSTed to the caller-provided callback URL once a render settles.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
	/// Whether the render succeeded.
	pub ok: bool,
	/// Snapshot identity the notification refers to.
	pub key: SnapshotKey,
	/// Wire error kind for failed renders.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error_kind: Option<String>,
}

/// Delivers callback notifications; failures never affect the primary response.
#[derive(Clone)]
pub struct CallbackDispatcher {
	client: Client,
	policy: CallbackPolicy,
}
impl CallbackDispatcher {
	/// Build a dispatcher with the default policy.
	pub fn new() -> Result<Self> {
		let client = Client::builder()
			.user_agent(format!("kasha/{}", env!("CARGO_PKG_VERSION")))
			.connect_timeout(Duration::from_secs(5))
			.build()?;

		Ok(Self { client, policy: CallbackPolicy::default() })
	}

	/// Build a dispatcher with an explicit policy (primarily for tests).
	pub fn with_policy(client: Client, policy: CallbackPolicy) -> Self {
		Self { client, policy }
	}

	/// POST the payload, retrying on the fixed backoff schedule.
	///
	/// Exhausted retries are logged; this function never errors.
	pub async fn notify(&self, callback_url: &str, payload: CallbackPayload) {
		let mut attempt = 0u32;

		loop {
			match self.attempt(callback_url, &payload).await {
				Ok(()) => {
					tracing::debug!(callback_url, attempt, "callback delivered");

					return;
				},
				Err(err) => {
					if attempt >= self.policy.max_retries {
						tracing::warn!(
							callback_url,
							attempts = attempt + 1,
							error = %err,
							"callback abandoned after exhausting retries"
						);

						return;
					}

					let delay = self.policy.compute_backoff(attempt);

					tracing::debug!(callback_url, attempt, ?delay, error = %err, "callback retry scheduled");
					time::sleep(delay).await;

					attempt += 1;
				},
			}
		}
	}

	async fn attempt(&self, callback_url: &str, payload: &CallbackPayload) -> Result<()> {
		let response = self
			.client
			.post(callback_url)
			.timeout(self.policy.attempt_timeout)
			.json(payload)
			.send()
			.await?;

		response.error_for_status()?;

		Ok(())
	}
}
