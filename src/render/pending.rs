//! Process-local registry of in-flight renders.
//!
//! At most one outbound job exists per fingerprint; every concurrent request
//! for that fingerprint shares the leader's result. Cross-process dedup is
//! deliberately not attempted: workers are idempotent per key.

// std
use std::collections::HashMap;
// crates.io
use tokio::{
	sync::{Mutex, oneshot},
	task::JoinHandle,
	time,
};
use uuid::Uuid;
// self
use crate::{
	_prelude::*,
	bus::RenderReply,
	error::Code,
	snapshot::{Snapshot, SnapshotKey},
	store::SnapshotStore,
};

/// Failure delivered to render waiters.
#[derive(Clone, Debug)]
pub struct RenderFailure {
	/// Wire error kind.
	pub code: Code,
	/// Failure detail.
	pub message: String,
}
impl From<RenderFailure> for Error {
	fn from(value: RenderFailure) -> Self {
		Self::Render { code: value.code, message: value.message }
	}
}

/// Result shared between all waiters of one fingerprint.
pub type RenderOutcome = std::result::Result<Arc<Snapshot>, RenderFailure>;

/// Identity of a render request for deduplication purposes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Fingerprint {
	/// Snapshot identity being rendered.
	pub key: SnapshotKey,
	/// Callback target; requests with different callbacks do not share a job.
	pub callback_url: Option<String>,
}

/// Outcome of [`PendingRenders::begin_or_join`].
pub enum Ticket {
	/// Caller owns the fingerprint and must publish the job.
	Leader {
		/// Correlation id to stamp on the outbound job.
		correlation_id: String,
		/// Completion signal; absent for `no_wait` callers.
		waiter: Option<oneshot::Receiver<RenderOutcome>>,
	},
	/// A job is already in flight; share its completion.
	Joined {
		/// Completion signal; absent for `no_wait` callers.
		waiter: Option<oneshot::Receiver<RenderOutcome>>,
	},
}

struct Pending {
	fingerprint: Fingerprint,
	published_at: Instant,
	waiters: Vec<oneshot::Sender<RenderOutcome>>,
}

#[derive(Default)]
struct Inner {
	by_correlation: HashMap<String, Fingerprint>,
	by_fingerprint: HashMap<Fingerprint, (String, Pending)>,
}

/// Registry of pending renders, shared across request tasks and the reply pump.
#[derive(Clone)]
pub struct PendingRenders {
	store: Arc<dyn SnapshotStore>,
	maxage: Duration,
	s_maxage: Duration,
	worker_timeout: Duration,
	inner: Arc<Mutex<Inner>>,
}
impl PendingRenders {
	/// Build a registry persisting through the given store with the
	/// configured freshness windows and worker deadline.
	pub fn new(
		store: Arc<dyn SnapshotStore>,
		maxage: Duration,
		s_maxage: Duration,
		worker_timeout: Duration,
	) -> Self {
		Self {
			store,
			maxage,
			s_maxage,
			worker_timeout,
			inner: Arc::new(Mutex::new(Inner::default())),
		}
	}

	/// Elect a leader for the fingerprint or join the in-flight job.
	pub async fn begin_or_join(&self, fingerprint: Fingerprint, no_wait: bool) -> Ticket {
		let mut inner = self.inner.lock().await;

		if let Some((_, pending)) = inner.by_fingerprint.get_mut(&fingerprint) {
			let waiter = (!no_wait).then(|| {
				let (tx, rx) = oneshot::channel();

				pending.waiters.push(tx);

				rx
			});

			return Ticket::Joined { waiter };
		}

		let correlation_id = Uuid::new_v4().to_string();
		let mut pending =
			Pending { fingerprint: fingerprint.clone(), published_at: Instant::now(), waiters: Vec::new() };
		let waiter = (!no_wait).then(|| {
			let (tx, rx) = oneshot::channel();

			pending.waiters.push(tx);

			rx
		});

		inner.by_correlation.insert(correlation_id.clone(), fingerprint.clone());
		inner.by_fingerprint.insert(fingerprint, (correlation_id.clone(), pending));

		Ticket::Leader { correlation_id, waiter }
	}

	/// Attach an extra observer to an in-flight fingerprint, if still pending.
	pub async fn watch(&self, fingerprint: &Fingerprint) -> Option<oneshot::Receiver<RenderOutcome>> {
		let mut inner = self.inner.lock().await;
		let (_, pending) = inner.by_fingerprint.get_mut(fingerprint)?;
		let (tx, rx) = oneshot::channel();

		pending.waiters.push(tx);

		Some(rx)
	}

	/// Number of fingerprints currently in flight.
	pub async fn in_flight(&self) -> usize {
		self.inner.lock().await.by_fingerprint.len()
	}

	/// Apply a worker reply: persist the snapshot and wake all waiters.
	///
	/// Replies whose correlation id is unknown (already completed, swept, or
	/// foreign) are discarded without touching the store.
	pub async fn complete(&self, reply: RenderReply) -> Result<()> {
		// Claim the correlation id first so replays stop here, but leave the
		// fingerprint in flight until persistence finishes: a request landing
		// mid-write must join this render, not lead a duplicate.
		let fingerprint = {
			let mut inner = self.inner.lock().await;

			inner.by_correlation.remove(&reply.correlation_id)
		};
		let Some(fingerprint) = fingerprint else {
			tracing::debug!(
				correlation_id = %reply.correlation_id,
				"discarding duplicate or unknown reply"
			);

			return Ok(());
		};
		let outcome = if reply.ok {
			match self.persist(&fingerprint.key, &reply).await {
				Ok(snapshot) => Ok(Arc::new(snapshot)),
				Err(err) => {
					tracing::error!(
						key = %fingerprint.key,
						error = %err,
						"failed to persist rendered snapshot"
					);

					Err(RenderFailure {
						code: Code::ServerInternalError,
						message: "Failed to persist the rendered snapshot.".into(),
					})
				},
			}
		} else {
			let code = reply
				.error_kind
				.as_deref()
				.map(Code::parse)
				.unwrap_or(Code::ServerRenderError);

			Err(RenderFailure {
				code,
				message: reply
					.error_message
					.unwrap_or_else(|| "Worker reported a render failure.".into()),
			})
		};
		let pending = {
			let mut inner = self.inner.lock().await;

			inner.by_fingerprint.remove(&fingerprint)
		};

		if let Some((_, pending)) = pending {
			self.settle(pending, outcome);
		}

		Ok(())
	}

	/// Fail every waiter of a correlation id without touching the store.
	pub async fn fail(&self, correlation_id: &str, code: Code, message: impl Into<String>) {
		if let Some(pending) = self.take_by_correlation(correlation_id).await {
			self.settle(pending, Err(RenderFailure { code, message: message.into() }));
		}
	}

	/// Sweep in-flight entries older than the worker timeout.
	pub async fn sweep_expired(&self, now: Instant) -> usize {
		let expired: Vec<String> = {
			let inner = self.inner.lock().await;

			inner
				.by_fingerprint
				.values()
				.filter(|(_, pending)| now >= pending.published_at + self.worker_timeout)
				.map(|(correlation_id, _)| correlation_id.clone())
				.collect()
		};
		let count = expired.len();

		for correlation_id in expired {
			tracing::warn!(%correlation_id, "render timed out waiting for a worker reply");
			self.fail(
				&correlation_id,
				Code::ServerWorkerTimeout,
				"No worker reply within the timeout window.",
			)
			.await;
		}

		count
	}

	/// Run the timeout sweeper until aborted.
	pub fn spawn_sweeper(&self) -> JoinHandle<()> {
		let registry = self.clone();
		let period = (registry.worker_timeout / 4).max(Duration::from_secs(1));

		tokio::spawn(async move {
			let mut ticker = time::interval(period);

			loop {
				ticker.tick().await;
				registry.sweep_expired(Instant::now()).await;
			}
		})
	}

	async fn take_by_correlation(&self, correlation_id: &str) -> Option<Pending> {
		let mut inner = self.inner.lock().await;
		let fingerprint = inner.by_correlation.remove(correlation_id)?;
		let (_, pending) = inner.by_fingerprint.remove(&fingerprint)?;

		Some(pending)
	}

	async fn persist(&self, key: &SnapshotKey, reply: &RenderReply) -> Result<Snapshot> {
		if let Some(page) = reply.snapshot.clone() {
			let snapshot = Snapshot::from_page(page, Utc::now(), self.maxage, self.s_maxage);

			self.store.put(key, snapshot.clone()).await?;

			return Ok(snapshot);
		}

		// Oversized payload: the worker stored the snapshot itself and the
		// reply only references the key.
		let key = reply.key.as_ref().unwrap_or(key);

		self.store
			.get(key)
			.await?
			.ok_or_else(|| Error::Store(format!("Worker-stored snapshot missing for {key}.")))
	}

	fn settle(&self, pending: Pending, outcome: RenderOutcome) {
		if pending.waiters.is_empty()
			&& let Err(failure) = &outcome
		{
			tracing::warn!(
				key = %pending.fingerprint.key,
				code = %failure.code,
				"detached render failed: {}",
				failure.message
			);
		}

		for waiter in pending.waiters {
			let _ = waiter.send(outcome.clone());
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		snapshot::{DeviceType, RenderType, RenderedPage},
		store::memory::MemoryStore,
	};

	fn registry(store: Arc<MemoryStore>) -> PendingRenders {
		PendingRenders::new(
			store,
			Duration::from_secs(180),
			Duration::from_secs(86_400),
			Duration::from_secs(30),
		)
	}

	fn fingerprint(path: &str) -> Fingerprint {
		Fingerprint {
			key: SnapshotKey::new("https://ex.com", path, DeviceType::Desktop, RenderType::Html),
			callback_url: None,
		}
	}

	fn ok_reply(correlation_id: &str, body: &str) -> RenderReply {
		RenderReply {
			correlation_id: correlation_id.into(),
			ok: true,
			snapshot: Some(RenderedPage {
				status: 200,
				content: Some(body.into()),
				..Default::default()
			}),
			key: None,
			error_kind: None,
			error_message: None,
		}
	}

	#[tokio::test]
	async fn the_first_caller_leads_and_later_callers_join() {
		let store = Arc::new(MemoryStore::new());
		let registry = registry(store.clone());
		let Ticket::Leader { correlation_id, waiter } =
			registry.begin_or_join(fingerprint("/a"), false).await
		else {
			panic!("expected leadership");
		};
		let Ticket::Joined { waiter: joined } =
			registry.begin_or_join(fingerprint("/a"), false).await
		else {
			panic!("expected join");
		};

		registry.complete(ok_reply(&correlation_id, "<h1>A</h1>")).await.expect("complete");

		let first = waiter.expect("waiter").await.expect("settled").expect("render ok");
		let second = joined.expect("waiter").await.expect("settled").expect("render ok");

		assert_eq!(first.page.content, second.page.content);
		assert_eq!(store.put_count(), 1);
		assert_eq!(registry.in_flight().await, 0);
	}

	#[tokio::test]
	async fn duplicate_replies_are_discarded_idempotently() {
		let store = Arc::new(MemoryStore::new());
		let registry = registry(store.clone());
		let Ticket::Leader { correlation_id, waiter } =
			registry.begin_or_join(fingerprint("/a"), false).await
		else {
			panic!("expected leadership");
		};

		registry.complete(ok_reply(&correlation_id, "<h1>A</h1>")).await.expect("complete");
		registry.complete(ok_reply(&correlation_id, "<h1>B</h1>")).await.expect("complete");

		let snapshot = waiter.expect("waiter").await.expect("settled").expect("render ok");

		assert_eq!(snapshot.page.content.as_deref(), Some("<h1>A</h1>"));
		// The replay must not have produced a second write.
		assert_eq!(store.put_count(), 1);
	}

	#[tokio::test]
	async fn failed_replies_propagate_the_worker_error_kind() {
		let store = Arc::new(MemoryStore::new());
		let registry = registry(store.clone());
		let Ticket::Leader { correlation_id, waiter } =
			registry.begin_or_join(fingerprint("/a"), false).await
		else {
			panic!("expected leadership");
		};

		registry
			.complete(RenderReply {
				correlation_id,
				ok: false,
				snapshot: None,
				key: None,
				error_kind: Some("SERVER_NET_ERROR".into()),
				error_message: Some("upstream unreachable".into()),
			})
			.await
			.expect("complete");

		let failure = waiter.expect("waiter").await.expect("settled").expect_err("failure");

		assert_eq!(failure.code, Code::ServerNetError);
		assert_eq!(store.put_count(), 0);
	}

	#[tokio::test]
	async fn sweeping_expires_stale_entries_and_frees_the_fingerprint() {
		let store = Arc::new(MemoryStore::new());
		let registry = registry(store.clone());
		let Ticket::Leader { waiter, .. } = registry.begin_or_join(fingerprint("/a"), false).await
		else {
			panic!("expected leadership");
		};
		let swept = registry.sweep_expired(Instant::now() + Duration::from_secs(31)).await;

		assert_eq!(swept, 1);

		let failure = waiter.expect("waiter").await.expect("settled").expect_err("timeout");

		assert_eq!(failure.code, Code::ServerWorkerTimeout);

		// The fingerprint is free again: a new render elects a new leader.
		assert!(matches!(
			registry.begin_or_join(fingerprint("/a"), false).await,
			Ticket::Leader { .. }
		));
	}

	#[tokio::test]
	async fn oversized_replies_reload_the_worker_stored_snapshot() {
		let store = Arc::new(MemoryStore::new());
		let registry = registry(store.clone());
		let fp = fingerprint("/big");
		let Ticket::Leader { correlation_id, waiter } =
			registry.begin_or_join(fp.clone(), false).await
		else {
			panic!("expected leadership");
		};
		// Worker persisted the snapshot itself and replies with the key only.
		let snapshot = Snapshot::from_page(
			RenderedPage { status: 200, content: Some("huge".into()), ..Default::default() },
			Utc::now(),
			Duration::from_secs(180),
			Duration::from_secs(86_400),
		);

		store.put(&fp.key, snapshot).await.expect("worker put");
		registry
			.complete(RenderReply {
				correlation_id,
				ok: true,
				snapshot: None,
				key: Some(fp.key.clone()),
				error_kind: None,
				error_message: None,
			})
			.await
			.expect("complete");

		let resolved = waiter.expect("waiter").await.expect("settled").expect("render ok");

		assert_eq!(resolved.page.content.as_deref(), Some("huge"));
	}
}
