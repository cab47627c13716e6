//! Periodic removal of snapshots past their retention window.

// crates.io
use rand::Rng;
use tokio::{task::JoinHandle, time};
// self
use crate::{_prelude::*, config::CacheConfig, store::SnapshotStore};

/// Lease name shared by every gateway instance.
const LEASE_NAME: &str = "janitor";

/// Sweeps snapshots whose `updatedAt` fell behind `removeAfter`.
///
/// Only one instance sweeps at a time: each tick first takes a short lease in
/// the store, so a fleet of gateways does not duplicate the work.
#[derive(Clone)]
pub struct Janitor {
	store: Arc<dyn SnapshotStore>,
	interval: Duration,
	remove_after: Duration,
}
impl Janitor {
	/// Build a janitor from the cache windows.
	pub fn new(store: Arc<dyn SnapshotStore>, cache: &CacheConfig) -> Self {
		Self { store, interval: cache.janitor_interval(), remove_after: cache.remove_after() }
	}

	/// Run the sweep loop until aborted.
	pub fn spawn(self) -> JoinHandle<()> {
		tokio::spawn(async move {
			// Desynchronise instance start-up so leases are not contended in
			// lockstep.
			let jitter = rand::rng().random_range(0..self.interval.as_secs().max(1) / 10 + 1);

			time::sleep(Duration::from_secs(jitter)).await;

			let mut ticker = time::interval(self.interval);

			loop {
				ticker.tick().await;

				match self.sweep_once().await {
					Ok(removed) if removed > 0 => {
						tracing::info!(removed, "janitor removed expired snapshots");
					},
					Ok(_) => {},
					Err(err) => {
						tracing::warn!(error = %err, "janitor sweep failed");
					},
				}
			}
		})
	}

	/// Perform one leased sweep; returns the number of removed snapshots.
	pub async fn sweep_once(&self) -> Result<u64> {
		// The lease expires just before the next tick so the current leader
		// can renew without a gap another instance would win.
		let lease_ttl = self.interval.mul_f64(0.9).max(Duration::from_secs(1));

		if !self.store.try_lease(LEASE_NAME, lease_ttl).await? {
			tracing::debug!("janitor lease held elsewhere, skipping sweep");

			return Ok(0);
		}

		let cutoff = Utc::now() - TimeDelta::from_std(self.remove_after).unwrap_or_default();

		self.store.expire_before(cutoff).await
	}
}
