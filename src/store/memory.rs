//! Embedded in-memory store backend, used by tests and the `memory://` mode.

// std
use std::{
	collections::{BTreeSet, HashMap},
	ops::Bound,
	sync::atomic::{AtomicU64, Ordering},
};
// crates.io
use async_trait::async_trait;
use tokio::sync::Mutex;
// self
use crate::{
	_prelude::*,
	site::SiteConfig,
	snapshot::{Snapshot, SnapshotKey},
	store::{
		ScanItem, ScanPage, SiteConfigSource, SnapshotStore, parse_path_member, path_member,
		storage_id,
	},
};

#[derive(Default)]
struct Inner {
	snapshots: HashMap<String, Snapshot>,
	site_index: HashMap<String, BTreeSet<String>>,
	sites: HashMap<String, SiteConfig>,
	leases: HashMap<String, Instant>,
}

/// In-memory twin of the redis backend.
///
/// Implements the same contracts over `BTreeSet`-ordered indices; state dies
/// with the process.
#[derive(Default)]
pub struct MemoryStore {
	inner: Mutex<Inner>,
	puts: AtomicU64,
}
impl MemoryStore {
	/// Create an empty store.
	pub fn new() -> Self {
		Self::default()
	}

	/// Seed a site policy.
	pub async fn insert_site(&self, config: SiteConfig) {
		let mut inner = self.inner.lock().await;

		inner.sites.insert(config.host.clone(), config);
	}

	/// Number of `put` calls observed since construction.
	pub fn put_count(&self) -> u64 {
		self.puts.load(Ordering::SeqCst)
	}
}
#[async_trait]
impl SnapshotStore for MemoryStore {
	async fn get(&self, key: &SnapshotKey) -> Result<Option<Snapshot>> {
		let mut inner = self.inner.lock().await;
		let id = storage_id(key);

		Ok(inner.snapshots.get_mut(&id).map(|snapshot| {
			snapshot.times.last_accessed_at = Utc::now();

			snapshot.clone()
		}))
	}

	async fn put(&self, key: &SnapshotKey, mut snapshot: Snapshot) -> Result<()> {
		snapshot.times.updated_at = Utc::now();

		let mut inner = self.inner.lock().await;
		let id = storage_id(key);

		inner.snapshots.insert(id, snapshot);
		inner.site_index.entry(key.site.clone()).or_default().insert(path_member(key));
		self.puts.fetch_add(1, Ordering::SeqCst);

		Ok(())
	}

	async fn invalidate(&self, key: &SnapshotKey) -> Result<bool> {
		let mut inner = self.inner.lock().await;
		let id = storage_id(key);
		let existed = inner.snapshots.remove(&id).is_some();

		if let Some(index) = inner.site_index.get_mut(&key.site) {
			index.remove(&path_member(key));
		}

		Ok(existed)
	}

	async fn scan_site(&self, site: &str, cursor: Option<&str>, limit: usize) -> Result<ScanPage> {
		let inner = self.inner.lock().await;
		let Some(index) = inner.site_index.get(site) else {
			return Ok(ScanPage { items: Vec::new(), cursor: None });
		};
		let start = match cursor {
			Some(cursor) => Bound::Excluded(cursor.to_string()),
			None => Bound::Unbounded,
		};
		let members: Vec<String> =
			index.range((start, Bound::Unbounded)).take(limit).cloned().collect();
		let mut items = Vec::with_capacity(members.len());

		for member in &members {
			let Some((path, device_type, render_type)) = parse_path_member(member) else {
				continue;
			};
			let key = SnapshotKey::new(site, path, device_type, render_type);

			if let Some(snapshot) = inner.snapshots.get(&storage_id(&key)) {
				items.push(ScanItem { key, snapshot: snapshot.clone() });
			}
		}

		let cursor = if members.len() == limit { members.last().cloned() } else { None };

		Ok(ScanPage { items, cursor })
	}

	async fn expire_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
		let mut inner = self.inner.lock().await;
		let expired: Vec<String> = inner
			.snapshots
			.iter()
			.filter(|(_, snapshot)| snapshot.times.updated_at < cutoff)
			.map(|(id, _)| id.clone())
			.collect();

		for id in &expired {
			inner.snapshots.remove(id);

			if let Some(key) = crate::store::parse_storage_id(id)
				&& let Some(index) = inner.site_index.get_mut(&key.site)
			{
				index.remove(&path_member(&key));
			}
		}

		Ok(expired.len() as u64)
	}

	async fn try_lease(&self, name: &str, ttl: Duration) -> Result<bool> {
		let mut inner = self.inner.lock().await;
		let now = Instant::now();

		if let Some(expires_at) = inner.leases.get(name)
			&& *expires_at > now
		{
			return Ok(false);
		}

		inner.leases.insert(name.to_string(), now + ttl);

		Ok(true)
	}
}
#[async_trait]
impl SiteConfigSource for MemoryStore {
	async fn fetch_site(&self, host: &str) -> Result<Option<SiteConfig>> {
		let inner = self.inner.lock().await;

		Ok(inner.sites.get(host).cloned())
	}
}
