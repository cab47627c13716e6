//! Redis-backed document store for snapshots, site policies, and leases.

// crates.io
use async_trait::async_trait;
use deadpool_redis::{Pool, PoolConfig, Runtime};
use redis::AsyncCommands;
// self
use crate::{
	_prelude::*,
	site::SiteConfig,
	snapshot::{Snapshot, SnapshotKey},
	store::{
		ScanItem, ScanPage, SiteConfigSource, SnapshotStore, parse_path_member, parse_storage_id,
		path_member, storage_id,
	},
};

/// Batch size for janitor sweeps.
const SWEEP_CHUNK: isize = 1_000;

/// Document store client over a redis connection pool.
///
/// Layout under the configured namespace:
/// `{ns}:snap:{id}` hash (`doc` JSON + `accessed_ms`),
/// `{ns}:paths:{site}` lexicographic index ordered by path,
/// `{ns}:by-updated` index scored by `updatedAt`,
/// `{ns}:site:{host}` SiteConfig JSON, `{ns}:lease:{name}` leader leases.
pub struct RedisStore {
	pool: Pool,
	namespace: Arc<str>,
	instance: String,
}
impl RedisStore {
	/// Open a pooled client against the given URL and namespace.
	pub fn connect(url: &str, namespace: &str, pool_size: usize) -> Result<Self> {
		let mut config = deadpool_redis::Config::from_url(url);

		config.pool = Some(PoolConfig::new(pool_size));

		let pool = config.create_pool(Some(Runtime::Tokio1))?;

		Ok(Self {
			pool,
			namespace: Arc::from(namespace),
			instance: uuid::Uuid::new_v4().to_string(),
		})
	}

	fn snap_key(&self, id: &str) -> String {
		format!("{}:snap:{id}", self.namespace)
	}

	fn paths_key(&self, site: &str) -> String {
		format!("{}:paths:{site}", self.namespace)
	}

	fn updated_key(&self) -> String {
		format!("{}:by-updated", self.namespace)
	}
}
#[async_trait]
impl SnapshotStore for RedisStore {
	async fn get(&self, key: &SnapshotKey) -> Result<Option<Snapshot>> {
		let mut conn = self.pool.get().await?;
		let hash = self.snap_key(&storage_id(key));
		let doc: Option<String> = conn.hget(&hash, "doc").await?;
		let Some(doc) = doc else { return Ok(None) };
		let now = Utc::now();

		// Access stamps live next to the document so reads never rewrite it.
		let _: () = conn.hset(&hash, "accessed_ms", now.timestamp_millis()).await?;

		let mut snapshot: Snapshot = serde_json::from_str(&doc)?;

		snapshot.times.last_accessed_at = now;

		Ok(Some(snapshot))
	}

	async fn put(&self, key: &SnapshotKey, mut snapshot: Snapshot) -> Result<()> {
		let now = Utc::now();

		snapshot.times.updated_at = now;

		let id = storage_id(key);
		let doc = serde_json::to_string(&snapshot)?;
		let mut conn = self.pool.get().await?;

		redis::pipe()
			.atomic()
			.hset(self.snap_key(&id), "doc", doc)
			.ignore()
			.hset(self.snap_key(&id), "accessed_ms", now.timestamp_millis())
			.ignore()
			.zadd(self.paths_key(&key.site), path_member(key), 0)
			.ignore()
			.zadd(self.updated_key(), &id, now.timestamp_millis() as f64)
			.ignore()
			.query_async::<()>(&mut conn)
			.await?;

		Ok(())
	}

	async fn invalidate(&self, key: &SnapshotKey) -> Result<bool> {
		let id = storage_id(key);
		let mut conn = self.pool.get().await?;
		let (removed,): (i64,) = redis::pipe()
			.atomic()
			.del(self.snap_key(&id))
			.zrem(self.paths_key(&key.site), path_member(key))
			.ignore()
			.zrem(self.updated_key(), &id)
			.ignore()
			.query_async(&mut conn)
			.await?;

		Ok(removed > 0)
	}

	async fn scan_site(&self, site: &str, cursor: Option<&str>, limit: usize) -> Result<ScanPage> {
		let mut conn = self.pool.get().await?;
		let min = cursor.map(|cursor| format!("({cursor}")).unwrap_or_else(|| "-".into());
		let members: Vec<String> =
			conn.zrangebylex_limit(self.paths_key(site), min, "+", 0, limit as isize).await?;

		if members.is_empty() {
			return Ok(ScanPage { items: Vec::new(), cursor: None });
		}

		let mut pipe = redis::pipe();

		for member in &members {
			pipe.hget(self.snap_key(&format!("{site}\u{0}{member}")), "doc");
		}

		let docs: Vec<Option<String>> = pipe.query_async(&mut conn).await?;
		let mut items = Vec::with_capacity(members.len());

		for (member, doc) in members.iter().zip(docs) {
			let Some(doc) = doc else { continue };
			let Some((path, device_type, render_type)) = parse_path_member(member) else {
				continue;
			};
			let snapshot: Snapshot = serde_json::from_str(&doc)?;

			items.push(ScanItem {
				key: SnapshotKey::new(site, path, device_type, render_type),
				snapshot,
			});
		}

		let cursor = if members.len() == limit { members.last().cloned() } else { None };

		Ok(ScanPage { items, cursor })
	}

	async fn expire_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
		let mut conn = self.pool.get().await?;
		let cutoff_ms = cutoff.timestamp_millis() as f64;
		let mut removed = 0u64;

		loop {
			let ids: Vec<String> = conn
				.zrangebyscore_limit(self.updated_key(), f64::NEG_INFINITY, cutoff_ms, 0, SWEEP_CHUNK)
				.await?;

			if ids.is_empty() {
				break;
			}

			let mut pipe = redis::pipe();

			pipe.atomic();

			for id in &ids {
				pipe.del(self.snap_key(id)).ignore();
				pipe.zrem(self.updated_key(), id).ignore();

				if let Some(key) = parse_storage_id(id) {
					pipe.zrem(self.paths_key(&key.site), path_member(&key)).ignore();
				}
			}

			pipe.query_async::<()>(&mut conn).await?;

			removed += ids.len() as u64;

			if (ids.len() as isize) < SWEEP_CHUNK {
				break;
			}
		}

		Ok(removed)
	}

	async fn try_lease(&self, name: &str, ttl: Duration) -> Result<bool> {
		let mut conn = self.pool.get().await?;
		let granted: Option<String> = redis::cmd("SET")
			.arg(format!("{}:lease:{name}", self.namespace))
			.arg(&self.instance)
			.arg("NX")
			.arg("PX")
			.arg(ttl.as_millis() as u64)
			.query_async(&mut conn)
			.await?;

		Ok(granted.is_some())
	}
}
#[async_trait]
impl SiteConfigSource for RedisStore {
	async fn fetch_site(&self, host: &str) -> Result<Option<SiteConfig>> {
		let mut conn = self.pool.get().await?;
		let doc: Option<String> = conn.get(format!("{}:site:{host}", self.namespace)).await?;

		match doc {
			Some(doc) => Ok(Some(serde_json::from_str(&doc)?)),
			None => Ok(None),
		}
	}
}
