//! Snapshot store and SiteConfig source contracts plus their backends.

pub mod memory;
pub mod redis;

// crates.io
use async_trait::async_trait;
// self
use crate::{
	_prelude::*,
	site::SiteConfig,
	snapshot::{DeviceType, RenderType, Snapshot, SnapshotKey},
};

/// One snapshot returned from a site scan, paired with its key.
#[derive(Clone, Debug)]
pub struct ScanItem {
	/// Identity of the snapshot.
	pub key: SnapshotKey,
	/// The stored record.
	pub snapshot: Snapshot,
}

/// One page of a site scan, ordered by path.
#[derive(Clone, Debug)]
pub struct ScanPage {
	/// Snapshots in path order.
	pub items: Vec<ScanItem>,
	/// Opaque cursor for the next page; `None` when the scan is exhausted.
	pub cursor: Option<String>,
}

/// Persistent mapping from snapshot keys to rendered snapshots.
///
/// `put`/`get` are linearizable per key; `scan_site` may observe concurrent
/// updates but every returned item is self-consistent.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
	/// Fetch a snapshot and bump its `lastAccessedAt`.
	async fn get(&self, key: &SnapshotKey) -> Result<Option<Snapshot>>;

	/// Upsert a snapshot atomically, stamping `updatedAt = now`.
	async fn put(&self, key: &SnapshotKey, snapshot: Snapshot) -> Result<()>;

	/// Remove one snapshot; returns whether it existed.
	async fn invalidate(&self, key: &SnapshotKey) -> Result<bool>;

	/// Page through a site's snapshots in path order.
	async fn scan_site(&self, site: &str, cursor: Option<&str>, limit: usize) -> Result<ScanPage>;

	/// Remove snapshots with `updatedAt` strictly before the cutoff; returns the count.
	async fn expire_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

	/// Acquire a named lease for `ttl`; returns false when another holder is active.
	async fn try_lease(&self, name: &str, ttl: Duration) -> Result<bool>;
}

/// Read access to the per-origin rendering policies.
#[async_trait]
pub trait SiteConfigSource: Send + Sync {
	/// Fetch the stored policy for a normalised host, if any.
	async fn fetch_site(&self, host: &str) -> Result<Option<SiteConfig>>;
}

// Separators below are NUL bytes: they cannot occur in URLs or hostnames, so
// the encoded forms stay unambiguous and sort by path first.

/// Site-scoped index member: `{path}\0{device}\0{type}`.
pub(crate) fn path_member(key: &SnapshotKey) -> String {
	format!("{}\u{0}{}\u{0}{}", key.path, key.device_type, key.render_type)
}

/// Store-wide snapshot id: `{site}\0{path}\0{device}\0{type}`.
pub(crate) fn storage_id(key: &SnapshotKey) -> String {
	format!("{}\u{0}{}", key.site, path_member(key))
}

/// Decode a storage id back into a key.
pub(crate) fn parse_storage_id(id: &str) -> Option<SnapshotKey> {
	let mut parts = id.split('\u{0}');
	let site = parts.next()?;
	let path = parts.next()?;
	let device_type: DeviceType = parts.next()?.parse().ok()?;
	let render_type: RenderType = parts.next()?.parse().ok()?;

	if parts.next().is_some() {
		return None;
	}

	Some(SnapshotKey::new(site, path, device_type, render_type))
}

/// Decode a site-scoped index member back into `(path, device, type)`.
pub(crate) fn parse_path_member(member: &str) -> Option<(String, DeviceType, RenderType)> {
	let mut parts = member.split('\u{0}');
	let path = parts.next()?.to_string();
	let device_type: DeviceType = parts.next()?.parse().ok()?;
	let render_type: RenderType = parts.next()?.parse().ok()?;

	Some((path, device_type, render_type))
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn storage_ids_round_trip() {
		let key = SnapshotKey::new(
			"https://example.com",
			"/docs?page=2",
			DeviceType::Mobile,
			RenderType::Html,
		);
		let id = storage_id(&key);

		assert_eq!(parse_storage_id(&id).expect("round trip"), key);
	}

	#[test]
	fn path_members_sort_by_path_first() {
		let a = path_member(&SnapshotKey::new(
			"https://example.com",
			"/a",
			DeviceType::Mobile,
			RenderType::Html,
		));
		let b = path_member(&SnapshotKey::new(
			"https://example.com",
			"/b",
			DeviceType::Desktop,
			RenderType::Html,
		));

		assert!(a < b);
	}
}
