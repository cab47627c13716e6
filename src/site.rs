//! Per-origin rendering policy and its TTL-cached resolver.

// std
use std::collections::HashMap;
// crates.io
use serde::{Deserialize, Serialize};
use tokio::{
	sync::{Mutex, broadcast},
	time,
};
// self
use crate::{_prelude::*, error::Code, snapshot::DeviceType, store::SiteConfigSource};

/// Default lifetime of a cached SiteConfig lookup, positive or negative.
pub const DEFAULT_CONFIG_TTL: Duration = Duration::from_secs(60);
/// Deadline for one document-store lookup.
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Robots rules for one user agent.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RobotsRules {
	/// User agent the rules apply to; `*` is the wildcard agent.
	pub agent: String,
	/// Allowed path prefixes.
	pub allow: Vec<String>,
	/// Disallowed path prefixes.
	pub disallow: Vec<String>,
}

/// Robots policy of a site.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RobotsPolicy {
	/// Per-agent rule groups.
	pub rules: Vec<RobotsRules>,
	/// Extra raw directives appended to robots.txt, e.g. `Crawl-delay: 10`.
	pub extra: Vec<String>,
}
impl RobotsPolicy {
	fn rules_for(&self, agent: &str) -> Option<&RobotsRules> {
		self.rules
			.iter()
			.find(|rules| rules.agent.eq_ignore_ascii_case(agent))
			.or_else(|| self.rules.iter().find(|rules| rules.agent == "*"))
	}

	/// Whether the agent may index the path.
	///
	/// Longest matching prefix wins; `Allow` wins a tie, per the de-facto
	/// robots.txt precedence.
	pub fn allows(&self, agent: &str, path: &str) -> bool {
		let Some(rules) = self.rules_for(agent) else { return true };
		let allow = longest_prefix(&rules.allow, path);
		let disallow = longest_prefix(&rules.disallow, path);

		match (allow, disallow) {
			(Some(allow), Some(disallow)) => allow >= disallow,
			(None, Some(_)) => false,
			_ => true,
		}
	}
}

/// One prefix rewrite applied to inbound paths.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewriteRule {
	/// Path prefix to match.
	pub from: String,
	/// Replacement for the matched prefix.
	pub to: String,
}

/// Rendering policy for one origin.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SiteConfig {
	/// Host the policy belongs to.
	pub host: String,
	/// Protocol completing the origin, `http` or `https`.
	pub default_protocol: String,
	/// Device class rendered in proxy mode.
	pub device_type: DeviceType,
	/// Robots policy; absent means everything is indexable.
	pub robots: Option<RobotsPolicy>,
	/// Renderable path prefixes; empty means all paths.
	pub includes: Vec<String>,
	/// Path prefixes refused for rendering.
	pub excludes: Vec<String>,
	/// Path rewrites applied before rendering.
	pub rewrites: Vec<RewriteRule>,
	/// Publication name for the Google News sitemap.
	pub news_publication: Option<String>,
}
impl SiteConfig {
	/// Policy synthesized for hosts without a stored config.
	pub fn fallback(host: impl Into<String>) -> Self {
		Self { host: host.into(), ..Default::default() }
	}

	/// Origin string, e.g. `https://example.com`.
	pub fn origin(&self) -> String {
		format!("{}://{}", self.default_protocol, self.host)
	}

	/// Whether the include/exclude rules accept the path.
	pub fn path_allowed(&self, path: &str) -> bool {
		if !self.includes.is_empty() && !self.includes.iter().any(|p| path.starts_with(p.as_str()))
		{
			return false;
		}

		!self.excludes.iter().any(|p| path.starts_with(p.as_str()))
	}

	/// Apply the first matching rewrite rule.
	pub fn rewrite(&self, path: &str) -> String {
		for rule in &self.rewrites {
			if let Some(rest) = path.strip_prefix(rule.from.as_str()) {
				return format!("{}{rest}", rule.to);
			}
		}

		path.to_string()
	}

	/// Whether the agent may index the path under both robots and path rules.
	pub fn indexable(&self, agent: &str, path: &str) -> bool {
		self.path_allowed(path)
			&& self.robots.as_ref().map(|robots| robots.allows(agent, path)).unwrap_or(true)
	}
}
impl Default for SiteConfig {
	fn default() -> Self {
		Self {
			host: String::new(),
			default_protocol: "https".into(),
			device_type: DeviceType::Desktop,
			robots: None,
			includes: Vec::new(),
			excludes: Vec::new(),
			rewrites: Vec::new(),
			news_publication: None,
		}
	}
}

/// Normalise a host header value: lowercase, no trailing dot, default ports stripped.
pub fn normalize_host(value: &str) -> Result<String> {
	let trimmed = value.trim();
	let stripped =
		trimmed.strip_suffix(":80").or_else(|| trimmed.strip_suffix(":443")).unwrap_or(trimmed);
	let host = stripped.trim_end_matches('.').to_ascii_lowercase();

	if host.is_empty() {
		return Err(Error::client(Code::ClientEmptyHostHeader, "Host header is empty."));
	}

	Ok(host)
}

type LookupOutcome = std::result::Result<Option<Arc<SiteConfig>>, String>;

enum Slot {
	Cached { config: Option<Arc<SiteConfig>>, expires_at: Instant },
	Pending(broadcast::Sender<LookupOutcome>),
}

/// TTL cache over the SiteConfig collection with per-host single-flight lookups.
#[derive(Clone)]
pub struct SiteResolver {
	source: Arc<dyn SiteConfigSource>,
	ttl: Duration,
	slots: Arc<Mutex<HashMap<String, Slot>>>,
}
impl SiteResolver {
	/// Build a resolver over the given source with the default TTL.
	pub fn new(source: Arc<dyn SiteConfigSource>) -> Self {
		Self::with_ttl(source, DEFAULT_CONFIG_TTL)
	}

	/// Build a resolver with an explicit cache TTL.
	pub fn with_ttl(source: Arc<dyn SiteConfigSource>, ttl: Duration) -> Self {
		Self { source, ttl, slots: Arc::new(Mutex::new(HashMap::new())) }
	}

	/// Resolve the policy for a host; `Ok(None)` means no config is stored.
	///
	/// Positive and negative results are cached for the TTL; concurrent
	/// lookups for one host share a single store query.
	pub async fn resolve(&self, host: &str) -> Result<Option<Arc<SiteConfig>>> {
		let host = normalize_host(host)?;

		loop {
			let mut slots = self.slots.lock().await;
			let join = match slots.get(&host) {
				Some(Slot::Cached { config, expires_at }) if *expires_at > Instant::now() =>
					return Ok(config.clone()),
				Some(Slot::Pending(tx)) => Some(tx.subscribe()),
				_ => None,
			};
			let Some(mut rx) = join else {
				let (tx, _) = broadcast::channel(1);

				slots.insert(host.clone(), Slot::Pending(tx.clone()));
				drop(slots);

				return self.lead_lookup(&host, tx).await;
			};

			drop(slots);

			match rx.recv().await {
				Ok(Ok(config)) => return Ok(config),
				Ok(Err(reason)) => return Err(Error::Store(reason)),
				// Leader dropped without an answer; retry the lookup.
				Err(_) => continue,
			}
		}
	}

	async fn lead_lookup(
		&self,
		host: &str,
		tx: broadcast::Sender<LookupOutcome>,
	) -> Result<Option<Arc<SiteConfig>>> {
		let outcome = match time::timeout(LOOKUP_TIMEOUT, self.source.fetch_site(host)).await {
			Ok(result) => result.map(|config| config.map(Arc::new)),
			Err(_) => Err(Error::Store(format!("SiteConfig lookup for '{host}' timed out."))),
		};
		let mut slots = self.slots.lock().await;

		match &outcome {
			Ok(config) => {
				slots.insert(
					host.to_string(),
					Slot::Cached { config: config.clone(), expires_at: Instant::now() + self.ttl },
				);
			},
			Err(err) => {
				tracing::warn!(host, error = %err, "site config lookup failed");
				slots.remove(host);
			},
		}

		drop(slots);

		let _ = tx.send(outcome.as_ref().map(Clone::clone).map_err(ToString::to_string));

		outcome
	}
}

fn longest_prefix(prefixes: &[String], path: &str) -> Option<usize> {
	prefixes
		.iter()
		.filter(|prefix| !prefix.is_empty() && path.starts_with(prefix.as_str()))
		.map(|prefix| prefix.len())
		.max()
}
