//! Gateway configuration: CLI arguments, layered loading, and validation.

// std
use std::path::{Path, PathBuf};
// crates.io
use clap::Parser;
use figment::{
	Figment,
	providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
// self
use crate::_prelude::*;

/// Command line of the gateway binary.
#[derive(Debug, Parser)]
#[command(name = "kasha", version, about)]
pub struct Args {
	/// Path to the TOML configuration file.
	#[arg(long, short)]
	pub config: Option<PathBuf>,
}

/// Top-level gateway configuration.
///
/// Field names follow the wire configuration (camelCase); every key can be
/// overridden through `KASHA_`-prefixed environment variables with `__` as
/// the nesting separator, e.g. `KASHA_CACHE__MAXAGE=600`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
	/// HTTP listen port.
	pub port: u16,
	/// Hostnames that activate API mode.
	#[serde(alias = "apihost")]
	pub api_host: Vec<String>,
	/// Serve the static debug page under API mode.
	#[serde(alias = "enablehomepage")]
	pub enable_homepage: bool,
	/// Reject hosts without a stored SiteConfig.
	#[serde(alias = "disallowunknownsite")]
	pub disallow_unknown_site: bool,
	/// Cache freshness windows, in seconds.
	pub cache: CacheConfig,
	/// Seconds to wait for a worker reply.
	#[serde(alias = "workertimeout")]
	pub worker_timeout: u64,
	/// Message bus connections.
	pub bus: BusConfig,
	/// Snapshot store connection.
	pub store: StoreConfig,
	/// Log filter, e.g. `info` or `kasha=debug`.
	#[serde(alias = "loglevel")]
	pub log_level: String,
}
impl Config {
	/// Load configuration from defaults, an optional TOML file, and the environment.
	pub fn load(path: Option<&Path>) -> Result<Self> {
		let mut figment = Figment::from(Serialized::defaults(Self::default()));

		if let Some(path) = path {
			figment = figment.merge(Toml::file(path));
		}

		let config: Self = figment.merge(Env::prefixed("KASHA_").split("__")).extract()?;

		config.validate()?;

		Ok(config)
	}

	/// Validate invariants across the configured windows and connections.
	pub fn validate(&self) -> Result<()> {
		if self.worker_timeout == 0 {
			return Err(Error::Validation {
				field: "workerTimeout",
				reason: "Must be at least 1 second.".into(),
			});
		}
		if self.cache.maxage > self.cache.s_maxage {
			return Err(Error::Validation {
				field: "cache.maxage",
				reason: "Must be less than or equal to cache.sMaxage.".into(),
			});
		}
		if self.cache.remove_after < self.cache.s_maxage {
			return Err(Error::Validation {
				field: "cache.removeAfter",
				reason: "Must be greater than or equal to cache.sMaxage.".into(),
			});
		}
		if self.bus.reader.is_empty() || self.bus.writer.is_empty() {
			return Err(Error::Validation {
				field: "bus",
				reason: "Reader and writer connection URLs must not be empty.".into(),
			});
		}
		if self.store.url.is_empty() {
			return Err(Error::Validation {
				field: "store.url",
				reason: "Must not be empty.".into(),
			});
		}
		if self.store.pool_size == 0 {
			return Err(Error::Validation {
				field: "store.poolSize",
				reason: "Must be at least 1.".into(),
			});
		}

		Ok(())
	}

	/// Worker reply deadline.
	pub fn worker_timeout(&self) -> Duration {
		Duration::from_secs(self.worker_timeout)
	}
}
impl Default for Config {
	fn default() -> Self {
		Self {
			port: 3000,
			api_host: Vec::new(),
			enable_homepage: false,
			disallow_unknown_site: false,
			cache: CacheConfig::default(),
			worker_timeout: 30,
			bus: BusConfig::default(),
			store: StoreConfig::default(),
			log_level: "info".into(),
		}
	}
}

/// Freshness windows, all in seconds.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
	/// Client-visible freshness window.
	pub maxage: u64,
	/// Stale-while-revalidate window.
	#[serde(alias = "smaxage")]
	pub s_maxage: u64,
	/// `Cache-Control` max-age for robots.txt responses.
	#[serde(alias = "robotstxt")]
	pub robots_txt: u64,
	/// `Cache-Control` max-age for sitemap responses.
	pub sitemap: u64,
	/// Snapshots untouched for this long are removed.
	#[serde(alias = "removeafter")]
	pub remove_after: u64,
}
impl CacheConfig {
	/// Client-visible freshness window.
	pub fn maxage(&self) -> Duration {
		Duration::from_secs(self.maxage)
	}

	/// Stale-while-revalidate window.
	pub fn s_maxage(&self) -> Duration {
		Duration::from_secs(self.s_maxage)
	}

	/// Removal age for the janitor.
	pub fn remove_after(&self) -> Duration {
		Duration::from_secs(self.remove_after)
	}

	/// Janitor sweep interval: `min(removeAfter / 24, 1 h)`.
	pub fn janitor_interval(&self) -> Duration {
		Duration::from_secs((self.remove_after / 24).min(3_600).max(1))
	}
}
impl Default for CacheConfig {
	fn default() -> Self {
		Self {
			maxage: 300,
			s_maxage: 86_400,
			robots_txt: 3_600,
			sitemap: 3_600,
			remove_after: 2_592_000,
		}
	}
}

/// Message bus connection parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BusConfig {
	/// Connection URL for the reply subscription.
	pub reader: String,
	/// Connection URL for job publishing.
	pub writer: String,
}
impl Default for BusConfig {
	fn default() -> Self {
		Self {
			reader: "redis://127.0.0.1:6379".into(),
			writer: "redis://127.0.0.1:6379".into(),
		}
	}
}

/// Snapshot store connection parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreConfig {
	/// Store connection URL; `memory://` selects the embedded store.
	pub url: String,
	/// Key namespace scoping all gateway data.
	pub database: String,
	/// Connection pool size.
	#[serde(alias = "poolsize")]
	pub pool_size: usize,
}
impl Default for StoreConfig {
	fn default() -> Self {
		Self { url: "redis://127.0.0.1:6379".into(), database: "kasha".into(), pool_size: 10 }
	}
}

/// Install the process-wide tracing subscriber from the configured log filter.
pub fn init_tracing(log_level: &str) {
	let filter = EnvFilter::try_from_default_env()
		.or_else(|_| EnvFilter::try_new(log_level))
		.unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).init();
}
