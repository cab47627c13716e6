//! Snapshot data model and freshness evaluation.

// std
use std::{fmt, str::FromStr};
// crates.io
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
// self
use crate::{_prelude::*, error::Code};

/// Device class a snapshot was rendered for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
	/// Desktop viewport.
	#[default]
	Desktop,
	/// Mobile viewport.
	Mobile,
}
impl DeviceType {
	/// Stable wire form.
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Desktop => "desktop",
			Self::Mobile => "mobile",
		}
	}
}
impl fmt::Display for DeviceType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
impl FromStr for DeviceType {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self> {
		match s {
			"desktop" => Ok(Self::Desktop),
			"mobile" => Ok(Self::Mobile),
			other => Err(Error::client(
				Code::ClientInvalidParam,
				format!("Unknown deviceType '{other}'; expected 'desktop' or 'mobile'."),
			)),
		}
	}
}

/// Kind of artifact a render produces.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderType {
	/// Hydrated HTML document rendered by a headless browser.
	#[default]
	Html,
	/// Raw body fetched without JavaScript execution.
	Static,
}
impl RenderType {
	/// Stable wire form.
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Html => "html",
			Self::Static => "static",
		}
	}
}
impl fmt::Display for RenderType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
impl FromStr for RenderType {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self> {
		match s {
			"html" => Ok(Self::Html),
			"static" => Ok(Self::Static),
			other => Err(Error::client(
				Code::ClientInvalidParam,
				format!("Unknown type '{other}'; expected 'html' or 'static'."),
			)),
		}
	}
}

/// Identity of one stored snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotKey {
	/// Origin the page belongs to, e.g. `https://example.com`.
	pub site: String,
	/// Site-relative path including query, e.g. `/docs?page=2`.
	pub path: String,
	/// Device class the page was rendered for.
	pub device_type: DeviceType,
	/// Artifact kind.
	pub render_type: RenderType,
}
impl SnapshotKey {
	/// Construct a key.
	pub fn new(
		site: impl Into<String>,
		path: impl Into<String>,
		device_type: DeviceType,
		render_type: RenderType,
	) -> Self {
		Self { site: site.into(), path: path.into(), device_type, render_type }
	}

	/// Absolute URL the key refers to.
	pub fn url(&self) -> String {
		format!("{}{}", self.site, self.path)
	}
}
impl fmt::Display for SnapshotKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}{} [{}/{}]", self.site, self.path, self.device_type, self.render_type)
	}
}

/// Page metadata extracted by the render worker.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageMeta {
	/// Document title.
	pub title: Option<String>,
	/// Meta description.
	pub description: Option<String>,
	/// Representative image URL.
	pub image: Option<String>,
	/// Canonical URL declared by the page.
	pub canonical: Option<String>,
	/// Page locale, e.g. `en-US`.
	pub locale: Option<String>,
	/// Publication timestamp, when the page declares one.
	pub published_at: Option<DateTime<Utc>>,
	/// Image URLs for the image sitemap.
	pub images: Vec<String>,
	/// Video URLs for the video sitemap.
	pub videos: Vec<String>,
	/// Any further metadata the worker extracted.
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}

/// Render artifact as produced by a worker, before the gateway stamps times.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderedPage {
	/// HTTP status observed by the worker.
	pub status: u16,
	/// Redirect target when the page answered with a redirection.
	pub redirect: Option<String>,
	/// Extracted page metadata.
	pub meta: PageMeta,
	/// Open Graph properties.
	pub open_graph: Map<String, Value>,
	/// `<a href>` targets discovered in the document.
	pub links: Vec<String>,
	/// Rendered body; absent for redirects and failures.
	pub content: Option<String>,
	/// Error kind string reported by the worker.
	pub error: Option<String>,
}

/// Freshness timestamps of a stored snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotTimes {
	/// When the content was rendered by a worker.
	pub rendered_at: DateTime<Utc>,
	/// When the stored record was last written.
	pub updated_at: DateTime<Utc>,
	/// When the record was last read.
	pub last_accessed_at: DateTime<Utc>,
}

/// One stored rendered artifact.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
	/// Render artifact payload.
	#[serde(flatten)]
	pub page: RenderedPage,
	/// Freshness timestamps.
	pub times: SnapshotTimes,
	/// `renderedAt + maxage`; gates client-visible freshness.
	pub private_expires: DateTime<Utc>,
	/// `renderedAt + sMaxage`; gates stale-while-revalidate serving.
	pub shared_expires: DateTime<Utc>,
}
impl Snapshot {
	/// Stamp a worker artifact into a storable snapshot.
	pub fn from_page(
		page: RenderedPage,
		rendered_at: DateTime<Utc>,
		maxage: Duration,
		s_maxage: Duration,
	) -> Self {
		let private_expires = rendered_at + TimeDelta::from_std(maxage).unwrap_or_default();
		let shared_expires = rendered_at + TimeDelta::from_std(s_maxage).unwrap_or_default();

		Self {
			page,
			times: SnapshotTimes {
				rendered_at,
				updated_at: rendered_at,
				last_accessed_at: rendered_at,
			},
			private_expires,
			shared_expires,
		}
	}

	/// Evaluate the freshness tier at the given instant.
	pub fn freshness(&self, now: DateTime<Utc>) -> Freshness {
		if now <= self.private_expires {
			Freshness::Fresh
		} else if now <= self.shared_expires {
			Freshness::Stale
		} else {
			Freshness::Expired
		}
	}

	/// Check the stored-record invariants.
	pub fn validate(&self) -> Result<()> {
		if self.times.rendered_at > self.times.updated_at {
			return Err(Error::Validation {
				field: "times",
				reason: "renderedAt must not exceed updatedAt.".into(),
			});
		}
		if self.private_expires > self.shared_expires {
			return Err(Error::Validation {
				field: "privateExpires",
				reason: "Must not exceed sharedExpires.".into(),
			});
		}

		let has_body = self.page.content.is_some();
		let diverted = self.page.error.is_some() || self.page.redirect.is_some();

		if has_body == diverted {
			return Err(Error::Validation {
				field: "content",
				reason: "Must be present exactly when neither error nor redirect is set.".into(),
			});
		}

		Ok(())
	}
}

/// Freshness tier of a cached snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Freshness {
	/// Within `privateExpires`; serve as-is.
	Fresh,
	/// Past `privateExpires` but within `sharedExpires`; serve and refresh.
	Stale,
	/// Past `sharedExpires`; not trustworthy enough to serve.
	Expired,
}

/// Cache disposition reported to the client alongside a response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheStatus {
	/// Served from cache within the private freshness window.
	Fresh,
	/// Served stale while a background refresh runs.
	StaleRevalidating,
	/// Served from a render completed for this request.
	Updated,
	/// Render accepted without waiting (`noWait`).
	Updating,
}
impl CacheStatus {
	/// Header value form.
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Fresh => "fresh",
			Self::StaleRevalidating => "stale-revalidating",
			Self::Updated => "updated",
			Self::Updating => "updating",
		}
	}
}
impl fmt::Display for CacheStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
