//! Sitemap and robots aggregation over cached snapshots.
//!
//! Sitemaps reflect known snapshots only; a path discovered here never
//! triggers a render.

// std
use std::collections::HashMap;
// crates.io
use serde::Serialize;
use tokio::sync::Mutex;
// self
use crate::{
	_prelude::*,
	site::SiteConfig,
	snapshot::RenderType,
	store::{ScanItem, SnapshotStore},
};

/// URLs per sitemap page.
pub const SITEMAP_PAGE_SIZE: usize = 50_000;
/// URLs per Google News sitemap page.
pub const NEWS_PAGE_SIZE: usize = 25_000;
/// Snapshots scanned per store round trip.
const SCAN_BATCH: usize = 1_000;
/// Publication window of the news variant, in hours.
const NEWS_WINDOW_HOURS: i64 = 48;

const XML_DECL: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>";
const SITEMAP_XMLNS: &str = "http://www.sitemaps.org/schemas/sitemap/0.9";
const NEWS_XMLNS: &str = "http://www.google.com/schemas/sitemap-news/0.9";
const IMAGE_XMLNS: &str = "http://www.google.com/schemas/sitemap-image/1.1";
const VIDEO_XMLNS: &str = "http://www.google.com/schemas/sitemap-video/1.1";

/// Sitemap flavours, each with its own filter predicate and schema children.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SitemapVariant {
	/// Every indexable HTML snapshot.
	Plain,
	/// Same pages filtered by the Google crawler's robots rules.
	Google,
	/// Pages published within the last 48 hours.
	News,
	/// Pages carrying extracted images.
	Image,
	/// Pages carrying extracted videos.
	Video,
}
impl SitemapVariant {
	/// All variants, in robots.txt listing order.
	pub const ALL: [Self; 5] = [Self::Plain, Self::Google, Self::News, Self::Image, Self::Video];

	/// URLs per page for this variant.
	pub fn page_size(&self) -> usize {
		match self {
			Self::News => NEWS_PAGE_SIZE,
			_ => SITEMAP_PAGE_SIZE,
		}
	}

	/// Robots agent whose rules filter this variant.
	pub fn agent(&self) -> &'static str {
		match self {
			Self::Plain => "*",
			_ => "googlebot",
		}
	}

	/// Name fragment between `sitemap` and the page number.
	pub fn token(&self) -> &'static str {
		match self {
			Self::Plain => "",
			Self::Google => ".google",
			Self::News => ".google.news",
			Self::Image => ".google.image",
			Self::Video => ".google.video",
		}
	}

	fn accepts(&self, item: &ScanItem, now: DateTime<Utc>) -> bool {
		let page = &item.snapshot.page;

		if item.key.render_type != RenderType::Html
			|| page.status != 200
			|| page.error.is_some()
			|| page.redirect.is_some()
		{
			return false;
		}

		match self {
			Self::Plain | Self::Google => true,
			Self::News => page
				.meta
				.published_at
				.map(|published| {
					published <= now && now - published <= TimeDelta::hours(NEWS_WINDOW_HOURS)
				})
				.unwrap_or(false),
			Self::Image => !page.meta.images.is_empty(),
			Self::Video => !page.meta.videos.is_empty(),
		}
	}
}

/// Parsed sitemap-family request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SitemapRequest {
	/// `robots.txt`.
	Robots,
	/// A sitemap or sitemapindex page.
	Sitemap {
		/// Which flavour.
		variant: SitemapVariant,
		/// Whether the index counterpart was requested.
		index: bool,
		/// 1-based page number.
		page: usize,
	},
}

/// Match a site-relative path against the sitemap grammar:
/// `/robots.txt` or `/sitemap[.google[.news|.image|.video]][.index][.<page>].xml`.
pub fn parse_sitemap_path(path: &str) -> Option<SitemapRequest> {
	let path = path.split('?').next().unwrap_or(path);

	if path == "/robots.txt" {
		return Some(SitemapRequest::Robots);
	}

	let name = path.strip_prefix('/')?.strip_prefix("sitemap")?.strip_suffix(".xml")?;
	let mut tokens = name.split('.').filter(|token| !token.is_empty()).peekable();
	let variant = if tokens.peek() == Some(&"google") {
		tokens.next();

		match tokens.peek() {
			Some(&"news") => {
				tokens.next();

				SitemapVariant::News
			},
			Some(&"image") => {
				tokens.next();

				SitemapVariant::Image
			},
			Some(&"video") => {
				tokens.next();

				SitemapVariant::Video
			},
			_ => SitemapVariant::Google,
		}
	} else {
		SitemapVariant::Plain
	};
	let index = if tokens.peek() == Some(&"index") {
		tokens.next();

		true
	} else {
		false
	};
	let page = match tokens.next() {
		Some(token) => token.parse::<usize>().ok().filter(|page| *page >= 1)?,
		None => 1,
	};

	if tokens.next().is_some() {
		return None;
	}

	Some(SitemapRequest::Sitemap { variant, index, page })
}

/// A rendered sitemap-family document.
#[derive(Clone, Debug)]
pub struct SitemapDocument {
	/// Serialized body.
	pub body: String,
	/// MIME type to serve it under.
	pub content_type: &'static str,
}

struct MemoEntry {
	body: SitemapDocument,
	expires_at: Instant,
}

/// Streams cached snapshots of a site into sitemap-family documents.
#[derive(Clone)]
pub struct SitemapService {
	store: Arc<dyn SnapshotStore>,
	memo_ttl: Duration,
	memo: Arc<Mutex<HashMap<String, MemoEntry>>>,
}
impl SitemapService {
	/// Build a service memoizing generated pages for `memo_ttl`.
	pub fn new(store: Arc<dyn SnapshotStore>, memo_ttl: Duration) -> Self {
		Self { store, memo_ttl, memo: Arc::new(Mutex::new(HashMap::new())) }
	}

	/// Produce the requested document; `None` means the page is past the end.
	pub async fn respond(
		&self,
		site: &SiteConfig,
		request: SitemapRequest,
	) -> Result<Option<SitemapDocument>> {
		let memo_key = memo_key(site, request);

		if let Some(cached) = self.memoized(&memo_key).await {
			return Ok(Some(cached));
		}

		let document = match request {
			SitemapRequest::Robots => Some(SitemapDocument {
				body: self.robots(site).await?,
				content_type: "text/plain; charset=utf-8",
			}),
			SitemapRequest::Sitemap { variant, index: false, page } => self
				.sitemap_page(site, variant, page)
				.await?
				.map(|body| SitemapDocument { body, content_type: "application/xml" }),
			SitemapRequest::Sitemap { variant, index: true, page } => self
				.sitemap_index(site, variant, page)
				.await?
				.map(|body| SitemapDocument { body, content_type: "application/xml" }),
		};

		if let Some(document) = &document {
			self.memoize(memo_key, document.clone()).await;
		}

		Ok(document)
	}

	/// Render `robots.txt`: configured directives, then one `Sitemap:` line
	/// per variant index that currently has at least one page.
	pub async fn robots(&self, site: &SiteConfig) -> Result<String> {
		let mut lines = Vec::new();

		match &site.robots {
			Some(policy) if !policy.rules.is_empty() => {
				for rules in &policy.rules {
					lines.push(format!("User-agent: {}", rules.agent));

					for prefix in &rules.allow {
						lines.push(format!("Allow: {prefix}"));
					}
					for prefix in &rules.disallow {
						lines.push(format!("Disallow: {prefix}"));
					}

					lines.push(String::new());
				}
			},
			_ => {
				lines.push("User-agent: *".into());
				lines.push("Allow: /".into());
				lines.push(String::new());
			},
		}

		if let Some(policy) = &site.robots
			&& !policy.extra.is_empty()
		{
			lines.extend(policy.extra.iter().cloned());
			lines.push(String::new());
		}

		let origin = site.origin();

		for variant in SitemapVariant::ALL {
			let (_, matched) = self.collect(site, variant, 0, 1, false).await?;

			if matched > 0 {
				lines.push(format!("Sitemap: {origin}/sitemap{}.index.xml", variant.token()));
			}
		}

		Ok(format!("{}\n", lines.join("\n").trim_end()))
	}

	async fn sitemap_page(
		&self,
		site: &SiteConfig,
		variant: SitemapVariant,
		page: usize,
	) -> Result<Option<String>> {
		let size = variant.page_size();
		let (items, _) = self.collect(site, variant, (page - 1) * size, size, false).await?;

		if items.is_empty() {
			return Ok(None);
		}

		let urls = items
			.iter()
			.map(|item| UrlEntry {
				loc: item.key.url(),
				lastmod: item.snapshot.times.updated_at.to_rfc3339(),
				news: (variant == SitemapVariant::News).then(|| news_entry(site, item)),
				images: match variant {
					SitemapVariant::Image => item
						.snapshot
						.page
						.meta
						.images
						.iter()
						.map(|loc| ImageEntry { loc: loc.clone() })
						.collect(),
					_ => Vec::new(),
				},
				videos: match variant {
					SitemapVariant::Video => item
						.snapshot
						.page
						.meta
						.videos
						.iter()
						.map(|loc| VideoEntry {
							title: item
								.snapshot
								.page
								.meta
								.title
								.clone()
								.unwrap_or_else(|| loc.clone()),
							content_loc: loc.clone(),
						})
						.collect(),
					_ => Vec::new(),
				},
			})
			.collect();
		let urlset = Urlset {
			xmlns: SITEMAP_XMLNS,
			xmlns_news: (variant == SitemapVariant::News).then_some(NEWS_XMLNS),
			xmlns_image: (variant == SitemapVariant::Image).then_some(IMAGE_XMLNS),
			xmlns_video: (variant == SitemapVariant::Video).then_some(VIDEO_XMLNS),
			url: urls,
		};

		Ok(Some(format!("{XML_DECL}{}", quick_xml::se::to_string(&urlset)?)))
	}

	async fn sitemap_index(
		&self,
		site: &SiteConfig,
		variant: SitemapVariant,
		page: usize,
	) -> Result<Option<String>> {
		let size = variant.page_size();
		let (_, matched) = self.collect(site, variant, 0, 0, true).await?;
		let pages = matched.div_ceil(size);

		// The index itself pages by the sitemap page size as well.
		let index_pages = pages.div_ceil(SITEMAP_PAGE_SIZE);

		if page > index_pages {
			return Ok(None);
		}

		let origin = site.origin();
		let first = (page - 1) * SITEMAP_PAGE_SIZE + 1;
		let last = (page * SITEMAP_PAGE_SIZE).min(pages);
		let entries = (first..=last)
			.map(|number| IndexEntry {
				loc: format!("{origin}/sitemap{}.{number}.xml", variant.token()),
			})
			.collect();
		let index = SitemapIndex { xmlns: SITEMAP_XMLNS, sitemap: entries };

		Ok(Some(format!("{XML_DECL}{}", quick_xml::se::to_string(&index)?)))
	}

	/// Stream the site's snapshots through the variant filter.
	///
	/// Collects up to `take` items starting at offset `skip` and returns the
	/// number of matches seen; with `count_all` the scan continues to the end
	/// to produce an exact total.
	async fn collect(
		&self,
		site: &SiteConfig,
		variant: SitemapVariant,
		skip: usize,
		take: usize,
		count_all: bool,
	) -> Result<(Vec<ScanItem>, usize)> {
		let origin = site.origin();
		let now = Utc::now();
		let agent = variant.agent();
		let mut cursor: Option<String> = None;
		let mut matched = 0usize;
		let mut items = Vec::new();

		loop {
			let page = self.store.scan_site(&origin, cursor.as_deref(), SCAN_BATCH).await?;

			for item in page.items {
				if !variant.accepts(&item, now) || !site.indexable(agent, &item.key.path) {
					continue;
				}

				if matched >= skip && items.len() < take {
					items.push(item);
				}

				matched += 1;

				if !count_all && take > 0 && items.len() == take {
					return Ok((items, matched));
				}
			}

			match page.cursor {
				Some(next) => cursor = Some(next),
				None => break,
			}
		}

		Ok((items, matched))
	}

	async fn memoized(&self, key: &str) -> Option<SitemapDocument> {
		let memo = self.memo.lock().await;
		let entry = memo.get(key)?;

		(entry.expires_at > Instant::now()).then(|| entry.body.clone())
	}

	async fn memoize(&self, key: String, body: SitemapDocument) {
		let mut memo = self.memo.lock().await;

		memo.retain(|_, entry| entry.expires_at > Instant::now());
		memo.insert(key, MemoEntry { body, expires_at: Instant::now() + self.memo_ttl });
	}
}

fn memo_key(site: &SiteConfig, request: SitemapRequest) -> String {
	match request {
		SitemapRequest::Robots => format!("{}|robots", site.host),
		SitemapRequest::Sitemap { variant, index, page } =>
			format!("{}|{:?}|{index}|{page}", site.host, variant),
	}
}

fn news_entry(site: &SiteConfig, item: &ScanItem) -> NewsEntry {
	let meta = &item.snapshot.page.meta;

	NewsEntry {
		publication: NewsPublication {
			name: site.news_publication.clone().unwrap_or_else(|| site.host.clone()),
			language: meta.locale.clone().unwrap_or_else(|| "en".into()),
		},
		publication_date: meta
			.published_at
			.unwrap_or(item.snapshot.times.rendered_at)
			.to_rfc3339(),
		title: meta.title.clone().unwrap_or_else(|| item.key.url()),
	}
}

#[derive(Serialize)]
#[serde(rename = "urlset")]
struct Urlset {
	#[serde(rename = "@xmlns")]
	xmlns: &'static str,
	#[serde(rename = "@xmlns:news", skip_serializing_if = "Option::is_none")]
	xmlns_news: Option<&'static str>,
	#[serde(rename = "@xmlns:image", skip_serializing_if = "Option::is_none")]
	xmlns_image: Option<&'static str>,
	#[serde(rename = "@xmlns:video", skip_serializing_if = "Option::is_none")]
	xmlns_video: Option<&'static str>,
	url: Vec<UrlEntry>,
}

#[derive(Serialize)]
struct UrlEntry {
	loc: String,
	lastmod: String,
	#[serde(rename = "news:news", skip_serializing_if = "Option::is_none")]
	news: Option<NewsEntry>,
	#[serde(rename = "image:image", skip_serializing_if = "Vec::is_empty")]
	images: Vec<ImageEntry>,
	#[serde(rename = "video:video", skip_serializing_if = "Vec::is_empty")]
	videos: Vec<VideoEntry>,
}

#[derive(Serialize)]
struct NewsEntry {
	#[serde(rename = "news:publication")]
	publication: NewsPublication,
	#[serde(rename = "news:publication_date")]
	publication_date: String,
	#[serde(rename = "news:title")]
	title: String,
}

#[derive(Serialize)]
struct NewsPublication {
	#[serde(rename = "news:name")]
	name: String,
	#[serde(rename = "news:language")]
	language: String,
}

#[derive(Serialize)]
struct ImageEntry {
	#[serde(rename = "image:loc")]
	loc: String,
}

#[derive(Serialize)]
struct VideoEntry {
	#[serde(rename = "video:title")]
	title: String,
	#[serde(rename = "video:content_loc")]
	content_loc: String,
}

#[derive(Serialize)]
#[serde(rename = "sitemapindex")]
struct SitemapIndex {
	#[serde(rename = "@xmlns")]
	xmlns: &'static str,
	sitemap: Vec<IndexEntry>,
}

#[derive(Serialize)]
struct IndexEntry {
	loc: String,
}
