//! Sitemap pagination and robots behaviour over a large cached site.

// crates.io
use http::StatusCode;
use kasha::{
	config::Config,
	site::SiteConfig,
	snapshot::{DeviceType, RenderType, SnapshotKey},
};
// self
use crate::helpers::{body_string, gateway, get, seed_snapshot};

const SITE: &str = "big.test";
const TOTAL: usize = 120_000;

async fn seeded_gateway() -> crate::helpers::TestGateway {
	let harness = gateway(Config::default());

	harness.store.insert_site(SiteConfig::fallback(SITE)).await;

	for index in 0..TOTAL {
		let key = SnapshotKey::new(
			format!("https://{SITE}"),
			format!("/page-{index:06}"),
			DeviceType::Desktop,
			RenderType::Html,
		);

		seed_snapshot(&harness.store, &key, "<html/>", 10, 180, 86_400).await;
	}

	harness
}

#[tokio::test]
async fn pages_split_at_fifty_thousand_urls() {
	let harness = seeded_gateway().await;

	let first = get(&harness.router, SITE, "/sitemap.1.xml").await;

	assert_eq!(first.status(), StatusCode::OK);

	let body = body_string(first).await;

	assert_eq!(body.matches("<loc>").count(), 50_000);
	assert!(body.contains("<loc>https://big.test/page-000000</loc>"));
	assert!(body.contains("<loc>https://big.test/page-049999</loc>"));

	let third = get(&harness.router, SITE, "/sitemap.3.xml").await;
	let body = body_string(third).await;

	assert_eq!(body.matches("<loc>").count(), 20_000);
	assert!(body.contains("<loc>https://big.test/page-119999</loc>"));

	let fourth = get(&harness.router, SITE, "/sitemap.4.xml").await;

	assert_eq!(fourth.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn the_index_references_each_page_once() {
	let harness = seeded_gateway().await;
	let index = get(&harness.router, SITE, "/sitemap.index.1.xml").await;

	assert_eq!(index.status(), StatusCode::OK);

	let body = body_string(index).await;

	assert!(body.contains("<loc>https://big.test/sitemap.1.xml</loc>"));
	assert!(body.contains("<loc>https://big.test/sitemap.2.xml</loc>"));
	assert!(body.contains("<loc>https://big.test/sitemap.3.xml</loc>"));
	assert!(!body.contains("sitemap.4.xml"));
}

#[tokio::test]
async fn repeated_requests_yield_identical_documents() {
	let harness = gateway(Config::default());

	harness.store.insert_site(SiteConfig::fallback(SITE)).await;

	for index in 0..5 {
		let key = SnapshotKey::new(
			format!("https://{SITE}"),
			format!("/page-{index}"),
			DeviceType::Desktop,
			RenderType::Html,
		);

		seed_snapshot(&harness.store, &key, "<html/>", 10, 180, 86_400).await;
	}

	let first = body_string(get(&harness.router, SITE, "/sitemap.1.xml").await).await;
	let second = body_string(get(&harness.router, SITE, "/sitemap.1.xml").await).await;

	assert_eq!(first, second);
}

#[tokio::test]
async fn robots_and_sitemaps_resolve_in_api_mode_too() {
	let harness = gateway(Config::default());

	harness.store.insert_site(SiteConfig::fallback(SITE)).await;

	let key = SnapshotKey::new(
		format!("https://{SITE}"),
		"/only-page",
		DeviceType::Desktop,
		RenderType::Html,
	);

	seed_snapshot(&harness.store, &key, "<html/>", 10, 180, 86_400).await;

	let robots =
		get(&harness.router, crate::helpers::API_HOST, &format!("/sitemaps/{SITE}/robots.txt"))
			.await;

	assert_eq!(robots.status(), StatusCode::OK);

	let body = body_string(robots).await;

	assert!(body.contains("User-agent: *"));
	assert!(body.contains(&format!("Sitemap: https://{SITE}/sitemap.index.xml")));

	let sitemap =
		get(&harness.router, crate::helpers::API_HOST, &format!("/sitemaps/{SITE}/sitemap.xml"))
			.await;

	assert_eq!(sitemap.status(), StatusCode::OK);
	assert_eq!(sitemap.headers().get("cache-control").unwrap(), "max-age=3600");
	assert!(body_string(sitemap).await.contains("/only-page"));
}
