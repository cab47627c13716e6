//! Shared wiring: a full gateway over the embedded backends plus a fake
//! worker that answers every published job.

// std
use std::{sync::Arc, time::Duration};
// crates.io
use axum::{
	Router,
	body::{Body, to_bytes},
	response::Response,
};
use http::Request;
use kasha::{
	bus::{RenderReply, WorkerBus, memory::MemoryBus},
	config::Config,
	http::{AppState, router},
	render::{CallbackDispatcher, Coordinator, PendingRenders},
	site::SiteResolver,
	sitemap::SitemapService,
	snapshot::{RenderedPage, Snapshot, SnapshotKey},
	store::{SiteConfigSource, SnapshotStore, memory::MemoryStore},
};
use tokio::task::JoinHandle;
use tower::ServiceExt;

/// Hostname that selects API mode in tests.
pub const API_HOST: &str = "kasha.test";

pub struct TestGateway {
	pub router: Router,
	pub store: Arc<MemoryStore>,
	pub bus: Arc<MemoryBus>,
	pub registry: PendingRenders,
}

/// Build a gateway over memory backends, mirroring the production wiring.
pub fn gateway(mut config: Config) -> TestGateway {
	if config.api_host.is_empty() {
		config.api_host = vec![API_HOST.to_string()];
	}

	let config = Arc::new(config);
	let store = Arc::new(MemoryStore::new());
	let bus = Arc::new(MemoryBus::new());
	let registry = PendingRenders::new(
		store.clone() as Arc<dyn SnapshotStore>,
		config.cache.maxage(),
		config.cache.s_maxage(),
		config.worker_timeout(),
	);
	let resolver = SiteResolver::new(store.clone() as Arc<dyn SiteConfigSource>);
	let coordinator = Coordinator::new(
		&config,
		"render_reply.test".into(),
		resolver.clone(),
		store.clone(),
		registry.clone(),
		bus.clone() as Arc<dyn WorkerBus>,
		CallbackDispatcher::new().expect("dispatcher"),
	);
	let sitemaps = SitemapService::new(
		store.clone() as Arc<dyn SnapshotStore>,
		Duration::from_secs(config.cache.sitemap),
	);
	let app = router(AppState { config, coordinator, sitemaps, resolver });

	TestGateway { router: app, store, bus, registry }
}

/// Answer every published job with `<h1>{url}</h1>`.
pub fn spawn_worker(gateway: &TestGateway) -> JoinHandle<()> {
	let mut jobs = gateway.bus.subscribe_jobs();
	let registry = gateway.registry.clone();

	tokio::spawn(async move {
		while let Ok(job) = jobs.recv().await {
			let reply = RenderReply {
				correlation_id: job.correlation_id,
				ok: true,
				snapshot: Some(RenderedPage {
					status: 200,
					content: Some(format!("<h1>{}</h1>", job.url)),
					..Default::default()
				}),
				key: None,
				error_kind: None,
				error_message: None,
			};

			let _ = registry.complete(reply).await;
		}
	})
}

/// Issue one GET through the router with an explicit `Host` header.
pub async fn get(router: &Router, host: &str, path_and_query: &str) -> Response {
	let request = Request::builder()
		.method("GET")
		.uri(path_and_query)
		.header("host", host)
		.body(Body::empty())
		.expect("request");

	router.clone().oneshot(request).await.expect("response")
}

/// Drain a response body into a string.
pub async fn body_string(response: Response) -> String {
	let bytes = to_bytes(response.into_body(), 64 * 1024 * 1024).await.expect("body");

	String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

/// Seed a stored snapshot rendered at `rendered_secs_ago`.
pub async fn seed_snapshot(
	store: &MemoryStore,
	key: &SnapshotKey,
	content: &str,
	rendered_secs_ago: i64,
	maxage: u64,
	s_maxage: u64,
) {
	let page =
		RenderedPage { status: 200, content: Some(content.into()), ..Default::default() };
	let snapshot = Snapshot::from_page(
		page,
		chrono::Utc::now() - chrono::TimeDelta::seconds(rendered_secs_ago),
		Duration::from_secs(maxage),
		Duration::from_secs(s_maxage),
	);

	store.put(key, snapshot).await.expect("seed snapshot");
}
