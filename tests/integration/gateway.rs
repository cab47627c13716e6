//! End-to-end render scenarios over the HTTP front.

// std
use std::time::Duration;
// crates.io
use futures::future::join_all;
use http::{Request, StatusCode};
use kasha::{
	config::Config,
	site::SiteConfig,
	snapshot::{DeviceType, RenderType, SnapshotKey},
	store::SnapshotStore,
};
use serde_json::Value;
use tokio::time::{Instant, sleep, timeout};
use tower::ServiceExt;
// self
use crate::helpers::{API_HOST, body_string, gateway, get, seed_snapshot, spawn_worker};

fn html_key(path: &str) -> SnapshotKey {
	SnapshotKey::new("https://ex.com", path, DeviceType::Desktop, RenderType::Html)
}

#[tokio::test]
async fn cold_fetch_renders_persists_and_returns_the_content() {
	let _ = tracing_subscriber::fmt::try_init();

	let harness = gateway(Config::default());
	let mut jobs = harness.bus.subscribe_jobs();
	let _worker = spawn_worker(&harness);
	let response =
		get(&harness.router, API_HOST, "/render?url=https://ex.com/a&deviceType=desktop&type=html")
			.await;

	assert_eq!(response.status(), StatusCode::OK);
	assert_eq!(response.headers().get("kasha-cache").unwrap(), "updated");

	let body: Value = serde_json::from_str(&body_string(response).await).expect("json");

	assert_eq!(body["status"], 200);
	assert_eq!(body["content"], "<h1>https://ex.com/a</h1>");

	// Exactly one job went out, and the snapshot is persisted.
	let job = jobs.recv().await.expect("job");

	assert_eq!(job.url, "https://ex.com/a");
	assert!(jobs.try_recv().is_err());

	let stored = harness.store.get(&html_key("/a")).await.expect("get").expect("stored");

	assert_eq!(stored.page.content.as_deref(), Some("<h1>https://ex.com/a</h1>"));
}

#[tokio::test]
async fn warm_fresh_hits_emit_no_jobs() {
	let harness = gateway(Config::default());

	seed_snapshot(&harness.store, &html_key("/a"), "<h1>warm</h1>", 60, 180, 86_400).await;

	let mut jobs = harness.bus.subscribe_jobs();
	let response = get(&harness.router, API_HOST, "/render?url=https://ex.com/a").await;

	assert_eq!(response.status(), StatusCode::OK);
	assert_eq!(response.headers().get("kasha-cache").unwrap(), "fresh");

	let body: Value = serde_json::from_str(&body_string(response).await).expect("json");

	assert_eq!(body["content"], "<h1>warm</h1>");
	assert!(jobs.try_recv().is_err());
}

#[tokio::test]
async fn stale_snapshots_serve_immediately_and_refresh_behind() {
	let harness = gateway(Config::default());

	seed_snapshot(&harness.store, &html_key("/a"), "<h1>old</h1>", 300, 180, 86_400).await;

	let mut jobs = harness.bus.subscribe_jobs();
	let _worker = spawn_worker(&harness);
	let response = get(&harness.router, API_HOST, "/render?url=https://ex.com/a").await;

	assert_eq!(response.headers().get("kasha-cache").unwrap(), "stale-revalidating");

	let body: Value = serde_json::from_str(&body_string(response).await).expect("json");

	assert_eq!(body["content"], "<h1>old</h1>");

	// Exactly one background job refreshes the snapshot.
	let job = jobs.recv().await.expect("background job");

	assert_eq!(job.url, "https://ex.com/a");

	let refreshed = timeout(Duration::from_secs(2), async {
		loop {
			let stored = harness.store.get(&html_key("/a")).await.expect("get").expect("stored");

			if stored.page.content.as_deref() == Some("<h1>https://ex.com/a</h1>") {
				break stored;
			}

			sleep(Duration::from_millis(10)).await;
		}
	})
	.await
	.expect("refresh lands");

	assert!(jobs.try_recv().is_err());
	assert_eq!(refreshed.page.status, 200);
}

#[tokio::test]
async fn a_burst_of_identical_requests_shares_one_render() {
	let harness = gateway(Config::default());
	let mut jobs = harness.bus.subscribe_jobs();
	let requests = (0..100).map(|_| {
		let router = harness.router.clone();

		async move {
			let response =
				get(&router, API_HOST, "/render?url=https://ex.com/burst").await;

			assert_eq!(response.status(), StatusCode::OK);

			let body: Value = serde_json::from_str(&body_string(response).await).expect("json");

			body["content"].as_str().expect("content").to_string()
		}
	});
	let responses = tokio::spawn(join_all(requests));

	// One job for the whole burst; let every request join the pending entry
	// before answering it once.
	let job = jobs.recv().await.expect("job");

	sleep(Duration::from_millis(250)).await;
	let reply = kasha::bus::RenderReply {
		correlation_id: job.correlation_id.clone(),
		ok: true,
		snapshot: Some(kasha::snapshot::RenderedPage {
			status: 200,
			content: Some("<h1>burst</h1>".into()),
			..Default::default()
		}),
		key: None,
		error_kind: None,
		error_message: None,
	};

	harness.registry.complete(reply).await.expect("complete");

	let bodies = responses.await.expect("burst");

	assert_eq!(bodies.len(), 100);
	assert!(bodies.iter().all(|content| content == "<h1>burst</h1>"));
	assert!(jobs.try_recv().is_err());
	assert_eq!(harness.store.put_count(), 1);
}

#[tokio::test]
async fn worker_silence_times_out_and_a_retry_starts_fresh() {
	let config = Config { worker_timeout: 1, ..Config::default() };
	let harness = gateway(config);
	let mut jobs = harness.bus.subscribe_jobs();
	let response = get(&harness.router, API_HOST, "/render?url=https://ex.com/slow").await;

	assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
	assert_eq!(response.headers().get("kasha-code").unwrap(), "SERVER_WORKER_TIMEOUT");
	assert!(jobs.recv().await.is_ok());

	// The sweeper clears the dead entry, so the next request leads again.
	harness.registry.sweep_expired(Instant::now() + Duration::from_secs(2)).await;

	let _worker = spawn_worker(&harness);
	let response = get(&harness.router, API_HOST, "/render?url=https://ex.com/slow").await;

	assert_eq!(response.status(), StatusCode::OK);
	assert!(jobs.recv().await.is_ok());
}

#[tokio::test]
async fn no_wait_returns_accepted_and_persists_later() {
	let harness = gateway(Config::default());
	let _worker = spawn_worker(&harness);
	let response = get(&harness.router, API_HOST, "/cache?url=https://ex.com/a").await;

	assert_eq!(response.status(), StatusCode::ACCEPTED);
	assert_eq!(response.headers().get("kasha-cache").unwrap(), "updating");

	timeout(Duration::from_secs(2), async {
		loop {
			if harness.store.get(&html_key("/a")).await.expect("get").is_some() {
				break;
			}

			sleep(Duration::from_millis(10)).await;
		}
	})
	.await
	.expect("persisted");
}

#[tokio::test]
async fn proxy_mode_serves_raw_html_for_the_forwarded_site() {
	let harness = gateway(Config::default());

	harness.store.insert_site(SiteConfig::fallback("site.test")).await;
	seed_snapshot(
		&harness.store,
		&SnapshotKey::new("https://site.test", "/page", DeviceType::Desktop, RenderType::Html),
		"<h1>proxied</h1>",
		10,
		180,
		86_400,
	)
	.await;

	let direct = get(&harness.router, "site.test", "/page").await;

	assert_eq!(direct.status(), StatusCode::OK);
	assert_eq!(
		direct.headers().get("content-type").unwrap(),
		"text/html; charset=utf-8"
	);
	assert_eq!(body_string(direct).await, "<h1>proxied</h1>");

	// The same page through an edge proxy using RFC 7239 forwarding.
	let request = Request::builder()
		.method("GET")
		.uri("/page")
		.header("host", "edge.internal")
		.header("forwarded", "for=192.0.2.1;host=site.test;proto=https")
		.body(axum::body::Body::empty())
		.expect("request");
	let forwarded = harness.router.clone().oneshot(request).await.expect("response");

	assert_eq!(forwarded.status(), StatusCode::OK);
	assert_eq!(body_string(forwarded).await, "<h1>proxied</h1>");
}

#[tokio::test]
async fn invalid_inputs_map_to_client_error_codes() {
	let harness = gateway(Config::default());

	let missing = get(&harness.router, API_HOST, "/render").await;

	assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
	assert_eq!(missing.headers().get("kasha-code").unwrap(), "CLIENT_INVALID_PARAM");

	let protocol = get(&harness.router, API_HOST, "/render?url=ftp://ex.com/a").await;

	assert_eq!(protocol.status(), StatusCode::BAD_REQUEST);
	assert_eq!(protocol.headers().get("kasha-code").unwrap(), "CLIENT_INVALID_PROTOCOL");

	let unknown = get(&harness.router, API_HOST, "/definitely-not-an-api").await;

	assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
	assert_eq!(unknown.headers().get("kasha-code").unwrap(), "CLIENT_NO_SUCH_API");

	let request = Request::builder()
		.method("POST")
		.uri("/render?url=https://ex.com/a")
		.header("host", API_HOST)
		.body(axum::body::Body::empty())
		.expect("request");
	let post = harness.router.clone().oneshot(request).await.expect("response");

	assert_eq!(post.status(), StatusCode::METHOD_NOT_ALLOWED);

	let head = Request::builder()
		.method("HEAD")
		.uri("/")
		.header("host", API_HOST)
		.body(axum::body::Body::empty())
		.expect("request");
	let probe = harness.router.clone().oneshot(head).await.expect("response");

	assert_eq!(probe.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_hosts_are_rejected_when_disallowed() {
	let config = Config { disallow_unknown_site: true, ..Config::default() };
	let harness = gateway(config);
	let response = get(&harness.router, "stranger.test", "/page").await;

	assert_eq!(response.status(), StatusCode::NOT_FOUND);
	assert_eq!(
		response.headers().get("kasha-code").unwrap(),
		"CLIENT_HOST_CONFIG_NOT_EXIST"
	);
}
