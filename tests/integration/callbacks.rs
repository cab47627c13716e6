//! Callback delivery once renders settle, including the retry schedule.

// std
use std::time::Duration;
// crates.io
use http::StatusCode;
use kasha::config::Config;
use tokio::time::{sleep, timeout};
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};
// self
use crate::helpers::{API_HOST, gateway, get, spawn_worker};

async fn received(server: &MockServer, count: usize) {
	timeout(Duration::from_secs(10), async {
		loop {
			let requests = server.received_requests().await.unwrap_or_default();

			if requests.len() >= count {
				break;
			}

			sleep(Duration::from_millis(25)).await;
		}
	})
	.await
	.expect("callback arrives");
}

#[tokio::test]
async fn successful_renders_notify_the_callback_url() {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.and(path("/hook"))
		.respond_with(ResponseTemplate::new(200))
		.expect(1)
		.mount(&server)
		.await;

	let harness = gateway(Config::default());
	let _worker = spawn_worker(&harness);
	let uri = format!(
		"/render?url=https://ex.com/a&noWait&callbackUrl={}/hook",
		server.uri()
	);
	let response = get(&harness.router, API_HOST, &uri).await;

	assert_eq!(response.status(), StatusCode::ACCEPTED);

	received(&server, 1).await;

	let requests = server.received_requests().await.expect("requests");
	let body: serde_json::Value =
		serde_json::from_slice(&requests[0].body).expect("callback json");

	assert_eq!(body["ok"], true);
	assert_eq!(body["key"]["site"], "https://ex.com");
	assert_eq!(body["key"]["path"], "/a");
	assert!(body.get("errorKind").is_none());

	server.verify().await;
}

#[tokio::test]
async fn failed_callbacks_retry_on_the_backoff_schedule() {
	let server = MockServer::start().await;
	let flaky = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
	let counter = flaky.clone();

	Mock::given(method("POST")).and(path("/hook")).respond_with(
		move |_: &wiremock::Request| {
			if counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
				ResponseTemplate::new(500)
			} else {
				ResponseTemplate::new(200)
			}
		},
	)
	.mount(&server)
	.await;

	let harness = gateway(Config::default());
	let _worker = spawn_worker(&harness);
	let uri = format!(
		"/render?url=https://ex.com/retry&noWait&callbackUrl={}/hook",
		server.uri()
	);

	get(&harness.router, API_HOST, &uri).await;

	// First attempt fails; the retry lands after the 1 s backoff.
	received(&server, 2).await;

	assert_eq!(flaky.load(std::sync::atomic::Ordering::SeqCst), 2);
}

#[tokio::test]
async fn worker_failures_report_the_error_kind() {
	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.and(path("/hook"))
		.respond_with(ResponseTemplate::new(200))
		.expect(1)
		.mount(&server)
		.await;

	let config = Config { worker_timeout: 1, ..Config::default() };
	let harness = gateway(config);
	let sweeper = harness.registry.spawn_sweeper();
	let uri = format!(
		"/render?url=https://ex.com/dead&noWait&callbackUrl={}/hook",
		server.uri()
	);
	let response = get(&harness.router, API_HOST, &uri).await;

	assert_eq!(response.status(), StatusCode::ACCEPTED);

	// No worker answers; the sweeper fails the render and the callback
	// reports the timeout.
	received(&server, 1).await;
	sweeper.abort();

	let requests = server.received_requests().await.expect("requests");
	let body: serde_json::Value =
		serde_json::from_slice(&requests[0].body).expect("callback json");

	assert_eq!(body["ok"], false);
	assert_eq!(body["errorKind"], "SERVER_WORKER_TIMEOUT");

	server.verify().await;
}
