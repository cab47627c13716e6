//! Response formatting: JSON envelopes, proxy bodies, and error surfaces.

// crates.io
use axum::{
	body::Body,
	response::{IntoResponse, Response},
};
use http::{StatusCode, header};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;
// self
use crate::{
	_prelude::*,
	error::Code,
	render::RenderResponse,
	sitemap::SitemapDocument,
	snapshot::{CacheStatus, PageMeta, Snapshot},
};

/// Header mirroring the wire error code.
pub const KASHA_CODE: &str = "kasha-code";
/// Header carrying the cache disposition of a successful response.
pub const KASHA_CACHE: &str = "kasha-cache";

const HOMEPAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>kasha</title></head>
<body>
<h1>kasha prerender gateway</h1>
<p>This instance is up. Point a crawler at a configured site, or use the API:</p>
<ul>
<li><code>GET /render?url=&lt;url&gt;&amp;deviceType=desktop&amp;type=html</code></li>
<li><code>GET /cache?url=&lt;url&gt;</code> (detached refresh)</li>
<li><code>GET /sitemaps/&lt;host&gt;/sitemap.xml</code></li>
</ul>
</body>
</html>
"#;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RenderBody<'a> {
	status: u16,
	#[serde(skip_serializing_if = "Option::is_none")]
	redirect: Option<&'a String>,
	meta: &'a PageMeta,
	open_graph: &'a Map<String, Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	content: Option<&'a String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody<'a> {
	code: &'a str,
	message: String,
	timestamp: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	event_id: Option<String>,
}

/// Bare 200; the `HEAD` health probe.
pub fn empty_ok() -> Response {
	StatusCode::OK.into_response()
}

/// Static debug homepage for API mode.
pub fn homepage() -> Response {
	([(header::CONTENT_TYPE, "text/html; charset=utf-8")], HOMEPAGE).into_response()
}

/// JSON envelope for `/render` and `/cache`.
pub fn api(outcome: &RenderResponse, meta_only: bool) -> Response {
	let Some(snapshot) = &outcome.snapshot else {
		return accepted(outcome.cache);
	};
	let body = RenderBody {
		status: snapshot.page.status,
		redirect: snapshot.page.redirect.as_ref(),
		meta: &snapshot.page.meta,
		open_graph: &snapshot.page.open_graph,
		content: if meta_only { None } else { snapshot.page.content.as_ref() },
	};
	let mut response = axum::Json(&body).into_response();

	decorate(response.headers_mut(), snapshot, outcome.cache);

	response
}

/// Raw body for proxy mode: the snapshot's status, redirect, and content.
pub fn proxy(outcome: &RenderResponse, content_type: &'static str) -> Response {
	let Some(snapshot) = &outcome.snapshot else {
		return accepted(outcome.cache);
	};

	if let Some(redirect) = &snapshot.page.redirect {
		let status = StatusCode::from_u16(snapshot.page.status)
			.ok()
			.filter(StatusCode::is_redirection)
			.unwrap_or(StatusCode::FOUND);
		let mut response = (status, Body::empty()).into_response();

		if let Ok(value) = header::HeaderValue::from_str(redirect) {
			response.headers_mut().insert(header::LOCATION, value);
		}

		decorate(response.headers_mut(), snapshot, outcome.cache);

		return response;
	}

	let status = StatusCode::from_u16(snapshot.page.status).unwrap_or(StatusCode::OK);
	let body = snapshot.page.content.clone().unwrap_or_default();
	let mut response =
		(status, [(header::CONTENT_TYPE, content_type)], body).into_response();

	decorate(response.headers_mut(), snapshot, outcome.cache);

	response
}

/// Sitemap-family document with its `Cache-Control` window.
pub fn sitemap(document: &SitemapDocument, max_age: u64) -> Response {
	(
		[
			(header::CONTENT_TYPE, document.content_type.to_string()),
			(header::CACHE_CONTROL, format!("max-age={max_age}")),
		],
		document.body.clone(),
	)
		.into_response()
}

/// Structured error surface with the `Kasha-Code` header.
///
/// Unexpected errors are logged under a fresh event id and collapse to
/// `SERVER_INTERNAL_ERROR` on the wire.
pub fn error(err: &Error) -> Response {
	let code = err.code();
	let (message, event_id) = if code == Code::ServerInternalError {
		let event_id = Uuid::new_v4().to_string();

		tracing::error!(event_id, error = %err, "request failed unexpectedly");

		("Internal server error.".to_string(), Some(event_id))
	} else {
		(err.to_string(), None)
	};
	let body = ErrorBody {
		code: code.as_str(),
		message,
		timestamp: Utc::now().to_rfc3339(),
		event_id,
	};
	let mut response = (code.status(), axum::Json(&body)).into_response();

	if let Ok(value) = header::HeaderValue::from_str(code.as_str()) {
		response.headers_mut().insert(KASHA_CODE, value);
	}

	response
}

fn accepted(cache: CacheStatus) -> Response {
	let mut response = StatusCode::ACCEPTED.into_response();

	if let Ok(value) = header::HeaderValue::from_str(cache.as_str()) {
		response.headers_mut().insert(KASHA_CACHE, value);
	}

	response
}

fn decorate(headers: &mut header::HeaderMap, snapshot: &Snapshot, cache: CacheStatus) {
	if let Ok(value) = header::HeaderValue::from_str(cache.as_str()) {
		headers.insert(KASHA_CACHE, value);
	}

	let remaining = (snapshot.private_expires - Utc::now()).num_seconds().max(0);

	if let Ok(value) = header::HeaderValue::from_str(&format!("max-age={remaining}")) {
		headers.insert(header::CACHE_CONTROL, value);
	}
}
