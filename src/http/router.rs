//! Request dispatch: method gate → mode select → route → handler.

// crates.io
use axum::{Router, extract::State, response::Response};
use http::{HeaderMap, Method, Uri, header};
use url::Url;
// self
use crate::{
	_prelude::*,
	config::Config,
	error::Code,
	http::{forwarded, respond},
	render::{Coordinator, RenderRequest},
	site::{SiteConfig, SiteResolver, normalize_host},
	sitemap::{SitemapRequest, SitemapService, parse_sitemap_path},
	snapshot::{DeviceType, RenderType},
};

/// Shared state of the HTTP front.
#[derive(Clone)]
pub struct AppState {
	/// Gateway configuration.
	pub config: Arc<Config>,
	/// Render coordinator.
	pub coordinator: Coordinator,
	/// Sitemap aggregator.
	pub sitemaps: SitemapService,
	/// SiteConfig resolver.
	pub resolver: SiteResolver,
}

/// Build the router.
///
/// Everything funnels through one fallback handler: routing depends on the
/// `Host` header (API vs proxy mode), which axum's path router cannot see.
pub fn router(state: AppState) -> Router {
	Router::new().fallback(dispatch).with_state(state)
}

async fn dispatch(State(state): State<AppState>, request: axum::extract::Request) -> Response {
	let (parts, _) = request.into_parts();

	match handle(&state, parts.method, parts.uri, parts.headers).await {
		Ok(response) => response,
		Err(err) => respond::error(&err),
	}
}

async fn handle(
	state: &AppState,
	method: Method,
	uri: Uri,
	headers: HeaderMap,
) -> Result<Response> {
	// HEAD is the health probe; anything besides GET is refused.
	if method == Method::HEAD {
		return Ok(respond::empty_ok());
	}
	if method != Method::GET {
		return Err(Error::client(
			Code::ClientMethodNotAllowed,
			format!("Method '{method}' is not allowed."),
		));
	}

	let host_header =
		headers.get(header::HOST).and_then(|value| value.to_str().ok()).unwrap_or("");
	let host = normalize_host(host_header)?;

	if state.config.api_host.iter().any(|api_host| api_host == &host) {
		api(state, &uri).await
	} else {
		proxy(state, host, &uri, &headers).await
	}
}

async fn api(state: &AppState, uri: &Uri) -> Result<Response> {
	let path = uri.path();

	match path {
		"/" =>
			if state.config.enable_homepage {
				Ok(respond::homepage())
			} else {
				Err(no_such_api(path))
			},
		"/render" => render_api(state, uri, false).await,
		"/cache" => render_api(state, uri, true).await,
		_ => {
			if let Some(rest) = path.strip_prefix("/sitemaps/") {
				return sitemap_api(state, rest).await;
			}

			// `GET /<http(s)-url>` performs a static fetch of that URL.
			let target = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or(path);
			let target = target.strip_prefix('/').unwrap_or(target);

			if target.starts_with("http://") || target.starts_with("https://") {
				return static_fetch(state, target).await;
			}

			Err(no_such_api(path))
		},
	}
}

async fn render_api(state: &AppState, uri: &Uri, force_no_wait: bool) -> Result<Response> {
	let mut url = None;
	let mut device_type = DeviceType::Desktop;
	let mut render_type = RenderType::Html;
	let mut callback_url = None;
	let mut no_wait = force_no_wait;
	let mut refresh = false;
	let mut meta_only = false;

	for (name, value) in query_pairs(uri) {
		match name.as_str() {
			"url" => url = Some(value),
			"deviceType" => device_type = value.parse()?,
			"type" => render_type = value.parse()?,
			"noWait" => no_wait = no_wait || flag(&value),
			"refresh" => refresh = flag(&value),
			"metaOnly" => meta_only = flag(&value),
			"callbackUrl" => callback_url = Some(validated_callback(&value)?),
			// Unknown parameters are ignored, like any cache-busting query.
			_ => {},
		}
	}

	let url = url.ok_or_else(|| {
		Error::client(Code::ClientInvalidParam, "Missing required parameter 'url'.")
	})?;
	let (site, path) = split_target(&url)?;
	let outcome = state
		.coordinator
		.render(RenderRequest {
			site,
			path,
			device_type,
			render_type,
			callback_url,
			no_wait,
			refresh,
			meta_only,
		})
		.await?;

	Ok(respond::api(&outcome, meta_only))
}

async fn static_fetch(state: &AppState, target: &str) -> Result<Response> {
	let (site, path) = split_target(target)?;
	let mut request = RenderRequest::page(site, path);

	request.render_type = RenderType::Static;

	let outcome = state.coordinator.render(request).await?;

	Ok(respond::proxy(&outcome, "application/octet-stream"))
}

async fn sitemap_api(state: &AppState, rest: &str) -> Result<Response> {
	let (site_host, artifact) = rest
		.split_once('/')
		.ok_or_else(|| no_such_api(&format!("/sitemaps/{rest}")))?;
	let request = parse_sitemap_path(&format!("/{artifact}"))
		.ok_or_else(|| no_such_api(&format!("/sitemaps/{rest}")))?;

	serve_sitemap(state, site_host, request).await
}

async fn proxy(
	state: &AppState,
	host: String,
	uri: &Uri,
	headers: &HeaderMap,
) -> Result<Response> {
	let hints = forwarded::extract(headers)?;
	let host = match hints.host {
		Some(forwarded_host) => normalize_host(&forwarded_host)?,
		None => host,
	};

	if let Some(request) = parse_sitemap_path(uri.path()) {
		return serve_sitemap(state, &host, request).await;
	}

	let config = resolve_site(state, &host).await?;
	let proto = hints.proto.unwrap_or_else(|| config.default_protocol.clone());
	let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/").to_string();
	let outcome = state
		.coordinator
		.render(RenderRequest {
			site: format!("{proto}://{host}"),
			path,
			device_type: config.device_type,
			render_type: RenderType::Html,
			callback_url: None,
			no_wait: false,
			refresh: false,
			meta_only: false,
		})
		.await?;

	Ok(respond::proxy(&outcome, "text/html; charset=utf-8"))
}

async fn serve_sitemap(
	state: &AppState,
	host: &str,
	request: SitemapRequest,
) -> Result<Response> {
	let config = resolve_site(state, host).await?;
	let max_age = match request {
		SitemapRequest::Robots => state.config.cache.robots_txt,
		SitemapRequest::Sitemap { .. } => state.config.cache.sitemap,
	};

	match state.sitemaps.respond(&config, request).await? {
		Some(document) => Ok(respond::sitemap(&document, max_age)),
		None => Err(Error::client(
			Code::ClientNoSuchApi,
			"Sitemap page is beyond the last page.",
		)),
	}
}

async fn resolve_site(state: &AppState, host: &str) -> Result<Arc<SiteConfig>> {
	let config = state.resolver.resolve(host).await?;

	if config.is_none() && state.config.disallow_unknown_site {
		return Err(Error::client(
			Code::ClientHostConfigNotExist,
			format!("No site configuration exists for '{host}'."),
		));
	}

	Ok(config.unwrap_or_else(|| Arc::new(SiteConfig::fallback(host))))
}

fn no_such_api(path: &str) -> Error {
	Error::client(Code::ClientNoSuchApi, format!("No such API: '{path}'."))
}

fn query_pairs(uri: &Uri) -> Vec<(String, String)> {
	let Some(query) = uri.query() else { return Vec::new() };

	url::form_urlencoded::parse(query.as_bytes()).into_owned().collect()
}

/// A bare parameter (`&noWait`) or a truthy value counts as set.
fn flag(value: &str) -> bool {
	!matches!(value, "0" | "false" | "no")
}

fn validated_callback(value: &str) -> Result<String> {
	let url = Url::parse(value).map_err(|_| {
		Error::client(Code::ClientInvalidParam, format!("Invalid callbackUrl '{value}'."))
	})?;

	if !matches!(url.scheme(), "http" | "https") {
		return Err(Error::client(
			Code::ClientInvalidParam,
			"callbackUrl must be an http(s) URL.",
		));
	}

	Ok(value.to_string())
}

/// Split an absolute URL into `(origin, path-with-query)`.
fn split_target(raw: &str) -> Result<(String, String)> {
	let url = Url::parse(raw)
		.map_err(|_| Error::client(Code::ClientInvalidParam, format!("Invalid url '{raw}'.")))?;

	if !matches!(url.scheme(), "http" | "https") {
		return Err(Error::client(
			Code::ClientInvalidProtocol,
			format!("Protocol '{}' is not http or https.", url.scheme()),
		));
	}

	let host = url
		.host_str()
		.ok_or_else(|| Error::client(Code::ClientInvalidParam, "URL has no host."))?;
	let origin = match url.port() {
		Some(port) => format!("{}://{host}:{port}", url.scheme()),
		None => format!("{}://{host}", url.scheme()),
	};
	let mut path = url.path().to_string();

	if let Some(query) = url.query() {
		path = format!("{path}?{query}");
	}
	if path.is_empty() {
		path = "/".into();
	}

	Ok((origin, path))
}
