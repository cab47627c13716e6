//! The request→render dispatcher and its freshness state machine.

// crates.io
use tokio::{sync::oneshot, time};
use url::Url;
// self
use crate::{
	_prelude::*,
	bus::{RenderJob, WorkerBus},
	config::Config,
	error::Code,
	render::{
		callback::{CallbackDispatcher, CallbackPayload},
		pending::{Fingerprint, PendingRenders, RenderOutcome, Ticket},
	},
	site::{SiteConfig, SiteResolver},
	snapshot::{CacheStatus, DeviceType, Freshness, RenderType, Snapshot, SnapshotKey},
	store::SnapshotStore,
};

/// Inputs of one render request, after HTTP-level parsing.
#[derive(Clone, Debug)]
pub struct RenderRequest {
	/// Target origin, e.g. `https://example.com`.
	pub site: String,
	/// Site-relative path including query.
	pub path: String,
	/// Device class to render for.
	pub device_type: DeviceType,
	/// Artifact kind.
	pub render_type: RenderType,
	/// Callback POSTed once the render settles.
	pub callback_url: Option<String>,
	/// Respond immediately with 202 instead of waiting for the render.
	pub no_wait: bool,
	/// Skip the cache and force a fresh render.
	pub refresh: bool,
	/// Strip the body from the response.
	pub meta_only: bool,
}
impl RenderRequest {
	/// A plain waiting HTML render of `site` + `path`.
	pub fn page(site: impl Into<String>, path: impl Into<String>) -> Self {
		Self {
			site: site.into(),
			path: path.into(),
			device_type: DeviceType::Desktop,
			render_type: RenderType::Html,
			callback_url: None,
			no_wait: false,
			refresh: false,
			meta_only: false,
		}
	}
}

/// Outcome handed to the HTTP front.
#[derive(Clone, Debug)]
pub struct RenderResponse {
	/// Snapshot to serve; absent for `no_wait` acceptances.
	pub snapshot: Option<Arc<Snapshot>>,
	/// Cache disposition for the response headers.
	pub cache: CacheStatus,
}

/// Orchestrates policy lookup, cache decisions, dispatch, and callbacks.
#[derive(Clone)]
pub struct Coordinator {
	resolver: SiteResolver,
	store: Arc<dyn SnapshotStore>,
	registry: PendingRenders,
	bus: Arc<dyn WorkerBus>,
	callbacks: CallbackDispatcher,
	reply_topic: String,
	worker_timeout: Duration,
	disallow_unknown_site: bool,
}
impl Coordinator {
	/// Wire a coordinator over its collaborators.
	pub fn new(
		config: &Config,
		reply_topic: String,
		resolver: SiteResolver,
		store: Arc<dyn SnapshotStore>,
		registry: PendingRenders,
		bus: Arc<dyn WorkerBus>,
		callbacks: CallbackDispatcher,
	) -> Self {
		Self {
			resolver,
			store,
			registry,
			bus,
			callbacks,
			reply_topic,
			worker_timeout: config.worker_timeout(),
			disallow_unknown_site: config.disallow_unknown_site,
		}
	}

	/// Serve a render request according to the freshness state machine:
	/// fresh snapshots are returned as-is, stale-but-shareable snapshots are
	/// returned while a background refresh runs, anything else blocks on a
	/// deduplicated render.
	#[tracing::instrument(
		skip(self, request),
		fields(site = %request.site, path = %request.path, device = %request.device_type)
	)]
	pub async fn render(&self, request: RenderRequest) -> Result<RenderResponse> {
		let key = self.keyed(&request).await?;

		if !request.refresh
			&& let Some(snapshot) = self.store.get(&key).await?
		{
			match snapshot.freshness(Utc::now()) {
				Freshness::Fresh =>
					return Ok(RenderResponse {
						snapshot: Some(Arc::new(snapshot)),
						cache: CacheStatus::Fresh,
					}),
				Freshness::Stale => {
					tracing::debug!(key = %key, "serving stale snapshot, refreshing in background");
					self.refresh_in_background(
						key,
						request.callback_url.clone(),
						request.meta_only,
					);

					return Ok(RenderResponse {
						snapshot: Some(Arc::new(snapshot)),
						cache: CacheStatus::StaleRevalidating,
					});
				},
				Freshness::Expired => {},
			}
		}

		let waiter = self
			.dispatch(&key, request.callback_url.clone(), request.no_wait, request.meta_only)
			.await?;
		let Some(waiter) = waiter else {
			return Ok(RenderResponse { snapshot: None, cache: CacheStatus::Updating });
		};

		self.await_outcome(waiter).await
	}

	async fn await_outcome(
		&self,
		waiter: oneshot::Receiver<RenderOutcome>,
	) -> Result<RenderResponse> {
		match time::timeout(self.worker_timeout, waiter).await {
			Ok(Ok(Ok(snapshot))) =>
				Ok(RenderResponse { snapshot: Some(snapshot), cache: CacheStatus::Updated }),
			Ok(Ok(Err(failure))) => Err(failure.into()),
			Ok(Err(_)) =>
				Err(Error::Bus("Render abandoned without a reply or a sweep.".into())),
			Err(_) => Err(Error::Render {
				code: Code::ServerWorkerTimeout,
				message: "No worker reply within the timeout window.".into(),
			}),
		}
	}

	/// Resolve the site policy and derive the snapshot key for a request.
	async fn keyed(&self, request: &RenderRequest) -> Result<SnapshotKey> {
		let url = Url::parse(&request.site).map_err(|_| {
			Error::client(Code::ClientInvalidParam, format!("Invalid site origin '{}'.", request.site))
		})?;

		if !matches!(url.scheme(), "http" | "https") {
			return Err(Error::client(
				Code::ClientInvalidProtocol,
				format!("Protocol '{}' is not http or https.", url.scheme()),
			));
		}

		let host = url
			.host_str()
			.ok_or_else(|| Error::client(Code::ClientInvalidParam, "Site origin has no host."))?;
		let host = match url.port() {
			Some(port) => format!("{host}:{port}"),
			None => host.to_string(),
		};
		let config = self.resolver.resolve(&host).await?;

		if config.is_none() && self.disallow_unknown_site {
			return Err(Error::client(
				Code::ClientHostConfigNotExist,
				format!("No site configuration exists for '{host}'."),
			));
		}

		let config = config.unwrap_or_else(|| {
			let mut fallback = SiteConfig::fallback(host.clone());

			fallback.default_protocol = url.scheme().to_string();

			Arc::new(fallback)
		});
		let path = config.rewrite(&request.path);

		if !config.indexable("*", &path) {
			return Err(Error::Robots { site: config.origin(), path });
		}

		Ok(SnapshotKey::new(config.origin(), path, request.device_type, request.render_type))
	}

	/// Lead or join the deduplicated render for a key.
	///
	/// Returns the waiter to block on, or `None` for detached dispatches.
	async fn dispatch(
		&self,
		key: &SnapshotKey,
		callback_url: Option<String>,
		no_wait: bool,
		meta_only: bool,
	) -> Result<Option<oneshot::Receiver<RenderOutcome>>> {
		let fingerprint = Fingerprint { key: key.clone(), callback_url: callback_url.clone() };

		match self.registry.begin_or_join(fingerprint.clone(), no_wait).await {
			Ticket::Joined { waiter } => Ok(waiter),
			Ticket::Leader { correlation_id, waiter } => {
				// The observer attaches before publish so even an immediate
				// reply cannot race past the callback.
				if let Some(url) = callback_url.clone()
					&& let Some(observer) = self.registry.watch(&fingerprint).await
				{
					self.spawn_callback(url, key.clone(), observer);
				}

				let job = RenderJob {
					correlation_id: correlation_id.clone(),
					reply_topic: self.reply_topic.clone(),
					url: key.url(),
					device_type: key.device_type,
					render_type: key.render_type,
					callback_url,
					meta_only,
				};

				if let Err(err) = self.bus.publish(&job).await {
					self.registry
						.fail(
							&correlation_id,
							Code::ServerInternalError,
							"Failed to publish the render job.",
						)
						.await;

					return Err(err);
				}

				Ok(waiter)
			},
		}
	}

	fn refresh_in_background(
		&self,
		key: SnapshotKey,
		callback_url: Option<String>,
		meta_only: bool,
	) {
		let coordinator = self.clone();

		tokio::spawn(async move {
			if let Err(err) = coordinator.dispatch(&key, callback_url, true, meta_only).await {
				tracing::warn!(key = %key, error = %err, "background refresh dispatch failed");
			}
		});
	}

	fn spawn_callback(
		&self,
		url: String,
		key: SnapshotKey,
		observer: oneshot::Receiver<RenderOutcome>,
	) {
		let dispatcher = self.callbacks.clone();

		tokio::spawn(async move {
			let payload = match observer.await {
				Ok(Ok(_)) => CallbackPayload { ok: true, key, error_kind: None },
				Ok(Err(failure)) => CallbackPayload {
					ok: false,
					key,
					error_kind: Some(failure.code.as_str().to_string()),
				},
				Err(_) => CallbackPayload {
					ok: false,
					key,
					error_kind: Some(Code::ServerInternalError.as_str().to_string()),
				},
			};

			dispatcher.notify(&url, payload).await;
		});
	}
}
