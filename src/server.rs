//! Process wiring, backend selection, and graceful shutdown.

// crates.io
use tokio::{net::TcpListener, signal, sync::watch, task::JoinHandle, time};
// self
use crate::{
	_prelude::*,
	bus::{self, WorkerBus, memory::MemoryBus, redis::RedisBus},
	config::Config,
	http::{self, AppState},
	janitor::Janitor,
	render::{CallbackDispatcher, Coordinator, PendingRenders},
	site::SiteResolver,
	sitemap::SitemapService,
	store::{SiteConfigSource, SnapshotStore, memory::MemoryStore, redis::RedisStore},
};

/// Grace given to in-flight requests once draining starts.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(25);

/// Shutdown phases; transitions are monotone and idempotent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
	/// Accepting and serving requests.
	Running,
	/// Listener stopped accepting; in-flight requests finishing.
	Draining,
	/// Bus subscription, store, and janitor shutting down in order.
	Closing,
	/// Everything released.
	Closed,
}

/// Watchable shutdown state machine.
pub struct Lifecycle {
	tx: watch::Sender<Phase>,
}
impl Lifecycle {
	/// Start in [`Phase::Running`].
	pub fn new() -> Self {
		Self { tx: watch::channel(Phase::Running).0 }
	}

	/// Advance to a later phase; earlier or equal phases are ignored.
	pub fn advance(&self, phase: Phase) {
		self.tx.send_if_modified(|current| {
			if *current < phase {
				tracing::info!(from = ?*current, to = ?phase, "lifecycle transition");

				*current = phase;

				true
			} else {
				false
			}
		});
	}

	/// Observe phase transitions.
	pub fn subscribe(&self) -> watch::Receiver<Phase> {
		self.tx.subscribe()
	}
}
impl Default for Lifecycle {
	fn default() -> Self {
		Self::new()
	}
}

/// Run the gateway until a shutdown signal completes the lifecycle.
pub async fn run(config: Config) -> Result<()> {
	let config = Arc::new(config);
	let (snapshots, sites) = open_store(&config)?;
	let registry = PendingRenders::new(
		snapshots.clone(),
		config.cache.maxage(),
		config.cache.s_maxage(),
		config.worker_timeout(),
	);
	let reply_topic = bus::reply_topic();
	let (worker_bus, reply_pump) = open_bus(&config, &reply_topic, registry.clone()).await?;
	let resolver = SiteResolver::new(sites);
	let coordinator = Coordinator::new(
		&config,
		reply_topic,
		resolver.clone(),
		snapshots.clone(),
		registry.clone(),
		worker_bus,
		CallbackDispatcher::new()?,
	);
	let sitemaps =
		SitemapService::new(snapshots.clone(), Duration::from_secs(config.cache.sitemap));
	let sweeper = registry.spawn_sweeper();
	let janitor = Janitor::new(snapshots.clone(), &config.cache).spawn();
	let app = http::router(AppState {
		config: config.clone(),
		coordinator,
		sitemaps,
		resolver,
	});
	let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;

	tracing::info!(port = config.port, "gateway listening");

	let lifecycle = Arc::new(Lifecycle::new());
	let shutdown = shutdown_signal(lifecycle.clone());
	let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown);
	let mut server = tokio::spawn(async move { serve.await });
	let mut phases = lifecycle.subscribe();

	tokio::select! {
		joined = &mut server => {
			// The listener ended on its own; tear down what remains.
			teardown(&lifecycle, reply_pump, sweeper, janitor);

			return match joined {
				Ok(result) => result.map_err(Error::from),
				Err(err) => Err(Error::Io(std::io::Error::other(err))),
			};
		},
		_ = wait_for(&mut phases, Phase::Draining) => {},
	}

	if time::timeout(SHUTDOWN_GRACE, &mut server).await.is_err() {
		tracing::warn!("drain grace expired; aborting remaining connections");
		server.abort();
	}

	teardown(&lifecycle, reply_pump, sweeper, janitor);
	tracing::info!("shutdown complete");

	Ok(())
}

fn open_store(config: &Config) -> Result<(Arc<dyn SnapshotStore>, Arc<dyn SiteConfigSource>)> {
	if config.store.url.starts_with("memory") {
		tracing::warn!("using the embedded in-memory store; state dies with the process");

		let store = Arc::new(MemoryStore::new());

		return Ok((store.clone(), store));
	}

	let store = Arc::new(RedisStore::connect(
		&config.store.url,
		&config.store.database,
		config.store.pool_size,
	)?);

	Ok((store.clone(), store))
}

async fn open_bus(
	config: &Config,
	reply_topic: &str,
	registry: PendingRenders,
) -> Result<(Arc<dyn WorkerBus>, Option<JoinHandle<()>>)> {
	if config.bus.writer.starts_with("memory") {
		tracing::warn!("using the embedded in-memory bus; no worker pool is attached");

		return Ok((Arc::new(MemoryBus::new()), None));
	}

	let worker_bus = RedisBus::connect(&config.bus.writer).await?;
	let pump =
		RedisBus::spawn_reply_pump(&config.bus.reader, reply_topic.to_string(), registry).await?;

	Ok((Arc::new(worker_bus), Some(pump)))
}

async fn shutdown_signal(lifecycle: Arc<Lifecycle>) {
	let interrupt = async {
		if let Err(err) = signal::ctrl_c().await {
			tracing::error!(error = %err, "failed to install the interrupt handler");
			std::future::pending::<()>().await;
		}
	};
	#[cfg(unix)]
	let terminate = async {
		match signal::unix::signal(signal::unix::SignalKind::terminate()) {
			Ok(mut stream) => {
				stream.recv().await;
			},
			Err(err) => {
				tracing::error!(error = %err, "failed to install the SIGTERM handler");
				std::future::pending::<()>().await;
			},
		}
	};
	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = interrupt => {},
		_ = terminate => {},
	}

	tracing::info!("shutdown signal received");
	lifecycle.advance(Phase::Draining);
}

async fn wait_for(phases: &mut watch::Receiver<Phase>, target: Phase) {
	while *phases.borrow() < target {
		if phases.changed().await.is_err() {
			return;
		}
	}
}

fn teardown(
	lifecycle: &Lifecycle,
	reply_pump: Option<JoinHandle<()>>,
	sweeper: JoinHandle<()>,
	janitor: JoinHandle<()>,
) {
	lifecycle.advance(Phase::Closing);

	// Ordered: bus subscription first, then background tasks; the store pool
	// is released when the last Arc drops.
	if let Some(pump) = reply_pump {
		pump.abort();
	}

	sweeper.abort();
	janitor.abort();
	lifecycle.advance(Phase::Closed);
}
