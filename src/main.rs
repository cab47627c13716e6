//! Gateway binary entry point.

// crates.io
use clap::Parser;
// self
use kasha::{
	Result,
	config::{self, Args, Config},
	server,
};

#[tokio::main]
async fn main() -> Result<()> {
	let args = Args::parse();
	let config = Config::load(args.config.as_deref())?;

	config::init_tracing(&config.log_level);
	tracing::debug!(?config, "configuration loaded");

	server::run(config).await
}
