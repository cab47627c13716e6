//! Prerender gateway and cache: serves hydrated HTML, sitemap, and robots
//! artifacts for client-side-rendered sites, dispatching render work to a
//! pool of headless-browser workers over a message bus.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod bus;
pub mod config;
pub mod http;
pub mod janitor;
pub mod render;
pub mod server;
pub mod site;
pub mod sitemap;
pub mod snapshot;
pub mod store;

mod error;
mod _prelude {
	pub use std::{sync::Arc, time::Duration};

	pub use chrono::{DateTime, TimeDelta, Utc};
	pub use tokio::time::Instant;

	pub use crate::{Error, Result};
}
pub use crate::error::{Code, Error, Result};
