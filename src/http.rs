//! HTTP front: method gating, mode selection, routing, and response
//! formatting.

pub mod forwarded;
pub mod respond;
pub mod router;

pub use router::{AppState, router};
