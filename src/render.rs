//! Render coordination: in-flight deduplication, the freshness state
//! machine, and callback notification.

pub mod callback;
pub mod coordinator;
pub mod pending;

pub use callback::{CallbackDispatcher, CallbackPayload, CallbackPolicy};
pub use coordinator::{Coordinator, RenderRequest, RenderResponse};
pub use pending::{Fingerprint, PendingRenders, RenderFailure, Ticket};
