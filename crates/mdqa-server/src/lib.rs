//! WebSocket Q&A server over indexed markdown collections.

pub mod protocol;
pub mod query;
pub mod reload;
pub mod state;
pub mod ws;

pub use state::{AppState, QueryOptions};
pub use ws::build_router;
