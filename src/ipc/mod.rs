mod error;
mod handlers;
pub mod helpers;
mod router;
mod types;

pub use router::handle_request;
pub use types::{AppState, Request};
