pub mod client;
pub mod csp;
pub mod http;
pub mod oembed;

pub use http::{create_router, AppState};
