//! HTTP request handlers for API endpoints.

pub mod generate;
pub mod health;

pub use generate::handle_ask;
pub use health::{handle_health, handle_live, handle_ping, handle_ready, handle_root};
