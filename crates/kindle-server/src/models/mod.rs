//! Request and response bodies of the HTTP API.

pub mod generate;
pub mod health;

pub use generate::AskRequest;
pub use health::{
    HealthResponse, LiveResponse, PingResponse, ReadyResponse, RootResponse,
};
