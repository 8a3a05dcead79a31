//! HTTP surface for the tern engine: session administration, turn
//! submission, and per-session event streams as server-sent events.

pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod server;
pub mod sse;

pub use config::ServerConfig;
pub use error::ApiError;
pub use server::{build_router, start, AppState, ServerHandle};
