//! Shared domain types for the tern agent runtime: identifiers, the
//! persisted transcript model, bus events, provider and tool contracts.

pub mod context;
pub mod errors;
pub mod events;
pub mod ids;
pub mod messages;
pub mod provider;
pub mod schema;
pub mod session;
pub mod stream;
pub mod tools;
