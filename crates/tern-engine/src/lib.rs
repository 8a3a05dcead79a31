//! Agent execution engine: the tool registry and built-in tools, the
//! per-session event bus, bounded tool dispatch, and the orchestrator that
//! turns provider streams into persisted parts and published events.

pub mod bus;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod tools;
pub mod truncate;

pub use bus::{EventBus, EventStream};
pub use config::OrchestratorConfig;
pub use error::EngineError;
pub use orchestrator::{Orchestrator, TurnClaim, TurnOutcome, TurnPhase, TurnStatus};
pub use registry::{InvokeError, ToolRegistry};
