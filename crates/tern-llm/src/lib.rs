//! Provider adapters for tern: deterministic adapters, the factory that
//! selects them by name, and the retry policy used by the orchestrator.

pub mod echo;
pub mod factory;
pub mod mock;
pub mod retry;
pub mod scripted;

pub use factory::{FactoryError, ProviderConfig, ProviderFactory};
pub use mock::{MockProvider, MockResponse};
pub use retry::RetryPolicy;
