use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use tern_core::provider::ProviderAdapter;

use crate::echo::EchoProvider;
use crate::scripted::ScriptedProvider;

#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("provider {provider} requires {field}")]
    MissingField { provider: String, field: &'static str },
    #[error("invalid script: {0}")]
    InvalidScript(String),
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Selects and configures a provider adapter.
#[derive(Clone, Debug, Default)]
pub struct ProviderConfig {
    pub name: String,
    pub script_path: Option<PathBuf>,
}

impl ProviderConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script_path: None,
        }
    }
}

type Builder = Box<dyn Fn(&ProviderConfig) -> Result<Arc<dyn ProviderAdapter>, FactoryError> + Send + Sync>;

/// Registry of adapter constructors keyed by provider name.
pub struct ProviderFactory {
    builders: HashMap<String, Builder>,
}

impl ProviderFactory {
    pub fn empty() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// Factory with the built-in `scripted` and `echo` adapters.
    pub fn with_defaults() -> Self {
        let mut factory = Self::empty();
        factory.register("echo", |_| Ok(Arc::new(EchoProvider) as Arc<dyn ProviderAdapter>));
        factory.register("scripted", |config| {
            let path = config.script_path.as_ref().ok_or_else(|| FactoryError::MissingField {
                provider: config.name.clone(),
                field: "script_path",
            })?;
            Ok(Arc::new(ScriptedProvider::from_path(path)?) as Arc<dyn ProviderAdapter>)
        });
        factory
    }

    pub fn register<F>(&mut self, name: &str, builder: F)
    where
        F: Fn(&ProviderConfig) -> Result<Arc<dyn ProviderAdapter>, FactoryError> + Send + Sync + 'static,
    {
        self.builders.insert(name.to_string(), Box::new(builder));
    }

    pub fn build(&self, config: &ProviderConfig) -> Result<Arc<dyn ProviderAdapter>, FactoryError> {
        let builder = self
            .builders
            .get(&config.name)
            .ok_or_else(|| FactoryError::UnknownProvider(config.name.clone()))?;
        let provider = builder(config)?;
        info!(provider = provider.name(), model = provider.model(), "provider ready");
        Ok(provider)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.builders.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ProviderFactory {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockProvider, MockResponse};

    #[test]
    fn builds_echo() {
        let factory = ProviderFactory::with_defaults();
        let provider = factory.build(&ProviderConfig::named("echo")).unwrap();
        assert_eq!(provider.name(), "echo");
        assert_eq!(factory.names(), vec!["echo", "scripted"]);
    }

    #[test]
    fn unknown_name_is_rejected() {
        let factory = ProviderFactory::with_defaults();
        let err = factory.build(&ProviderConfig::named("anthropic")).err().unwrap();
        assert!(matches!(err, FactoryError::UnknownProvider(name) if name == "anthropic"));
    }

    #[test]
    fn scripted_requires_path() {
        let factory = ProviderFactory::with_defaults();
        let err = factory.build(&ProviderConfig::named("scripted")).err().unwrap();
        assert!(matches!(err, FactoryError::MissingField { field: "script_path", .. }));
    }

    #[test]
    fn scripted_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        std::fs::write(&path, r#"{"rounds": [[{"type": "turn_end"}]]}"#).unwrap();

        let config = ProviderConfig {
            name: "scripted".into(),
            script_path: Some(path),
        };
        let provider = ProviderFactory::with_defaults().build(&config).unwrap();
        assert_eq!(provider.name(), "scripted");
    }

    #[test]
    fn custom_builders_can_be_registered() {
        let mut factory = ProviderFactory::empty();
        factory.register("mock", |_| {
            Ok(Arc::new(MockProvider::new(vec![MockResponse::text("hi")])) as Arc<dyn ProviderAdapter>)
        });
        assert_eq!(factory.build(&ProviderConfig::named("mock")).unwrap().model(), "mock-model");
    }
}
