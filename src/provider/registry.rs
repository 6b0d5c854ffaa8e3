use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::GatewayError;
use crate::protocol::{GEMINI, OPENAI};

use super::{GeminiProvider, OpenAiProvider, Provider};

/// Per-channel settings a factory may use when building its provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderOptions {
    pub api_version: Option<String>,
}

pub type ProviderFactory = Arc<dyn Fn(&ProviderOptions) -> Arc<dyn Provider> + Send + Sync>;

/// Name → factory map for providers.
///
/// Filled once at startup, then shared read-only.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    factories: FxHashMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in provider registered.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_all();
        registry
    }

    /// Register the built-in providers.
    pub fn register_all(&mut self) {
        self.register(OPENAI, |_options: &ProviderOptions| {
            Arc::new(OpenAiProvider::new()) as Arc<dyn Provider>
        });
        self.register(GEMINI, |options: &ProviderOptions| {
            Arc::new(GeminiProvider::new(options.api_version.as_deref())) as Arc<dyn Provider>
        });
    }

    /// Register `factory` under `name`, replacing any previous one.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&ProviderOptions) -> Arc<dyn Provider> + Send + Sync + 'static,
    {
        if self
            .factories
            .insert(name.to_owned(), Arc::new(factory))
            .is_some()
        {
            tracing::warn!(provider = name, "provider factory replaced");
        }
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build the provider registered as `name`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::AdapterNotFound`] for an unknown name.
    pub fn create(
        &self,
        name: &str,
        options: &ProviderOptions,
    ) -> Result<Arc<dyn Provider>, GatewayError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| GatewayError::adapter_not_found(name))?;
        Ok(factory(options))
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}
