use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;

use crate::{
    core::handler::Chain,
    ports::module_loader::{LoadError, ModuleLoader},
};

type Factory = Arc<dyn Fn() -> Result<Chain, String> + Send + Sync>;

/// In-memory [`ModuleLoader`]: identifiers map to factories that build chains.
///
/// Factories run on every `load`; caching is the router's job.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    factories: HashMap<String, Factory>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an infallible module.
    pub fn register<F>(&mut self, identifier: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Chain + Send + Sync + 'static,
    {
        self.register_fallible(identifier, move || Ok(factory()))
    }

    /// Register a module whose construction may fail with a message.
    pub fn register_fallible<F>(&mut self, identifier: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Result<Chain, String> + Send + Sync + 'static,
    {
        let identifier = identifier.into();
        if self
            .factories
            .insert(identifier.clone(), Arc::new(factory))
            .is_some()
        {
            tracing::warn!(%identifier, "Module registered twice, keeping the latest");
        }
        self
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.factories.contains_key(identifier)
    }

    /// Registered identifiers, sorted.
    pub fn identifiers(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

#[async_trait]
impl ModuleLoader for ModuleRegistry {
    async fn load(&self, identifier: &str) -> Result<Chain, LoadError> {
        let factory = self
            .factories
            .get(identifier)
            .ok_or_else(|| LoadError::NotFound(identifier.to_string()))?;
        let chain = factory().map_err(|message| LoadError::Failed {
            identifier: identifier.to_string(),
            message,
        })?;
        tracing::info!(%identifier, handlers = chain.len(), "Module loaded");
        Ok(chain)
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.identifiers())
            .finish()
    }
}
