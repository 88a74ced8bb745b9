use async_trait::async_trait;
use thiserror::Error;

use crate::core::handler::Chain;

/// Error type for module resolution
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LoadError {
    /// No module is registered under the identifier
    #[error("module '{0}' not found")]
    NotFound(String),

    /// The module exists but could not be built
    #[error("module '{identifier}' failed to load: {message}")]
    Failed { identifier: String, message: String },
}

/// ModuleLoader defines the port for turning a module identifier into a handler chain
///
/// Loading may be slow; callers cache the result.
#[async_trait]
pub trait ModuleLoader: Send + Sync + 'static {
    /// Resolve `identifier` into the chain it exports
    ///
    /// # Arguments
    /// * `identifier` - Name the module was registered under
    ///
    /// # Returns
    /// The module's handler chain or a [`LoadError`]
    async fn load(&self, identifier: &str) -> Result<Chain, LoadError>;
}
