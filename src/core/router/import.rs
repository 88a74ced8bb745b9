use std::{collections::HashMap, sync::Arc, time::Instant};

use async_trait::async_trait;
use http::Method;
use tokio::sync::OnceCell;
use tracing::Instrument;

use super::{DispatchError, RouteError, RouteTable, Router, Target};
use crate::{
    core::{handler::Chain, request::Request, response::Response},
    ports::module_loader::ModuleLoader,
    tracing_setup,
};

/// Route target whose chain is loaded on first match.
struct Deferred {
    identifier: String,
    cell: Arc<OnceCell<Chain>>,
    loader: Arc<dyn ModuleLoader>,
}

#[async_trait]
impl Target for Deferred {
    async fn invoke(&self, req: &Request, res: &mut Response) -> Result<(), DispatchError> {
        let chain = self
            .cell
            .get_or_try_init(|| {
                let span = tracing_setup::create_resolve_span(&self.identifier);
                async {
                    let start = Instant::now();
                    tracing::debug!("Resolving route module");
                    let loaded = self.loader.load(&self.identifier).await;
                    tracing::Span::current()
                        .record("duration_ms", start.elapsed().as_millis() as u64);
                    loaded
                }
                .instrument(span)
            })
            .await
            .map_err(|source| {
                tracing::error!(identifier = %self.identifier, error = %source, "Route module failed to resolve");
                DispatchError::Resolve {
                    identifier: self.identifier.clone(),
                    source,
                }
            })?;
        chain.run(req, res).await.map_err(DispatchError::from)
    }
}

/// Router whose routes name modules instead of carrying handlers.
///
/// Each identifier is resolved through the [`ModuleLoader`] the first time one
/// of its routes matches, and the resulting chain is reused afterwards. Routes
/// naming the same identifier share one resolution. A failed resolution is not
/// remembered; the next match tries again.
pub struct ImportRouter {
    table: RouteTable<Deferred>,
    loader: Arc<dyn ModuleLoader>,
    cells: HashMap<String, Arc<OnceCell<Chain>>>,
}

impl ImportRouter {
    pub fn new(loader: Arc<dyn ModuleLoader>) -> Self {
        Self {
            table: RouteTable::default(),
            loader,
            cells: HashMap::new(),
        }
    }

    fn deferred(&mut self, identifier: &str) -> Deferred {
        let cell = self.cells.entry(identifier.to_string()).or_default().clone();
        Deferred {
            identifier: identifier.to_string(),
            cell,
            loader: self.loader.clone(),
        }
    }

    /// Register module `identifier` for `methods` on `pattern`.
    pub fn route(
        &mut self,
        methods: &[Method],
        pattern: &str,
        identifier: &str,
    ) -> Result<&mut Self, RouteError> {
        let target = self.deferred(identifier);
        self.table.insert(Some(methods), pattern, target)?;
        Ok(self)
    }

    /// Register module `identifier` for every method.
    pub fn any(&mut self, pattern: &str, identifier: &str) -> Result<&mut Self, RouteError> {
        let target = self.deferred(identifier);
        self.table.insert(None, pattern, target)?;
        Ok(self)
    }

    pub fn get(&mut self, pattern: &str, identifier: &str) -> Result<&mut Self, RouteError> {
        self.route(&[Method::GET], pattern, identifier)
    }

    pub fn post(&mut self, pattern: &str, identifier: &str) -> Result<&mut Self, RouteError> {
        self.route(&[Method::POST], pattern, identifier)
    }

    pub fn mount(&mut self, prefix: &str, router: impl Router) -> Result<&mut Self, RouteError> {
        self.table.mount(prefix, Arc::new(router))?;
        Ok(self)
    }

    /// True once `identifier` has been loaded successfully.
    pub fn is_resolved(&self, identifier: &str) -> bool {
        self.cells
            .get(identifier)
            .is_some_and(|cell| cell.initialized())
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.len() == 0
    }

    pub fn describe(&self) -> Vec<String> {
        self.table.describe()
    }
}

#[async_trait]
impl Router for ImportRouter {
    async fn dispatch_at(
        &self,
        path: &str,
        req: &mut Request,
        res: &mut Response,
    ) -> Result<(), DispatchError> {
        self.table.dispatch_at(path, req, res).await
    }
}

impl std::fmt::Debug for ImportRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportRouter")
            .field("entries", &self.describe())
            .field("modules", &self.cells.keys().collect::<Vec<_>>())
            .finish()
    }
}
