//! Route matching and dispatch.
//!
//! A router holds an ordered list of entries: routes and mounted nested
//! routers. Registration order is matching priority; the first structural match
//! wins and no specificity reordering happens. Registering the same method and
//! pattern twice keeps the later registration.
//!
//! * [`EntryRouter`] routes to handler chains given up front.
//! * [`ImportRouter`] routes to module identifiers resolved on first use.
//! * `ServerRouter` (in `adapters`) owns the listening socket and delegates.
use std::sync::Arc;

use async_trait::async_trait;
use http::{Method, StatusCode};
use thiserror::Error;

use crate::{
    core::{
        handler::{Chain, HandlerError},
        request::Request,
        response::Response,
    },
    ports::module_loader::LoadError,
};

mod entry;
mod import;
mod pattern;

pub use entry::EntryRouter;
pub use import::ImportRouter;
pub use pattern::RoutePattern;
pub(crate) use pattern::normalize_prefix;

/// Errors raised while registering routes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RouteError {
    #[error("invalid route pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("invalid mount prefix '{prefix}': {reason}")]
    InvalidMount { prefix: String, reason: String },

    #[error("route '{pattern}' declares no methods")]
    NoMethods { pattern: String },
}

/// Outcome of a dispatch that did not complete normally
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("no route for {method} {path}")]
    NotFound { method: Method, path: String },

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error("failed to resolve module '{identifier}'")]
    Resolve {
        identifier: String,
        #[source]
        source: LoadError,
    },
}

impl DispatchError {
    /// Status the server facade answers with.
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::NotFound { .. } => StatusCode::NOT_FOUND,
            DispatchError::Handler(err) => err.status().unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            DispatchError::Resolve { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DispatchError::NotFound { .. })
    }
}

/// Anything that can take a request and fill in a response.
#[async_trait]
pub trait Router: Send + Sync + 'static {
    /// Dispatch using `path` instead of the request's own path. Mounted routers
    /// receive the remainder after their prefix.
    async fn dispatch_at(
        &self,
        path: &str,
        req: &mut Request,
        res: &mut Response,
    ) -> Result<(), DispatchError>;

    async fn dispatch(&self, req: &mut Request, res: &mut Response) -> Result<(), DispatchError> {
        let path = req.path().to_string();
        self.dispatch_at(&path, req, res).await
    }
}

#[async_trait]
impl<R: Router + ?Sized> Router for Arc<R> {
    async fn dispatch_at(
        &self,
        path: &str,
        req: &mut Request,
        res: &mut Response,
    ) -> Result<(), DispatchError> {
        (**self).dispatch_at(path, req, res).await
    }
}

/// What a matched route runs.
#[async_trait]
pub(crate) trait Target: Send + Sync + 'static {
    async fn invoke(&self, req: &Request, res: &mut Response) -> Result<(), DispatchError>;
}

#[async_trait]
impl Target for Chain {
    async fn invoke(&self, req: &Request, res: &mut Response) -> Result<(), DispatchError> {
        self.run(req, res).await.map_err(DispatchError::from)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Methods {
    Any { except: Vec<Method> },
    Only(Vec<Method>),
}

impl Methods {
    fn allows(&self, method: &Method) -> bool {
        match self {
            Methods::Any { except } => !except.contains(method),
            Methods::Only(methods) => methods.contains(method),
        }
    }

    fn overlaps(&self, other: &Methods) -> bool {
        match (self, other) {
            (Methods::Any { .. }, Methods::Any { .. }) => true,
            (Methods::Any { except }, Methods::Only(methods))
            | (Methods::Only(methods), Methods::Any { except }) => {
                methods.iter().any(|method| !except.contains(method))
            }
            (Methods::Only(mine), Methods::Only(theirs)) => {
                mine.iter().any(|method| theirs.contains(method))
            }
        }
    }

    /// Drop everything `other` covers. Returns false when nothing is left.
    fn subtract(&mut self, other: &Methods) -> bool {
        match (&mut *self, other) {
            (_, Methods::Any { .. }) => false,
            (Methods::Only(mine), Methods::Only(theirs)) => {
                mine.retain(|method| !theirs.contains(method));
                !mine.is_empty()
            }
            (Methods::Any { except }, Methods::Only(theirs)) => {
                for method in theirs {
                    if !except.contains(method) {
                        except.push(method.clone());
                    }
                }
                true
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            Methods::Any { except } if except.is_empty() => "*".to_string(),
            Methods::Any { except } => format!(
                "* except {}",
                except.iter().map(Method::as_str).collect::<Vec<_>>().join(",")
            ),
            Methods::Only(methods) => methods
                .iter()
                .map(Method::as_str)
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

struct Route<T> {
    methods: Methods,
    pattern: RoutePattern,
    target: T,
}

enum Entry<T> {
    Route(Route<T>),
    Mount {
        prefix: String,
        router: Arc<dyn Router>,
    },
}

/// Ordered entries shared by the router specializations.
pub(crate) struct RouteTable<T> {
    entries: Vec<Entry<T>>,
}

impl<T> Default for RouteTable<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T: Target> RouteTable<T> {
    pub(crate) fn insert(
        &mut self,
        methods: Option<&[Method]>,
        pattern: &str,
        target: T,
    ) -> Result<(), RouteError> {
        let pattern = RoutePattern::parse(pattern)?;
        let methods = match methods {
            None => Methods::Any { except: Vec::new() },
            Some([]) => {
                return Err(RouteError::NoMethods {
                    pattern: pattern.to_string(),
                });
            }
            Some(methods) => Methods::Only(methods.to_vec()),
        };

        // Last registration wins: earlier routes with the same shape give up
        // the overlapping methods, and the new route takes the slot of the
        // first one it overlaps.
        let mut slot = None;
        let mut index = 0;
        self.entries.retain_mut(|entry| {
            let keep = match entry {
                Entry::Route(route)
                    if route.pattern.same_shape(&pattern) && route.methods.overlaps(&methods) =>
                {
                    slot.get_or_insert(index);
                    let keep = route.methods.subtract(&methods);
                    if !keep {
                        tracing::debug!(pattern = %route.pattern, "Route replaced by a later registration");
                    }
                    keep
                }
                _ => true,
            };
            if keep {
                index += 1;
            }
            keep
        });

        tracing::debug!(pattern = %pattern, methods = %methods.describe(), "Registered route");
        let route = Entry::Route(Route {
            methods,
            pattern,
            target,
        });
        match slot {
            Some(slot) => self.entries.insert(slot, route),
            None => self.entries.push(route),
        }
        Ok(())
    }

    pub(crate) fn mount(&mut self, prefix: &str, router: Arc<dyn Router>) -> Result<(), RouteError> {
        let prefix = pattern::normalize_prefix(prefix)?;
        tracing::debug!(%prefix, "Mounted router");
        self.entries.push(Entry::Mount { prefix, router });
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn describe(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|entry| match entry {
                Entry::Route(route) => format!("{} {}", route.methods.describe(), route.pattern),
                Entry::Mount { prefix, .. } => format!("mount {prefix}"),
            })
            .collect()
    }

    pub(crate) async fn dispatch_at(
        &self,
        path: &str,
        req: &mut Request,
        res: &mut Response,
    ) -> Result<(), DispatchError> {
        for entry in &self.entries {
            match entry {
                Entry::Route(route) => {
                    if !route.methods.allows(req.method()) {
                        continue;
                    }
                    let Some(params) = route.pattern.matches(path) else {
                        continue;
                    };
                    tracing::trace!(pattern = %route.pattern, "Route matched");
                    req.set_params(params);
                    return route.target.invoke(req, res).await;
                }
                Entry::Mount { prefix, router } => {
                    let Some(rest) = pattern::strip_prefix(prefix, path) else {
                        continue;
                    };
                    match router.dispatch_at(rest, req, res).await {
                        Err(DispatchError::NotFound { .. }) => continue,
                        outcome => return outcome,
                    }
                }
            }
        }

        Err(DispatchError::NotFound {
            method: req.method().clone(),
            path: req.path().to_string(),
        })
    }
}
