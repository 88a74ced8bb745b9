use std::{net::SocketAddr, sync::Arc, time::Duration};

use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};

use crate::{
    core::{
        cookie::{CookieOptions, SameSite},
        request::DEFAULT_BODY_LIMIT,
        router::{EntryRouter, ImportRouter},
        server::{DEFAULT_STREAM_CAPACITY, ServerSettings},
    },
    ports::module_loader::ModuleLoader,
};

fn default_listen_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_max_body_bytes() -> usize {
    DEFAULT_BODY_LIMIT
}

fn default_stream_capacity() -> usize {
    DEFAULT_STREAM_CAPACITY
}

fn default_shutdown_timeout() -> String {
    "30s".to_string()
}

fn default_cookie_path() -> Option<String> {
    Some("/".to_string())
}

fn default_http_only() -> bool {
    true
}

fn default_same_site() -> Option<SameSite> {
    Some(SameSite::Lax)
}

/// Attributes of the session cookies written by `Response`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    #[serde(default = "default_cookie_path")]
    pub path: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    /// Cookie lifetime, parsed by humantime (e.g. "1h", "7days")
    #[serde(default)]
    pub max_age: Option<String>,
    #[serde(default = "default_http_only")]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default = "default_same_site")]
    pub same_site: Option<SameSite>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            path: default_cookie_path(),
            domain: None,
            max_age: None,
            http_only: default_http_only(),
            secure: false,
            same_site: default_same_site(),
        }
    }
}

impl SessionConfig {
    pub fn max_age(&self) -> Result<Option<Duration>> {
        self.max_age
            .as_deref()
            .map(|value| {
                humantime::parse_duration(value)
                    .wrap_err_with(|| format!("Invalid session max_age '{value}'"))
            })
            .transpose()
    }

    pub fn cookie_options(&self) -> Result<CookieOptions> {
        Ok(CookieOptions {
            path: self.path.clone(),
            domain: self.domain.clone(),
            max_age: self.max_age()?.map(|age| age.as_secs()),
            http_only: self.http_only,
            secure: self.secure,
            same_site: self.same_site,
        })
    }
}

/// One route inside a mount. `module` names a loadable handler chain.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RouteConfig {
    /// HTTP methods; empty means every method
    #[serde(default)]
    pub methods: Vec<String>,
    pub pattern: String,
    pub module: String,
}

impl RouteConfig {
    pub fn new(pattern: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            methods: Vec::new(),
            pattern: pattern.into(),
            module: module.into(),
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.methods.push(method.into());
        self
    }
}

/// A group of routes served under a literal path prefix.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MountConfig {
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

fn default_prefix() -> String {
    "/".to_string()
}

impl MountConfig {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            routes: Vec::new(),
        }
    }

    pub fn route(mut self, route: RouteConfig) -> Self {
        self.routes.push(route);
        self
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default = "default_stream_capacity")]
    pub stream_capacity: usize,
    /// How long in-flight connections may drain after a shutdown signal
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: String,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub mounts: Vec<MountConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_body_bytes: default_max_body_bytes(),
            stream_capacity: default_stream_capacity(),
            shutdown_timeout: default_shutdown_timeout(),
            session: SessionConfig::default(),
            mounts: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Create a new server configuration builder
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen_addr
            .parse()
            .wrap_err_with(|| format!("Invalid listen address '{}'", self.listen_addr))
    }

    pub fn shutdown_timeout(&self) -> Result<Duration> {
        humantime::parse_duration(&self.shutdown_timeout)
            .wrap_err_with(|| format!("Invalid shutdown_timeout '{}'", self.shutdown_timeout))
    }

    /// Per-call settings handed to [`crate::core::Server`].
    pub fn server_settings(&self) -> Result<ServerSettings> {
        Ok(ServerSettings {
            max_body_bytes: self.max_body_bytes,
            stream_capacity: self.stream_capacity,
            cookie: self.session.cookie_options()?,
        })
    }

    /// Build the routing tree: one lazily resolving [`ImportRouter`] per
    /// mount, mounted in declaration order on a root [`EntryRouter`].
    pub fn build_router(&self, loader: Arc<dyn ModuleLoader>) -> Result<EntryRouter> {
        let mut root = EntryRouter::new();
        for mount in &self.mounts {
            let mut router = ImportRouter::new(loader.clone());
            for route in &mount.routes {
                let methods = route.http_methods().map_err(|message| {
                    eyre::eyre!("Invalid methods for route '{}': {message}", route.pattern)
                })?;
                let registered = match methods {
                    Some(methods) => router.route(&methods, &route.pattern, &route.module),
                    None => router.any(&route.pattern, &route.module),
                };
                registered
                    .wrap_err_with(|| format!("Failed to register route '{}'", route.pattern))?;
            }
            tracing::debug!(prefix = %mount.prefix, routes = router.len(), "Mount configured");
            root.mount(&mount.prefix, router)
                .wrap_err_with(|| format!("Failed to mount '{}'", mount.prefix))?;
        }
        Ok(root)
    }

    /// The configuration `switchyard init` writes, in model form.
    pub fn sample() -> Self {
        Self::builder()
            .mount(
                MountConfig::new("/")
                    .route(RouteConfig::new("/health", "health").method("GET"))
                    .route(RouteConfig::new("/visits", "session-counter").method("GET")),
            )
            .mount(MountConfig::new("/api").route(RouteConfig::new("/echo/*rest", "echo")))
            .build()
    }
}

/// Builder for ServerConfig to allow for cleaner configuration creation
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Set the listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    pub fn max_body_bytes(mut self, limit: usize) -> Self {
        self.config.max_body_bytes = limit;
        self
    }

    pub fn stream_capacity(mut self, capacity: usize) -> Self {
        self.config.stream_capacity = capacity;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.config.shutdown_timeout = timeout.into();
        self
    }

    pub fn session(mut self, session: SessionConfig) -> Self {
        self.config.session = session;
        self
    }

    pub fn mount(mut self, mount: MountConfig) -> Self {
        self.config.mounts.push(mount);
        self
    }

    pub fn build(self) -> ServerConfig {
        self.config
    }
}
