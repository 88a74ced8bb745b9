pub mod http_server;
pub mod module_loader;

pub use http_server::HttpServer;
pub use module_loader::{LoadError, ModuleLoader};
