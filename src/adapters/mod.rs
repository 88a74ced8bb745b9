pub mod builtin_modules;
pub mod module_registry;
pub mod server_router;

pub use module_registry::ModuleRegistry;
pub use server_router::ServerRouter;
