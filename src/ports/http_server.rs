use std::net::SocketAddr;

use eyre::Result;

/// HttpServer defines the port for a component that owns a listening socket
pub trait HttpServer: Send + Sync + 'static {
    /// Address the server is bound to
    fn local_addr(&self) -> SocketAddr;

    /// Run the accept loop
    ///
    /// # Returns
    /// A future that resolves when the server shuts down or encounters an error
    fn run(&self) -> impl std::future::Future<Output = Result<()>> + Send;
}
