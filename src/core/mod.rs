pub mod body;
pub mod cookie;
pub mod handler;
pub mod native;
pub mod request;
pub mod resolver;
pub mod response;
pub mod router;
pub mod server;
pub mod session;
pub mod stream;

pub use handler::{Chain, Handler, HandlerError, handler_fn};
pub use native::{NativeReply, ResponseHead, SocketRequest, SocketResponse};
pub use request::Request;
pub use response::{Finalized, Response, ResponseError};
pub use router::{DispatchError, EntryRouter, ImportRouter, RouteError, Router};
pub use server::{Server, ServerSettings};
pub use stream::{ByteStream, StreamError};
