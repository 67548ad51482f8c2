/// shallot - a layered middleware core for typed remote calls
///
/// This library provides the machinery for wrapping a chain of
/// interceptors (auth, validation, batching, logging, retry) around a
/// single typed remote call: a generic middleware chain with named
/// insertion markers, a client pairing a request chain with a reply chain,
/// a path-dispatching router, and a batching protocol built on top.

pub mod chain;
pub mod client;
pub mod config;
pub mod hooks;
pub mod message;
pub mod middleware;
pub mod router;

// Re-export commonly used types
pub use chain::{Chain, Composed, Flow, Middleware, Next, RpcError};
pub use client::{CallContext, Client, ClientBuilder, OutputCallbacks};
pub use config::{ApiCatalog, ApiSpec};
pub use message::{Code, Response};
pub use router::{handler_fn, RouteTable, Router, ServerContext};
