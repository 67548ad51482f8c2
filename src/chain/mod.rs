/// Middleware chain engine
///
/// This module contains the generic layered-call machinery: the middleware
/// and endpoint traits, the chain builder with its named insertion markers,
/// and the compiled form that actually runs a call.

mod error;
mod middleware;
mod stack;

pub use error::RpcError;
pub use middleware::{from_fn, BoxFuture, Endpoint, Middleware, MiddlewareFn, Next};
pub use stack::{Chain, Composed, Flow};
