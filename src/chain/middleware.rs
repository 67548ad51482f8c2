use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::RpcError;

/// A boxed future, the return type of middleware and endpoints
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A unit of call-processing behavior.
///
/// A middleware receives the call context and a handle to the remainder of
/// the chain. It may inspect or rewrite the context before running the rest
/// of the chain, inspect the context again on the way back out, or return
/// without invoking `next` at all, in which case nothing downstream runs
/// for this call.
///
/// The context travels by value: `next.run(ctx)` hands it down and the
/// resolved future hands it back.
pub trait Middleware<C>: Send + Sync {
    /// Process one call, delegating to `next` for the rest of the chain
    fn handle<'a>(&'a self, ctx: C, next: Next<'a, C>) -> BoxFuture<'a, Result<C, RpcError>>;
}

/// The terminal stage of a composed chain.
///
/// Runs after every middleware has passed the call down. The client uses an
/// endpoint to bridge into the transport hook; the router uses one for
/// handler dispatch. A chain composed without an endpoint returns the
/// context unchanged.
pub trait Endpoint<C>: Send + Sync {
    /// Produce the innermost result for the call
    fn call<'a>(&'a self, ctx: C) -> BoxFuture<'a, Result<C, RpcError>>;
}

/// Handle to the remainder of a composed chain.
///
/// Consumed by `run`; a middleware that drops it short-circuits the chain.
pub struct Next<'a, C> {
    stack: &'a [Arc<dyn Middleware<C>>],
    endpoint: Option<&'a Arc<dyn Endpoint<C>>>,
}

impl<'a, C: Send + 'static> Next<'a, C> {
    pub(crate) fn new(
        stack: &'a [Arc<dyn Middleware<C>>],
        endpoint: Option<&'a Arc<dyn Endpoint<C>>>,
    ) -> Self {
        Self { stack, endpoint }
    }

    /// Run the remainder of the chain on `ctx` and return the context it
    /// produced
    pub fn run(self, ctx: C) -> BoxFuture<'a, Result<C, RpcError>> {
        Box::pin(async move {
            match self.stack.split_first() {
                Some((head, rest)) => {
                    let next = Next {
                        stack: rest,
                        endpoint: self.endpoint,
                    };
                    head.handle(ctx, next).await
                }
                None => match self.endpoint {
                    Some(endpoint) => endpoint.call(ctx).await,
                    None => Ok(ctx),
                },
            }
        })
    }
}

/// Plain-function middleware, for layers that need no captured state.
///
/// # Example
/// ```
/// use shallot::chain::{from_fn, BoxFuture, Chain, Next, RpcError};
///
/// fn noop(ctx: u32, next: Next<'_, u32>) -> BoxFuture<'_, Result<u32, RpcError>> {
///     Box::pin(async move { next.run(ctx).await })
/// }
///
/// let chain = Chain::new().layer(from_fn(noop));
/// ```
pub type MiddlewareFn<C> = for<'a> fn(C, Next<'a, C>) -> BoxFuture<'a, Result<C, RpcError>>;

struct FnLayer<C>(MiddlewareFn<C>);

impl<C: Send + 'static> Middleware<C> for FnLayer<C> {
    fn handle<'a>(&'a self, ctx: C, next: Next<'a, C>) -> BoxFuture<'a, Result<C, RpcError>> {
        (self.0)(ctx, next)
    }
}

/// Wrap a plain function as a chain layer
pub fn from_fn<C: Send + 'static>(f: MiddlewareFn<C>) -> Arc<dyn Middleware<C>> {
    Arc::new(FnLayer(f))
}
