/// Server-side dispatch
///
/// A [`Router`] is a middleware chain terminated by exact-match lookup in
/// an immutable path-keyed handler table. Composing it produces a
/// [`ComposedRouter`] that adapts a raw call into a server context, runs
/// the chain, and falls back to a not-implemented response when nothing
/// produced an output.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chain::{BoxFuture, Chain, Composed, Endpoint, Middleware, RpcError};
use crate::hooks::{Transport, TransportCall};
use crate::message::Response;

/// One call as it arrives off the wire, before context construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCall {
    /// Routing key
    pub path: String,
    /// Call input
    #[serde(default)]
    pub input: Value,
    /// Wire headers as received
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// The record threaded through the server chain
#[derive(Debug, Clone)]
pub struct ServerContext {
    /// Routing key
    pub path: String,
    /// Call input
    pub input: Value,
    /// Wire headers as received
    pub headers: HashMap<String, String>,
    /// The call's result, once some stage has produced it
    pub output: Option<Response>,
}

impl ServerContext {
    /// Create a context with no headers
    pub fn new(path: impl Into<String>, input: Value) -> Self {
        Self {
            path: path.into(),
            input,
            headers: HashMap::new(),
            output: None,
        }
    }

    /// Build a context from a raw wire call
    pub fn from_raw(raw: RawCall) -> Self {
        Self {
            path: raw.path,
            input: raw.input,
            headers: raw.headers,
            output: None,
        }
    }

    /// Derive a sub-call context: base fields are copied explicitly, the
    /// path and input are overridden, and the output starts empty. Used by
    /// batch unrolling; mutations of the derived context never reach the
    /// parent.
    pub fn fork(&self, path: impl Into<String>, input: Value) -> Self {
        Self {
            path: path.into(),
            input,
            headers: self.headers.clone(),
            output: None,
        }
    }
}

/// A registered route handler.
///
/// Handlers return a normal [`Response`] for application-level failures;
/// an `Err` means the handler itself broke and propagates out of the chain
/// uncaught (convert it with a catch-all middleware).
pub type Handler =
    Arc<dyn Fn(ServerContext) -> BoxFuture<'static, Result<Response, RpcError>> + Send + Sync>;

/// Wrap an async function as a route handler
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(ServerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, RpcError>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// An immutable map from path to handler, built once at startup
pub struct RouteTable {
    routes: HashMap<String, Handler>,
}

impl RouteTable {
    /// Start building a table
    pub fn builder() -> RouteTableBuilder {
        RouteTableBuilder {
            routes: HashMap::new(),
        }
    }

    /// Exact-match lookup; paths are opaque keys, there is no pattern
    /// matching
    pub fn lookup(&self, path: &str) -> Option<&Handler> {
        self.routes.get(path)
    }

    /// Number of registered routes
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Builder for [`RouteTable`]
pub struct RouteTableBuilder {
    routes: HashMap<String, Handler>,
}

impl RouteTableBuilder {
    /// Register a handler under a path.
    ///
    /// # Panics
    /// Panics if `path` is already registered; routes are startup
    /// configuration and a collision is a programming error.
    pub fn route(mut self, path: impl Into<String>, handler: Handler) -> Self {
        let path = path.into();
        if self.routes.contains_key(&path) {
            panic!("Route registered twice: {}", path);
        }
        self.routes.insert(path, handler);
        self
    }

    /// Finish building; the returned table is immutable and shareable
    pub fn build(self) -> Arc<RouteTable> {
        Arc::new(RouteTable {
            routes: self.routes,
        })
    }
}

/// Adapter applied to every context before the first middleware runs
pub type ContextHook = Arc<dyn Fn(ServerContext) -> ServerContext + Send + Sync>;

/// Chain endpoint resolving the route table.
///
/// Leaves the context untouched when an earlier stage already produced an
/// output, or when no handler is registered; the composed router supplies
/// the not-implemented fallback in the latter case.
struct DispatchEndpoint {
    routes: Arc<RouteTable>,
}

impl Endpoint<ServerContext> for DispatchEndpoint {
    fn call<'a>(&'a self, mut ctx: ServerContext) -> BoxFuture<'a, Result<ServerContext, RpcError>> {
        Box::pin(async move {
            if ctx.output.is_some() {
                return Ok(ctx);
            }
            if let Some(handler) = self.routes.lookup(&ctx.path) {
                let response = handler(ctx.clone()).await?;
                ctx.output = Some(response);
            }
            Ok(ctx)
        })
    }
}

/// Server-side chain plus handler table
pub struct Router {
    chain: Chain<ServerContext>,
    routes: Arc<RouteTable>,
    context_hook: Option<ContextHook>,
}

impl Router {
    /// Create a router over an immutable route table
    pub fn new(routes: Arc<RouteTable>) -> Self {
        Self {
            chain: Chain::new(),
            routes,
            context_hook: None,
        }
    }

    /// Append a middleware to the chain
    pub fn layer(mut self, middleware: Arc<dyn Middleware<ServerContext>>) -> Self {
        self.chain.push(middleware);
        self
    }

    /// Record a named marker at the current chain tail.
    ///
    /// # Panics
    /// Panics if the marker was already declared.
    pub fn mark(mut self, name: impl Into<String>) -> Self {
        self.chain = self.chain.mark(name);
        self
    }

    /// Install the context-construction adapter
    pub fn context_hook(
        mut self,
        hook: impl Fn(ServerContext) -> ServerContext + Send + Sync + 'static,
    ) -> Self {
        self.context_hook = Some(Arc::new(hook));
        self
    }

    /// Compile the chain with route dispatch as its endpoint
    pub fn compose(&self) -> ComposedRouter {
        let composed = self.chain.compose().with_endpoint(Arc::new(DispatchEndpoint {
            routes: self.routes.clone(),
        }));
        ComposedRouter {
            composed,
            context_hook: self.context_hook.clone(),
        }
    }
}

/// A compiled router, ready to serve calls
#[derive(Clone)]
pub struct ComposedRouter {
    composed: Composed<ServerContext>,
    context_hook: Option<ContextHook>,
}

impl ComposedRouter {
    /// Serve one raw call.
    ///
    /// Handler errors propagate; install a catch-all middleware to convert
    /// them into structured failure responses.
    pub async fn dispatch(&self, raw: RawCall) -> Result<Response, RpcError> {
        let ctx = ServerContext::from_raw(raw);
        let ctx = match &self.context_hook {
            Some(hook) => hook(ctx),
            None => ctx,
        };
        let path = ctx.path.clone();
        let ctx = self.composed.run(ctx).await?;
        Ok(ctx
            .output
            .unwrap_or_else(|| Response::not_implemented(&path)))
    }
}

/// Transport that dispatches straight into a composed router, closing the
/// client/server loop in-process
pub struct Loopback {
    router: ComposedRouter,
}

impl Loopback {
    pub fn new(router: ComposedRouter) -> Self {
        Self { router }
    }
}

#[async_trait]
impl Transport for Loopback {
    async fn send(&self, call: TransportCall) -> Result<Response, RpcError> {
        let raw = RawCall {
            path: call.path,
            input: call.payload,
            headers: call.headers,
        };
        self.router.dispatch(raw).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Next;
    use serde_json::json;

    fn echo_table() -> Arc<RouteTable> {
        RouteTable::builder()
            .route(
                "/echo",
                handler_fn(|ctx: ServerContext| async move {
                    Ok(Response::success(ctx.input))
                }),
            )
            .route(
                "/broken",
                handler_fn(|_ctx: ServerContext| async move {
                    Err(RpcError::handler("db connection lost"))
                }),
            )
            .build()
    }

    #[tokio::test]
    async fn test_dispatch_runs_registered_handler() {
        let router = Router::new(echo_table()).compose();
        let response = router
            .dispatch(RawCall {
                path: "/echo".to_string(),
                input: json!({"hello": true}),
                headers: HashMap::new(),
            })
            .await
            .unwrap();
        assert_eq!(response, Response::success(json!({"hello": true})));
    }

    #[tokio::test]
    async fn test_unknown_path_falls_through() {
        let router = Router::new(echo_table()).compose();
        let response = router
            .dispatch(RawCall {
                path: "/nope".to_string(),
                input: Value::Null,
                headers: HashMap::new(),
            })
            .await
            .unwrap();
        assert_eq!(response.code, crate::message::Code::NotImplemented);
    }

    #[tokio::test]
    async fn test_handler_error_propagates() {
        let router = Router::new(echo_table()).compose();
        let err = router
            .dispatch(RawCall {
                path: "/broken".to_string(),
                input: Value::Null,
                headers: HashMap::new(),
            })
            .await
            .unwrap_err();
        assert_eq!(err, RpcError::handler("db connection lost"));
    }

    #[tokio::test]
    async fn test_context_hook_runs_before_chain() {
        let router = Router::new(echo_table())
            .context_hook(|mut ctx| {
                ctx.headers
                    .insert("x-request-id".to_string(), "42".to_string());
                ctx
            })
            .layer(Arc::new(AssertHeader));
        let response = router
            .compose()
            .dispatch(RawCall {
                path: "/echo".to_string(),
                input: json!(1),
                headers: HashMap::new(),
            })
            .await
            .unwrap();
        assert!(response.is_success());
    }

    /// Middleware that fails the call unless the context hook ran first
    struct AssertHeader;

    impl Middleware<ServerContext> for AssertHeader {
        fn handle<'a>(
            &'a self,
            ctx: ServerContext,
            next: Next<'a, ServerContext>,
        ) -> BoxFuture<'a, Result<ServerContext, RpcError>> {
            Box::pin(async move {
                if !ctx.headers.contains_key("x-request-id") {
                    return Err(RpcError::custom("context hook did not run"));
                }
                next.run(ctx).await
            })
        }
    }

    #[tokio::test]
    async fn test_middleware_output_skips_handler() {
        // a middleware that resolves the call leaves nothing for dispatch
        struct Resolve;
        impl Middleware<ServerContext> for Resolve {
            fn handle<'a>(
                &'a self,
                mut ctx: ServerContext,
                next: Next<'a, ServerContext>,
            ) -> BoxFuture<'a, Result<ServerContext, RpcError>> {
                Box::pin(async move {
                    ctx.output = Some(Response::success(json!("resolved early")));
                    next.run(ctx).await
                })
            }
        }

        let router = Router::new(echo_table()).layer(Arc::new(Resolve)).compose();
        let response = router
            .dispatch(RawCall {
                path: "/echo".to_string(),
                input: json!("ignored"),
                headers: HashMap::new(),
            })
            .await
            .unwrap();
        assert_eq!(response, Response::success(json!("resolved early")));
    }

    #[test]
    #[should_panic(expected = "Route registered twice: /echo")]
    fn test_route_table_rejects_duplicate() {
        let handler = handler_fn(|_ctx: ServerContext| async move {
            Ok(Response::success(Value::Null))
        });
        let _ = RouteTable::builder()
            .route("/echo", handler.clone())
            .route("/echo", handler);
    }

    #[test]
    fn test_fork_copies_base_and_overrides() {
        let mut parent = ServerContext::new("/batch", json!([]));
        parent
            .headers
            .insert("authorization".to_string(), "Bearer x".to_string());
        parent.output = Some(Response::success(json!("parent output")));

        let child = parent.fork("/user/list", json!({"page": 2}));
        assert_eq!(child.path, "/user/list");
        assert_eq!(child.input, json!({"page": 2}));
        assert_eq!(child.headers, parent.headers);
        assert!(child.output.is_none());
    }

    #[tokio::test]
    async fn test_loopback_bridges_transport_to_router() {
        let router = Router::new(echo_table()).compose();
        let loopback = Loopback::new(router);
        let response = loopback
            .send(TransportCall {
                path: "/echo".to_string(),
                payload: json!("ping"),
                headers: HashMap::new(),
                method: crate::config::HttpMethod::Post,
                signal: None,
            })
            .await
            .unwrap();
        assert_eq!(response, Response::success(json!("ping")));
    }
}
