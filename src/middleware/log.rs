use std::time::Instant;

use serde_json::json;

use crate::chain::{BoxFuture, Middleware, Next, RpcError};
use crate::client::CallContext;
use crate::message::Response;
use crate::router::ServerContext;

/// Outbound middleware logging every call with its outcome and duration
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestLog;

impl Middleware<CallContext> for RequestLog {
    fn handle<'a>(
        &'a self,
        ctx: CallContext,
        next: Next<'a, CallContext>,
    ) -> BoxFuture<'a, Result<CallContext, RpcError>> {
        Box::pin(async move {
            let path = ctx.path.clone();
            let started = Instant::now();
            tracing::debug!(%path, "call started");
            match next.run(ctx).await {
                Ok(ctx) => {
                    let code = ctx.output.as_ref().map(|response| response.code);
                    tracing::info!(
                        %path,
                        ?code,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "call finished"
                    );
                    Ok(ctx)
                }
                Err(err) => {
                    tracing::error!(
                        %path,
                        error = %err,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "call failed"
                    );
                    Err(err)
                }
            }
        })
    }
}

/// Server middleware converting downstream errors into structured failure
/// responses.
///
/// Place it first in the chain: the router core never catches, so without
/// this layer a handler error propagates all the way out of `dispatch`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CatchAll;

impl Middleware<ServerContext> for CatchAll {
    fn handle<'a>(
        &'a self,
        ctx: ServerContext,
        next: Next<'a, ServerContext>,
    ) -> BoxFuture<'a, Result<ServerContext, RpcError>> {
        Box::pin(async move {
            let fallback = ctx.clone();
            match next.run(ctx).await {
                Ok(ctx) => Ok(ctx),
                Err(err) => {
                    tracing::error!(path = %fallback.path, error = %err, "call handler failed");
                    let mut ctx = fallback;
                    ctx.output = Some(Response::fail(json!({"error": err.to_string()})));
                    Ok(ctx)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Code;
    use crate::router::{handler_fn, RawCall, Router, RouteTable};
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_catch_all_converts_handler_error() {
        let table = RouteTable::builder()
            .route(
                "/broken",
                handler_fn(|_ctx| async move { Err(RpcError::handler("db connection lost")) }),
            )
            .build();
        let router = Router::new(table).layer(Arc::new(CatchAll)).compose();

        let response = router
            .dispatch(RawCall {
                path: "/broken".to_string(),
                input: Value::Null,
                headers: HashMap::new(),
            })
            .await
            .unwrap();

        assert_eq!(response.code, Code::Fail);
        assert!(response.data.to_string().contains("db connection lost"));
    }

    #[tokio::test]
    async fn test_catch_all_passes_success_through() {
        let table = RouteTable::builder()
            .route(
                "/ok",
                handler_fn(|_ctx| async move { Ok(Response::success(json!(1))) }),
            )
            .build();
        let router = Router::new(table).layer(Arc::new(CatchAll)).compose();

        let response = router
            .dispatch(RawCall {
                path: "/ok".to_string(),
                input: Value::Null,
                headers: HashMap::new(),
            })
            .await
            .unwrap();
        assert_eq!(response, Response::success(json!(1)));
    }
}
