/// Example: serve the router over HTTP with axum
///
/// Usage: cargo run --example http_server
///
/// Then, from another shell:
/// ```sh
/// curl -s -X POST localhost:3000/rpc \
///   -H 'content-type: application/json' \
///   -d '{"path": "/user/list", "input": null}'
///
/// curl -s -X POST localhost:3000/rpc \
///   -H 'content-type: application/json' \
///   -d '{"path": "/batch", "input": [["/user/list", null], ["/time", null]]}'
/// ```

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::Json;
use serde_json::json;
use shallot::message::Response;
use shallot::middleware::{BatchUnroll, CatchAll};
use shallot::router::{ComposedRouter, RawCall};
use shallot::{handler_fn, RouteTable, Router};

async fn rpc(State(router): State<ComposedRouter>, Json(raw): Json<RawCall>) -> Json<Response> {
    match router.dispatch(raw).await {
        Ok(response) => Json(response),
        // the catch-all converts handler errors; anything left is a
        // dispatch-level failure
        Err(err) => Json(Response::fail(json!(err.to_string()))),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let table = RouteTable::builder()
        .route(
            "/user/list",
            handler_fn(|_ctx| async move { Ok(Response::success(json!(["alice", "bob"]))) }),
        )
        .route(
            "/time",
            handler_fn(|_ctx| async move {
                let now = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                Ok(Response::success(json!(now)))
            }),
        )
        .build();
    let composed = Router::new(table.clone())
        .layer(Arc::new(CatchAll))
        .layer(Arc::new(BatchUnroll::new(table)))
        .compose();

    let app = axum::Router::new().route("/rpc", post(rpc)).with_state(composed);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000")
        .await
        .expect("bind 127.0.0.1:3000");
    println!("listening on http://127.0.0.1:3000/rpc");
    axum::serve(listener, app).await.expect("serve");
}
