/// Example: run the full call pipeline in-process
///
/// Wires a client (logging, auth, batching) to a router (catch-all, batch
/// unrolling, handler table) over the loopback transport, then issues a
/// few calls.
///
/// Usage: cargo run --example loopback

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use shallot::client::CallContext;
use shallot::config::{ApiCatalog, ApiSpec, TokenKind};
use shallot::hooks::MemoryTokenStore;
use shallot::message::Response;
use shallot::middleware::{
    AttachToken, BatchSend, BatchUnroll, Batcher, CatchAll, RequestLog, ValidateInput,
};
use shallot::router::Loopback;
use shallot::{handler_fn, Client, OutputCallbacks, RouteTable, Router};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // Server side: handler table, error catch-all, batch unrolling
    let table = RouteTable::builder()
        .route(
            "/user/list",
            handler_fn(|_ctx| async move { Ok(Response::success(json!(["alice", "bob"]))) }),
        )
        .route(
            "/project/list",
            handler_fn(|_ctx| async move { Ok(Response::success(json!(["alpha", "beta"]))) }),
        )
        .route(
            "/user/register",
            handler_fn(|ctx| async move { Ok(Response::success(json!({"registered": ctx.input}))) }),
        )
        .build();
    let router = Router::new(table.clone())
        .layer(Arc::new(CatchAll))
        .layer(Arc::new(BatchUnroll::new(table)))
        .compose();

    // Client side: logging, credential attach, batching, loopback transport
    let store = Arc::new(MemoryTokenStore::with_access("demo-token"));
    let batcher = Arc::new(Batcher::new(Duration::from_millis(20)));
    let client = Arc::new(
        Client::builder()
            .layer(Arc::new(RequestLog))
            .layer(Arc::new(AttachToken::new(store)))
            .layer(Arc::new(BatchSend::new(batcher.clone())))
            .transport(Arc::new(Loopback::new(router)))
            .build()
            .expect("client assembly"),
    );
    batcher.attach(client.clone()).expect("batcher attach");

    // Two concurrent calls coalesce into one aggregate round-trip
    let (users, projects) = tokio::join!(
        client.send(CallContext::new("/user/list", json!(null))),
        client.send(CallContext::new("/project/list", json!(null))),
    );
    println!("users:    {}", users.expect("user list").data);
    println!("projects: {}", projects.expect("project list").data);

    // Catalog-driven call with input validation staged for this send only
    let catalog = ApiCatalog::builder()
        .api(
            "register",
            ApiSpec::new("/user/register")
                .with_token(TokenKind::Access)
                .solo(),
        )
        .build();
    let register = catalog.get("register").expect("registered api");
    let phone_schema = json!({
        "type": "object",
        "properties": {"phone": {"type": "number"}},
        "required": ["phone"]
    });

    client.with(Arc::new(ValidateInput::new(phone_schema.clone())));
    let rejected = client
        .call(
            register,
            json!({"phone": "not-a-number"}),
            OutputCallbacks::new().on_fail(|reason| println!("✗ rejected: {}", reason)),
        )
        .await
        .expect("validation short-circuit still resolves");
    println!("rejected call resolved with code {:?}", rejected.code);

    client.with(Arc::new(ValidateInput::new(phone_schema)));
    client
        .call(
            register,
            json!({"phone": 13800001111i64}),
            OutputCallbacks::new().on_success(|data| println!("✓ registered: {}", data)),
        )
        .await
        .expect("register call");
}
