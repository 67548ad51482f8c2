use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use futures::future::try_join_all;
use serde_json::{json, Value};
use tokio::sync::oneshot;

use crate::chain::{BoxFuture, Middleware, Next, RpcError};
use crate::client::{AbortSignal, CallContext, CallMeta, Client};
use crate::message::{
    batch_envelope, parse_batch_input, parse_batch_output, Response, BATCH_PATH, MIN_BATCH,
};
use crate::router::{RouteTable, ServerContext};

type IgnoreFn = Arc<dyn Fn(&CallContext) -> bool + Send + Sync>;

/// One call parked in the queue, waiting for the window to close
struct QueuedCall {
    path: String,
    input: Value,
    meta: CallMeta,
    signal: Option<AbortSignal>,
    reply: oneshot::Sender<Result<Response, RpcError>>,
}

#[derive(Default)]
struct BatchState {
    queue: Vec<QueuedCall>,
    /// true while a window timer is running for the current queue
    armed: bool,
}

/// Client-side batch coordinator.
///
/// The first batchable call arms a window timer and starts collecting;
/// calls issued inside the window join the queue. When the timer fires the
/// queue is flushed: a lone call goes out as a normal single call, two or
/// more are wrapped into one aggregate call whose reply is fanned back out
/// to the original callers in submission order. Calls arriving while a
/// flush is in flight start the next collection cycle.
///
/// The coordinator sends aggregates through the [`Client`] it is attached
/// to, so they pass the same outbound chain as everything else; the
/// aggregate path itself is always exempt from coalescing.
pub struct Batcher {
    window: Duration,
    ignore: Option<IgnoreFn>,
    client: OnceLock<Arc<Client>>,
    state: Mutex<BatchState>,
}

impl Batcher {
    /// Create a coordinator with the given collection window
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            ignore: None,
            client: OnceLock::new(),
            state: Mutex::new(BatchState::default()),
        }
    }

    /// Exempt calls matching the predicate from coalescing
    pub fn with_ignore(mut self, ignore: impl Fn(&CallContext) -> bool + Send + Sync + 'static) -> Self {
        self.ignore = Some(Arc::new(ignore));
        self
    }

    /// Attach the client used to dispatch flushed calls. Must happen before
    /// the first batchable call; attaching twice is an error.
    pub fn attach(&self, client: Arc<Client>) -> Result<(), RpcError> {
        self.client
            .set(client)
            .map_err(|_| RpcError::custom("batcher is already attached"))
    }

    fn exempt(&self, ctx: &CallContext) -> bool {
        ctx.path == BATCH_PATH
            || ctx.meta.solo
            || self.ignore.as_ref().is_some_and(|ignore| ignore(ctx))
    }

    async fn flush(&self) {
        let drained = {
            let mut state = self.state.lock().unwrap();
            state.armed = false;
            std::mem::take(&mut state.queue)
        };
        // a call cancelled while queued never occupies an envelope slot;
        // dropping its reply sender resolves the waiting caller
        let mut live: Vec<QueuedCall> = drained
            .into_iter()
            .filter(|call| !call.signal.as_ref().is_some_and(AbortSignal::is_aborted))
            .collect();

        if live.is_empty() {
            return;
        }

        let Some(client) = self.client.get().cloned() else {
            for call in live {
                let _ = call.reply.send(Err(RpcError::Unattached));
            }
            return;
        };

        if live.len() < MIN_BATCH {
            // a lone pending call bypasses batching entirely
            if let Some(call) = live.pop() {
                let QueuedCall {
                    path,
                    input,
                    mut meta,
                    signal,
                    reply,
                } = call;
                meta.solo = true;
                let mut ctx = CallContext::new(path, input).with_meta(meta);
                if let Some(signal) = signal {
                    ctx = ctx.with_signal(signal);
                }
                let _ = reply.send(client.send(ctx).await);
            }
            return;
        }

        tracing::debug!(calls = live.len(), "flushing batch window");
        let pairs: Vec<(String, Value)> = live
            .iter()
            .map(|call| (call.path.clone(), call.input.clone()))
            .collect();
        let mut meta = CallMeta::default();
        meta.solo = true;
        let aggregate = CallContext::new(BATCH_PATH, batch_envelope(&pairs)).with_meta(meta);

        match client.send(aggregate).await {
            Err(err) => {
                for call in live {
                    let _ = call.reply.send(Err(err.clone()));
                }
            }
            Ok(response) if !response.is_success() => {
                let err = RpcError::transport(format!(
                    "aggregate call rejected with code {:?}",
                    response.code
                ));
                for call in live {
                    let _ = call.reply.send(Err(err.clone()));
                }
            }
            Ok(response) => match parse_batch_output(&response.data, live.len()) {
                Ok(slots) => {
                    for (call, slot) in live.into_iter().zip(slots) {
                        let _ = call.reply.send(Ok(slot));
                    }
                }
                Err(err) => {
                    for call in live {
                        let _ = call.reply.send(Err(err.clone()));
                    }
                }
            },
        }
    }
}

/// Outbound middleware parking batchable calls in a [`Batcher`].
///
/// Exempt calls pass straight through to the rest of the chain; everything
/// else waits for its slot of the aggregate reply and resolves with it, so
/// the caller cannot tell a coalesced call from a direct one.
pub struct BatchSend {
    batcher: Arc<Batcher>,
}

impl BatchSend {
    pub fn new(batcher: Arc<Batcher>) -> Self {
        Self { batcher }
    }
}

impl Middleware<CallContext> for BatchSend {
    fn handle<'a>(
        &'a self,
        mut ctx: CallContext,
        next: Next<'a, CallContext>,
    ) -> BoxFuture<'a, Result<CallContext, RpcError>> {
        Box::pin(async move {
            if self.batcher.exempt(&ctx) {
                return next.run(ctx).await;
            }

            let (tx, rx) = oneshot::channel();
            let arm = {
                let mut state = self.batcher.state.lock().unwrap();
                state.queue.push(QueuedCall {
                    path: ctx.path.clone(),
                    input: ctx.input.clone(),
                    meta: ctx.meta.clone(),
                    signal: ctx.signal.clone(),
                    reply: tx,
                });
                !std::mem::replace(&mut state.armed, true)
            };
            if arm {
                let batcher = self.batcher.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(batcher.window).await;
                    batcher.flush().await;
                });
            }

            let outcome = match ctx.signal.clone() {
                None => rx.await,
                Some(signal) => tokio::select! {
                    outcome = rx => outcome,
                    _ = signal.cancelled() => return Err(RpcError::Aborted),
                },
            };
            let response = match outcome {
                Ok(result) => result?,
                // the coordinator dropped our sender: cancelled at flush
                Err(_) => return Err(RpcError::Aborted),
            };
            ctx.output = Some(response);
            Ok(ctx)
        })
    }
}

/// Server middleware unrolling aggregate calls.
///
/// For a context on the aggregate path, forks one derived context per
/// enveloped `[path, input]` tuple, runs the registered handlers
/// concurrently, and emits a single success response whose data is the
/// result array in envelope order. Handlers report application failures as
/// failure responses, which are collected per slot; a handler that returns
/// an error aborts the whole aggregate. Any other path passes through
/// untouched.
pub struct BatchUnroll {
    routes: Arc<RouteTable>,
}

impl BatchUnroll {
    pub fn new(routes: Arc<RouteTable>) -> Self {
        Self { routes }
    }
}

impl Middleware<ServerContext> for BatchUnroll {
    fn handle<'a>(
        &'a self,
        mut ctx: ServerContext,
        next: Next<'a, ServerContext>,
    ) -> BoxFuture<'a, Result<ServerContext, RpcError>> {
        Box::pin(async move {
            if ctx.path != BATCH_PATH {
                return next.run(ctx).await;
            }

            let calls = match parse_batch_input(&ctx.input) {
                Ok(calls) => calls,
                Err(err) => {
                    ctx.output = Some(Response::fail(json!(err.to_string())));
                    return Ok(ctx);
                }
            };

            let subcalls: Vec<_> = calls
                .into_iter()
                .map(|(path, input)| {
                    let sub = ctx.fork(path, input);
                    let handler = self.routes.lookup(&sub.path).cloned();
                    async move {
                        match handler {
                            Some(handler) => handler(sub).await,
                            None => Ok(Response::not_implemented(&sub.path)),
                        }
                    }
                })
                .collect();
            let results = try_join_all(subcalls).await?;

            let data = serde_json::to_value(&results)
                .map_err(|err| RpcError::custom(format!("unencodable batch results: {}", err)))?;
            ctx.output = Some(Response::success(data));
            Ok(ctx)
        })
    }
}
