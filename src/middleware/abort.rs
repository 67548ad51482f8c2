use std::sync::Mutex;

use crate::chain::{BoxFuture, Middleware, Next, RpcError};
use crate::client::{abort_pair, AbortHandle, CallContext};

/// Outbound middleware racing the rest of the chain against the call's
/// abort signal.
///
/// When the signal fires first, the downstream future (transport included)
/// is dropped and the call resolves to an aborted error. A call without a
/// signal passes through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Abort;

impl Middleware<CallContext> for Abort {
    fn handle<'a>(
        &'a self,
        ctx: CallContext,
        next: Next<'a, CallContext>,
    ) -> BoxFuture<'a, Result<CallContext, RpcError>> {
        Box::pin(async move {
            match ctx.signal.clone() {
                None => next.run(ctx).await,
                Some(signal) => {
                    tokio::select! {
                        result = next.run(ctx) => result,
                        _ = signal.cancelled() => Err(RpcError::Aborted),
                    }
                }
            }
        })
    }
}

/// Outbound middleware enforcing last-call-wins.
///
/// Every call through this layer arms a fresh signal and cancels the
/// previous in-flight call that came through the same instance. Place one
/// instance per call kind that should collapse to its latest invocation
/// (e.g. type-ahead search).
#[derive(Debug, Default)]
pub struct Once {
    gate: Mutex<Option<AbortHandle>>,
}

impl Once {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Middleware<CallContext> for Once {
    fn handle<'a>(
        &'a self,
        mut ctx: CallContext,
        next: Next<'a, CallContext>,
    ) -> BoxFuture<'a, Result<CallContext, RpcError>> {
        Box::pin(async move {
            let (handle, signal) = abort_pair();
            let previous = self.gate.lock().unwrap().replace(handle);
            if let Some(previous) = previous {
                previous.abort();
            }
            ctx.signal = Some(signal.clone());
            tokio::select! {
                result = next.run(ctx) => result,
                _ = signal.cancelled() => Err(RpcError::Aborted),
            }
        })
    }
}
