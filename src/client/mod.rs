/// Client-side call pairing
///
/// A [`Client`] owns two chains: the outbound chain processes the request
/// on its way to the transport seam, the reply chain processes the raw
/// response on its way back to the caller's callbacks. Call-scoped
/// middleware staged with [`Client::with`] are spliced into the outbound
/// chain at its `with` marker for exactly one send.

mod context;
mod signal;

pub use context::{Callback, CallContext, CallMeta, OutputCallbacks, ReplyContext};
pub use signal::{abort_pair, AbortHandle, AbortSignal};

use std::sync::Arc;

use serde_json::Value;

use crate::chain::{BoxFuture, Chain, Endpoint, Flow, Middleware, RpcError};
use crate::config::ApiSpec;
use crate::hooks::{Notifier, TracingNotifier, Transport, TransportCall};
use crate::message::Response;

/// Marker at which call-scoped middleware are spliced into the outbound
/// chain. Declared automatically at the tail if the builder never placed it.
pub const WITH_MARK: &str = "with";

/// Chain endpoint bridging into the transport seam
struct TransportEndpoint {
    transport: Arc<dyn Transport>,
}

impl Endpoint<CallContext> for TransportEndpoint {
    fn call<'a>(&'a self, mut ctx: CallContext) -> BoxFuture<'a, Result<CallContext, RpcError>> {
        Box::pin(async move {
            let call = TransportCall {
                path: ctx.path.clone(),
                payload: ctx.input.clone(),
                headers: ctx.meta.headers.clone(),
                method: ctx.meta.method,
                signal: ctx.signal.clone(),
            };
            let response = self.transport.send(call).await?;
            ctx.output = Some(response);
            Ok(ctx)
        })
    }
}

/// Builder for [`Client`]
pub struct ClientBuilder {
    outbound: Chain<CallContext>,
    reply: Chain<ReplyContext>,
    transport: Option<Arc<dyn Transport>>,
    notifier: Arc<dyn Notifier>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            outbound: Chain::new(),
            reply: Chain::new(),
            transport: None,
            notifier: Arc::new(TracingNotifier),
        }
    }

    /// Append a middleware to the outbound (request) chain
    pub fn layer(mut self, middleware: Arc<dyn Middleware<CallContext>>) -> Self {
        self.outbound.push(middleware);
        self
    }

    /// Declare the `with` marker at the current outbound tail.
    ///
    /// # Panics
    /// Panics if the marker was already declared.
    pub fn mark_with(mut self) -> Self {
        self.outbound = self.outbound.mark(WITH_MARK);
        self
    }

    /// Append a middleware to the reply (response) chain
    pub fn layer_reply(mut self, middleware: Arc<dyn Middleware<ReplyContext>>) -> Self {
        self.reply.push(middleware);
        self
    }

    /// Declare the `with` marker at the current reply-chain tail.
    ///
    /// # Panics
    /// Panics if the marker was already declared.
    pub fn mark_with_reply(mut self) -> Self {
        self.reply = self.reply.mark(WITH_MARK);
        self
    }

    /// Set the transport seam (required)
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replace the default tracing-backed notifier
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Finish building.
    ///
    /// Chains are frozen here; the only call-time variation left is the
    /// staged `with` middleware.
    pub fn build(mut self) -> Result<Client, RpcError> {
        let transport = self
            .transport
            .ok_or_else(|| RpcError::custom("client requires a transport"))?;
        if !self.outbound.has_marker(WITH_MARK) {
            self.outbound.try_mark(WITH_MARK)?;
        }
        if !self.reply.has_marker(WITH_MARK) {
            self.reply.try_mark(WITH_MARK)?;
        }
        Ok(Client {
            outbound: Flow::new(self.outbound, WITH_MARK)?,
            reply: Flow::new(self.reply, WITH_MARK)?,
            endpoint: Arc::new(TransportEndpoint { transport }),
            notifier: self.notifier,
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A configured call pipeline: outbound chain, reply chain, transport
/// bridge, and failure notification.
///
/// Cheap to share behind an `Arc`; concurrent sends are independent runs
/// over the same frozen chains.
pub struct Client {
    outbound: Flow<CallContext>,
    reply: Flow<ReplyContext>,
    endpoint: Arc<dyn Endpoint<CallContext>>,
    notifier: Arc<dyn Notifier>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Stage an outbound middleware for the next `send` only
    pub fn with(&self, middleware: Arc<dyn Middleware<CallContext>>) -> &Self {
        self.outbound.stage(middleware);
        self
    }

    /// Stage a reply middleware for the next `send` only
    pub fn with_reply(&self, middleware: Arc<dyn Middleware<ReplyContext>>) -> &Self {
        self.reply.stage(middleware);
        self
    }

    /// Issue one call.
    ///
    /// Runs the outbound chain (consuming anything staged via `with`),
    /// processes the raw response through the reply chain, honors at most
    /// one resend request, then fires the callback matching the final
    /// response code. Errors are reported to the notifier before being
    /// returned.
    pub async fn send(&self, ctx: CallContext) -> Result<Response, RpcError> {
        let composed_out = self.outbound.compose().with_endpoint(self.endpoint.clone());
        let composed_reply = self.reply.compose();

        let CallContext {
            path,
            input,
            meta,
            mut callbacks,
            signal,
            ..
        } = ctx;

        let mut resent = false;
        loop {
            let attempt = CallContext {
                path: path.clone(),
                input: input.clone(),
                meta: meta.clone(),
                output: None,
                callbacks: OutputCallbacks::default(),
                signal: signal.clone(),
            };

            let done = match composed_out.run(attempt).await {
                Ok(done) => done,
                Err(err) => {
                    self.notifier.error(&err.to_string());
                    return Err(err);
                }
            };
            let response = match done.output {
                Some(response) => response,
                None => {
                    let err = RpcError::no_response(path.clone());
                    self.notifier.error(&err.to_string());
                    return Err(err);
                }
            };

            let reply = ReplyContext::new(path.clone(), response, !resent);
            let reply = match composed_reply.run(reply).await {
                Ok(reply) => reply,
                Err(err) => {
                    self.notifier.error(&err.to_string());
                    return Err(err);
                }
            };

            // the retry is the same logical call, re-run through the same
            // composition; a second request is never honored
            if reply.resend_requested && !resent {
                resent = true;
                continue;
            }

            callbacks.dispatch(&reply.response);
            return Ok(reply.response);
        }
    }

    /// Issue a call described by a catalog entry
    pub async fn call(
        &self,
        spec: &ApiSpec,
        input: Value,
        callbacks: OutputCallbacks,
    ) -> Result<Response, RpcError> {
        let ctx = CallContext::new(&spec.path, input)
            .with_meta(CallMeta::from(&spec.meta))
            .with_callbacks(callbacks);
        self.send(ctx).await
    }
}
