use std::sync::Arc;

use serde_json::{json, Value};

use crate::chain::{BoxFuture, Middleware, Next, RpcError};
use crate::client::{CallContext, ReplyContext};
use crate::hooks::{JsonSchemaCheck, SchemaCheck, ValidationFailure};
use crate::message::{Code, Response};

type FailHook = Arc<dyn Fn(&ValidationFailure) + Send + Sync>;

fn default_fail_hook() -> FailHook {
    Arc::new(|failure| {
        tracing::warn!(%failure, "input rejected by schema check");
    })
}

fn failure_response(failure: &ValidationFailure) -> Response {
    Response::fail(json!({
        "message": failure.message,
        "fields": failure.fields,
        "errors": failure.errors,
    }))
}

/// Outbound middleware checking the call input against a schema.
///
/// On a failed check the dedicated failure hook fires, the call resolves
/// to a failure response, and nothing downstream (the transport included)
/// runs for this call.
pub struct ValidateInput {
    schema: Value,
    check: Arc<dyn SchemaCheck>,
    on_fail: FailHook,
}

impl ValidateInput {
    /// Check against `schema` with the JSON Schema checker
    pub fn new(schema: Value) -> Self {
        Self {
            schema,
            check: Arc::new(JsonSchemaCheck),
            on_fail: default_fail_hook(),
        }
    }

    /// Substitute the schema checker
    pub fn with_check(mut self, check: Arc<dyn SchemaCheck>) -> Self {
        self.check = check;
        self
    }

    /// Set the failure hook
    pub fn on_fail(mut self, hook: impl Fn(&ValidationFailure) + Send + Sync + 'static) -> Self {
        self.on_fail = Arc::new(hook);
        self
    }
}

impl Middleware<CallContext> for ValidateInput {
    fn handle<'a>(
        &'a self,
        mut ctx: CallContext,
        next: Next<'a, CallContext>,
    ) -> BoxFuture<'a, Result<CallContext, RpcError>> {
        Box::pin(async move {
            match self.check.check(&self.schema, &ctx.input) {
                Ok(()) => next.run(ctx).await,
                Err(failure) => {
                    (self.on_fail)(&failure);
                    ctx.output = Some(failure_response(&failure));
                    Ok(ctx)
                }
            }
        })
    }
}

/// Reply middleware checking successful response payloads against a schema.
///
/// A response that fails the check is rewritten into a failure response so
/// no success callback ever observes malformed data; the failure hook
/// fires with the details.
pub struct ValidateReply {
    schema: Value,
    check: Arc<dyn SchemaCheck>,
    on_fail: FailHook,
}

impl ValidateReply {
    /// Check against `schema` with the JSON Schema checker
    pub fn new(schema: Value) -> Self {
        Self {
            schema,
            check: Arc::new(JsonSchemaCheck),
            on_fail: default_fail_hook(),
        }
    }

    /// Substitute the schema checker
    pub fn with_check(mut self, check: Arc<dyn SchemaCheck>) -> Self {
        self.check = check;
        self
    }

    /// Set the failure hook
    pub fn on_fail(mut self, hook: impl Fn(&ValidationFailure) + Send + Sync + 'static) -> Self {
        self.on_fail = Arc::new(hook);
        self
    }
}

impl Middleware<ReplyContext> for ValidateReply {
    fn handle<'a>(
        &'a self,
        mut reply: ReplyContext,
        next: Next<'a, ReplyContext>,
    ) -> BoxFuture<'a, Result<ReplyContext, RpcError>> {
        Box::pin(async move {
            if reply.response.code != Code::Success {
                return next.run(reply).await;
            }
            match self.check.check(&self.schema, &reply.response.data) {
                Ok(()) => next.run(reply).await,
                Err(failure) => {
                    (self.on_fail)(&failure);
                    reply.response = failure_response(&failure);
                    Ok(reply)
                }
            }
        })
    }
}
