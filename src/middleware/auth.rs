use std::future::Future;
use std::sync::Arc;

use crate::chain::{BoxFuture, Middleware, Next, RpcError};
use crate::client::{CallContext, ReplyContext};
use crate::hooks::{Notifier, TokenPair, TokenStore};
use crate::message::Code;

/// Header the stored credential is presented under
pub const AUTHORIZATION: &str = "authorization";

/// Outbound middleware presenting the stored credential.
///
/// Calls whose metadata names a token kind get an `authorization` header
/// from the store; calls without a requirement pass through untouched. A
/// missing stored token is not an error here: the server will answer
/// unauthorized and the refresh middleware takes it from there.
pub struct AttachToken {
    store: Arc<dyn TokenStore>,
}

impl AttachToken {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }
}

impl Middleware<CallContext> for AttachToken {
    fn handle<'a>(
        &'a self,
        mut ctx: CallContext,
        next: Next<'a, CallContext>,
    ) -> BoxFuture<'a, Result<CallContext, RpcError>> {
        Box::pin(async move {
            if let Some(kind) = ctx.meta.token {
                match self.store.get(kind) {
                    Some(token) => {
                        ctx.meta
                            .headers
                            .insert(AUTHORIZATION.to_string(), format!("Bearer {}", token));
                    }
                    None => {
                        tracing::debug!(path = %ctx.path, ?kind, "no stored token for call");
                    }
                }
            }
            next.run(ctx).await
        })
    }
}

/// The credential refresh hook
pub type RefreshFn = Arc<dyn Fn() -> BoxFuture<'static, Result<TokenPair, RpcError>> + Send + Sync>;

/// Wrap an async function as a refresh hook
pub fn refresh_fn<F, Fut>(f: F) -> RefreshFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TokenPair, RpcError>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

/// Reply middleware that turns an unauthorized response into one
/// refresh-and-resend cycle.
///
/// On the first unauthorized response of a call it invokes the refresh
/// hook; a fresh pair is stored and the call's single resend is requested.
/// If the refresh fails, or the response is already the resend's, the user
/// is told to re-authenticate and the response continues down the reply
/// chain so the unauthorized callback still fires. The client's resend
/// budget bounds the cycle to one attempt per logical call.
pub struct RefreshOnUnauthorized {
    store: Arc<dyn TokenStore>,
    refresh: RefreshFn,
    notifier: Arc<dyn Notifier>,
}

impl RefreshOnUnauthorized {
    pub fn new(store: Arc<dyn TokenStore>, refresh: RefreshFn, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            refresh,
            notifier,
        }
    }
}

impl Middleware<ReplyContext> for RefreshOnUnauthorized {
    fn handle<'a>(
        &'a self,
        mut reply: ReplyContext,
        next: Next<'a, ReplyContext>,
    ) -> BoxFuture<'a, Result<ReplyContext, RpcError>> {
        Box::pin(async move {
            if reply.response.code != Code::Unauthorized {
                return next.run(reply).await;
            }
            if !reply.resend_allowed {
                self.notifier.error("Session expired, please sign in again");
                return next.run(reply).await;
            }
            match (self.refresh)().await {
                Ok(pair) => {
                    self.store.set(pair);
                    reply.resend_requested = true;
                    Ok(reply)
                }
                Err(err) => {
                    tracing::warn!(error = %err, "token refresh failed");
                    self.notifier.error("Session expired, please sign in again");
                    next.run(reply).await
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Client, OutputCallbacks};
    use crate::config::TokenKind;
    use crate::hooks::{MemoryTokenStore, MockTransport, RecordingNotifier};
    use crate::message::Response;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn fresh_pair() -> TokenPair {
        TokenPair {
            access: "fresh-access".to_string(),
            refresh: "fresh-refresh".to_string(),
        }
    }

    fn counting_refresh(counter: Arc<AtomicUsize>) -> RefreshFn {
        refresh_fn(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(fresh_pair())
            }
        })
    }

    fn authed_ctx(path: &str) -> CallContext {
        let mut ctx = CallContext::new(path, json!(null));
        ctx.meta.token = Some(TokenKind::Access);
        ctx
    }

    #[tokio::test]
    async fn test_attach_token_sets_header() {
        let transport = Arc::new(
            MockTransport::new().script("/user/list", Ok(Response::success(json!([])))),
        );
        let store = Arc::new(MemoryTokenStore::with_access("tok-1"));
        let client = Client::builder()
            .layer(Arc::new(AttachToken::new(store)))
            .layer(Arc::new(AssertAuthHeader("Bearer tok-1")))
            .transport(transport)
            .build()
            .unwrap();

        let response = client.send(authed_ctx("/user/list")).await.unwrap();
        assert!(response.is_success());
    }

    /// Middleware that fails the call unless the expected header is present
    struct AssertAuthHeader(&'static str);

    impl Middleware<CallContext> for AssertAuthHeader {
        fn handle<'a>(
            &'a self,
            ctx: CallContext,
            next: Next<'a, CallContext>,
        ) -> BoxFuture<'a, Result<CallContext, RpcError>> {
            Box::pin(async move {
                if ctx.meta.headers.get(AUTHORIZATION).map(String::as_str) != Some(self.0) {
                    return Err(RpcError::custom("authorization header missing"));
                }
                next.run(ctx).await
            })
        }
    }

    #[tokio::test]
    async fn test_unauthorized_refreshes_once_and_resends_once() {
        let transport = Arc::new(
            MockTransport::new()
                .script("/user/list", Ok(Response::unauthorized()))
                .script("/user/list", Ok(Response::success(json!([1])))),
        );
        let store = Arc::new(MemoryTokenStore::with_access("stale"));
        let refreshes = Arc::new(AtomicUsize::new(0));
        let client = Client::builder()
            .layer(Arc::new(AttachToken::new(store.clone())))
            .layer_reply(Arc::new(RefreshOnUnauthorized::new(
                store.clone(),
                counting_refresh(refreshes.clone()),
                Arc::new(RecordingNotifier::new()),
            )))
            .transport(transport.clone())
            .build()
            .unwrap();

        let response = client.send(authed_ctx("/user/list")).await.unwrap();

        assert!(response.is_success());
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
        // exactly one resend: original call plus one retry
        assert_eq!(transport.paths(), vec!["/user/list", "/user/list"]);
        // the fresh pair was stored
        assert_eq!(
            store.get(TokenKind::Access).as_deref(),
            Some("fresh-access")
        );
    }

    #[tokio::test]
    async fn test_resend_is_bounded_when_still_unauthorized() {
        let transport = Arc::new(
            MockTransport::new()
                .script("/user/list", Ok(Response::unauthorized()))
                .script("/user/list", Ok(Response::unauthorized()))
                .script("/user/list", Ok(Response::unauthorized())),
        );
        let store = Arc::new(MemoryTokenStore::new());
        let refreshes = Arc::new(AtomicUsize::new(0));
        let notifier = Arc::new(RecordingNotifier::new());
        let client = Client::builder()
            .layer_reply(Arc::new(RefreshOnUnauthorized::new(
                store,
                counting_refresh(refreshes.clone()),
                notifier.clone(),
            )))
            .transport(transport.clone())
            .build()
            .unwrap();

        let unauthorized_seen = Arc::new(Mutex::new(0usize));
        let seen = unauthorized_seen.clone();
        let mut ctx = authed_ctx("/user/list");
        ctx.callbacks = OutputCallbacks::new()
            .on_unauthorized(move |_| *seen.lock().unwrap() += 1);

        let response = client.send(ctx).await.unwrap();

        assert_eq!(response.code, Code::Unauthorized);
        // one refresh, one resend, then surrender to the callback
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(transport.paths().len(), 2);
        assert_eq!(*unauthorized_seen.lock().unwrap(), 1);
        assert!(notifier
            .messages()
            .iter()
            .any(|(level, message)| level == "error" && message.contains("sign in again")));
    }

    #[tokio::test]
    async fn test_failed_refresh_surfaces_unauthorized() {
        let transport = Arc::new(
            MockTransport::new().script("/user/list", Ok(Response::unauthorized())),
        );
        let store = Arc::new(MemoryTokenStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let client = Client::builder()
            .layer_reply(Arc::new(RefreshOnUnauthorized::new(
                store,
                refresh_fn(|| async { Err(RpcError::transport("refresh endpoint down")) }),
                notifier.clone(),
            )))
            .transport(transport.clone())
            .build()
            .unwrap();

        let response = client.send(authed_ctx("/user/list")).await.unwrap();

        assert_eq!(response.code, Code::Unauthorized);
        // no resend happened
        assert_eq!(transport.paths().len(), 1);
        assert!(!notifier.messages().is_empty());
    }
}
