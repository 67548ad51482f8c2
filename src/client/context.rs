use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use crate::config::{ApiMeta, HttpMethod, TokenKind};
use crate::message::{Code, Response};

use super::AbortSignal;

/// Per-call metadata threaded from the API definition to the transport
#[derive(Debug, Clone, PartialEq)]
pub struct CallMeta {
    /// HTTP method hint for HTTP-shaped transports
    pub method: HttpMethod,
    /// Credential the call must present, if any
    pub token: Option<TokenKind>,
    /// Wire headers, filled in by middleware
    pub headers: HashMap<String, String>,
    /// When set, the call is never coalesced into a batch envelope
    pub solo: bool,
}

impl Default for CallMeta {
    fn default() -> Self {
        Self {
            method: HttpMethod::Post,
            token: None,
            headers: HashMap::new(),
            solo: false,
        }
    }
}

impl From<&ApiMeta> for CallMeta {
    fn from(meta: &ApiMeta) -> Self {
        Self {
            method: meta.method,
            token: meta.token,
            headers: HashMap::new(),
            solo: !meta.batch,
        }
    }
}

/// A response-handling callback
pub type Callback = Box<dyn FnMut(&Value) + Send>;

/// Discriminated response dispatch: one optional callback per code.
///
/// `dispatch` selects the callback matching the response code. A code with
/// no registered callback is not an error, but it is logged as a warning
/// since it usually means the callback map is incomplete.
#[derive(Default)]
pub struct OutputCallbacks {
    on_success: Option<Callback>,
    on_fail: Option<Callback>,
    on_unauthorized: Option<Callback>,
    on_not_found: Option<Callback>,
    on_not_implemented: Option<Callback>,
}

impl fmt::Debug for OutputCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputCallbacks")
            .field("on_success", &self.on_success.is_some())
            .field("on_fail", &self.on_fail.is_some())
            .field("on_unauthorized", &self.on_unauthorized.is_some())
            .field("on_not_found", &self.on_not_found.is_some())
            .field("on_not_implemented", &self.on_not_implemented.is_some())
            .finish()
    }
}

impl OutputCallbacks {
    /// Create an empty callback map
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle success responses
    pub fn on_success(mut self, callback: impl FnMut(&Value) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(callback));
        self
    }

    /// Handle failure responses
    pub fn on_fail(mut self, callback: impl FnMut(&Value) + Send + 'static) -> Self {
        self.on_fail = Some(Box::new(callback));
        self
    }

    /// Handle unauthorized responses
    pub fn on_unauthorized(mut self, callback: impl FnMut(&Value) + Send + 'static) -> Self {
        self.on_unauthorized = Some(Box::new(callback));
        self
    }

    /// Handle not-found responses
    pub fn on_not_found(mut self, callback: impl FnMut(&Value) + Send + 'static) -> Self {
        self.on_not_found = Some(Box::new(callback));
        self
    }

    /// Handle not-implemented responses
    pub fn on_not_implemented(mut self, callback: impl FnMut(&Value) + Send + 'static) -> Self {
        self.on_not_implemented = Some(Box::new(callback));
        self
    }

    /// Fire the callback registered for the response's code
    pub fn dispatch(&mut self, response: &Response) {
        let slot = match response.code {
            Code::Success => &mut self.on_success,
            Code::Fail => &mut self.on_fail,
            Code::Unauthorized => &mut self.on_unauthorized,
            Code::NotFound => &mut self.on_not_found,
            Code::NotImplemented => &mut self.on_not_implemented,
        };
        match slot {
            Some(callback) => callback(&response.data),
            None => tracing::warn!(
                code = ?response.code,
                "response dropped: no callback registered for this code"
            ),
        }
    }
}

/// The record threaded through the outbound (request) chain
#[derive(Debug)]
pub struct CallContext {
    /// Routing key, matched exactly by the server dispatch table
    pub path: String,
    /// Call input, already serialized
    pub input: Value,
    /// Per-call metadata
    pub meta: CallMeta,
    /// Set by whichever stage produced the response (transport endpoint,
    /// batch coordinator, or a short-circuiting middleware)
    pub output: Option<Response>,
    /// Response dispatch map, consumed when the call completes
    pub callbacks: OutputCallbacks,
    /// Cancellation signal, if the caller armed one
    pub signal: Option<AbortSignal>,
}

impl CallContext {
    /// Create a context with default metadata and no callbacks
    pub fn new(path: impl Into<String>, input: Value) -> Self {
        Self {
            path: path.into(),
            input,
            meta: CallMeta::default(),
            output: None,
            callbacks: OutputCallbacks::default(),
            signal: None,
        }
    }

    /// Set the call metadata
    pub fn with_meta(mut self, meta: CallMeta) -> Self {
        self.meta = meta;
        self
    }

    /// Set the callback map
    pub fn with_callbacks(mut self, callbacks: OutputCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Arm a cancellation signal
    pub fn with_signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }
}

/// The record threaded through the inbound (reply) chain
#[derive(Debug)]
pub struct ReplyContext {
    /// Path of the originating call
    pub path: String,
    /// The raw response under processing; middleware may rewrite it
    pub response: Response,
    /// Whether this call may still be resent (false on the retry pass)
    pub resend_allowed: bool,
    /// Set by middleware to trigger the one bounded resend
    pub resend_requested: bool,
}

impl ReplyContext {
    pub fn new(path: impl Into<String>, response: Response, resend_allowed: bool) -> Self {
        Self {
            path: path.into(),
            response,
            resend_allowed,
            resend_requested: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_dispatch_selects_matching_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let success_seen = seen.clone();
        let fail_seen = seen.clone();

        let mut callbacks = OutputCallbacks::new()
            .on_success(move |data| success_seen.lock().unwrap().push(("success", data.clone())))
            .on_fail(move |data| fail_seen.lock().unwrap().push(("fail", data.clone())));

        callbacks.dispatch(&Response::success(json!(7)));
        callbacks.dispatch(&Response::fail(json!("reason")));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![("success", json!(7)), ("fail", json!("reason"))]
        );
    }

    #[test]
    fn test_dispatch_unregistered_code_is_noop() {
        let mut callbacks = OutputCallbacks::new();
        // logged, not a failure
        callbacks.dispatch(&Response::unauthorized());
    }

    #[test]
    fn test_meta_from_api_meta() {
        let api = ApiMeta {
            method: HttpMethod::Get,
            token: Some(TokenKind::Access),
            batch: false,
        };
        let meta = CallMeta::from(&api);
        assert_eq!(meta.method, HttpMethod::Get);
        assert_eq!(meta.token, Some(TokenKind::Access));
        assert!(meta.solo);
    }
}
