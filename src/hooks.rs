/// Injected collaborator seams
///
/// The pipeline core performs no I/O of its own: delivery, credential
/// storage, schema checking, and user-facing notification are all supplied
/// through the traits in this module. Mock implementations live alongside
/// the traits so the rest of the crate can be tested without a network.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chain::RpcError;
use crate::client::AbortSignal;
use crate::config::{HttpMethod, TokenKind};
use crate::message::Response;

/// The serialized form of one outbound call, as handed to the transport
#[derive(Debug, Clone)]
pub struct TransportCall {
    /// Opaque routing key (e.g. a slash-delimited string)
    pub path: String,
    /// Serialized call input
    pub payload: Value,
    /// Wire metadata set by middleware (e.g. the authorization header)
    pub headers: HashMap<String, String>,
    /// HTTP method hint for HTTP-shaped transports
    pub method: HttpMethod,
    /// Cancellation signal, if the caller armed one
    pub signal: Option<AbortSignal>,
}

/// Trait for outbound call delivery
///
/// Implementations perform the actual HTTP/WebSocket/in-process exchange
/// and resolve to the raw response. Returning `Ok` is the data path and
/// `Err` the error path; the client processes whichever comes back.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver one call and resolve its raw response
    async fn send(&self, call: TransportCall) -> Result<Response, RpcError>;
}

/// An access/refresh credential pair, as issued by a sign-in or refresh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

/// Trait for credential persistence
///
/// Consumed by the token-attach middleware (read side) and the
/// refresh-on-unauthorized middleware (write side). Where tokens actually
/// live (memory, local storage, a keychain) is the implementation's
/// business.
pub trait TokenStore: Send + Sync {
    /// Get the stored token of a kind, if any
    fn get(&self, kind: TokenKind) -> Option<String>;

    /// Replace both tokens with a freshly issued pair
    fn set(&self, pair: TokenPair);
}

/// A failed schema check: what went wrong and where
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationFailure {
    /// Summary message
    pub message: String,
    /// Instance paths of the offending fields (e.g. "/phone")
    pub fields: Vec<String>,
    /// One human-readable message per violation
    pub errors: Vec<String>,
}

impl ValidationFailure {
    pub fn new(message: impl Into<String>, fields: Vec<String>, errors: Vec<String>) -> Self {
        Self {
            message: message.into(),
            fields,
            errors,
        }
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if !self.fields.is_empty() {
            write!(f, " (fields: {})", self.fields.join(", "))?;
        }
        Ok(())
    }
}

/// Trait for schema checking
///
/// The pipeline treats schemas as opaque values; any checker that can
/// evaluate a schema against an instance is substitutable.
pub trait SchemaCheck: Send + Sync {
    /// Check `value` against `schema`
    fn check(&self, schema: &Value, value: &Value) -> Result<(), ValidationFailure>;
}

/// JSON Schema checker backed by the `jsonschema` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSchemaCheck;

impl SchemaCheck for JsonSchemaCheck {
    fn check(&self, schema: &Value, value: &Value) -> Result<(), ValidationFailure> {
        let validator = jsonschema::validator_for(schema).map_err(|e| {
            ValidationFailure::new(format!("Failed to compile schema: {}", e), vec![], vec![])
        })?;

        if validator.is_valid(value) {
            return Ok(());
        }

        let mut fields = Vec::new();
        let mut errors = Vec::new();
        for error in validator.iter_errors(value) {
            fields.push(error.instance_path.to_string());
            errors.push(error.to_string());
        }
        Err(ValidationFailure::new("Validation failed", fields, errors))
    }
}

/// Trait for user-facing notification
///
/// Every failure the pipeline surfaces ends in a call on this seam; how it
/// is presented (toast, snackbar, log line) is external.
pub trait Notifier: Send + Sync {
    /// Report normal, user-visible information
    fn info(&self, message: &str);

    /// Report a user-visible failure
    fn error(&self, message: &str);
}

/// Notifier that forwards to the tracing subscriber
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn info(&self, message: &str) {
        tracing::info!(target: "shallot::notify", "{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "shallot::notify", "{}", message);
    }
}

// Mock implementations for testing

/// Mock transport with scripted responses
///
/// Responses are queued per path and consumed in order; every delivered
/// call is recorded so tests can assert on what actually went out. An
/// unscripted path resolves to a transport error.
#[derive(Default)]
pub struct MockTransport {
    scripts: Mutex<HashMap<String, VecDeque<Result<Response, RpcError>>>>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTransport")
            .field("calls", &self.calls)
            .finish()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for a path
    pub fn script(self, path: &str, result: Result<Response, RpcError>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(result);
        self
    }

    /// Paths and payloads of every call delivered so far, in order
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    /// Paths of every call delivered so far, in order
    pub fn paths(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(path, _)| path.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, call: TransportCall) -> Result<Response, RpcError> {
        self.calls
            .lock()
            .unwrap()
            .push((call.path.clone(), call.payload.clone()));
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&call.path)
            .and_then(|queue| queue.pop_front());
        match scripted {
            Some(result) => result,
            None => Err(RpcError::transport(format!(
                "no scripted response for {}",
                call.path
            ))),
        }
    }
}

/// In-memory token store
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<HashMap<TokenKind, String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-loaded with an access token
    pub fn with_access(token: &str) -> Self {
        let store = Self::new();
        store
            .tokens
            .lock()
            .unwrap()
            .insert(TokenKind::Access, token.to_string());
        store
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, kind: TokenKind) -> Option<String> {
        self.tokens.lock().unwrap().get(&kind).cloned()
    }

    fn set(&self, pair: TokenPair) {
        let mut tokens = self.tokens.lock().unwrap();
        tokens.insert(TokenKind::Access, pair.access);
        tokens.insert(TokenKind::Refresh, pair.refresh);
    }
}

/// Notifier that records messages for assertions
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// All (level, message) pairs recorded so far
    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn info(&self, message: &str) {
        self.messages
            .lock()
            .unwrap()
            .push(("info".to_string(), message.to_string()));
    }

    fn error(&self, message: &str) {
        self.messages
            .lock()
            .unwrap()
            .push(("error".to_string(), message.to_string()));
    }
}
