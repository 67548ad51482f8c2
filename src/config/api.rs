use serde::{Deserialize, Serialize};
use serde_json::Value;

/// HTTP method enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

/// Which stored credential a call presents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Call metadata shared by every invocation of an API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiMeta {
    /// HTTP method hint for HTTP-shaped transports
    #[serde(default = "ApiMeta::default_method")]
    pub method: HttpMethod,

    /// Credential the call must present, if any
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub token: Option<TokenKind>,

    /// Whether the call may be coalesced into a batch envelope
    #[serde(default = "ApiMeta::default_batch")]
    pub batch: bool,
}

impl ApiMeta {
    fn default_method() -> HttpMethod {
        HttpMethod::Post
    }

    fn default_batch() -> bool {
        true
    }
}

impl Default for ApiMeta {
    fn default() -> Self {
        Self {
            method: Self::default_method(),
            token: None,
            batch: Self::default_batch(),
        }
    }
}

/// One API definition: where it lives and how to call it
///
/// Example (JSON form):
/// ```json
/// {
///   "path": "/user/list",
///   "meta": {"method": "POST", "token": "access"},
///   "inputSchema": {"type": "object"}
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiSpec {
    /// Routing key, matched exactly by the server dispatch table
    pub path: String,

    /// Call metadata
    #[serde(default)]
    pub meta: ApiMeta,

    /// Schema the call input must satisfy, if declared
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub input_schema: Option<Value>,
}

impl ApiSpec {
    /// Create a definition with default metadata
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            meta: ApiMeta::default(),
            input_schema: None,
        }
    }

    /// Set the HTTP method hint
    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.meta.method = method;
        self
    }

    /// Require a credential of the given kind
    pub fn with_token(mut self, kind: TokenKind) -> Self {
        self.meta.token = Some(kind);
        self
    }

    /// Exempt the call from batching
    pub fn solo(mut self) -> Self {
        self.meta.batch = false;
        self
    }

    /// Declare the input schema
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }
}
