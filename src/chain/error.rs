use std::fmt;

/// Errors that can occur while building or running a call pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum RpcError {
    /// A marker name was declared twice on the same chain
    DuplicateMarker {
        name: String,
    },

    /// A marker-keyed composition referenced a marker that was never declared
    MarkerNotFound {
        name: String,
    },

    /// The transport hook failed to deliver the call
    Transport {
        message: String,
    },

    /// The call was cancelled through its abort signal
    Aborted,

    /// The inbound chain completed without producing a response
    NoResponse {
        path: String,
    },

    /// A batch envelope was malformed or could not be decoded
    BadEnvelope {
        message: String,
    },

    /// A route handler failed
    Handler {
        message: String,
    },

    /// A coordinator was used before being attached to a client
    Unattached,

    /// Generic error for custom error messages
    Custom {
        message: String,
    },
}

impl RpcError {
    /// Create a DuplicateMarker error
    pub fn duplicate_marker(name: impl Into<String>) -> Self {
        Self::DuplicateMarker { name: name.into() }
    }

    /// Create a MarkerNotFound error
    pub fn marker_not_found(name: impl Into<String>) -> Self {
        Self::MarkerNotFound { name: name.into() }
    }

    /// Create a Transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a NoResponse error
    pub fn no_response(path: impl Into<String>) -> Self {
        Self::NoResponse { path: path.into() }
    }

    /// Create a BadEnvelope error
    pub fn bad_envelope(message: impl Into<String>) -> Self {
        Self::BadEnvelope {
            message: message.into(),
        }
    }

    /// Create a Handler error
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    /// Create a Custom error
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom {
            message: message.into(),
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcError::DuplicateMarker { name } => {
                write!(f, "Marker declared twice: {}", name)
            }
            RpcError::MarkerNotFound { name } => {
                write!(f, "Marker not found: {}", name)
            }
            RpcError::Transport { message } => {
                write!(f, "Transport error: {}", message)
            }
            RpcError::Aborted => {
                write!(f, "Call aborted")
            }
            RpcError::NoResponse { path } => {
                write!(f, "No response produced for {}", path)
            }
            RpcError::BadEnvelope { message } => {
                write!(f, "Bad batch envelope: {}", message)
            }
            RpcError::Handler { message } => {
                write!(f, "Handler error: {}", message)
            }
            RpcError::Unattached => {
                write!(f, "Coordinator is not attached to a client")
            }
            RpcError::Custom { message } => {
                write!(f, "{}", message)
            }
        }
    }
}

impl std::error::Error for RpcError {}
