use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chain::RpcError;

/// Path reserved for aggregated calls
pub const BATCH_PATH: &str = "/batch";

/// Smallest queue that is worth wrapping in an envelope; a lone pending
/// call is always dispatched as a normal single call
pub const MIN_BATCH: usize = 2;

/// Discriminant carried by every response.
///
/// The code selects which registered callback handles the response; see
/// `OutputCallbacks` in the client module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Code {
    /// The call succeeded; `data` carries the result
    Success,
    /// The call failed; `data` carries a reason
    Fail,
    /// The caller must present fresh credentials
    Unauthorized,
    /// The requested entity does not exist
    NotFound,
    /// No handler is registered for the path
    NotImplemented,
}

/// The unit every call resolves to, on both sides of the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Discriminant selecting the handling callback
    pub code: Code,
    /// Code-specific payload
    pub data: Value,
}

impl Response {
    /// Create a success response
    pub fn success(data: Value) -> Self {
        Self {
            code: Code::Success,
            data,
        }
    }

    /// Create a failure response with a reason
    pub fn fail(reason: Value) -> Self {
        Self {
            code: Code::Fail,
            data: reason,
        }
    }

    /// Create an unauthorized response
    pub fn unauthorized() -> Self {
        Self {
            code: Code::Unauthorized,
            data: Value::Null,
        }
    }

    /// Create a not-found response for a path
    pub fn not_found(path: &str) -> Self {
        Self {
            code: Code::NotFound,
            data: Value::String(format!("not found: {}", path)),
        }
    }

    /// Create a not-implemented response for a path
    pub fn not_implemented(path: &str) -> Self {
        Self {
            code: Code::NotImplemented,
            data: Value::String(format!("not implemented: {}", path)),
        }
    }

    /// Check if the response carries a success code
    pub fn is_success(&self) -> bool {
        self.code == Code::Success
    }
}

/// Build the input of an aggregate call: an ordered array of
/// `[path, input]` tuples, one per queued call
pub fn batch_envelope(calls: &[(String, Value)]) -> Value {
    Value::Array(
        calls
            .iter()
            .map(|(path, input)| {
                Value::Array(vec![Value::String(path.clone()), input.clone()])
            })
            .collect(),
    )
}

/// Decode the input of an aggregate call back into `[path, input]` tuples.
///
/// Rejects envelopes that are not arrays of two-element tuples or that
/// carry fewer than [`MIN_BATCH`] calls.
pub fn parse_batch_input(input: &Value) -> Result<Vec<(String, Value)>, RpcError> {
    let entries = input
        .as_array()
        .ok_or_else(|| RpcError::bad_envelope("input is not an array"))?;
    if entries.len() < MIN_BATCH {
        return Err(RpcError::bad_envelope(format!(
            "expected at least {} calls, got {}",
            MIN_BATCH,
            entries.len()
        )));
    }

    let mut calls = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let tuple = entry
            .as_array()
            .filter(|t| t.len() == 2)
            .ok_or_else(|| {
                RpcError::bad_envelope(format!("entry {} is not a [path, input] tuple", index))
            })?;
        let path = tuple[0]
            .as_str()
            .ok_or_else(|| RpcError::bad_envelope(format!("entry {} has a non-string path", index)))?;
        calls.push((path.to_string(), tuple[1].clone()));
    }
    Ok(calls)
}

/// Decode an aggregate response's `data` into one response per call slot,
/// checking that the count matches the envelope
pub fn parse_batch_output(data: &Value, expected: usize) -> Result<Vec<Response>, RpcError> {
    let responses: Vec<Response> = serde_json::from_value(data.clone())
        .map_err(|e| RpcError::bad_envelope(format!("undecodable batch data: {}", e)))?;
    if responses.len() != expected {
        return Err(RpcError::bad_envelope(format!(
            "expected {} results, got {}",
            expected,
            responses.len()
        )));
    }
    Ok(responses)
}
