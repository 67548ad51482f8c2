/// Middleware library
///
/// Ready-made layers for the call pipeline: schema validation, credential
/// handling, cancellation, logging, and batching. Each one is an ordinary
/// chain middleware and mixes freely with custom layers.

mod abort;
mod auth;
mod batch;
mod log;
mod validate;

pub use abort::{Abort, Once};
pub use auth::{refresh_fn, AttachToken, RefreshFn, RefreshOnUnauthorized, AUTHORIZATION};
pub use batch::{BatchSend, BatchUnroll, Batcher};
pub use log::{CatchAll, RequestLog};
pub use validate::{ValidateInput, ValidateReply};
