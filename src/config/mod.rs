/// API catalog configuration
///
/// This module contains the declarative description of the remote surface:
/// per-API path, method, credential requirement, batch eligibility, and
/// optional input schema, collected into an immutable catalog built once
/// at startup.

mod api;
mod catalog;

pub use api::{ApiMeta, ApiSpec, HttpMethod, TokenKind};
pub use catalog::{ApiCatalog, ApiCatalogBuilder};
