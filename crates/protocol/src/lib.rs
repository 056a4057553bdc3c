//! Shared leaf types for the replay cache: URL parsing/normalization and
//! the static source registry (domain mapping, wrapper keys, asset ids).
//!
//! Everything here is pure and allocation-light; the heavier components
//! (store, interceptor, ground truth) all build on these helpers so that
//! URL handling stays consistent across the workspace.

pub mod sources;
pub mod url;

pub use sources::{default_asset_id, source_for_domain, source_for_url, wrapper_key};
pub use url::{normalize_for_lookup, percent_decode, ParsedUrl, TRACKING_PARAMS};
