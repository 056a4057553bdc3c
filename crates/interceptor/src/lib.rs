//! Network-request interception for evaluation runs.
//!
//! Every outbound request from the driven browser is resolved against the
//! replay cache instead of the live network: documents come from cached
//! pages, XHR/fetch calls from the auxiliary responses captured alongside
//! the page, and static assets pass through untouched. Tracking and
//! analytics endpoints are blocked outright.

pub mod error;
pub mod intercept;
pub mod route;
pub mod stats;

pub use error::{InterceptorError, Result};
pub use intercept::{InterceptMode, PageLookup, RequestInterceptor};
pub use route::{ResourceKind, Route};
pub use stats::{InterceptorStats, StatsReport};
