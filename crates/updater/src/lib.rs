//! Cache refresh orchestration.
//!
//! Decides, per source, whether a refresh is needed (TTL expiry, forced
//! update, missing data) and drives concurrent refreshes of multiple
//! sources. Within one source, page fetches run strictly sequentially:
//! captured auxiliary-response state is tab-scoped in the driving browser
//! and must not be clobbered by concurrent navigations.

pub mod background;
pub mod config;
pub mod context;
pub mod error;
pub mod fetch;
pub mod orchestrator;

pub use background::BackgroundRefresher;
pub use config::{CacheStrategy, UpdaterConfig};
pub use context::EvaluationContext;
pub use error::{Result, UpdaterError};
pub use fetch::{Browser, BrowserSession, CapturedPage, SourceFetcher};
pub use orchestrator::{CacheOrchestrator, RefreshOutcome, RefreshStats};
