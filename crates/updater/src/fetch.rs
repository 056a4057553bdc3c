//! Collaborator seams consumed by the orchestrator.
//!
//! The actual site plugins and the browser-automation driver live outside
//! this crate; refreshes only need the ability to enumerate a source's
//! URLs, fetch one asset's API slice, and capture one page at a time.

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// One page as captured by the driving browser: rendered HTML plus the
/// JSON bodies of XHR/fetch responses observed during the load, keyed by
/// request path.
#[derive(Debug, Clone)]
pub struct CapturedPage {
    pub html: String,
    pub status: u16,
    pub aux_responses: HashMap<String, Value>,
}

/// Per-source data provider: which URLs to cache and how to fetch the API
/// slice backing a single asset.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    fn source(&self) -> &str;

    /// All URLs that should be cached for this source.
    fn page_urls(&self) -> Vec<String>;

    /// Fetch the API slice for one asset.
    async fn fetch_api_slice(&self, asset_id: &str) -> Result<Value>;

    /// Extract the asset id from a URL. Defaults to the site-specific
    /// rules in the shared source registry.
    fn asset_id(&self, url: &str) -> Option<String> {
        replay_protocol::default_asset_id(self.source(), url)
    }
}

/// One open browser tab. Navigations are sequential per session: captured
/// auxiliary responses are tab-scoped.
#[async_trait]
pub trait BrowserSession: Send {
    async fn capture(&mut self, url: &str) -> Result<CapturedPage>;
}

/// Browser-automation driver handle; opens one session per source refresh.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn open_session(&self) -> Result<Box<dyn BrowserSession>>;
}
