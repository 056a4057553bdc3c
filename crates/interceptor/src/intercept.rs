//! The interceptor itself: block/allow policy, cache resolution, miss
//! escalation.

use crate::error::{InterceptorError, Result};
use crate::route::{ResourceKind, Route};
use crate::stats::{InterceptorStats, StatsReport};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use replay_protocol::{normalize_for_lookup, ParsedUrl};
use replay_store::{PageData, PageStore, SourceSnapshot};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Endpoints blocked unconditionally: tracking, analytics, ads.
static BLOCK_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"google-analytics\.com",
        r"googletagmanager\.com",
        r"googlesyndication\.com",
        r"googleadservices\.com",
        r"sentry\.io",
        r"doubleclick\.net",
        r"facebook\.com/tr",
        r"hotjar\.com",
        r"adtech\.",
        r"analytics",
        r"tracking",
        r"pixel",
        r"beacon",
    ]
    .iter()
    .map(|p| compile_insensitive(p).expect("static pattern"))
    .collect()
});

/// URL shapes treated as static assets even when the driver reports an
/// unspecific resource type.
static STATIC_URL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\.css(\?|$)",
        r"\.js(\?|$)",
        r"\.woff2?(\?|$)",
        r"\.ttf(\?|$)",
        r"\.png(\?|$)",
        r"\.jpg(\?|$)",
        r"\.jpeg(\?|$)",
        r"\.gif(\?|$)",
        r"\.svg(\?|$)",
        r"\.ico(\?|$)",
    ]
    .iter()
    .map(|p| compile_insensitive(p).expect("static pattern"))
    .collect()
});

fn compile_insensitive(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

/// How cache misses escalate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptMode {
    /// Serve cache only. A document miss is fatal; an API miss is answered
    /// with empty JSON so the agent can proceed.
    Strict,
    /// Misses pass through to the live network, for debugging.
    Permissive,
    /// Misses pass through and are expected to be captured externally.
    Record,
}

impl InterceptMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Permissive => "permissive",
            Self::Record => "record",
        }
    }
}

/// Where cached pages are looked up during a run.
#[async_trait]
pub trait PageLookup: Send + Sync {
    async fn lookup(&self, url: &str) -> Option<PageData>;
}

#[async_trait]
impl PageLookup for SourceSnapshot {
    async fn lookup(&self, url: &str) -> Option<PageData> {
        self.page(url).await
    }
}

#[async_trait]
impl PageLookup for PageStore {
    async fn lookup(&self, url: &str) -> Option<PageData> {
        self.get(url).await
    }
}

/// Resolves intercepted requests against the replay cache.
///
/// Scoped to one evaluation run with a single browser driving it, so state
/// is single-writer; [`Self::reset`] must run between runs.
pub struct RequestInterceptor {
    lookups: Vec<Arc<dyn PageLookup>>,
    mode: InterceptMode,
    allowed_domains: Option<HashSet<String>>,
    plugin_block_patterns: Vec<Regex>,
    current_page: Mutex<Option<PageData>>,
    stats: Mutex<InterceptorStats>,
}

impl RequestInterceptor {
    pub fn new(lookups: Vec<Arc<dyn PageLookup>>, mode: InterceptMode) -> Self {
        Self {
            lookups,
            mode,
            allowed_domains: None,
            plugin_block_patterns: Vec::new(),
            current_page: Mutex::new(None),
            stats: Mutex::new(InterceptorStats::default()),
        }
    }

    /// Restrict traffic to these domains (suffix-matched, so a listed
    /// `coingecko.com` also admits `www.coingecko.com`).
    pub fn with_allowed_domains(mut self, domains: impl IntoIterator<Item = String>) -> Self {
        self.allowed_domains = Some(
            domains
                .into_iter()
                .map(|d| d.to_ascii_lowercase())
                .collect(),
        );
        self
    }

    /// Add plugin-supplied block patterns, given as globs (`*` matches any
    /// run of characters).
    pub fn with_block_patterns(mut self, patterns: &[String]) -> Result<Self> {
        for pattern in patterns {
            let regex = compile_insensitive(&pattern.replace('*', ".*")).map_err(|err| {
                InterceptorError::InvalidPattern {
                    pattern: pattern.clone(),
                    reason: err.to_string(),
                }
            })?;
            self.plugin_block_patterns.push(regex);
        }
        Ok(self)
    }

    pub fn mode(&self) -> InterceptMode {
        self.mode
    }

    /// Resolve one intercepted request. Internal failures are counted and
    /// the route aborted; they never propagate into the driver.
    pub async fn handle_route(&self, route: &mut dyn Route) {
        let url = route.url().to_string();
        if let Err(err) = self.dispatch(route, &url).await {
            log::error!("interceptor error for {url}: {err}");
            self.stats.lock().await.errors += 1;
            let _ = route.abort().await;
        }
    }

    async fn dispatch(&self, route: &mut dyn Route, url: &str) -> Result<()> {
        if url.starts_with("about:") {
            return route.pass_through().await;
        }

        if self.is_blocked(url) {
            self.stats.lock().await.blocked += 1;
            return route.abort().await;
        }

        if !self.is_domain_allowed(url) {
            self.stats.lock().await.blocked += 1;
            return route.abort().await;
        }

        let kind = route.resource_kind();
        if kind == ResourceKind::Document {
            return self.handle_document(route, url).await;
        }
        if kind.is_api() {
            return self.handle_api(route, url).await;
        }
        if kind.is_static() || self.looks_static(url) {
            self.stats.lock().await.passthrough += 1;
            return route.pass_through().await;
        }
        // Websockets, media, everything else: not cacheable, let it go.
        self.stats.lock().await.passthrough += 1;
        route.pass_through().await
    }

    async fn handle_document(&self, route: &mut dyn Route, url: &str) -> Result<()> {
        let Some(page) = self.find_page(url).await else {
            return self.handle_miss(route, url, ResourceKind::Document).await;
        };

        self.stats.lock().await.hits += 1;
        log::info!("[CACHE HIT] page: {url}");

        let status = page.status;
        let html = page.html.clone();
        *self.current_page.lock().await = Some(page);

        route
            .fulfill(status, "text/html; charset=utf-8", html)
            .await
    }

    async fn handle_api(&self, route: &mut dyn Route, url: &str) -> Result<()> {
        let api_path = ParsedUrl::parse(url).map(|p| p.path).unwrap_or_default();

        let body = {
            let current = self.current_page.lock().await;
            current
                .as_ref()
                .and_then(|page| lookup_aux_response(&page.aux_responses, &api_path))
        };

        match body {
            Some(value) => {
                self.stats.lock().await.hits += 1;
                log::debug!("[CACHE HIT] api: {api_path}");
                route
                    .fulfill(200, "application/json", json_body(&value)?)
                    .await
            }
            None => {
                let kind = route.resource_kind();
                self.handle_miss(route, url, kind).await
            }
        }
    }

    async fn handle_miss(&self, route: &mut dyn Route, url: &str, kind: ResourceKind) -> Result<()> {
        self.stats.lock().await.record_miss(url);

        match self.mode {
            InterceptMode::Strict => {
                if kind == ResourceKind::Document {
                    // Fatal: the evaluation cannot be trusted past this point.
                    self.stats.lock().await.fatal_misses.push(url.to_string());
                    log::error!("[CACHE MISS] fatal document miss: {url}");
                    route
                        .fulfill(
                            503,
                            "text/html",
                            format!("<html><body><h1>Page not cached</h1><p>{url}</p></body></html>"),
                        )
                        .await
                } else if kind.is_api() {
                    log::warn!("[CACHE MISS] api: {url}");
                    route
                        .fulfill(200, "application/json", "{}".to_string())
                        .await
                } else {
                    route.abort().await
                }
            }
            InterceptMode::Permissive => {
                log::debug!("[CACHE MISS] {url}, allowing through");
                route.pass_through().await
            }
            InterceptMode::Record => route.pass_through().await,
        }
    }

    /// Try the literal URL, its normalized form, then a `www.`-prefixed
    /// variant against every configured lookup.
    async fn find_page(&self, url: &str) -> Option<PageData> {
        let mut variants = vec![url.to_string()];
        if let Some(normalized) = normalize_for_lookup(url) {
            if normalized != url {
                variants.push(normalized);
            }
        }
        if let Some(with_www) = ParsedUrl::parse(url).and_then(|p| p.with_www()) {
            variants.push(with_www);
        }

        for variant in &variants {
            for lookup in &self.lookups {
                if let Some(page) = lookup.lookup(variant).await {
                    return Some(page);
                }
            }
        }
        None
    }

    fn is_blocked(&self, url: &str) -> bool {
        BLOCK_PATTERNS
            .iter()
            .chain(self.plugin_block_patterns.iter())
            .any(|p| p.is_match(url))
    }

    fn looks_static(&self, url: &str) -> bool {
        STATIC_URL_PATTERNS.iter().any(|p| p.is_match(url))
    }

    fn is_domain_allowed(&self, url: &str) -> bool {
        let Some(allowed) = &self.allowed_domains else {
            return true;
        };
        let Some(parsed) = ParsedUrl::parse(url) else {
            return false;
        };
        allowed
            .iter()
            .any(|domain| parsed.host == *domain || parsed.host.ends_with(&format!(".{domain}")))
    }

    pub async fn stats_report(&self) -> StatsReport {
        self.stats.lock().await.report()
    }

    /// Clear all run-scoped state. Must be called between evaluation runs.
    pub async fn reset(&self) {
        *self.current_page.lock().await = None;
        *self.stats.lock().await = InterceptorStats::default();
    }
}

/// Exact path match first, then suffix/prefix partial match: captured
/// request paths sometimes carry host prefixes or shortened forms.
fn lookup_aux_response(aux: &std::collections::HashMap<String, Value>, api_path: &str) -> Option<Value> {
    if let Some(value) = aux.get(api_path) {
        return Some(value.clone());
    }
    aux.iter()
        .find(|(cached, _)| cached.ends_with(api_path) || api_path.ends_with(cached.as_str()))
        .map(|(_, value)| value.clone())
}

/// Captured bodies may be raw strings (already-serialized JSON) or
/// structured values; either way the response body is the JSON text.
fn json_body(value: &Value) -> Result<String> {
    match value {
        Value::String(raw) => Ok(raw.clone()),
        other => Ok(serde_json::to_string(other)?),
    }
}
