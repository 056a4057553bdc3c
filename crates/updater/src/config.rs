//! Environment-driven configuration for the cache updater.
//!
//! Recognized variables:
//! - `CACHE_STRATEGY`: `startup` | `periodic` | `manual`
//! - `CACHE_SOURCES`: comma-separated source names
//! - `CACHE_TTL`: TTL in hours
//! - `CACHE_DIR`: cache root path
//! - `CACHE_UPDATE_INTERVAL`: background poll period in minutes

use std::path::PathBuf;
use std::time::Duration;

/// When cache refreshes are driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStrategy {
    /// Check once at startup only.
    Startup,
    /// Background worker refreshes periodically.
    Periodic,
    /// Caller controls refreshes explicitly.
    Manual,
}

impl CacheStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Periodic => "periodic",
            Self::Manual => "manual",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "startup" => Some(Self::Startup),
            "periodic" => Some(Self::Periodic),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    pub cache_dir: PathBuf,
    pub sources: Vec<String>,
    pub ttl_seconds: u64,
    pub strategy: CacheStrategy,
    pub update_interval: Duration,
    /// Upper bound on a single page capture.
    pub page_timeout: Duration,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("cache"),
            sources: Vec::new(),
            ttl_seconds: replay_store::DEFAULT_TTL_SECONDS,
            strategy: CacheStrategy::Startup,
            update_interval: Duration::from_secs(30 * 60),
            page_timeout: Duration::from_secs(60),
        }
    }
}

impl UpdaterConfig {
    /// Build a config from the `CACHE_*` environment variables, falling
    /// back to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("CACHE_STRATEGY") {
            match CacheStrategy::parse(&raw) {
                Some(strategy) => config.strategy = strategy,
                None => log::warn!("invalid cache strategy '{raw}', using 'startup'"),
            }
        }

        if let Ok(raw) = std::env::var("CACHE_SOURCES") {
            config.sources = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Ok(raw) = std::env::var("CACHE_TTL") {
            match raw.parse::<f64>() {
                Ok(hours) if hours > 0.0 => config.ttl_seconds = (hours * 3600.0) as u64,
                _ => log::warn!("invalid CACHE_TTL '{raw}', using default"),
            }
        }

        if let Ok(raw) = std::env::var("CACHE_DIR") {
            if !raw.is_empty() {
                config.cache_dir = PathBuf::from(raw);
            }
        }

        if let Ok(raw) = std::env::var("CACHE_UPDATE_INTERVAL") {
            match raw.parse::<f64>() {
                Ok(minutes) if minutes > 0.0 => {
                    config.update_interval = Duration::from_secs_f64(minutes * 60.0);
                }
                _ => log::warn!("invalid CACHE_UPDATE_INTERVAL '{raw}', using default"),
            }
        }

        log::info!(
            "cache updater config: strategy={}, sources={:?}, ttl={}h",
            config.strategy.as_str(),
            config.sources,
            config.ttl_seconds as f64 / 3600.0
        );
        config
    }
}
