//! Interception counters.

use serde::Serialize;

/// How many ordinary-miss URLs are sampled per run.
const MISS_SAMPLE_SIZE: usize = 10;

/// Running counters for one evaluation run.
///
/// `hits`/`misses` only count requests that made it past the block and
/// allow-list checks; blocked and passthrough traffic never enters the
/// hit-rate denominator. Fatal misses are document misses in strict mode,
/// kept in full because each one invalidates the run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InterceptorStats {
    pub hits: usize,
    pub misses: usize,
    pub blocked: usize,
    pub passthrough: usize,
    pub errors: usize,
    pub miss_urls: Vec<String>,
    pub fatal_misses: Vec<String>,
}

/// Serializable summary of [`InterceptorStats`].
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatsReport {
    pub hits: usize,
    pub misses: usize,
    pub blocked: usize,
    pub passthrough: usize,
    pub errors: usize,
    pub total_requests: usize,
    pub hit_rate: f64,
    /// First few miss URLs, enough to diagnose without flooding logs.
    pub miss_urls: Vec<String>,
    pub fatal_misses: Vec<String>,
}

impl InterceptorStats {
    pub fn hit_rate(&self) -> f64 {
        self.hits as f64 / (self.hits + self.misses).max(1) as f64
    }

    /// Count a miss. The sampled URL list is capped here so a long run
    /// of misses never grows memory; the miss counter keeps the true total.
    pub fn record_miss(&mut self, url: &str) {
        self.misses += 1;
        if self.miss_urls.len() < MISS_SAMPLE_SIZE {
            self.miss_urls.push(url.to_string());
        }
    }

    pub fn report(&self) -> StatsReport {
        StatsReport {
            hits: self.hits,
            misses: self.misses,
            blocked: self.blocked,
            passthrough: self.passthrough,
            errors: self.errors,
            total_requests: self.hits + self.misses + self.blocked + self.passthrough,
            hit_rate: self.hit_rate(),
            miss_urls: self.miss_urls.clone(),
            fatal_misses: self.fatal_misses.clone(),
        }
    }
}
