//! URL triggers: pure predicates that mark "the agent just reached a
//! point where ground truth should be fetched".
//!
//! Triggers never fetch anything themselves and carry no mutable state;
//! the collector records a match and defers the fetch to trajectory end.

use crate::error::{GtError, Result};
use regex::Regex;
use replay_protocol::{percent_decode, ParsedUrl};

/// Pattern over domain, path and full URL.
///
/// The `url_contains` check is decode-normalized on both sides so
/// `Hong Kong`, `Hong+Kong` and `Hong%20Kong` all match each other.
#[derive(Debug, Clone, Default)]
pub struct UrlPattern {
    domains: Vec<String>,
    path_contains: Option<String>,
    url_regex: Option<Regex>,
    url_contains: Option<String>,
}

impl UrlPattern {
    pub fn for_domains<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            domains: domains.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn path_contains(mut self, fragment: impl Into<String>) -> Self {
        self.path_contains = Some(fragment.into());
        self
    }

    pub fn url_contains(mut self, fragment: impl Into<String>) -> Self {
        self.url_contains = Some(fragment.into());
        self
    }

    pub fn url_regex(mut self, pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|err| GtError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: err.to_string(),
        })?;
        self.url_regex = Some(regex);
        Ok(self)
    }

    fn matches(&self, url: &str) -> bool {
        let Some(parsed) = ParsedUrl::parse(url) else {
            return false;
        };

        if !self.domains.is_empty() && !self.domains.iter().any(|d| parsed.host.contains(d)) {
            return false;
        }
        if let Some(fragment) = &self.path_contains {
            if !parsed.path.contains(fragment) {
                return false;
            }
        }
        if let Some(regex) = &self.url_regex {
            if !regex.is_match(url) {
                return false;
            }
        }
        if let Some(fragment) = &self.url_contains {
            if !decode_normalize(url).contains(&decode_normalize(fragment)) {
                return false;
            }
        }
        true
    }
}

/// Pattern that additionally requires specific query parameters, e.g.
/// `stooq.com/q/d/?s=aapl.us` needing the `s` symbol key.
#[derive(Debug, Clone)]
pub struct UrlWithParams {
    domains: Vec<String>,
    required_path: Option<String>,
    required_params: Vec<String>,
}

impl UrlWithParams {
    pub fn for_domains<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            domains: domains.into_iter().map(Into::into).collect(),
            required_path: None,
            required_params: Vec::new(),
        }
    }

    pub fn required_path(mut self, path: impl Into<String>) -> Self {
        self.required_path = Some(path.into());
        self
    }

    pub fn required_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_params = params.into_iter().map(Into::into).collect();
        self
    }

    fn matches(&self, url: &str) -> bool {
        let Some(parsed) = ParsedUrl::parse(url) else {
            return false;
        };

        if !self.domains.iter().any(|d| parsed.host.contains(d)) {
            return false;
        }
        if let Some(path) = &self.required_path {
            if !parsed.path.contains(path) {
                return false;
            }
        }
        self.required_params
            .iter()
            .all(|param| parsed.has_query_param(param))
    }
}

/// A ground-truth fetch trigger.
#[derive(Debug, Clone)]
pub enum Trigger {
    UrlPattern(UrlPattern),
    UrlWithParams(UrlWithParams),
    /// Logical OR over sub-triggers.
    Composite(Vec<Trigger>),
}

impl Trigger {
    pub fn matches(&self, url: &str) -> bool {
        if url.is_empty() || url.starts_with("about:") {
            return false;
        }
        match self {
            Self::UrlPattern(pattern) => pattern.matches(url),
            Self::UrlWithParams(pattern) => pattern.matches(url),
            Self::Composite(triggers) => triggers.iter().any(|t| t.matches(url)),
        }
    }
}

impl From<UrlPattern> for Trigger {
    fn from(pattern: UrlPattern) -> Self {
        Self::UrlPattern(pattern)
    }
}

impl From<UrlWithParams> for Trigger {
    fn from(pattern: UrlWithParams) -> Self {
        Self::UrlWithParams(pattern)
    }
}

fn decode_normalize(input: &str) -> String {
    percent_decode(input).to_lowercase()
}
