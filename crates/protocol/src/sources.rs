//! Static registry of the sites the replay cache knows how to serve.
//!
//! The domain map and asset-id extraction rules are deliberately
//! site-specific: agent navigation depends on matching real-world URL
//! variance, so these stay as-is rather than being generalized.

use crate::url::{percent_decode, ParsedUrl};
use once_cell::sync::Lazy;
use regex::Regex;

/// `(domain, source)` pairs; matched against the exact lowercased host.
const DOMAIN_TO_SOURCE: [(&str, &str); 11] = [
    ("coingecko.com", "coingecko"),
    ("www.coingecko.com", "coingecko"),
    ("stooq.com", "stooq"),
    ("www.stooq.com", "stooq"),
    ("wttr.in", "weather"),
    ("v2.wttr.in", "weather"),
    ("themoviedb.org", "tmdb"),
    ("www.themoviedb.org", "tmdb"),
    ("taostats.io", "taostats"),
    ("www.taostats.io", "taostats"),
    ("news.ycombinator.com", "hackernews"),
];

/// Wrapper key under which a source's aggregated API data is exposed.
const SOURCE_WRAPPER_KEYS: [(&str, &str); 6] = [
    ("coingecko", "coins"),
    ("stooq", "assets"),
    ("weather", "locations"),
    ("tmdb", "movies"),
    ("taostats", "subnets"),
    ("hackernews", "stories"),
];

static COINGECKO_COIN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/coins/([^/]+)").expect("static regex"));
static TMDB_MOVIE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/movie/(\d+)").expect("static regex"));
static TAOSTATS_SUBNET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/subnets/(\d+)").expect("static regex"));

/// Map a host to its source name.
pub fn source_for_domain(domain: &str) -> Option<&'static str> {
    let domain = domain.to_ascii_lowercase();
    DOMAIN_TO_SOURCE
        .iter()
        .find(|(d, _)| *d == domain)
        .map(|(_, s)| *s)
}

/// Map a full URL to its source name.
pub fn source_for_url(url: &str) -> Option<&'static str> {
    let parsed = ParsedUrl::parse(url)?;
    source_for_domain(&parsed.host)
}

/// Wrapper key for a source's aggregated API payload (`"data"` fallback).
pub fn wrapper_key(source: &str) -> &'static str {
    SOURCE_WRAPPER_KEYS
        .iter()
        .find(|(s, _)| *s == source)
        .map_or("data", |(_, k)| *k)
}

/// Extract the provider-specific asset id from a URL.
///
/// Each source encodes the asset differently: a path segment for
/// coingecko/tmdb/taostats, a query parameter for stooq, the whole path
/// for weather locations.
pub fn default_asset_id(source: &str, url: &str) -> Option<String> {
    let parsed = ParsedUrl::parse(url)?;
    let path = percent_decode(&parsed.path);

    match source {
        // https://www.coingecko.com/en/coins/bitcoin -> bitcoin
        "coingecko" => COINGECKO_COIN_RE
            .captures(&path)
            .map(|c| c[1].to_string()),
        // https://stooq.com/q/?s=aapl.us -> aapl.us
        "stooq" => parsed.query_param("s").map(str::to_string),
        // https://wttr.in/Tokyo,Japan?format=j1 -> Tokyo,Japan
        "weather" => {
            let location = path.trim_matches('/');
            (!location.is_empty()).then(|| location.to_string())
        }
        // https://www.themoviedb.org/movie/872585-oppenheimer -> 872585
        "tmdb" => TMDB_MOVIE_RE.captures(&path).map(|c| c[1].to_string()),
        // https://taostats.io/subnets/27 -> 27
        "taostats" => TAOSTATS_SUBNET_RE
            .captures(&path)
            .map(|c| c[1].to_string()),
        _ => None,
    }
}
