//! Page-content extraction state.
//!
//! Every visited page runs through the site's registered extractor; the
//! per-asset fields it yields accumulate here with most-recent-wins
//! semantics inside a page-type priority order, so the merged view always
//! reflects what the agent currently sees.

use serde_json::Value;
use std::collections::HashMap;

/// `field → value` for one asset.
pub type AssetFields = HashMap<String, Value>;

/// Classification of a visited page. Detail pages are authoritative over
/// search results, which beat homepage listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Detail,
    Search,
    Homepage,
    Other,
}

impl PageType {
    fn priority(self) -> u8 {
        match self {
            Self::Detail => 3,
            Self::Search => 2,
            Self::Homepage => 1,
            Self::Other => 0,
        }
    }
}

/// What one page visit yielded.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub url: String,
    pub page_type: PageType,
    /// `asset id → {field: value}`.
    pub data: HashMap<String, AssetFields>,
    pub timestamp: f64,
}

impl Extraction {
    pub fn new(
        url: impl Into<String>,
        page_type: PageType,
        data: HashMap<String, AssetFields>,
    ) -> Self {
        Self {
            url: url.into(),
            page_type,
            data,
            timestamp: now_ts(),
        }
    }

    pub fn empty(url: impl Into<String>) -> Self {
        Self::new(url, PageType::Other, HashMap::new())
    }
}

/// Extracts structured facts from the content the agent saw on one site.
/// Implemented per source by the site plugins.
pub trait PageExtractor: Send + Sync {
    fn source(&self) -> &str;

    fn matches_url(&self, url: &str) -> bool;

    fn classify(&self, url: &str) -> PageType;

    /// `asset id → {field: value}` facts visible in `content`.
    fn extract(&self, url: &str, content: &str) -> HashMap<String, AssetFields>;
}

/// Accumulated extractions for one evaluation run.
#[derive(Debug, Default)]
pub struct ExtractionState {
    extractions: Vec<Extraction>,
}

impl ExtractionState {
    /// Record an extraction; empty results are dropped.
    pub fn add(&mut self, extraction: Extraction) {
        if !extraction.data.is_empty() {
            self.extractions.push(extraction);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.extractions.is_empty()
    }

    pub fn clear(&mut self) {
        self.extractions.clear();
    }

    /// Merge all extractions: ordered by page-type priority then
    /// timestamp, applied low-to-high so detail pages and later visits
    /// override earlier homepage data field by field.
    pub fn merged(&self) -> HashMap<String, AssetFields> {
        let mut ordered: Vec<&Extraction> = self.extractions.iter().collect();
        ordered.sort_by(|a, b| {
            (a.page_type.priority(), a.timestamp)
                .partial_cmp(&(b.page_type.priority(), b.timestamp))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut merged: HashMap<String, AssetFields> = HashMap::new();
        for extraction in ordered {
            for (asset_id, fields) in &extraction.data {
                merged
                    .entry(asset_id.clone())
                    .or_default()
                    .extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        merged
    }
}

/// Find an asset key, tolerating location-style variance: `Cape Town`
/// must match `Cape+Town,South+Africa`.
pub fn find_asset<'a>(merged: &'a HashMap<String, AssetFields>, target: &str) -> Option<&'a str> {
    if let Some((key, _)) = merged.get_key_value(target) {
        return Some(key.as_str());
    }

    let target_norm = normalize_asset_key(target);
    let target_head = target_norm.split_whitespace().next().unwrap_or_default();

    for key in merged.keys() {
        let key_norm = normalize_asset_key(key);
        if key_norm.contains(&target_norm) || target_norm.contains(&key_norm) {
            return Some(key.as_str());
        }
        if !target_head.is_empty() && key_norm.contains(target_head) {
            return Some(key.as_str());
        }
    }
    None
}

fn normalize_asset_key(raw: &str) -> String {
    raw.to_lowercase()
        .replace(['+', ','], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn now_ts() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn fields(pairs: &[(&str, Value)]) -> AssetFields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn extraction(page_type: PageType, asset: &str, pairs: &[(&str, Value)]) -> Extraction {
        let mut data = HashMap::new();
        data.insert(asset.to_string(), fields(pairs));
        Extraction::new("https://x.com/", page_type, data)
    }

    #[test]
    fn detail_overrides_homepage() {
        let mut state = ExtractionState::default();
        state.add(extraction(
            PageType::Detail,
            "bitcoin",
            &[("price", json!(100000))],
        ));
        // Homepage visited later still loses to the earlier detail page.
        state.add(extraction(
            PageType::Homepage,
            "bitcoin",
            &[("price", json!(99000)), ("rank", json!(1))],
        ));

        let merged = state.merged();
        assert_eq!(merged["bitcoin"]["price"], json!(100000));
        assert_eq!(merged["bitcoin"]["rank"], json!(1));
    }

    #[test]
    fn later_extraction_wins_within_same_priority() {
        let mut state = ExtractionState::default();
        state.add(extraction(
            PageType::Detail,
            "bitcoin",
            &[("price", json!(1))],
        ));
        state.add(extraction(
            PageType::Detail,
            "bitcoin",
            &[("price", json!(2))],
        ));

        assert_eq!(state.merged()["bitcoin"]["price"], json!(2));
    }

    #[test]
    fn empty_extractions_are_dropped() {
        let mut state = ExtractionState::default();
        state.add(Extraction::empty("https://x.com/nav"));
        assert!(state.is_empty());
    }

    #[test]
    fn asset_lookup_tolerates_location_variants() {
        let mut merged = HashMap::new();
        merged.insert(
            "Cape+Town,South+Africa".to_string(),
            fields(&[("temperature", json!(18))]),
        );

        assert_eq!(find_asset(&merged, "Cape Town"), Some("Cape+Town,South+Africa"));
        assert_eq!(find_asset(&merged, "cape town"), Some("Cape+Town,South+Africa"));
        assert_eq!(find_asset(&merged, "Tokyo"), None);
    }
}
