//! The per-evaluation ground-truth collector.

use crate::extraction::{find_asset, ExtractionState};
use crate::registry::Registry;
use crate::result::GroundTruthResult;
use crate::trigger::Trigger;
use async_trait::async_trait;
use replay_protocol::{default_asset_id, source_for_url, wrapper_key};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

const MAX_GT_ATTEMPTS: usize = 3;

/// Where a subtask's ground truth comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GtSourceType {
    /// Page extractions only.
    PageOnly,
    /// Deferred API fetch only.
    ApiOnly,
    /// Page extraction first, API result as fallback.
    Hybrid,
}

impl GtSourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PageOnly => "page_only",
            Self::ApiOnly => "api_only",
            Self::Hybrid => "hybrid",
        }
    }
}

/// Remote ground-truth fetch for one subtask, supplied by the site
/// plugin. Returning `Retryable` asks the collector to try again.
#[async_trait]
pub trait RemoteGtFetch: Send + Sync {
    async fn fetch(&self) -> GroundTruthResult;
}

/// One subtask as the collector sees it: an answer tag, where its ground
/// truth comes from, and which asset/field it is about.
pub struct SubtaskSpec {
    pub tag: String,
    pub source_type: GtSourceType,
    pub asset_id: String,
    pub field: String,
    pub trigger: Option<Trigger>,
    pub fetch: Option<Arc<dyn RemoteGtFetch>>,
}

impl SubtaskSpec {
    pub fn new(
        tag: impl Into<String>,
        source_type: GtSourceType,
        asset_id: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self {
            tag: tag.into(),
            source_type,
            asset_id: asset_id.into(),
            field: field.into(),
            trigger: None,
            fetch: None,
        }
    }

    pub fn with_trigger(mut self, trigger: impl Into<Trigger>) -> Self {
        self.trigger = Some(trigger.into());
        self
    }

    pub fn with_fetch(mut self, fetch: Arc<dyn RemoteGtFetch>) -> Self {
        self.fetch = Some(fetch);
        self
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CollectorStats {
    pub total_subtasks: usize,
    pub api_fetches: usize,
    pub failures: usize,
    pub collected_assets: usize,
    pub triggered: usize,
    pub by_source_type: BTreeMap<&'static str, usize>,
}

/// Accumulates extractions and page-bound API data over one trajectory,
/// then resolves each subtask's ground truth at the end.
///
/// Single-writer: one browser drives one trajectory, so no internal
/// locking. A fresh collector is built per evaluation run.
pub struct GroundTruthCollector {
    subtasks: Vec<SubtaskSpec>,
    registry: Registry,
    extractions: ExtractionState,
    /// `asset id → API payload`, merged from page-bound data.
    collected_api_data: HashMap<String, Value>,
    /// Deferred fetch results per subtask tag.
    api_results: HashMap<String, Value>,
    gt_failures: HashMap<String, GroundTruthResult>,
    visited_urls: HashMap<String, Vec<String>>,
    triggered: HashSet<String>,
}

impl GroundTruthCollector {
    pub fn new(subtasks: Vec<SubtaskSpec>, registry: Registry) -> Self {
        let visited_urls = subtasks
            .iter()
            .map(|st| (st.tag.clone(), Vec::new()))
            .collect();
        Self {
            subtasks,
            registry,
            extractions: ExtractionState::default(),
            collected_api_data: HashMap::new(),
            api_results: HashMap::new(),
            gt_failures: HashMap::new(),
            visited_urls,
            triggered: HashSet::new(),
        }
    }

    /// Handle one page-visit event: extract facts from the content, merge
    /// any page-bound API data, and record trigger matches. The remote
    /// fetch a trigger asks for is always deferred to
    /// [`Self::fetch_remaining`].
    pub fn on_page_visit(&mut self, url: &str, content: &str, page_api_data: Option<&Value>) {
        if url.is_empty() || url.starts_with("about:") {
            return;
        }

        if !content.is_empty() {
            let extraction = self.registry.extract(url, content);
            self.extractions.add(extraction);
        }

        if let Some(data) = page_api_data {
            if let Some(collected) = self.merge_api_data(url, data) {
                log::info!("[GT] visit {} -> {collected}", short_url(url));
            }
        }

        let mut matched = Vec::new();
        for st in &self.subtasks {
            if !matches!(st.source_type, GtSourceType::ApiOnly | GtSourceType::Hybrid) {
                continue;
            }
            if let Some(trigger) = &st.trigger {
                if trigger.matches(url) {
                    matched.push(st.tag.clone());
                }
            }
        }
        for tag in matched {
            if self.triggered.insert(tag.clone()) {
                log::info!("[GT] trigger matched for [{tag}], fetch deferred to trajectory end");
            }
        }

        for urls in self.visited_urls.values_mut() {
            urls.push(url.to_string());
        }
    }

    /// Merge page-bound API data by source rule: a bulk payload under the
    /// source's wrapper key fans out per id without overwriting, while a
    /// detail payload overwrites its one id (detail is authoritative).
    fn merge_api_data(&mut self, url: &str, data: &Value) -> Option<String> {
        let Some(obj) = data.as_object() else {
            log::error!("[GT] page-bound api data for {} is not an object", short_url(url));
            return None;
        };
        let source = source_for_url(url)?;

        let wrapper = wrapper_key(source);
        if let Some(Value::Object(bulk)) = obj.get(wrapper) {
            let mut added = 0usize;
            for (id, item) in bulk {
                if !self.collected_api_data.contains_key(id) {
                    self.collected_api_data.insert(id.clone(), item.clone());
                    added += 1;
                }
            }
            return Some(format!(
                "+{added} {wrapper} (total {})",
                self.collected_api_data.len()
            ));
        }

        let id = detail_id(source, url, obj)?;
        self.collected_api_data.insert(id.clone(), data.clone());
        Some(id)
    }

    /// Resolve every deferred API fetch, once, at trajectory end.
    /// `Retryable` outcomes are retried up to three times with a short
    /// growing delay; exhaustion becomes a `SystemError`.
    pub async fn fetch_remaining(&mut self) {
        for st in &self.subtasks {
            let Some(fetch) = &st.fetch else {
                continue;
            };
            if self.api_results.contains_key(&st.tag) || self.gt_failures.contains_key(&st.tag) {
                continue;
            }

            let mut outcome = GroundTruthResult::Retryable("not attempted".to_string());
            for attempt in 1..=MAX_GT_ATTEMPTS {
                outcome = fetch.fetch().await;
                match &outcome {
                    GroundTruthResult::Retryable(reason) if attempt < MAX_GT_ATTEMPTS => {
                        log::warn!("[GT] [{}] attempt {attempt} retryable: {reason}", st.tag);
                        tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
                    }
                    _ => break,
                }
            }

            match outcome {
                GroundTruthResult::Ok(value) => {
                    log::info!("[GT] [{}] collected", st.tag);
                    self.api_results.insert(st.tag.clone(), value);
                }
                GroundTruthResult::Retryable(reason) => {
                    self.gt_failures.insert(
                        st.tag.clone(),
                        GroundTruthResult::SystemError(format!("retries exhausted: {reason}")),
                    );
                }
                failure => {
                    log::warn!(
                        "[GT] [{}] failed: {}",
                        st.tag,
                        failure.reason().unwrap_or("unknown")
                    );
                    self.gt_failures.insert(st.tag.clone(), failure);
                }
            }
        }
    }

    /// Resolve the ground truth for one subtask tag.
    pub fn ground_truth(&self, tag: &str) -> GroundTruthResult {
        let Some(st) = self.subtasks.iter().find(|s| s.tag == tag) else {
            return GroundTruthResult::SystemError(format!("unknown subtask tag '{tag}'"));
        };

        match st.source_type {
            GtSourceType::PageOnly => self.page_ground_truth(st),
            GtSourceType::ApiOnly => self.api_ground_truth(st),
            GtSourceType::Hybrid => {
                let page = self.page_ground_truth(st);
                if page.is_ok() {
                    page
                } else {
                    self.api_ground_truth(st)
                }
            }
        }
    }

    fn page_ground_truth(&self, st: &SubtaskSpec) -> GroundTruthResult {
        let merged = self.extractions.merged();
        let asset = match find_asset(&merged, &st.asset_id) {
            Some(asset) => asset.to_string(),
            None => {
                let reason = if merged.is_empty() {
                    format!(
                        "no page data extracted for '{}'; agent never visited a relevant page",
                        st.asset_id
                    )
                } else {
                    let available: Vec<&String> = merged.keys().take(5).collect();
                    format!(
                        "no extraction for '{}'; available assets: {available:?}",
                        st.asset_id
                    )
                };
                return GroundTruthResult::NotCollected(reason);
            }
        };

        match merged.get(&asset).and_then(|fields| fields.get(&st.field)) {
            Some(value) => GroundTruthResult::Ok(value.clone()),
            None => {
                let available: Vec<String> = merged
                    .get(&asset)
                    .map(|fields| fields.keys().cloned().collect())
                    .unwrap_or_default();
                GroundTruthResult::NotCollected(format!(
                    "field '{}' not extracted for '{asset}'; available fields: {available:?}",
                    st.field
                ))
            }
        }
    }

    fn api_ground_truth(&self, st: &SubtaskSpec) -> GroundTruthResult {
        if let Some(value) = self.api_results.get(&st.tag) {
            return GroundTruthResult::Ok(value.clone());
        }
        if let Some(failure) = self.gt_failures.get(&st.tag) {
            return failure.clone();
        }
        if st.trigger.is_some() && !self.triggered.contains(&st.tag) {
            return GroundTruthResult::NotCollected(format!(
                "trigger for '{}' never fired; agent never reached a qualifying page",
                st.tag
            ));
        }
        GroundTruthResult::NotCollected(format!(
            "API ground truth for '{}' was never fetched",
            st.tag
        ))
    }

    /// Human-readable reason a subtask has no ground truth. Keeps the
    /// never-visited / extraction-empty / never-triggered cases distinct.
    pub fn failure_reason(&self, tag: &str) -> String {
        match self.ground_truth(tag) {
            GroundTruthResult::Ok(_) => "ground truth collected".to_string(),
            other => other.reason().unwrap_or("unknown failure").to_string(),
        }
    }

    /// Whether the failure for this subtask invalidates the evaluation.
    pub fn is_system_error(&self, tag: &str) -> bool {
        self.ground_truth(tag).invalidates_evaluation()
    }

    pub fn collected_api_data(&self) -> &HashMap<String, Value> {
        &self.collected_api_data
    }

    pub fn visited_urls(&self, tag: &str) -> &[String] {
        self.visited_urls.get(tag).map_or(&[], Vec::as_slice)
    }

    pub fn stats(&self) -> CollectorStats {
        let mut by_source_type = BTreeMap::new();
        for st in &self.subtasks {
            *by_source_type.entry(st.source_type.as_str()).or_insert(0) += 1;
        }
        CollectorStats {
            total_subtasks: self.subtasks.len(),
            api_fetches: self.api_results.len(),
            failures: self.gt_failures.len(),
            collected_assets: self.collected_api_data.len(),
            triggered: self.triggered.len(),
            by_source_type,
        }
    }

    /// Drop all accumulated state. The collector must not be reused for
    /// another run afterwards.
    pub fn cleanup(&mut self) {
        self.extractions.clear();
        self.collected_api_data.clear();
        self.api_results.clear();
        self.gt_failures.clear();
        self.visited_urls.clear();
        self.triggered.clear();
        self.subtasks.clear();
    }
}

/// Detail payloads carry their own identity (`id`, `symbol`, `netuid`);
/// failing that, the asset id is derived from the URL.
fn detail_id(source: &str, url: &str, obj: &serde_json::Map<String, Value>) -> Option<String> {
    for key in ["id", "symbol", "netuid"] {
        if let Some(value) = obj.get(key) {
            return Some(match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            });
        }
    }
    default_asset_id(source, url)
}

fn short_url(url: &str) -> &str {
    let trimmed = url.split_once("//").map_or(url, |(_, rest)| rest);
    trimmed.get(..50).unwrap_or(trimmed)
}
