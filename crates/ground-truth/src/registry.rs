//! Explicit extractor registry.
//!
//! Site plugins register their extractors here at startup; nothing is
//! discovered through import-time side effects.

use crate::extraction::{Extraction, PageExtractor, PageType};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Default)]
pub struct Registry {
    extractors: BTreeMap<String, Arc<dyn PageExtractor>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an extractor under its source name. Re-registering a
    /// source replaces the previous extractor.
    pub fn register_extractor(&mut self, extractor: Arc<dyn PageExtractor>) {
        self.extractors
            .insert(extractor.source().to_string(), extractor);
    }

    pub fn extractor_for(&self, url: &str) -> Option<&Arc<dyn PageExtractor>> {
        self.extractors.values().find(|e| e.matches_url(url))
    }

    /// Run the matching extractor over one page visit. Pages no extractor
    /// claims yield an empty extraction.
    pub fn extract(&self, url: &str, content: &str) -> Extraction {
        match self.extractor_for(url) {
            Some(extractor) => Extraction::new(
                url,
                extractor.classify(url),
                extractor.extract(url, content),
            ),
            None => Extraction::new(url, PageType::Other, Default::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }
}
