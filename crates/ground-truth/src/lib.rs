//! Ground-truth collection for evaluation runs.
//!
//! As the agent navigates, page-visit events feed two accumulators: an
//! extraction state built by per-site content extractors, and a pool of
//! API data bound to the visited pages. URL triggers mark the subtasks
//! whose remote ground truth should be fetched, but the fetch itself is
//! deferred to the end of the trajectory so the answer reflects what the
//! agent could actually have seen.
//!
//! The [`GroundTruthResult`] taxonomy is load-bearing: `NotCollected`
//! means the evaluation is valid and the agent simply failed to gather
//! the data (score 0), while `SystemError` invalidates the run. The two
//! must never be conflated downstream.

pub mod collector;
pub mod error;
pub mod extraction;
pub mod registry;
pub mod result;
pub mod trigger;

pub use collector::{
    CollectorStats, GroundTruthCollector, GtSourceType, RemoteGtFetch, SubtaskSpec,
};
pub use error::{GtError, Result};
pub use extraction::{find_asset, AssetFields, Extraction, ExtractionState, PageExtractor, PageType};
pub use registry::Registry;
pub use result::GroundTruthResult;
pub use trigger::{Trigger, UrlPattern, UrlWithParams};
