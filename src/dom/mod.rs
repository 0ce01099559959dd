//! Page-side collaborators: DOM settling, chunked serialization, and
//! annotated screenshots.
//!
//! The handlers only see the traits defined here. [`chromium`] provides the
//! chromiumoxide-backed implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod chromium;

pub use chromium::ChromiumDomProvider;

/// Element id → candidate locators, preferred locator first.
pub type SelectorMap = HashMap<String, Vec<String>>;

/// One incremental serialization step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResponse {
    pub output_string: String,
    /// Index of the chunk produced by this call.
    pub chunk: usize,
    /// Full chunk partition known to the provider.
    pub chunks: Vec<usize>,
}

/// Serialized DOM plus the element-id lookup used to resolve observations.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SerializedDom {
    pub output_string: String,
    pub selector_map: SelectorMap,
}

/// Errors raised by page-side collaborators.
#[derive(Debug, Error)]
pub enum DomError {
    #[error("DOM did not settle within {timeout_ms}ms")]
    NotSettled { timeout_ms: u64 },
    #[error("no unseen chunk remains (seen {seen} of {total})")]
    NoChunksRemaining { seen: usize, total: usize },
    #[error("CDP error: {0}")]
    Cdp(String),
    #[error("unexpected page script result: {0}")]
    Script(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Source of DOM state for the handlers.
#[async_trait]
pub trait DomChunkProvider: Send + Sync {
    /// Block until the page's network activity has quietened, bounded by `timeout_ms`.
    async fn wait_for_settled_dom(&self, timeout_ms: u64) -> Result<(), DomError>;

    /// Serialize the next chunk not contained in `chunks_seen`.
    async fn next_chunk(&self, chunks_seen: &[usize]) -> Result<ChunkResponse, DomError>;

    /// Serialize the whole page (`full_page`) or the default first chunk.
    async fn serialize(&self, full_page: bool) -> Result<SerializedDom, DomError>;
}

/// Produces screenshots annotated with element ids for vision models.
#[async_trait]
pub trait VisionAnnotator: Send + Sync {
    /// Capture a PNG with every element in `selector_map` labelled by its id.
    async fn annotate(
        &self,
        selector_map: &SelectorMap,
        full_page: bool,
    ) -> Result<Vec<u8>, DomError>;
}
