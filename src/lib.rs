//! Stagehand extract/observe handlers.
//!
//! The crate drives two protocols against a live page: a chunk-by-chunk
//! structured extraction loop and a single-shot element observation with
//! locator resolution. Browser access, inference and screenshot annotation
//! sit behind traits so the handlers can run against chromiumoxide and an
//! OpenAI-compatible backend, or against test doubles.

pub mod capabilities;
pub mod config;
pub mod dom;
pub mod dom_scripts;
pub mod handlers;
pub mod llm;
pub mod logging;
pub mod metrics;
pub mod runtime;
pub mod stagehand;
pub mod store;
pub mod types;

pub use handlers::{ExtractHandler, HandlerError, ObserveHandler};
pub use stagehand::Stagehand;
pub use store::{ObservationStore, observation_id};
