//! Data model shared by the extract and observe handlers.

pub mod extract;
pub mod observe;

pub use extract::{ExtractOptions, ExtractionMetadata, ExtractionResponse, ExtractionState};
pub use observe::{InferredElement, Observation, ObserveOptions, ObservedElement};
