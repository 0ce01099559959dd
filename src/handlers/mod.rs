//! Extract and observe coordinators.

use thiserror::Error;

use crate::dom::DomError;
use crate::llm::inference::InferenceError;

pub mod extract;
pub mod merge;
pub mod observe;

pub use extract::ExtractHandler;
pub use merge::merge_partial;
pub use observe::ObserveHandler;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Dom(#[from] DomError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("model referenced element id {element_id} which is not on the page")]
    UnknownElement { element_id: String },
    #[error(
        "chunk partition changed mid-extraction: expected {expected:?}, provider reported chunk {chunk} of {reported:?}"
    )]
    ChunkPartitionChanged {
        expected: Vec<usize>,
        reported: Vec<usize>,
        chunk: usize,
    },
}
