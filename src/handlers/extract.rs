//! Chunked structured extraction.
//!
//! One call walks the page chunk by chunk. Each round sends the next unseen
//! chunk, the progress note and everything extracted so far to the model,
//! then folds the returned partial value into the accumulated content. The
//! loop stops as soon as the model reports completion or every chunk of the
//! partition has been consumed.

use serde_json::Value;

use crate::config::DEFAULT_DOM_SETTLE_TIMEOUT_MS;
use crate::dom::{ChunkResponse, DomChunkProvider};
use crate::llm::inference::{ExtractInferenceRequest, LlmInference};
use crate::logging::{AuxiliaryValue, StagehandLogger, auxiliary};
use crate::metrics::{MetricsRecorder, StagehandFunctionName};
use crate::types::{ExtractOptions, ExtractionState};

use super::HandlerError;
use super::merge::merge_partial;

const CATEGORY: &str = "extraction";

pub struct ExtractHandler<'a> {
    dom: &'a dyn DomChunkProvider,
    inference: &'a dyn LlmInference,
    logger: &'a StagehandLogger,
    metrics: Option<&'a MetricsRecorder>,
    dom_settle_timeout_ms: u64,
}

impl<'a> ExtractHandler<'a> {
    pub fn new(
        dom: &'a dyn DomChunkProvider,
        inference: &'a dyn LlmInference,
        logger: &'a StagehandLogger,
    ) -> Self {
        Self {
            dom,
            inference,
            logger,
            metrics: None,
            dom_settle_timeout_ms: DEFAULT_DOM_SETTLE_TIMEOUT_MS,
        }
    }

    pub fn with_metrics(mut self, metrics: &'a MetricsRecorder) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Settle bound used when a call does not carry its own.
    pub fn with_dom_settle_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.dom_settle_timeout_ms = timeout_ms;
        self
    }

    /// Run the extraction loop and return the merged content.
    pub async fn extract(&self, options: ExtractOptions) -> Result<Value, HandlerError> {
        let ExtractOptions {
            instruction,
            schema,
            model_name,
            dom_settle_timeout_ms,
            request_id,
        } = options;
        let settle_timeout_ms = dom_settle_timeout_ms.unwrap_or(self.dom_settle_timeout_ms);

        self.logger.info(
            CATEGORY,
            "starting extraction",
            auxiliary([
                ("instruction", AuxiliaryValue::string(instruction.as_str())),
                (
                    "requestId",
                    AuxiliaryValue::string(request_id.as_deref().unwrap_or_default()),
                ),
            ]),
        );

        let mut state = ExtractionState::new(instruction);
        let mut partition: Option<Vec<usize>> = None;

        loop {
            self.dom.wait_for_settled_dom(settle_timeout_ms).await?;

            let ChunkResponse {
                output_string,
                chunk,
                chunks,
            } = self.dom.next_chunk(&state.chunks_seen).await?;
            check_partition(partition.as_deref(), &state.chunks_seen, chunk, &chunks)?;
            state.total_chunks = chunks.len();

            self.logger.debug(
                CATEGORY,
                "received DOM chunk",
                auxiliary([
                    ("chunk", AuxiliaryValue::integer(chunk as i64)),
                    (
                        "chunksSeen",
                        AuxiliaryValue::integer(state.chunks_seen.len() as i64),
                    ),
                    ("chunksTotal", AuxiliaryValue::integer(chunks.len() as i64)),
                ]),
            );
            partition.get_or_insert(chunks);

            let response = self
                .inference
                .extract(ExtractInferenceRequest {
                    instruction: state.instruction.clone(),
                    progress: state.progress.clone(),
                    previously_extracted_content: state.content.clone(),
                    dom_elements: output_string,
                    schema: schema.clone(),
                    chunks_seen: state.chunks_seen.len(),
                    chunks_total: state.total_chunks,
                    model_name: model_name.clone(),
                    request_id: request_id.clone(),
                })
                .await?;

            if let (Some(metrics), Some(usage)) = (self.metrics, response.usage) {
                metrics.record(
                    StagehandFunctionName::Extract,
                    usage.prompt_tokens,
                    usage.completion_tokens,
                    usage.inference_time_ms,
                );
            }

            let completed = response.metadata.completed;
            self.logger.debug(
                CATEGORY,
                "received extraction response",
                auxiliary([
                    ("completed", AuxiliaryValue::boolean(completed)),
                    (
                        "progress",
                        AuxiliaryValue::string(response.metadata.progress.as_str()),
                    ),
                ]),
            );

            state.chunks_seen.push(chunk);
            let prior = std::mem::take(&mut state.content);
            state.content = merge_partial(&schema, prior, response.data);
            state.progress = response.metadata.progress;

            if completed || state.all_chunks_seen() {
                self.logger.info(
                    CATEGORY,
                    "extraction finished",
                    auxiliary([
                        ("completed", AuxiliaryValue::boolean(completed)),
                        (
                            "chunksSeen",
                            AuxiliaryValue::integer(state.chunks_seen.len() as i64),
                        ),
                        (
                            "chunksTotal",
                            AuxiliaryValue::integer(state.total_chunks as i64),
                        ),
                    ]),
                );
                return Ok(state.content);
            }

            self.logger.info(
                CATEGORY,
                "continuing extraction with next chunk",
                auxiliary([
                    ("progress", AuxiliaryValue::string(state.progress.as_str())),
                    (
                        "chunksRemaining",
                        AuxiliaryValue::integer(
                            (state.total_chunks - state.chunks_seen.len()) as i64,
                        ),
                    ),
                ]),
            );
        }
    }
}

/// The first round fixes the partition. Every round must report a chunk
/// inside it that has not been consumed yet.
fn check_partition(
    expected: Option<&[usize]>,
    seen: &[usize],
    chunk: usize,
    reported: &[usize],
) -> Result<(), HandlerError> {
    let partition = expected.unwrap_or(reported);
    if partition == reported && reported.contains(&chunk) && !seen.contains(&chunk) {
        return Ok(());
    }
    Err(HandlerError::ChunkPartitionChanged {
        expected: partition.to_vec(),
        reported: reported.to_vec(),
        chunk,
    })
}
