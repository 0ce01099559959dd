//! Session facade.
//!
//! [`Stagehand`] owns the collaborators for one browser session together
//! with the session's observation store and metrics, and hands borrowed views
//! of them to the extract and observe handlers on every call.

use std::sync::Arc;

use chromiumoxide::page::Page;
use serde_json::Value;

use crate::capabilities::{CapabilityTable, ModelCapabilities};
use crate::config::StagehandConfig;
use crate::dom::{ChromiumDomProvider, DomChunkProvider, VisionAnnotator};
use crate::handlers::{ExtractHandler, HandlerError, ObserveHandler};
use crate::llm::{ChatInference, LlmInference, StagehandLlmClient, StagehandLlmError};
use crate::logging::StagehandLogger;
use crate::metrics::{MetricsRecorder, StagehandMetrics};
use crate::store::ObservationStore;
use crate::types::{ExtractOptions, ObserveOptions, ObservedElement};

pub struct Stagehand {
    config: StagehandConfig,
    dom: Arc<dyn DomChunkProvider>,
    annotator: Arc<dyn VisionAnnotator>,
    inference: Arc<dyn LlmInference>,
    capabilities: Arc<dyn ModelCapabilities>,
    logger: Arc<StagehandLogger>,
    store: ObservationStore,
    metrics: MetricsRecorder,
}

impl Stagehand {
    /// Assemble a session from explicit collaborators. Vision support is
    /// looked up in a table built from `config.vision_models`.
    pub fn new(
        config: StagehandConfig,
        dom: Arc<dyn DomChunkProvider>,
        annotator: Arc<dyn VisionAnnotator>,
        inference: Arc<dyn LlmInference>,
    ) -> Self {
        let logger = Arc::new(StagehandLogger::with_external(
            config.verbose,
            config.logger.clone(),
        ));
        Self::with_logger(config, dom, annotator, inference, logger)
    }

    fn with_logger(
        config: StagehandConfig,
        dom: Arc<dyn DomChunkProvider>,
        annotator: Arc<dyn VisionAnnotator>,
        inference: Arc<dyn LlmInference>,
        logger: Arc<StagehandLogger>,
    ) -> Self {
        Self {
            capabilities: Arc::new(CapabilityTable::from_config(&config)),
            config,
            dom,
            annotator,
            inference,
            logger,
            store: ObservationStore::new(),
            metrics: MetricsRecorder::new(),
        }
    }

    /// Drive `page` through chromiumoxide with an OpenAI-compatible model.
    pub fn for_chromium_page(config: StagehandConfig, page: Page) -> Result<Self, StagehandLlmError> {
        let logger = Arc::new(StagehandLogger::with_external(
            config.verbose,
            config.logger.clone(),
        ));
        let client = StagehandLlmClient::from_config(&config, Some(Arc::clone(&logger)))?;
        let inference =
            ChatInference::new(client).with_user_instructions(config.system_prompt.clone());
        let provider = Arc::new(ChromiumDomProvider::new(page, Arc::clone(&logger)));

        Ok(Self::with_logger(
            config,
            provider.clone(),
            provider,
            Arc::new(inference),
            logger,
        ))
    }

    /// Replace the capability lookup used for the vision check.
    pub fn with_capabilities(mut self, capabilities: Arc<dyn ModelCapabilities>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn config(&self) -> &StagehandConfig {
        &self.config
    }

    pub fn logger(&self) -> &StagehandLogger {
        &self.logger
    }

    /// Extract structured data matching `options.schema` from the page.
    pub async fn extract(&self, options: ExtractOptions) -> Result<Value, HandlerError> {
        ExtractHandler::new(self.dom.as_ref(), self.inference.as_ref(), &self.logger)
            .with_metrics(&self.metrics)
            .with_dom_settle_timeout_ms(self.config.settle_timeout_ms(None))
            .extract(options)
            .await
    }

    /// Find actionable elements on the page.
    pub async fn observe(
        &self,
        options: ObserveOptions,
    ) -> Result<Vec<ObservedElement>, HandlerError> {
        ObserveHandler::new(
            self.dom.as_ref(),
            self.annotator.as_ref(),
            self.inference.as_ref(),
            self.capabilities.as_ref(),
            &self.store,
            &self.logger,
        )
        .with_metrics(&self.metrics)
        .with_default_model(&self.config.model_name)
        .with_dom_settle_timeout_ms(self.config.settle_timeout_ms(None))
        .observe(options)
        .await
    }

    /// Observations recorded during this session.
    pub fn observations(&self) -> &ObservationStore {
        &self.store
    }

    pub fn metrics(&self) -> StagehandMetrics {
        self.metrics.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use crate::capabilities::ModelCapability;
    use crate::dom::{ChunkResponse, DomError, SelectorMap, SerializedDom};
    use crate::llm::{
        ExtractInferenceRequest, InferenceError, InferenceUsage, ObserveInferenceRequest,
        ObserveInferenceResponse,
    };
    use crate::types::{ExtractionMetadata, ExtractionResponse, InferredElement};

    struct SinglePage;

    #[async_trait]
    impl DomChunkProvider for SinglePage {
        async fn wait_for_settled_dom(&self, _timeout_ms: u64) -> Result<(), DomError> {
            Ok(())
        }

        async fn next_chunk(&self, _chunks_seen: &[usize]) -> Result<ChunkResponse, DomError> {
            Ok(ChunkResponse {
                output_string: "0:<a>Docs</a>".into(),
                chunk: 0,
                chunks: vec![0],
            })
        }

        async fn serialize(&self, _full_page: bool) -> Result<SerializedDom, DomError> {
            Ok(SerializedDom {
                output_string: "0:<a>Docs</a>".into(),
                selector_map: HashMap::from([("0".to_string(), vec!["/html/body/a".to_string()])]),
            })
        }
    }

    #[async_trait]
    impl VisionAnnotator for SinglePage {
        async fn annotate(
            &self,
            _selector_map: &SelectorMap,
            _full_page: bool,
        ) -> Result<Vec<u8>, DomError> {
            Ok(vec![1, 2, 3])
        }
    }

    #[derive(Default)]
    struct FixedInference {
        images: Mutex<Vec<Option<Vec<u8>>>>,
    }

    fn usage() -> InferenceUsage {
        InferenceUsage {
            prompt_tokens: 12,
            completion_tokens: 3,
            inference_time_ms: 7,
        }
    }

    #[async_trait]
    impl LlmInference for FixedInference {
        async fn extract(
            &self,
            _request: ExtractInferenceRequest,
        ) -> Result<ExtractionResponse, InferenceError> {
            Ok(ExtractionResponse::new(
                json!({ "link": "Docs" }),
                ExtractionMetadata {
                    progress: "done".into(),
                    completed: true,
                },
            )
            .with_usage(usage()))
        }

        async fn observe(
            &self,
            request: ObserveInferenceRequest,
        ) -> Result<ObserveInferenceResponse, InferenceError> {
            self.images.lock().unwrap().push(request.image);
            Ok(ObserveInferenceResponse {
                elements: vec![InferredElement::new("0", "Docs link")],
                usage: Some(usage()),
            })
        }
    }

    fn session(inference: Arc<FixedInference>) -> Stagehand {
        let page = Arc::new(SinglePage);
        Stagehand::new(StagehandConfig::default(), page.clone(), page, inference)
    }

    #[tokio::test]
    async fn extract_and_observe_accumulate_metrics() {
        let stagehand = session(Arc::new(FixedInference::default()));

        let data = stagehand
            .extract(ExtractOptions::new("get the link", json!({ "type": "object" })))
            .await
            .expect("extract");
        assert_eq!(data, json!({ "link": "Docs" }));

        stagehand
            .observe(ObserveOptions::new("find docs"))
            .await
            .expect("observe");

        let metrics = stagehand.metrics();
        assert_eq!(metrics.extract_prompt_tokens, 12);
        assert_eq!(metrics.observe_completion_tokens, 3);
        assert_eq!(metrics.total_inference_time_ms, 14);
    }

    #[tokio::test]
    async fn observations_are_scoped_to_the_session() {
        let first = session(Arc::new(FixedInference::default()));
        let second = session(Arc::new(FixedInference::default()));

        first
            .observe(ObserveOptions::new("find docs"))
            .await
            .expect("observe");

        assert_eq!(first.observations().len(), 1);
        assert!(second.observations().is_empty());
        let stored = first
            .observations()
            .get_by_instruction("find docs")
            .expect("stored");
        assert_eq!(stored.result[0].selector, "xpath=/html/body/a");
    }

    #[tokio::test]
    async fn custom_capabilities_enable_vision() {
        let inference = Arc::new(FixedInference::default());
        let mut config = StagehandConfig::default();
        config.model_name = "local-vision".into();
        config.vision_models.clear();
        let page = Arc::new(SinglePage);
        let stagehand = Stagehand::new(config, page.clone(), page, inference.clone())
            .with_capabilities(Arc::new(
                CapabilityTable::new().with("local-vision", ModelCapability::Vision),
            ));

        let mut options = ObserveOptions::new("find docs");
        options.use_vision = true;
        stagehand.observe(options).await.expect("observe");

        let images = inference.images.lock().unwrap();
        assert_eq!(images.as_slice(), &[Some(vec![1, 2, 3])]);
    }
}
