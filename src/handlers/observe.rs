//! Single-shot element observation.

use crate::capabilities::{ModelCapabilities, ModelCapability};
use crate::config::{DEFAULT_DOM_SETTLE_TIMEOUT_MS, DEFAULT_MODEL_NAME};
use crate::dom::{DomChunkProvider, SelectorMap, SerializedDom, VisionAnnotator};
use crate::llm::inference::{LlmInference, ObserveInferenceRequest};
use crate::llm::prompts::{VISION_DOM_PLACEHOLDER, effective_observe_instruction};
use crate::logging::{AuxiliaryValue, StagehandLogger, auxiliary};
use crate::metrics::{MetricsRecorder, StagehandFunctionName};
use crate::store::ObservationStore;
use crate::types::{InferredElement, ObserveOptions, ObservedElement};

use super::HandlerError;

const CATEGORY: &str = "observation";

pub struct ObserveHandler<'a> {
    dom: &'a dyn DomChunkProvider,
    annotator: &'a dyn VisionAnnotator,
    inference: &'a dyn LlmInference,
    capabilities: &'a dyn ModelCapabilities,
    store: &'a ObservationStore,
    logger: &'a StagehandLogger,
    metrics: Option<&'a MetricsRecorder>,
    default_model: &'a str,
    dom_settle_timeout_ms: u64,
}

impl<'a> ObserveHandler<'a> {
    pub fn new(
        dom: &'a dyn DomChunkProvider,
        annotator: &'a dyn VisionAnnotator,
        inference: &'a dyn LlmInference,
        capabilities: &'a dyn ModelCapabilities,
        store: &'a ObservationStore,
        logger: &'a StagehandLogger,
    ) -> Self {
        Self {
            dom,
            annotator,
            inference,
            capabilities,
            store,
            logger,
            metrics: None,
            default_model: DEFAULT_MODEL_NAME,
            dom_settle_timeout_ms: DEFAULT_DOM_SETTLE_TIMEOUT_MS,
        }
    }

    pub fn with_metrics(mut self, metrics: &'a MetricsRecorder) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Model checked for vision support when a call names none.
    pub fn with_default_model(mut self, model: &'a str) -> Self {
        self.default_model = model;
        self
    }

    pub fn with_dom_settle_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.dom_settle_timeout_ms = timeout_ms;
        self
    }

    /// Observe the page and return the matching elements in model order.
    ///
    /// The result is also recorded in the session store under the
    /// instruction's observation id.
    pub async fn observe(
        &self,
        options: ObserveOptions,
    ) -> Result<Vec<ObservedElement>, HandlerError> {
        let ObserveOptions {
            instruction,
            use_vision,
            full_page,
            model_name,
            request_id,
            dom_settle_timeout_ms,
        } = options;
        let instruction = effective_observe_instruction(instruction.as_deref()).to_string();

        self.logger.info(
            CATEGORY,
            "starting observation",
            auxiliary([
                ("instruction", AuxiliaryValue::string(instruction.as_str())),
                ("fullPage", AuxiliaryValue::boolean(full_page)),
            ]),
        );

        self.dom
            .wait_for_settled_dom(dom_settle_timeout_ms.unwrap_or(self.dom_settle_timeout_ms))
            .await?;

        let SerializedDom {
            mut output_string,
            selector_map,
        } = self.dom.serialize(full_page).await?;

        let model = model_name.as_deref().unwrap_or(self.default_model);
        let mut image = None;
        if use_vision {
            if self.capabilities.supports(model, ModelCapability::Vision) {
                image = Some(self.annotator.annotate(&selector_map, full_page).await?);
                output_string = VISION_DOM_PLACEHOLDER.to_string();
            } else {
                self.logger.info(
                    CATEGORY,
                    "model does not support vision, skipping vision processing",
                    auxiliary([("model", AuxiliaryValue::string(model))]),
                );
            }
        }

        let response = self
            .inference
            .observe(ObserveInferenceRequest {
                instruction: instruction.clone(),
                dom_elements: output_string,
                model_name,
                image,
                request_id,
            })
            .await?;

        if let (Some(metrics), Some(usage)) = (self.metrics, response.usage) {
            metrics.record(
                StagehandFunctionName::Observe,
                usage.prompt_tokens,
                usage.completion_tokens,
                usage.inference_time_ms,
            );
        }

        let elements = resolve_elements(response.elements, &selector_map)?;
        let id = self.store.record(&instruction, elements.clone());

        self.logger.info(
            CATEGORY,
            "found elements",
            auxiliary([
                ("observationId", AuxiliaryValue::string(id)),
                ("count", AuxiliaryValue::integer(elements.len() as i64)),
            ]),
        );

        Ok(elements)
    }
}

/// Map element ids to locators; any unmapped id fails the whole batch.
fn resolve_elements(
    elements: Vec<InferredElement>,
    selector_map: &SelectorMap,
) -> Result<Vec<ObservedElement>, HandlerError> {
    elements
        .into_iter()
        .map(|element| {
            let locator = selector_map
                .get(&element.element_id)
                .and_then(|candidates| candidates.first())
                .ok_or_else(|| HandlerError::UnknownElement {
                    element_id: element.element_id.clone(),
                })?;
            Ok(ObservedElement {
                selector: format!("xpath={locator}"),
                description: element.description,
                method: element.method,
                arguments: (!element.arguments.is_empty()).then_some(element.arguments),
            })
        })
        .collect()
}
