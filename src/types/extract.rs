use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value};

use crate::llm::inference::InferenceUsage;

/// Options controlling the `extract` handler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractOptions {
    pub instruction: String,
    /// JSON schema the extracted value must conform to.
    pub schema: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dom_settle_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ExtractOptions {
    pub fn new(instruction: impl Into<String>, schema: Value) -> Self {
        Self {
            instruction: instruction.into(),
            schema,
            model_name: None,
            dom_settle_timeout_ms: None,
            request_id: None,
        }
    }

    pub fn with_model(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = Some(model_name.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_dom_settle_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.dom_settle_timeout_ms = Some(timeout_ms);
        self
    }
}

/// Progress note and completion flag asserted by the model for one round.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractionMetadata {
    #[serde(default)]
    pub progress: String,
    #[serde(default)]
    pub completed: bool,
}

/// Result of one extraction inference round.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionResponse {
    pub metadata: ExtractionMetadata,
    /// Schema fields returned this round, metadata already removed.
    pub data: Value,
    pub usage: Option<InferenceUsage>,
}

impl ExtractionResponse {
    pub fn new(data: Value, metadata: ExtractionMetadata) -> Self {
        Self {
            metadata,
            data: strip_metadata(data),
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: InferenceUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

// The round's `metadata` object never becomes part of the extracted content.
fn strip_metadata(value: Value) -> Value {
    match value {
        Value::Object(mut map) => {
            map.remove("metadata");
            Value::Object(map)
        }
        other => other,
    }
}

/// Accumulator owned by a single in-flight extraction call.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionState {
    pub instruction: String,
    pub progress: String,
    pub content: Value,
    pub chunks_seen: Vec<usize>,
    pub total_chunks: usize,
}

impl ExtractionState {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            progress: String::new(),
            content: Value::Object(JsonMap::new()),
            chunks_seen: Vec::new(),
            total_chunks: 0,
        }
    }

    /// True once every chunk of the partition has been consumed.
    pub fn all_chunks_seen(&self) -> bool {
        self.total_chunks > 0 && self.chunks_seen.len() >= self.total_chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_drops_metadata_key_from_data() {
        let response = ExtractionResponse::new(
            json!({
                "title": "Example",
                "metadata": { "progress": "read header", "completed": true }
            }),
            ExtractionMetadata {
                progress: "read header".into(),
                completed: true,
            },
        );

        assert!(response.metadata.completed);
        assert_eq!(response.data, json!({ "title": "Example" }));
    }

    #[test]
    fn new_keeps_non_object_payloads() {
        let response = ExtractionResponse::new(json!(["a", "b"]), ExtractionMetadata::default());
        assert_eq!(response.data, json!(["a", "b"]));
        assert!(!response.metadata.completed);
    }

    #[test]
    fn fresh_state_has_not_seen_all_chunks() {
        let mut state = ExtractionState::new("find prices");
        assert!(!state.all_chunks_seen());
        state.total_chunks = 2;
        state.chunks_seen = vec![0, 1];
        assert!(state.all_chunks_seen());
    }

    #[test]
    fn options_serialize_camel_case() {
        let options = ExtractOptions::new("get title", json!({ "type": "object" }))
            .with_model("gpt-4o")
            .with_dom_settle_timeout_ms(500);
        let value = serde_json::to_value(&options).expect("serialize");
        assert_eq!(value["modelName"], "gpt-4o");
        assert_eq!(value["domSettleTimeoutMs"], 500);
        assert!(value.get("requestId").is_none());
    }
}
