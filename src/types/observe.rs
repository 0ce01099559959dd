use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Options controlling the `observe` handler.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ObserveOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
    pub use_vision: bool,
    pub full_page: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dom_settle_timeout_ms: Option<u64>,
}

impl ObserveOptions {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: Some(instruction.into()),
            ..Default::default()
        }
    }
}

/// Element returned to callers, with its id already resolved to a locator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObservedElement {
    pub selector: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<String>>,
}

/// Stored record of one observe call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    pub id: String,
    pub instruction: String,
    pub result: Vec<ObservedElement>,
}

/// Element as reported by the inference backend, before locator resolution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InferredElement {
    #[serde(alias = "elementId", deserialize_with = "element_id_from_any")]
    pub element_id: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<String>,
}

impl InferredElement {
    pub fn new(element_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            element_id: element_id.into(),
            description: description.into(),
            method: None,
            arguments: Vec::new(),
        }
    }
}

// Models emit ids as either numbers or strings.
fn element_id_from_any<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(text) => Ok(text.trim().to_string()),
        Value::Number(number) => Ok(number.to_string()),
        other => Err(de::Error::custom(format!(
            "element id must be a string or number, got {other}"
        ))),
    }
}
