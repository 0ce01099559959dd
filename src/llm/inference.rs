//! Inference seam between the handlers and a chat model.
//!
//! [`LlmInference`] is what the extract and observe handlers call. The
//! production implementation, [`ChatInference`], turns each request into one
//! or two chat completions through [`StagehandLlmClient`].

use std::fmt;

use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
    ChatCompletionRequestMessageContentPartText, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessageArgs,
    ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart,
    CompletionUsage, CreateChatCompletionResponse, ImageUrl, ResponseFormat,
    ResponseFormatJsonSchema,
};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use crate::metrics::{StagehandFunctionName, get_inference_time_ms, start_inference_timer};
use crate::types::{ExtractionMetadata, ExtractionResponse, InferredElement};

use super::client::{ChatCompletionOptions, StagehandLlmClient};
use super::error::StagehandLlmError;
use super::prompts;
use super::provider::ChatCompletionProvider;

/// Token and latency figures reported for one inference call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub inference_time_ms: u64,
}

impl InferenceUsage {
    pub fn add(&mut self, other: &InferenceUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.inference_time_ms += other.inference_time_ms;
    }

    fn from_completion(usage: Option<&CompletionUsage>, inference_time_ms: u64) -> Self {
        Self {
            prompt_tokens: usage.map_or(0, |usage| u64::from(usage.prompt_tokens)),
            completion_tokens: usage.map_or(0, |usage| u64::from(usage.completion_tokens)),
            inference_time_ms,
        }
    }
}

/// One extraction round as seen by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractInferenceRequest {
    pub instruction: String,
    pub progress: String,
    pub previously_extracted_content: Value,
    pub dom_elements: String,
    pub schema: Value,
    /// Chunks processed before this round.
    pub chunks_seen: usize,
    pub chunks_total: usize,
    pub model_name: Option<String>,
    pub request_id: Option<String>,
}

#[derive(Clone, PartialEq)]
pub struct ObserveInferenceRequest {
    pub instruction: String,
    pub dom_elements: String,
    pub model_name: Option<String>,
    /// Annotated PNG screenshot, present only for vision-capable models.
    pub image: Option<Vec<u8>>,
    pub request_id: Option<String>,
}

impl fmt::Debug for ObserveInferenceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserveInferenceRequest")
            .field("instruction", &self.instruction)
            .field("dom_elements", &self.dom_elements)
            .field("model_name", &self.model_name)
            .field("image_bytes", &self.image.as_ref().map(Vec::len))
            .field("request_id", &self.request_id)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObserveInferenceResponse {
    pub elements: Vec<InferredElement>,
    pub usage: Option<InferenceUsage>,
}

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error(transparent)]
    Llm(#[from] StagehandLlmError),
    #[error("failed to build chat message: {0}")]
    InvalidMessage(String),
    #[error("model returned no content for {operation}")]
    EmptyResponse { operation: &'static str },
    #[error("failed to parse {operation} response: {source}")]
    Parse {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0}")]
    Backend(String),
}

/// Model-facing half of the extract and observe protocols.
#[async_trait]
pub trait LlmInference: Send + Sync {
    async fn extract(
        &self,
        request: ExtractInferenceRequest,
    ) -> Result<ExtractionResponse, InferenceError>;

    async fn observe(
        &self,
        request: ObserveInferenceRequest,
    ) -> Result<ObserveInferenceResponse, InferenceError>;
}

/// [`LlmInference`] over a chat completion provider.
pub struct ChatInference<P: ChatCompletionProvider> {
    client: StagehandLlmClient<P>,
    user_instructions: Option<String>,
}

impl<P: ChatCompletionProvider> ChatInference<P> {
    pub fn new(client: StagehandLlmClient<P>) -> Self {
        Self {
            client,
            user_instructions: None,
        }
    }

    /// Append caller-provided instructions to every system prompt.
    pub fn with_user_instructions(mut self, instructions: Option<String>) -> Self {
        self.user_instructions = instructions;
        self
    }

    pub fn client(&self) -> &StagehandLlmClient<P> {
        &self.client
    }

    async fn complete(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
        options: ChatCompletionOptions,
        function: StagehandFunctionName,
    ) -> Result<(CreateChatCompletionResponse, InferenceUsage), InferenceError> {
        let start = start_inference_timer();
        let response = self
            .client
            .create_chat_completion(messages, options, Some(function.as_str()))
            .await?;
        let usage =
            InferenceUsage::from_completion(response.usage.as_ref(), get_inference_time_ms(start));
        Ok((response, usage))
    }
}

impl<P> fmt::Debug for ChatInference<P>
where
    P: ChatCompletionProvider + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatInference")
            .field("client", &self.client)
            .field("user_instructions", &self.user_instructions.is_some())
            .finish()
    }
}

#[async_trait]
impl<P: ChatCompletionProvider> LlmInference for ChatInference<P> {
    async fn extract(
        &self,
        request: ExtractInferenceRequest,
    ) -> Result<ExtractionResponse, InferenceError> {
        let user_instructions = self.user_instructions.as_deref();

        let messages = vec![
            system_message(prompts::build_extract_system_prompt(user_instructions))?,
            user_text_message(prompts::build_extract_user_prompt(
                &request.instruction,
                &request.progress,
                &request.previously_extracted_content,
                &request.dom_elements,
            ))?,
        ];
        let options = ChatCompletionOptions::default()
            .with_model(request.model_name.clone())
            .with_request_id(request.request_id.clone())
            .with_response_format(json_schema_format("extraction_schema", &request.schema));
        let (response, mut usage) = self
            .complete(messages, options, StagehandFunctionName::Extract)
            .await?;
        let mut extraction = ExtractionResponse::new(
            parse_json_content(&response, "extract")?,
            ExtractionMetadata::default(),
        );

        let metadata_messages = vec![
            system_message(prompts::build_metadata_system_prompt())?,
            user_text_message(prompts::build_metadata_prompt(
                &request.instruction,
                &extraction.data,
                request.chunks_seen + 1,
                request.chunks_total,
            ))?,
        ];
        let metadata_options = ChatCompletionOptions::default()
            .with_model(request.model_name)
            .with_request_id(request.request_id)
            .with_response_format(json_schema_format("metadata", &metadata_schema()));
        let (metadata_response, metadata_usage) = self
            .complete(
                metadata_messages,
                metadata_options,
                StagehandFunctionName::Extract,
            )
            .await?;
        extraction.metadata =
            serde_json::from_value(parse_json_content(&metadata_response, "metadata")?).map_err(
                |source| InferenceError::Parse {
                    operation: "metadata",
                    source,
                },
            )?;
        usage.add(&metadata_usage);

        Ok(extraction.with_usage(usage))
    }

    async fn observe(
        &self,
        request: ObserveInferenceRequest,
    ) -> Result<ObserveInferenceResponse, InferenceError> {
        let system = prompts::build_observe_system_prompt(
            request.image.is_some(),
            self.user_instructions.as_deref(),
        );
        let text = prompts::build_observe_user_message(&request.instruction, &request.dom_elements);
        let user = match &request.image {
            Some(image) => user_image_message(text, image)?,
            None => user_text_message(text)?,
        };

        let options = ChatCompletionOptions::default()
            .with_model(request.model_name)
            .with_request_id(request.request_id)
            .with_response_format(ResponseFormat::JsonObject);
        let (response, usage) = self
            .complete(
                vec![system_message(system)?, user],
                options,
                StagehandFunctionName::Observe,
            )
            .await?;

        let elements = parse_observed_elements(parse_json_content(&response, "observe")?)?;
        Ok(ObserveInferenceResponse {
            elements,
            usage: Some(usage),
        })
    }
}

fn system_message(content: String) -> Result<ChatCompletionRequestMessage, InferenceError> {
    Ok(ChatCompletionRequestMessage::System(
        ChatCompletionRequestSystemMessageArgs::default()
            .content(ChatCompletionRequestSystemMessageContent::Text(content))
            .build()
            .map_err(|err| InferenceError::InvalidMessage(err.to_string()))?,
    ))
}

fn user_text_message(content: String) -> Result<ChatCompletionRequestMessage, InferenceError> {
    Ok(ChatCompletionRequestMessage::User(
        ChatCompletionRequestUserMessageArgs::default()
            .content(ChatCompletionRequestUserMessageContent::Text(content))
            .build()
            .map_err(|err| InferenceError::InvalidMessage(err.to_string()))?,
    ))
}

fn user_image_message(
    text: String,
    png: &[u8],
) -> Result<ChatCompletionRequestMessage, InferenceError> {
    let parts = vec![
        ChatCompletionRequestUserMessageContentPart::Text(
            ChatCompletionRequestMessageContentPartText { text },
        ),
        ChatCompletionRequestUserMessageContentPart::ImageUrl(
            ChatCompletionRequestMessageContentPartImage {
                image_url: ImageUrl {
                    url: format!("data:image/png;base64,{}", BASE64.encode(png)),
                    detail: None,
                },
            },
        ),
    ];
    Ok(ChatCompletionRequestMessage::User(
        ChatCompletionRequestUserMessageArgs::default()
            .content(ChatCompletionRequestUserMessageContent::Array(parts))
            .build()
            .map_err(|err| InferenceError::InvalidMessage(err.to_string()))?,
    ))
}

fn json_schema_format(name: &str, schema: &Value) -> ResponseFormat {
    ResponseFormat::JsonSchema {
        json_schema: ResponseFormatJsonSchema {
            description: None,
            name: name.to_string(),
            schema: Some(schema.clone()),
            strict: Some(false),
        },
    }
}

fn metadata_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "progress": { "type": "string" },
            "completed": { "type": "boolean" }
        },
        "required": ["progress", "completed"]
    })
}

fn parse_json_content(
    response: &CreateChatCompletionResponse,
    operation: &'static str,
) -> Result<Value, InferenceError> {
    let content = response
        .choices
        .first()
        .and_then(|choice| choice.message.content.as_deref())
        .map(str::trim)
        .filter(|content| !content.is_empty())
        .ok_or(InferenceError::EmptyResponse { operation })?;

    serde_json::from_str(strip_code_fence(content))
        .map_err(|source| InferenceError::Parse { operation, source })
}

// Some models wrap JSON replies in a markdown fence even in JSON mode.
fn strip_code_fence(content: &str) -> &str {
    let Some(rest) = content.strip_prefix("```") else {
        return content;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn parse_observed_elements(value: Value) -> Result<Vec<InferredElement>, InferenceError> {
    let elements = match value {
        Value::Object(mut map) => map.remove("elements").unwrap_or(Value::Array(Vec::new())),
        other => other,
    };
    serde_json::from_value(elements).map_err(|source| InferenceError::Parse {
        operation: "observe",
        source,
    })
}
