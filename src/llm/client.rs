use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_openai::types::{
    ChatCompletionRequestMessage, CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
    CreateChatCompletionResponse, ResponseFormat,
};

use crate::config::StagehandConfig;
use crate::logging::{Auxiliary, AuxiliaryValue, StagehandLogger, auxiliary};

use super::error::StagehandLlmError;
use super::openai::OpenAiChatProvider;
use super::provider::ChatCompletionProvider;

/// Optional parameters that influence chat completion requests.
#[derive(Debug, Default, Clone)]
pub struct ChatCompletionOptions {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub seed: Option<i64>,
    pub response_format: Option<ResponseFormat>,
    /// Correlates log lines for one handler call; never sent to the provider.
    pub request_id: Option<String>,
}

impl ChatCompletionOptions {
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }
}

/// Provider-neutral chat client.
pub struct StagehandLlmClient<P: ChatCompletionProvider> {
    provider: P,
    default_model: String,
    logger: Option<Arc<StagehandLogger>>,
}

impl<P> fmt::Debug for StagehandLlmClient<P>
where
    P: ChatCompletionProvider + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagehandLlmClient")
            .field("provider", &self.provider)
            .field("default_model", &self.default_model)
            .field("logger_attached", &self.logger.is_some())
            .finish()
    }
}

impl<P: ChatCompletionProvider> StagehandLlmClient<P> {
    /// Create a new client with the supplied provider and default model.
    pub fn new(default_model: impl Into<String>, provider: P) -> Self {
        Self {
            provider,
            default_model: default_model.into(),
            logger: None,
        }
    }

    pub fn with_logger(mut self, logger: Option<Arc<StagehandLogger>>) -> Self {
        self.logger = logger;
        self
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Access the underlying provider (primarily for testing).
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Construct an [`async_openai`] chat completion request using the provided messages and options.
    pub fn build_request(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
        options: &ChatCompletionOptions,
    ) -> Result<CreateChatCompletionRequest, StagehandLlmError> {
        let model = options
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        if model.trim().is_empty() {
            return Err(StagehandLlmError::MissingDefaultModel);
        }

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(model);
        builder.messages(messages);
        apply_options(&mut builder, options);

        builder
            .build()
            .map_err(|err| StagehandLlmError::InvalidRequest(err.to_string()))
    }

    pub async fn create_chat_completion(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
        options: ChatCompletionOptions,
        function_name: Option<&str>,
    ) -> Result<CreateChatCompletionResponse, StagehandLlmError> {
        let request = self.build_request(messages, &options)?;
        self.execute_request(request, function_name, options.request_id.as_deref())
            .await
    }

    async fn execute_request(
        &self,
        request: CreateChatCompletionRequest,
        function_name: Option<&str>,
        request_id: Option<&str>,
    ) -> Result<CreateChatCompletionResponse, StagehandLlmError> {
        let model = request.model.clone();
        self.log_debug(
            "sending chat completion request",
            &model,
            function_name,
            request_id,
        );

        let start = Instant::now();
        match self.provider.create_chat_completion(request).await {
            Ok(response) => {
                let elapsed = start.elapsed();
                self.log_debug(
                    &format!("chat completion succeeded in {}ms", elapsed.as_millis()),
                    &model,
                    function_name,
                    request_id,
                );
                Ok(response)
            }
            Err(err) => {
                if let Some(logger) = &self.logger {
                    logger.error(
                        "llm",
                        format!("chat completion failed for model={model}: {err}"),
                        Auxiliary::new(),
                    );
                }
                Err(StagehandLlmError::OpenAi(err))
            }
        }
    }

    fn log_debug(
        &self,
        message: &str,
        model: &str,
        function_name: Option<&str>,
        request_id: Option<&str>,
    ) {
        if let Some(logger) = &self.logger {
            let mut aux = vec![
                ("model", AuxiliaryValue::string(model)),
                ("function", AuxiliaryValue::string(function_name.unwrap_or("n/a"))),
            ];
            if let Some(request_id) = request_id {
                aux.push(("requestId", AuxiliaryValue::string(request_id)));
            }
            logger.debug("llm", message, auxiliary(aux));
        }
    }
}

impl StagehandLlmClient<OpenAiChatProvider> {
    /// Wire the OpenAI provider using `StagehandConfig`.
    pub fn from_config(
        config: &StagehandConfig,
        logger: Option<Arc<StagehandLogger>>,
    ) -> Result<Self, StagehandLlmError> {
        let provider = OpenAiChatProvider::from_config(config)?;
        Ok(StagehandLlmClient::new(config.model_name.as_str(), provider).with_logger(logger))
    }
}

fn apply_options(builder: &mut CreateChatCompletionRequestArgs, options: &ChatCompletionOptions) {
    if let Some(temperature) = options.temperature {
        builder.temperature(temperature);
    }
    if let Some(top_p) = options.top_p {
        builder.top_p(top_p);
    }
    if let Some(max_tokens) = options.max_tokens {
        builder.max_completion_tokens(max_tokens);
    }
    if let Some(seed) = options.seed {
        builder.seed(seed);
    }
    if let Some(response_format) = options.response_format.clone() {
        builder.response_format(response_format);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_openai::error::{ApiError, OpenAIError};
    use async_openai::types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestSystemMessageContent,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Mutex;

    use crate::config::Verbosity;
    use crate::logging::LogLine;

    #[derive(Debug, Default)]
    struct RecordingProvider {
        requests: Mutex<Vec<CreateChatCompletionRequest>>,
        response: Mutex<Option<Result<CreateChatCompletionResponse, OpenAIError>>>,
    }

    impl RecordingProvider {
        fn with_response(response: CreateChatCompletionResponse) -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                response: Mutex::new(Some(Ok(response))),
            }
        }

        fn with_error(error: OpenAIError) -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                response: Mutex::new(Some(Err(error))),
            }
        }
    }

    #[async_trait]
    impl ChatCompletionProvider for RecordingProvider {
        async fn create_chat_completion(
            &self,
            request: CreateChatCompletionRequest,
        ) -> Result<CreateChatCompletionResponse, OpenAIError> {
            self.requests.lock().await.push(request);
            self.response.lock().await.take().unwrap_or_else(|| {
                Err(OpenAIError::ApiError(ApiError {
                    message: "no response configured".into(),
                    r#type: None,
                    param: None,
                    code: None,
                }))
            })
        }
    }

    fn sample_messages() -> Vec<ChatCompletionRequestMessage> {
        vec![
            ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(ChatCompletionRequestSystemMessageContent::Text(
                        "You extract data.".to_string(),
                    ))
                    .build()
                    .unwrap(),
            ),
            ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(ChatCompletionRequestUserMessageContent::Text(
                        "Say hello.".to_string(),
                    ))
                    .build()
                    .unwrap(),
            ),
        ]
    }

    fn sample_response() -> CreateChatCompletionResponse {
        serde_json::from_value(json!({
            "id": "cmpl-test",
            "object": "chat.completion",
            "created": 0,
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "finish_reason": "stop",
                "message": {
                    "role": "assistant",
                    "content": "Hello!"
                },
                "logprobs": null
            }],
            "usage": {
                "prompt_tokens": 10,
                "completion_tokens": 5,
                "total_tokens": 15
            },
            "system_fingerprint": null
        }))
        .unwrap()
    }

    #[test]
    fn build_request_uses_default_model() {
        let provider = RecordingProvider::with_response(sample_response());
        let client = StagehandLlmClient::new("gpt-4o", provider);

        let request = client
            .build_request(sample_messages(), &ChatCompletionOptions::default())
            .expect("build request");

        assert_eq!(request.model, "gpt-4o");
        assert_eq!(request.messages.len(), 2);
    }

    #[test]
    fn build_request_prefers_per_call_model() {
        let client = StagehandLlmClient::new("gpt-4o", RecordingProvider::default());
        let options = ChatCompletionOptions::default().with_model(Some("gpt-4o-mini".into()));
        let request = client
            .build_request(sample_messages(), &options)
            .expect("build request");
        assert_eq!(request.model, "gpt-4o-mini");
    }

    #[test]
    fn empty_model_is_rejected() {
        let client = StagehandLlmClient::new("  ", RecordingProvider::default());
        let err = client
            .build_request(sample_messages(), &ChatCompletionOptions::default())
            .expect_err("missing model");
        assert!(matches!(err, StagehandLlmError::MissingDefaultModel));
    }

    #[tokio::test]
    async fn debug_lines_carry_request_id() {
        let lines: Arc<std::sync::Mutex<Vec<LogLine>>> = Arc::default();
        let sink = Arc::clone(&lines);
        let logger = Arc::new(StagehandLogger::with_external(
            Verbosity::Detailed,
            Some(Arc::new(move |line: &LogLine| {
                sink.lock().unwrap().push(line.clone());
            })),
        ));
        let client = StagehandLlmClient::new(
            "gpt-4o",
            RecordingProvider::with_response(sample_response()),
        )
        .with_logger(Some(logger));

        client
            .create_chat_completion(
                sample_messages(),
                ChatCompletionOptions::default().with_request_id(Some("req-7".into())),
                Some("OBSERVE"),
            )
            .await
            .expect("completion succeeds");

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 2);
        let aux = &lines[0].auxiliary;
        assert_eq!(aux["requestId"].value, "req-7");
        assert_eq!(aux["function"].value, "OBSERVE");
    }

    #[tokio::test]
    async fn propagates_provider_error() {
        let expected_message = "bad request".to_string();
        let provider = RecordingProvider::with_error(OpenAIError::ApiError(ApiError {
            message: expected_message.clone(),
            r#type: None,
            param: None,
            code: None,
        }));
        let client = StagehandLlmClient::new("gpt-4o", provider);

        let err = client
            .create_chat_completion(sample_messages(), ChatCompletionOptions::default(), None)
            .await
            .expect_err("should propagate error");

        match err {
            StagehandLlmError::OpenAi(OpenAIError::ApiError(api_err)) => {
                assert_eq!(api_err.message, expected_message);
            }
            other => panic!("unexpected error variant: {other:?}"),
        }
    }
}
