//! Strongly-typed configuration for the Stagehand handlers.
//!
//! Values can be constructed from defaults, loaded from environment variables
//! (with optional `.env` support), or merged with explicit overrides for
//! programmatic updates.

use std::env;
use std::fmt;
use std::num::ParseIntError;
use std::sync::Arc;

use dotenvy::dotenv;
use serde::de::{Deserialize, Deserializer, Error as DeError};
use serde::ser::{Serialize, Serializer};
use serde::{Deserialize as DeriveDeserialize, Serialize as DeriveSerialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use thiserror::Error;

use crate::logging::LogCallback;

type JsonObject = JsonMap<String, JsonValue>;

/// Model used when neither the call nor the configuration names one.
pub const DEFAULT_MODEL_NAME: &str = "gpt-4o";

/// Default bound for DOM settle waits.
pub const DEFAULT_DOM_SETTLE_TIMEOUT_MS: u64 = 3_000;

/// Models that accept image input out of the box.
pub const DEFAULT_VISION_MODELS: &[&str] = &[
    "gpt-4o",
    "gpt-4o-mini",
    "gpt-4o-2024-08-06",
    "claude-3-5-sonnet-latest",
];

/// Verbosity level for Stagehand logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Minimal,
    #[default]
    Medium,
    Detailed,
}

impl Verbosity {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Verbosity::Minimal => 0,
            Verbosity::Medium => 1,
            Verbosity::Detailed => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Verbosity::Minimal),
            1 => Some(Verbosity::Medium),
            2 => Some(Verbosity::Detailed),
            _ => None,
        }
    }
}

impl Serialize for Verbosity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for Verbosity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = u8::deserialize(deserializer)?;
        Verbosity::from_u8(value).ok_or_else(|| {
            DeError::custom(format!(
                "invalid verbosity value {value}; expected 0, 1, or 2"
            ))
        })
    }
}

/// Configuration values shared by the extract and observe handlers.
#[derive(DeriveSerialize, DeriveDeserialize, Clone)]
#[serde(default)]
pub struct StagehandConfig {
    #[serde(alias = "modelName")]
    pub model_name: String,
    #[serde(alias = "modelApiKey")]
    pub model_api_key: Option<String>,
    #[serde(alias = "modelClientOptions")]
    pub model_client_options: Option<JsonObject>,
    #[serde(skip_serializing, skip_deserializing)]
    pub logger: Option<LogCallback>,
    pub verbose: Verbosity,
    #[serde(alias = "domSettleTimeoutMs")]
    pub dom_settle_timeout_ms: Option<u64>,
    #[serde(alias = "visionModels")]
    pub vision_models: Vec<String>,
    #[serde(alias = "systemPrompt")]
    pub system_prompt: Option<String>,
    pub headless: bool,
    #[serde(alias = "chromeExecutable")]
    pub chrome_executable: Option<String>,
}

impl Default for StagehandConfig {
    fn default() -> Self {
        StagehandConfig {
            model_name: DEFAULT_MODEL_NAME.to_string(),
            model_api_key: None,
            model_client_options: None,
            logger: None,
            verbose: Verbosity::default(),
            dom_settle_timeout_ms: Some(DEFAULT_DOM_SETTLE_TIMEOUT_MS),
            vision_models: DEFAULT_VISION_MODELS
                .iter()
                .map(|model| model.to_string())
                .collect(),
            system_prompt: None,
            headless: true,
            chrome_executable: None,
        }
    }
}

impl StagehandConfig {
    /// Construct a configuration by reading relevant environment variables, after
    /// loading a `.env` file if present.
    pub fn from_env() -> Result<Self, StagehandConfigError> {
        let _ = dotenv();
        let mut config = StagehandConfig::default();

        if let Some(value) = env_var("MODEL_NAME") {
            config.model_name = value;
        }

        if let Some(value) = env_var("MODEL_API_KEY") {
            config.model_api_key = Some(value);
        }

        if let Some(value) = env_var("STAGEHAND_VERBOSE") {
            let parsed = parse_u8("STAGEHAND_VERBOSE", &value)?;
            config.verbose = Verbosity::from_u8(parsed).ok_or_else(|| {
                StagehandConfigError::invalid_enum("STAGEHAND_VERBOSE", parsed.to_string())
            })?;
        }

        if let Some(value) = env_var("STAGEHAND_DOM_SETTLE_TIMEOUT_MS") {
            config.dom_settle_timeout_ms =
                Some(parse_u64("STAGEHAND_DOM_SETTLE_TIMEOUT_MS", &value)?);
        }

        if let Some(value) = env_var("STAGEHAND_VISION_MODELS") {
            config.vision_models = parse_list(&value);
        }

        if let Some(value) = env_var("STAGEHAND_SYSTEM_PROMPT") {
            config.system_prompt = Some(value);
        }

        if let Some(value) = env_var("STAGEHAND_MODEL_CLIENT_OPTIONS") {
            config.model_client_options =
                Some(parse_json_object("STAGEHAND_MODEL_CLIENT_OPTIONS", &value)?);
        }

        if let Some(value) = env_var("STAGEHAND_HEADLESS") {
            config.headless = parse_bool("STAGEHAND_HEADLESS", &value)?;
        }

        if let Some(value) = env_var("STAGEHAND_CHROME_BIN") {
            config.chrome_executable = Some(value);
        }

        Ok(config)
    }

    /// Settle bound for a call: the per-call value wins over the configured default.
    pub fn settle_timeout_ms(&self, per_call: Option<u64>) -> u64 {
        per_call
            .or(self.dom_settle_timeout_ms)
            .unwrap_or(DEFAULT_DOM_SETTLE_TIMEOUT_MS)
    }

    /// Create a new configuration with explicit field overrides applied.
    pub fn with_overrides(&self, overrides: StagehandConfigOverrides) -> StagehandConfig {
        let mut next = self.clone();

        if let Some(value) = overrides.model_name {
            next.model_name = value;
        }
        if let Some(value) = overrides.model_api_key {
            next.model_api_key = value;
        }
        if let Some(value) = overrides.model_client_options {
            next.model_client_options = value;
        }
        if let Some(value) = overrides.logger {
            next.logger = value;
        }
        if let Some(value) = overrides.verbose {
            next.verbose = value;
        }
        if let Some(value) = overrides.dom_settle_timeout_ms {
            next.dom_settle_timeout_ms = value;
        }
        if let Some(value) = overrides.vision_models {
            next.vision_models = value;
        }
        if let Some(value) = overrides.system_prompt {
            next.system_prompt = value;
        }
        if let Some(value) = overrides.headless {
            next.headless = value;
        }
        if let Some(value) = overrides.chrome_executable {
            next.chrome_executable = value;
        }

        next
    }
}

/// Field-level overrides for [`StagehandConfig::with_overrides`].
#[derive(Default, Clone)]
pub struct StagehandConfigOverrides {
    pub model_name: Option<String>,
    pub model_api_key: Option<Option<String>>,
    pub model_client_options: Option<Option<JsonObject>>,
    pub logger: Option<Option<LogCallback>>,
    pub verbose: Option<Verbosity>,
    pub dom_settle_timeout_ms: Option<Option<u64>>,
    pub vision_models: Option<Vec<String>>,
    pub system_prompt: Option<Option<String>>,
    pub headless: Option<bool>,
    pub chrome_executable: Option<Option<String>>,
}

impl StagehandConfigOverrides {
    /// Builder-style helper to set the `model_name` override.
    pub fn model_name(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = Some(model_name.into());
        self
    }

    /// Builder-style helper to set the `vision_models` override.
    pub fn vision_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.vision_models = Some(models.into_iter().map(Into::into).collect());
        self
    }
}

impl fmt::Debug for StagehandConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagehandConfig")
            .field("model_name", &self.model_name)
            .field(
                "model_api_key",
                &self.model_api_key.as_ref().map(|_| "<redacted>"),
            )
            .field("model_client_options", &self.model_client_options)
            .field("verbose", &self.verbose)
            .field("dom_settle_timeout_ms", &self.dom_settle_timeout_ms)
            .field("vision_models", &self.vision_models)
            .field("system_prompt", &self.system_prompt)
            .field("headless", &self.headless)
            .field("chrome_executable", &self.chrome_executable)
            .field("logger_present", &self.logger.is_some())
            .finish()
    }
}

impl fmt::Debug for StagehandConfigOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagehandConfigOverrides")
            .field("model_name", &self.model_name)
            .field(
                "model_api_key",
                &self
                    .model_api_key
                    .as_ref()
                    .map(|inner| inner.as_ref().map(|_| "<redacted>")),
            )
            .field("model_client_options", &self.model_client_options)
            .field("logger", &self.logger.as_ref().map(|inner| inner.is_some()))
            .field("verbose", &self.verbose)
            .field("dom_settle_timeout_ms", &self.dom_settle_timeout_ms)
            .field("vision_models", &self.vision_models)
            .field("system_prompt", &self.system_prompt)
            .field("headless", &self.headless)
            .field("chrome_executable", &self.chrome_executable)
            .finish()
    }
}

/// Errors that can arise while constructing a [`StagehandConfig`].
#[derive(Debug, Error)]
pub enum StagehandConfigError {
    #[error("invalid value '{value}' for {field}")]
    InvalidEnumVariant { field: &'static str, value: String },
    #[error("invalid boolean '{value}' for {field}")]
    InvalidBool { field: &'static str, value: String },
    #[error("invalid number '{value}' for {field}: {source}")]
    InvalidNumber {
        field: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },
    #[error("{field} must be a JSON object")]
    InvalidJsonType { field: &'static str },
    #[error("invalid JSON for {field}: {source}")]
    InvalidJson {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl StagehandConfigError {
    fn invalid_enum(field: &'static str, value: String) -> Self {
        StagehandConfigError::InvalidEnumVariant { field, value }
    }
}

fn env_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, StagehandConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(StagehandConfigError::InvalidBool {
            field,
            value: value.to_string(),
        }),
    }
}

fn parse_u8(field: &'static str, value: &str) -> Result<u8, StagehandConfigError> {
    value
        .trim()
        .parse::<u8>()
        .map_err(|source| StagehandConfigError::InvalidNumber {
            field,
            value: value.to_string(),
            source,
        })
}

fn parse_u64(field: &'static str, value: &str) -> Result<u64, StagehandConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|source| StagehandConfigError::InvalidNumber {
            field,
            value: value.to_string(),
            source,
        })
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_json_object(field: &'static str, value: &str) -> Result<JsonObject, StagehandConfigError> {
    let parsed: JsonValue = serde_json::from_str(value)
        .map_err(|source| StagehandConfigError::InvalidJson { field, source })?;
    match parsed {
        JsonValue::Object(map) => Ok(map),
        _ => Err(StagehandConfigError::InvalidJsonType { field }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    struct EnvGuard {
        saved: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(vars: &[(&str, Option<&str>)]) -> Self {
            let saved = vars
                .iter()
                .map(|(key, value)| {
                    let original = env::var(key).ok();
                    match value {
                        Some(v) => unsafe {
                            env::set_var(key, v);
                        },
                        None => unsafe {
                            env::remove_var(key);
                        },
                    };
                    ((*key).to_string(), original)
                })
                .collect();
            EnvGuard { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.saved.drain(..) {
                match value {
                    Some(v) => unsafe {
                        env::set_var(&key, v);
                    },
                    None => unsafe {
                        env::remove_var(&key);
                    },
                }
            }
        }
    }

    #[test]
    fn defaults_cover_vision_models_and_settle_timeout() {
        let config = StagehandConfig::default();
        assert_eq!(config.model_name, DEFAULT_MODEL_NAME);
        assert_eq!(config.verbose, Verbosity::Medium);
        assert_eq!(config.dom_settle_timeout_ms, Some(3_000));
        assert!(config.vision_models.iter().any(|m| m == "gpt-4o"));
        assert!(config.logger.is_none());
    }

    #[test]
    fn settle_timeout_prefers_per_call_value() {
        let mut config = StagehandConfig::default();
        assert_eq!(config.settle_timeout_ms(Some(250)), 250);
        assert_eq!(config.settle_timeout_ms(None), 3_000);
        config.dom_settle_timeout_ms = None;
        assert_eq!(config.settle_timeout_ms(None), DEFAULT_DOM_SETTLE_TIMEOUT_MS);
    }

    #[test]
    #[serial]
    fn from_env_parses_and_normalises_values() {
        let _guard = EnvGuard::new(&[
            ("MODEL_NAME", Some("gpt-4o-mini")),
            ("MODEL_API_KEY", Some("model-key")),
            ("STAGEHAND_VERBOSE", Some("2")),
            ("STAGEHAND_DOM_SETTLE_TIMEOUT_MS", Some("5000")),
            ("STAGEHAND_VISION_MODELS", Some("gpt-4o, custom-vision ,")),
            ("STAGEHAND_SYSTEM_PROMPT", Some("custom prompt")),
            (
                "STAGEHAND_MODEL_CLIENT_OPTIONS",
                Some(r#"{"api_base":"https://foo"}"#),
            ),
            ("STAGEHAND_HEADLESS", Some("false")),
            ("STAGEHAND_CHROME_BIN", Some("/usr/bin/chromium")),
        ]);

        let config = StagehandConfig::from_env().expect("config from env");
        assert_eq!(config.model_name, "gpt-4o-mini");
        assert_eq!(config.model_api_key.as_deref(), Some("model-key"));
        assert_eq!(config.verbose, Verbosity::Detailed);
        assert_eq!(config.dom_settle_timeout_ms, Some(5_000));
        assert_eq!(
            config.vision_models,
            vec!["gpt-4o".to_string(), "custom-vision".to_string()]
        );
        assert_eq!(config.system_prompt.as_deref(), Some("custom prompt"));
        assert!(!config.headless);
        assert_eq!(config.chrome_executable.as_deref(), Some("/usr/bin/chromium"));
        assert_eq!(
            config
                .model_client_options
                .as_ref()
                .and_then(|options| options.get("api_base")),
            Some(&JsonValue::String("https://foo".to_string()))
        );
    }

    #[test]
    #[serial]
    fn from_env_rejects_bad_verbosity() {
        let _guard = EnvGuard::new(&[("STAGEHAND_VERBOSE", Some("7"))]);
        match StagehandConfig::from_env() {
            Err(StagehandConfigError::InvalidEnumVariant { field, value }) => {
                assert_eq!(field, "STAGEHAND_VERBOSE");
                assert_eq!(value, "7");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    #[serial]
    fn from_env_rejects_non_object_client_options() {
        let _guard = EnvGuard::new(&[
            ("STAGEHAND_VERBOSE", None),
            ("STAGEHAND_MODEL_CLIENT_OPTIONS", Some("[1,2]")),
        ]);
        assert!(matches!(
            StagehandConfig::from_env(),
            Err(StagehandConfigError::InvalidJsonType { .. })
        ));
    }

    #[test]
    fn overrides_support_setting_values_to_none() {
        let base = StagehandConfig::default();
        let overrides = StagehandConfigOverrides::default()
            .model_name("claude-3-5-sonnet-latest")
            .vision_models(["only-this"]);
        let overrides = StagehandConfigOverrides {
            dom_settle_timeout_ms: Some(None),
            headless: Some(false),
            ..overrides
        };

        let updated = base.with_overrides(overrides);
        assert_eq!(updated.model_name, "claude-3-5-sonnet-latest");
        assert_eq!(updated.vision_models, vec!["only-this".to_string()]);
        assert!(updated.dom_settle_timeout_ms.is_none());
        assert!(!updated.headless);
    }

    #[test]
    fn deserializes_camel_case_aliases() {
        let config: StagehandConfig = serde_json::from_value(serde_json::json!({
            "modelName": "gpt-4o-mini",
            "domSettleTimeoutMs": 1200,
            "visionModels": ["gpt-4o-mini"],
            "verbose": 0
        }))
        .expect("deserialize config");
        assert_eq!(config.model_name, "gpt-4o-mini");
        assert_eq!(config.dom_settle_timeout_ms, Some(1_200));
        assert_eq!(config.verbose, Verbosity::Minimal);
        assert!(config.headless);
    }
}
