//! Structured logging for the Stagehand handlers.
//!
//! Every line carries a category, a level, and an auxiliary map whose entries
//! record both a rendered value and its type, so external sinks can
//! reconstruct typed payloads. Lines go to an external callback when one is
//! configured and to the [`log`] facade otherwise.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Verbosity;

/// Convenience alias for external logging callbacks.
pub type LogCallback = Arc<dyn Fn(&LogLine) + Send + Sync + 'static>;

/// Log severity used across Stagehand.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error = 0,
    Info = 1,
    Debug = 2,
}

impl LogLevel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }

    fn as_log_level(self) -> log::Level {
        match self {
            LogLevel::Error => log::Level::Error,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
        }
    }
}

/// Type tag attached to each auxiliary value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuxiliaryType {
    String,
    Integer,
    Float,
    Boolean,
    Object,
}

/// Auxiliary log value rendered as text alongside its type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuxiliaryValue {
    pub value: String,
    #[serde(rename = "type")]
    pub value_type: AuxiliaryType,
}

impl AuxiliaryValue {
    pub fn string(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            value_type: AuxiliaryType::String,
        }
    }

    pub fn integer(value: impl Into<i64>) -> Self {
        Self {
            value: value.into().to_string(),
            value_type: AuxiliaryType::Integer,
        }
    }

    pub fn float(value: f64) -> Self {
        Self {
            value: value.to_string(),
            value_type: AuxiliaryType::Float,
        }
    }

    pub fn boolean(value: bool) -> Self {
        Self {
            value: value.to_string(),
            value_type: AuxiliaryType::Boolean,
        }
    }

    /// Serialize any JSON value; strings and numbers keep their natural tag.
    pub fn json(value: &Value) -> Self {
        match value {
            Value::String(text) => Self::string(text.clone()),
            Value::Bool(flag) => Self::boolean(*flag),
            Value::Number(number) if number.is_i64() || number.is_u64() => Self {
                value: number.to_string(),
                value_type: AuxiliaryType::Integer,
            },
            Value::Number(number) => Self {
                value: number.to_string(),
                value_type: AuxiliaryType::Float,
            },
            other => Self {
                value: other.to_string(),
                value_type: AuxiliaryType::Object,
            },
        }
    }
}

/// Auxiliary payload keyed by field name.
pub type Auxiliary = BTreeMap<String, AuxiliaryValue>;

/// Build an [`Auxiliary`] map from `(name, value)` pairs.
pub fn auxiliary<I, K>(entries: I) -> Auxiliary
where
    I: IntoIterator<Item = (K, AuxiliaryValue)>,
    K: Into<String>,
{
    entries
        .into_iter()
        .map(|(key, value)| (key.into(), value))
        .collect()
}

/// Structured log entry shared with external callbacks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub category: String,
    pub message: String,
    pub level: LogLevel,
    #[serde(skip_serializing_if = "Auxiliary::is_empty", default)]
    pub auxiliary: Auxiliary,
}

impl LogLine {
    pub fn new(
        category: impl Into<String>,
        message: impl Into<String>,
        level: LogLevel,
        auxiliary: Auxiliary,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            category: category.into(),
            message: message.into(),
            level,
            auxiliary,
        }
    }
}

/// Default sink: forward the line to the `log` facade.
pub fn default_log_handler(line: &LogLine) {
    let level = line.level.as_log_level();
    if line.auxiliary.is_empty() {
        log::log!(target: "stagehand", level, "[{}] {}", line.category, line.message);
    } else {
        let aux = serde_json::to_string(&line.auxiliary).unwrap_or_default();
        log::log!(
            target: "stagehand",
            level,
            "[{}] {} {}",
            line.category,
            line.message,
            aux
        );
    }
}

/// Verbosity-filtered logger shared by the handlers.
pub struct StagehandLogger {
    verbose: Verbosity,
    external_logger: Option<LogCallback>,
}

impl fmt::Debug for StagehandLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagehandLogger")
            .field("verbosity", &self.verbose)
            .field("external_logger", &self.external_logger.is_some())
            .finish()
    }
}

impl Default for StagehandLogger {
    fn default() -> Self {
        Self::new(Verbosity::default())
    }
}

impl StagehandLogger {
    pub fn new(verbose: Verbosity) -> Self {
        Self {
            verbose,
            external_logger: None,
        }
    }

    pub fn with_external(verbose: Verbosity, external_logger: Option<LogCallback>) -> Self {
        Self {
            verbose,
            external_logger,
        }
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbose
    }

    pub fn set_verbose(&mut self, verbose: Verbosity) {
        self.verbose = verbose;
    }

    pub fn set_external_logger(&mut self, logger: Option<LogCallback>) {
        self.external_logger = logger;
    }

    pub fn should_log(&self, level: LogLevel) -> bool {
        level == LogLevel::Error || level.as_u8() <= self.verbose.as_u8()
    }

    pub fn log(
        &self,
        category: &str,
        message: impl Into<String>,
        level: LogLevel,
        auxiliary: Auxiliary,
    ) {
        if !self.should_log(level) {
            return;
        }

        let line = LogLine::new(category, message, level, auxiliary);
        match &self.external_logger {
            Some(callback) => callback(&line),
            None => default_log_handler(&line),
        }
    }

    pub fn error(&self, category: &str, message: impl Into<String>, auxiliary: Auxiliary) {
        self.log(category, message, LogLevel::Error, auxiliary);
    }

    pub fn info(&self, category: &str, message: impl Into<String>, auxiliary: Auxiliary) {
        self.log(category, message, LogLevel::Info, auxiliary);
    }

    pub fn debug(&self, category: &str, message: impl Into<String>, auxiliary: Auxiliary) {
        self.log(category, message, LogLevel::Debug, auxiliary);
    }
}
