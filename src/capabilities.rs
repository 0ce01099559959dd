//! Model capability lookup.

use std::collections::{HashMap, HashSet};

use crate::config::StagehandConfig;

/// Features a model may support beyond plain text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelCapability {
    Vision,
}

/// Model id → capability set.
pub trait ModelCapabilities: Send + Sync {
    fn capabilities(&self, model: &str) -> HashSet<ModelCapability>;

    fn supports(&self, model: &str, capability: ModelCapability) -> bool {
        self.capabilities(model).contains(&capability)
    }
}

/// Table-backed capability lookup.
#[derive(Debug, Clone, Default)]
pub struct CapabilityTable {
    models: HashMap<String, HashSet<ModelCapability>>,
}

impl CapabilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &StagehandConfig) -> Self {
        config
            .vision_models
            .iter()
            .fold(Self::new(), |table, model| {
                table.with(model.as_str(), ModelCapability::Vision)
            })
    }

    pub fn with(mut self, model: impl Into<String>, capability: ModelCapability) -> Self {
        self.models
            .entry(model.into())
            .or_default()
            .insert(capability);
        self
    }
}

impl ModelCapabilities for CapabilityTable {
    fn capabilities(&self, model: &str) -> HashSet<ModelCapability> {
        self.models.get(model.trim()).cloned().unwrap_or_default()
    }
}
