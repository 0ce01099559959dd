//! Session-scoped record of past observations.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use sha2::{Digest, Sha256};

use crate::types::{Observation, ObservedElement};

/// Deterministic observation id: lowercase SHA-256 hex of the instruction.
pub fn observation_id(instruction: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(instruction.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Observations keyed by [`observation_id`]. Re-observing an instruction
/// replaces its previous entry.
#[derive(Debug, Default)]
pub struct ObservationStore {
    entries: Mutex<HashMap<String, Observation>>,
}

impl ObservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Observation>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store `result` under the id derived from `instruction`, returning the id.
    pub fn record(&self, instruction: &str, result: Vec<ObservedElement>) -> String {
        let id = observation_id(instruction);
        let observation = Observation {
            id: id.clone(),
            instruction: instruction.to_string(),
            result,
        };
        self.lock().insert(id.clone(), observation);
        id
    }

    pub fn get(&self, id: &str) -> Option<Observation> {
        self.lock().get(id).cloned()
    }

    pub fn get_by_instruction(&self, instruction: &str) -> Option<Observation> {
        self.get(&observation_id(instruction))
    }

    pub fn ids(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
