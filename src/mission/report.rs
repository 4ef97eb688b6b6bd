use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::cogt::error::CogtError;

/// Token usage of one LLM call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmTokensUsage {
    pub llm_handle: String,
    pub nb_tokens_input: u64,
    pub nb_tokens_output: u64,
}

/// Usage reports, one registry per mission.
#[derive(Default)]
pub struct InferenceReportManager {
    registries: Mutex<HashMap<String, Vec<LlmTokensUsage>>>,
}

impl InferenceReportManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_registry(&self, mission_id: &str) {
        self.lock().entry(mission_id.to_string()).or_default();
    }

    pub fn report_usage(&self, mission_id: &str, usage: LlmTokensUsage) -> Result<(), CogtError> {
        let mut registries = self.lock();
        let registry = registries.get_mut(mission_id).ok_or_else(|| {
            CogtError::UsageRegistry(format!("registry for mission '{mission_id}' does not exist"))
        })?;
        registry.push(usage);
        Ok(())
    }

    pub fn get_usage(&self, mission_id: &str) -> Result<Vec<LlmTokensUsage>, CogtError> {
        self.lock().get(mission_id).cloned().ok_or_else(|| {
            CogtError::UsageRegistry(format!("registry for mission '{mission_id}' does not exist"))
        })
    }

    /// Removes the registry, returning what it held.
    pub fn close_registry(&self, mission_id: &str) -> Option<Vec<LlmTokensUsage>> {
        self.lock().remove(mission_id)
    }

    pub fn nb_registries(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<LlmTokensUsage>>> {
        self.registries.lock().unwrap_or_else(|poisoned| {
            log::error!("Usage registry lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registries_are_scoped_by_mission() {
        let manager = InferenceReportManager::new();
        let usage = LlmTokensUsage {
            llm_handle: "phi4".to_string(),
            nb_tokens_input: 10,
            nb_tokens_output: 3,
        };
        assert!(manager.report_usage("m1", usage.clone()).is_err());

        manager.open_registry("m1");
        manager.open_registry("m2");
        manager.report_usage("m1", usage.clone()).unwrap();
        assert_eq!(manager.get_usage("m1").unwrap(), vec![usage]);
        assert!(manager.get_usage("m2").unwrap().is_empty());

        assert_eq!(manager.close_registry("m1").map(|u| u.len()), Some(1));
        assert!(manager.get_usage("m1").is_err());
    }
}
