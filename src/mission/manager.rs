use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// One logical end-to-end pipeline execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    pub mission_id: String,
    pub started_at: DateTime<Utc>,
}

impl Mission {
    pub fn new() -> Self {
        Mission {
            mission_id: uuid::Uuid::new_v4().simple().to_string(),
            started_at: Utc::now(),
        }
    }
}

impl Default for Mission {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
pub struct MissionManager {
    missions: Mutex<HashMap<String, Mission>>,
}

impl MissionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_new_mission(&self) -> Mission {
        let mission = Mission::new();
        self.lock().insert(mission.mission_id.clone(), mission.clone());
        mission
    }

    pub fn get_mission(&self, mission_id: &str) -> Option<Mission> {
        self.lock().get(mission_id).cloned()
    }

    pub fn close_mission(&self, mission_id: &str) -> Option<Mission> {
        self.lock().remove(mission_id)
    }

    pub fn nb_missions(&self) -> usize {
        self.lock().len()
    }

    pub fn reset(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Mission>> {
        self.missions.lock().unwrap_or_else(|poisoned| {
            log::error!("Mission manager lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missions_are_independent() {
        let manager = MissionManager::new();
        let first = manager.add_new_mission();
        let second = manager.add_new_mission();
        assert_ne!(first.mission_id, second.mission_id);
        assert_eq!(manager.nb_missions(), 2);

        manager.close_mission(&first.mission_id);
        assert!(manager.get_mission(&first.mission_id).is_none());
        assert_eq!(manager.get_mission(&second.mission_id), Some(second));
        manager.reset();
        assert_eq!(manager.nb_missions(), 0);
    }
}
