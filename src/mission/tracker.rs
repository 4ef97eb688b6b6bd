use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::core::stuff::Stuff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Pipe,
    Batch,
    Aggregate,
    Condition,
    Choice,
}

/// One edge of the provenance graph of a mission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedStep {
    pub kind: StepKind,
    pub recorded_at: DateTime<Utc>,
    pub mission_id: String,
    pub from_stuff_code: Option<String>,
    pub to_stuff_code: Option<String>,
    pub pipe_code: Option<String>,
    pub pipe_layers: Vec<String>,
    pub comment: String,
    pub branch_index: Option<usize>,
    pub condition_expression: Option<String>,
}

impl TrackedStep {
    fn new(kind: StepKind, mission_id: &str, pipe_layers: &[String], comment: &str) -> Self {
        TrackedStep {
            kind,
            recorded_at: Utc::now(),
            mission_id: mission_id.to_string(),
            from_stuff_code: None,
            to_stuff_code: None,
            pipe_code: None,
            pipe_layers: pipe_layers.to_vec(),
            comment: comment.to_string(),
            branch_index: None,
            condition_expression: None,
        }
    }
}

/// Records how stuffs flow between pipes during a mission.
pub trait MissionTracker: Send + Sync {
    fn record(&self, step: TrackedStep);

    fn add_pipe_step(
        &self,
        mission_id: &str,
        from_stuff: Option<&Stuff>,
        to_stuff: &Stuff,
        pipe_code: &str,
        comment: &str,
        pipe_layers: &[String],
    ) {
        let mut step = TrackedStep::new(StepKind::Pipe, mission_id, pipe_layers, comment);
        step.from_stuff_code = from_stuff.map(|stuff| stuff.stuff_code.clone());
        step.to_stuff_code = Some(to_stuff.stuff_code.clone());
        step.pipe_code = Some(pipe_code.to_string());
        self.record(step);
    }

    fn add_batch_step(
        &self,
        mission_id: &str,
        from_stuff: Option<&Stuff>,
        to_stuff: &Stuff,
        to_branch_index: usize,
        pipe_layers: &[String],
        comment: &str,
    ) {
        let mut step = TrackedStep::new(StepKind::Batch, mission_id, pipe_layers, comment);
        step.from_stuff_code = from_stuff.map(|stuff| stuff.stuff_code.clone());
        step.to_stuff_code = Some(to_stuff.stuff_code.clone());
        step.branch_index = Some(to_branch_index);
        self.record(step);
    }

    fn add_aggregate_step(
        &self,
        mission_id: &str,
        from_stuff: &Stuff,
        to_stuff: &Stuff,
        pipe_layers: &[String],
        comment: &str,
    ) {
        let mut step = TrackedStep::new(StepKind::Aggregate, mission_id, pipe_layers, comment);
        step.from_stuff_code = Some(from_stuff.stuff_code.clone());
        step.to_stuff_code = Some(to_stuff.stuff_code.clone());
        self.record(step);
    }

    fn add_condition_step(
        &self,
        mission_id: &str,
        from_stuff: Option<&Stuff>,
        condition_pipe_code: &str,
        condition_expression: &str,
        pipe_layers: &[String],
        comment: &str,
    ) {
        let mut step = TrackedStep::new(StepKind::Condition, mission_id, pipe_layers, comment);
        step.from_stuff_code = from_stuff.map(|stuff| stuff.stuff_code.clone());
        step.pipe_code = Some(condition_pipe_code.to_string());
        step.condition_expression = Some(condition_expression.to_string());
        self.record(step);
    }

    fn add_choice_step(
        &self,
        mission_id: &str,
        condition_pipe_code: &str,
        to_stuff: &Stuff,
        pipe_layers: &[String],
        comment: &str,
    ) {
        let mut step = TrackedStep::new(StepKind::Choice, mission_id, pipe_layers, comment);
        step.pipe_code = Some(condition_pipe_code.to_string());
        step.to_stuff_code = Some(to_stuff.stuff_code.clone());
        self.record(step);
    }

    /// Drops whatever was kept for the mission.
    fn close_mission(&self, _mission_id: &str) {}
}

/// Tracker that keeps steps in memory, grouped by mission.
#[derive(Default)]
pub struct MemoryMissionTracker {
    steps: Mutex<HashMap<String, Vec<TrackedStep>>>,
}

impl MemoryMissionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_steps(&self, mission_id: &str) -> Vec<TrackedStep> {
        self.lock().get(mission_id).cloned().unwrap_or_default()
    }

    /// Missions with at least one step still held.
    pub fn nb_missions(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<TrackedStep>>> {
        self.steps.lock().unwrap_or_else(|poisoned| {
            log::error!("Mission tracker lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

impl MissionTracker for MemoryMissionTracker {
    fn record(&self, step: TrackedStep) {
        self.lock().entry(step.mission_id.clone()).or_default().push(step);
    }

    fn close_mission(&self, mission_id: &str) {
        self.lock().remove(mission_id);
    }
}

/// Tracker that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMissionTracker;

impl MissionTracker for NoopMissionTracker {
    fn record(&self, _step: TrackedStep) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stuff::StuffFactory;
    use crate::core::stuff_content::StuffContent;

    #[test]
    fn test_memory_tracker_groups_by_mission() {
        let tracker = MemoryMissionTracker::new();
        let from = StuffFactory::make_stuff("native.Text", StuffContent::text("a"), None).unwrap();
        let to = StuffFactory::make_stuff("native.Text", StuffContent::text("b"), None).unwrap();
        let layers = vec!["seq".to_string()];

        tracker.add_pipe_step("m1", Some(&from), &to, "seq", "step 1", &layers);
        tracker.add_batch_step("m2", Some(&from), &to, 0, &layers, "branch");

        let steps = tracker.get_steps("m1");
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].kind, StepKind::Pipe);
        assert_eq!(steps[0].to_stuff_code.as_deref(), Some(to.stuff_code.as_str()));
        assert_eq!(tracker.get_steps("m2")[0].branch_index, Some(0));

        tracker.close_mission("m1");
        assert!(tracker.get_steps("m1").is_empty());
    }
}
