use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mission id used when a job runs outside of any mission.
pub const UNTITLED_MISSION_ID: &str = "untitled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobCategory {
    MockJob,
    LlmJob,
    ImggJob,
    PromptingJob,
    Jinja2Job,
    OcrJob,
}

/// Provenance of one unit of work inside a mission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMetadata {
    pub mission_id: String,
    #[serde(default)]
    pub top_job_id: Option<String>,
    #[serde(default)]
    pub pipe_job_ids: Vec<String>,
    #[serde(default)]
    pub content_generation_job_id: Option<String>,
    #[serde(default)]
    pub job_category: Option<JobCategory>,
    #[serde(default)]
    pub unit_job_id: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Default for JobMetadata {
    fn default() -> Self {
        JobMetadata::new(UNTITLED_MISSION_ID)
    }
}

impl JobMetadata {
    pub fn new(mission_id: impl Into<String>) -> Self {
        Self {
            mission_id: mission_id.into(),
            top_job_id: None,
            pipe_job_ids: Vec::new(),
            content_generation_job_id: None,
            job_category: None,
            unit_job_id: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Seconds between start and completion, once completed.
    pub fn duration(&self) -> Option<f64> {
        self.completed_at
            .map(|completed_at| (completed_at - self.started_at).num_milliseconds() as f64 / 1000.0)
    }

    /// Merges the fields set in `updated` into `self`. Pipe job ids are
    /// appended, everything else overwritten.
    pub fn update(&mut self, updated: &JobMetadata) {
        if updated.job_category.is_some() {
            self.job_category = updated.job_category;
        }
        if updated.top_job_id.is_some() {
            self.top_job_id = updated.top_job_id.clone();
        }
        self.pipe_job_ids.extend(updated.pipe_job_ids.iter().cloned());
        if updated.content_generation_job_id.is_some() {
            self.content_generation_job_id = updated.content_generation_job_id.clone();
        }
        if updated.unit_job_id.is_some() {
            self.unit_job_id = updated.unit_job_id.clone();
        }
        self.started_at = updated.started_at;
        if updated.completed_at.is_some() {
            self.completed_at = updated.completed_at;
        }
    }

    pub fn copy_with_update(&self, updated: &JobMetadata) -> JobMetadata {
        let mut copy = self.clone();
        copy.update(updated);
        copy
    }

    /// Copy stamped for entering a pipe.
    pub fn for_pipe_job(&self, pipe_code: &str) -> JobMetadata {
        let mut copy = self.clone();
        copy.pipe_job_ids.push(pipe_code.to_string());
        if copy.top_job_id.is_none() {
            copy.top_job_id = Some(pipe_code.to_string());
        }
        copy
    }

    /// Copy stamped for one content-generation call; every provider call
    /// must go through this before it runs.
    pub fn for_content_generation(&self, content_generation_job_id: &str, job_category: JobCategory) -> JobMetadata {
        let mut copy = self.clone();
        copy.content_generation_job_id = Some(content_generation_job_id.to_string());
        copy.job_category = Some(job_category);
        copy.started_at = Utc::now();
        copy.completed_at = None;
        copy
    }

    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamping_leaves_original_untouched() {
        let job = JobMetadata::new("m1").for_pipe_job("outer");
        let stamped = job.for_content_generation("make_llm_text", JobCategory::LlmJob);
        assert_eq!(stamped.content_generation_job_id.as_deref(), Some("make_llm_text"));
        assert_eq!(stamped.mission_id, "m1");
        assert!(job.content_generation_job_id.is_none());
        assert_eq!(job.top_job_id.as_deref(), Some("outer"));
    }

    #[test]
    fn test_copy_with_update_appends_pipe_jobs() {
        let base = JobMetadata::new("m1").for_pipe_job("a");
        let mut updated = JobMetadata::new("m1").for_pipe_job("b");
        updated.unit_job_id = Some("llm_gen_text".to_string());
        let merged = base.copy_with_update(&updated);
        assert_eq!(merged.pipe_job_ids, vec!["a", "b"]);
        assert_eq!(merged.unit_job_id.as_deref(), Some("llm_gen_text"));
        assert_eq!(merged.top_job_id.as_deref(), Some("b"));
    }

    #[test]
    fn test_duration() {
        let mut job = JobMetadata::new("m1");
        assert!(job.duration().is_none());
        job.complete();
        assert!(job.duration().unwrap() >= 0.0);
    }
}
