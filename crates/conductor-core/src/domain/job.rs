use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobResult {
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: u64,
    pub name: String,
    pub url: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<JobResult>,
    pub metadata: String,
}

impl Job {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            url: None,
            started_at: None,
            completed_at: None,
            result: None,
            metadata: String::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn start(&mut self, now: DateTime<Utc>, url: String) {
        self.started_at = Some(now);
        self.url = Some(url);
    }

    pub fn complete(&mut self, now: DateTime<Utc>, result: JobResult, metadata: String) {
        self.completed_at = Some(now);
        self.result = Some(result);
        self.metadata = metadata;
    }

    /// No distinct "restarted" sentinel in the source this mirrors: see
    /// `DESIGN.md`'s Open Question decision 3.
    pub fn restart(&mut self, now: DateTime<Utc>, url: String) {
        self.started_at = Some(now);
        self.url = Some(url);
        self.completed_at = None;
        self.result = None;
        self.metadata = String::new();
    }
}

/// Expected job names per phase type, resolved from `Settings` with its
/// custom-override fallback already applied (mirrors the source's
/// `JobsForPhase`). `Default` gives the single-job-per-phase set used
/// when no override is configured.
#[derive(Debug, Clone)]
pub struct JobNames {
    pub delivery: Vec<String>,
    pub verification: Vec<String>,
    pub deploy: Vec<String>,
}

impl Default for JobNames {
    fn default() -> Self {
        Self {
            delivery: vec!["deliver".to_string()],
            verification: vec!["verify".to_string()],
            deploy: vec!["deploy".to_string()],
        }
    }
}

impl JobNames {
    pub fn for_phase(&self, phase_type: crate::domain::phase::PhaseType) -> &[String] {
        use crate::domain::phase::PhaseType::*;
        match phase_type {
            Delivery => &self.delivery,
            Verification => &self.verification,
            Deploy => &self.deploy,
        }
    }
}
