use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::job::Job;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseType {
    Delivery,
    Verification,
    Deploy,
}

impl PhaseType {
    pub fn from_str_lower(s: &str) -> Option<Self> {
        match s {
            "delivery" => Some(Self::Delivery),
            "verification" => Some(Self::Verification),
            "deploy" => Some(Self::Deploy),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivery => "delivery",
            Self::Verification => "verification",
            Self::Deploy => "deploy",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub id: u64,
    pub phase_group_id: u64,
    pub phase_type: PhaseType,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub jobs: Vec<Job>,
}

impl Phase {
    pub fn new(id: u64, phase_group_id: u64, phase_type: PhaseType, jobs: Vec<Job>) -> Self {
        Self {
            id,
            phase_group_id,
            phase_type,
            started_at: None,
            completed_at: None,
            error: None,
            jobs,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn completed_job_names(&self) -> Vec<String> {
        self.jobs
            .iter()
            .filter(|j| j.is_complete())
            .map(|j| j.name.clone())
            .collect()
    }
}

/// The three phases for a specific `head_sha`. A Train's history is a
/// sequence of PhaseGroups; only the most recent is *active*.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseGroup {
    pub id: u64,
    pub head_sha: String,
    pub delivery: Phase,
    pub verification: Phase,
    pub deploy: Phase,
}

impl PhaseGroup {
    pub fn phase(&self, phase_type: PhaseType) -> &Phase {
        match phase_type {
            PhaseType::Delivery => &self.delivery,
            PhaseType::Verification => &self.verification,
            PhaseType::Deploy => &self.deploy,
        }
    }

    pub fn phase_mut(&mut self, phase_type: PhaseType) -> &mut Phase {
        match phase_type {
            PhaseType::Delivery => &mut self.delivery,
            PhaseType::Verification => &mut self.verification,
            PhaseType::Deploy => &mut self.deploy,
        }
    }

    /// Phases in Delivery → Verification → Deploy order.
    pub fn phases(&self) -> [&Phase; 3] {
        [&self.delivery, &self.verification, &self.deploy]
    }

    /// Are all phases before `phase_type` complete? Delivery has none,
    /// Verification needs Delivery, Deploy needs both.
    pub fn earlier_phases_complete(&self, phase_type: PhaseType) -> bool {
        match phase_type {
            PhaseType::Delivery => true,
            PhaseType::Verification => self.delivery.is_complete(),
            PhaseType::Deploy => self.delivery.is_complete() && self.verification.is_complete(),
        }
    }
}
