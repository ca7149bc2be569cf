use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::commit::Commit;

/// Unique per train on `key`. `IsComplete = closed_at? ∨ deleted_at?`,
/// making a ticket usable directly as a Verification-phase "extra
/// completeable" (see `phase_engine::phase_complete`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: u64,
    pub train_id: u64,
    pub key: String,
    pub summary: String,
    pub assignee_name: String,
    pub assignee_email: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub commits: Vec<Commit>,
}

impl Ticket {
    pub fn is_complete(&self) -> bool {
        self.closed_at.is_some() || self.deleted_at.is_some()
    }
}
