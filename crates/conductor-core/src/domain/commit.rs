use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Deduped on `sha` by the persistence port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub id: u64,
    pub sha: String,
    pub branch: String,
    pub author_name: String,
    pub author_email: String,
    pub message: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

impl Commit {
    /// `[no-verify]` exempts a commit from ticket creation.
    pub fn is_no_verify(&self) -> bool {
        self.message.contains("[no-verify]")
    }

    /// `[needs-staging]` forces ticket creation for a no-staging-verification author.
    pub fn is_needs_staging(&self) -> bool {
        self.message.contains("[needs-staging]")
    }
}
