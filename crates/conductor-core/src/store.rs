//! Transactional CRUD surface the orchestrator consumes (C3). One async
//! trait; `conductor-store::InMemoryStore` is the reference
//! implementation, playing the role the relational driver plays in the
//! out-of-scope collaborator list.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::commit::Commit;
use crate::domain::config::{Config, Mode, Options};
use crate::domain::job::JobResult;
use crate::domain::phase::{Phase, PhaseType};
use crate::domain::ticket::Ticket;
use crate::domain::train::Train;

/// A commit plus the branch it was observed on, as handed to
/// `create_train`/`extend_train`/`duplicate_train`.
#[derive(Debug, Clone)]
pub struct NewCommit {
    pub sha: String,
    pub author_name: String,
    pub author_email: String,
    pub message: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait PersistencePort: Send + Sync {
    // -- Config --

    async fn config(&self) -> Result<Config>;
    async fn mode(&self) -> Result<Mode> {
        Ok(self.config().await?.mode)
    }
    async fn set_mode(&self, mode: Mode) -> Result<()>;
    async fn options(&self) -> Result<Options> {
        Ok(self.config().await?.options)
    }
    /// Validates `options` against schema; on failure, leaves the stored
    /// config at `Options::default()` and records the validation error.
    async fn set_options(&self, options: Options) -> Result<()>;

    // -- Train lifecycle --

    /// Dedup-inserts `commits`, creates the train and its first
    /// PhaseGroup (Delivery/Verification/Deploy with seeded jobs),
    /// returns the fully-hydrated train. Single transaction.
    async fn create_train(
        &self,
        branch: &str,
        commits: &[NewCommit],
        engineer_name: Option<&str>,
        engineer_email: Option<&str>,
    ) -> Result<Train>;

    /// Appends `commits` to `train_id`, replaces its active PhaseGroup
    /// for the new head, carries `tail_sha` forward unchanged.
    async fn extend_train(&self, train_id: u64, commits: &[NewCommit]) -> Result<Train>;

    /// Creates a fresh train carrying `source_train_id`'s commits plus
    /// `new_commits`, with a new PhaseGroup.
    async fn duplicate_train(&self, source_train_id: u64, new_commits: &[NewCommit]) -> Result<Train>;

    /// Dedup-inserts `commits` against `train_id` without starting or
    /// replacing any phase (the branch is closed).
    async fn queue_commits(&self, train_id: u64, commits: &[NewCommit]) -> Result<Train>;

    async fn cancel_train(&self, train_id: u64) -> Result<Train>;
    async fn deploy_train(&self, train_id: u64) -> Result<Train>;
    async fn close_train(&self, train_id: u64, schedule_override: bool) -> Result<Train>;
    async fn open_train(&self, train_id: u64, schedule_override: bool) -> Result<Train>;
    async fn block_train(&self, train_id: u64, reason: Option<String>) -> Result<Train>;
    async fn unblock_train(&self, train_id: u64) -> Result<Train>;

    async fn train(&self, train_id: u64) -> Result<Option<Train>>;
    async fn latest_train(&self) -> Result<Option<Train>>;
    async fn latest_train_for_branch(&self, branch: &str) -> Result<Option<Train>>;
    async fn trains_by_commit(&self, sha: &str) -> Result<Vec<Train>>;
    /// Resolves phase ownership directly rather than assuming the latest
    /// train, so callers stay correct once an older train is still running
    /// a phase after a newer train has been opened.
    async fn train_by_phase_id(&self, phase_id: u64) -> Result<Option<Train>>;

    // -- Phase --

    async fn start_phase(&self, phase_id: u64) -> Result<Phase>;
    async fn complete_phase(&self, phase_id: u64) -> Result<Phase>;
    async fn uncomplete_phase(&self, phase_id: u64) -> Result<Phase>;
    async fn error_phase(&self, phase_id: u64, error: String) -> Result<Phase>;
    /// Inserts a fresh Phase of `p`'s type into `p`'s PhaseGroup with
    /// reseeded jobs; the PhaseGroup's pointer for that type is updated
    /// to the new row. Rejected if `p` is already complete.
    async fn replace_phase(&self, phase_id: u64) -> Result<Phase>;

    // -- Job --

    async fn create_job(&self, phase_id: u64, name: &str) -> Result<u64>;
    async fn start_job(&self, phase_id: u64, name: &str, url: String) -> Result<()>;
    async fn complete_job(&self, phase_id: u64, name: &str, result: JobResult, metadata: String) -> Result<()>;
    async fn restart_job(&self, phase_id: u64, name: &str, url: String) -> Result<()>;

    // -- Ticket --

    async fn write_tickets(&self, train_id: u64, tickets: Vec<Ticket>) -> Result<Vec<Ticket>>;
    async fn update_ticket(&self, ticket_id: u64, ticket: Ticket) -> Result<Ticket>;

    // -- Metadata (namespaced key/value bag) --

    async fn metadata_namespaces(&self) -> Result<Vec<String>>;
    async fn metadata_get(&self, ns: &str, key: &str) -> Result<Option<String>>;
    async fn metadata_set(&self, ns: &str, key: &str, value: String) -> Result<()>;
    async fn metadata_delete(&self, ns: &str, key: &str) -> Result<()>;
    async fn metadata_delete_namespace(&self, ns: &str) -> Result<()>;
    async fn metadata_list(&self, ns: &str) -> Result<Vec<(String, String)>>;
}

pub fn phase_type_for_restart(path_segment: &str) -> Option<PhaseType> {
    PhaseType::from_str_lower(path_segment)
}
