//! Typed seams for external collaborators (C7). One trait per §6 port;
//! concrete implementations live in `conductor-adapters`.

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::commit::Commit;
use crate::domain::phase::PhaseType;
use crate::domain::ticket::Ticket;
use crate::domain::train::Train;

/// Source control: "branch of interest" is matched by the caller against
/// a configured regex before these are invoked.
#[async_trait]
pub trait CodePort: Send + Sync {
    async fn commits_on_branch(&self, branch: &str, max: usize) -> Result<Vec<Commit>>;

    async fn commits_on_branch_after(&self, branch: &str, sha: &str) -> Result<Vec<Commit>>;

    async fn compare_refs(&self, old: &str, new: &str) -> Result<Vec<Commit>>;

    /// `None` if the webhook does not name a branch this instance cares
    /// about. `headers` are lowercase-name/value pairs.
    fn parse_webhook_for_branch(&self, body: &[u8], headers: &[(String, String)]) -> Result<Option<String>>;
}

#[derive(Debug, Clone)]
pub struct BuildParams {
    pub job_name: String,
    pub phase_type: PhaseType,
    pub train_id: u64,
    pub delivery_phase_id: u64,
    pub verification_phase_id: u64,
    pub deploy_phase_id: u64,
    pub branch: String,
    pub head_sha: String,
    pub build_user: Option<String>,
    /// Only set for the rollback job (§4.4.6); `None` for ordinary phase builds.
    pub hostname: Option<String>,
}

#[async_trait]
pub trait BuildPort: Send + Sync {
    /// Returns the URL of the triggered job run, if the runner reports one.
    async fn trigger_job(&self, params: BuildParams) -> Result<Option<String>>;
}

pub struct TicketSyncResult {
    pub new: Vec<Ticket>,
    pub updated: Vec<Ticket>,
}

#[async_trait]
pub trait TicketPort: Send + Sync {
    async fn create_tickets(&self, train: &Train, commits: &[Commit]) -> Result<Vec<Ticket>>;

    async fn close_tickets(&self, tickets: &[Ticket]) -> Result<()>;

    async fn delete_tickets(&self, train: &Train) -> Result<()>;

    async fn sync_tickets(&self, train: &Train) -> Result<TicketSyncResult>;

    async fn close_train_tickets(&self, train: &Train) -> Result<()>;
}

/// One method per lifecycle event named in §6; fire-and-forget from the
/// orchestrator's point of view.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    async fn notify_created(&self, train: &Train) -> Result<()>;
    async fn notify_extended(&self, train: &Train) -> Result<()>;
    async fn notify_duplicated(&self, train: &Train) -> Result<()>;
    async fn notify_delivered(&self, train: &Train, new_commits: &[Commit], tickets: &[Ticket]) -> Result<()>;
    async fn notify_verified(&self, train: &Train) -> Result<()>;
    async fn notify_unverified(&self, train: &Train) -> Result<()>;
    async fn notify_deploying(&self, train: &Train) -> Result<()>;
    async fn notify_deployed(&self, train: &Train) -> Result<()>;
    async fn notify_closed(&self, train: &Train) -> Result<()>;
    async fn notify_opened(&self, train: &Train) -> Result<()>;
    async fn notify_blocked(&self, train: &Train) -> Result<()>;
    async fn notify_unblocked(&self, train: &Train) -> Result<()>;
    async fn notify_cancelled(&self, train: &Train) -> Result<()>;
    async fn notify_rollback(&self, train: &Train) -> Result<()>;
    async fn notify_job_failed(&self, train: &Train, job_name: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct AuthedUser {
    pub email: String,
    pub name: String,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    Viewer,
    User,
    Admin,
}

#[async_trait]
pub trait AuthPort: Send + Sync {
    /// Exchanges a bearer/session credential for the caller's identity.
    async fn authenticate(&self, credential: &str) -> Result<AuthedUser>;
}

/// Narrow counters/timings seam (supplemented per `DESIGN.md`); the
/// orchestrator calls this on every transition named in §4.4.4/§8
/// property 7. Kept as an explicit port even though the vendor
/// integration itself is out of scope.
pub trait MetricsSink: Send + Sync {
    fn count(&self, name: &str, tags: &[(&str, &str)]);
    fn timing(&self, name: &str, duration: std::time::Duration, tags: &[(&str, &str)]);
}
