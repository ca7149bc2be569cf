//! The decision core (C5). Branch-push dispatch, engineer selection,
//! phase start/completion, deploy gating, rollback. Every entry point
//! acquires a named lock from `Locks` before touching the store and
//! releases it before dispatching external notifications.

use std::sync::Arc;

use anyhow::Context as _;
use chrono::Utc;
use rand::seq::SliceRandom;
use tokio::sync::Mutex;
use tracing::warn;

use crate::cache::LatestTrainCache;
use crate::domain::commit::Commit;
use crate::domain::job::JobResult;
use crate::domain::phase::PhaseType;
use crate::domain::ticket::Ticket;
use crate::domain::train::Train;
use crate::error::ConductorError;
use crate::phase_engine;
use crate::ports::{BuildParams, BuildPort, MessagingPort, MetricsSink, TicketPort};
use crate::store::{NewCommit, PersistencePort};

const BOOTSTRAP_COMMIT_COUNT: usize = 20;

/// The five named locks from §4.4, held for the duration of one
/// decision including its persistence write.
#[derive(Default)]
struct Locks {
    check_branch: Mutex<()>,
    train_close: Mutex<()>,
    phase_completion: Mutex<()>,
    deploy_train: Mutex<()>,
    ticket_modification: Mutex<()>,
}

pub struct OrchestratorConfig {
    pub robot_emails: Vec<String>,
    pub no_staging_verification: bool,
    pub no_staging_verification_emails: Vec<String>,
    pub rollback_job: Option<String>,
    pub hostname: String,
    pub jobs: crate::domain::job::JobNames,
}

pub struct Orchestrator {
    store: Arc<dyn PersistencePort>,
    code: Arc<dyn crate::ports::CodePort>,
    build: Arc<dyn BuildPort>,
    tickets: Arc<dyn TicketPort>,
    messaging: Arc<dyn MessagingPort>,
    metrics: Arc<dyn MetricsSink>,
    cache: Arc<LatestTrainCache>,
    locks: Locks,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn PersistencePort>,
        code: Arc<dyn crate::ports::CodePort>,
        build: Arc<dyn BuildPort>,
        tickets: Arc<dyn TicketPort>,
        messaging: Arc<dyn MessagingPort>,
        metrics: Arc<dyn MetricsSink>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            code,
            build,
            tickets,
            messaging,
            metrics,
            cache: Arc::new(LatestTrainCache::new()),
            locks: Locks::default(),
            config,
        }
    }

    pub fn cache(&self) -> &LatestTrainCache {
        &self.cache
    }

    fn is_robot_email(&self, email: &str) -> bool {
        self.config.robot_emails.iter().any(|r| r.eq_ignore_ascii_case(email))
    }

    // ── 4.4.1 branch-push dispatch ──────────────────────────────────

    pub async fn check_branch(self: &Arc<Self>, branch: &str) -> anyhow::Result<Option<Train>> {
        let _guard = self.locks.check_branch.lock().await;
        self.check_branch_locked(branch).await
    }

    async fn check_branch_locked(self: &Arc<Self>, branch: &str) -> anyhow::Result<Option<Train>> {
        let latest_train = self.store.latest_train().await.context("load latest train")?;
        let latest_for_branch = self
            .store
            .latest_train_for_branch(branch)
            .await
            .context("load latest train for branch")?;

        let new_commits = self.gather_new_commits(branch, latest_train.as_ref(), latest_for_branch.as_ref()).await?;
        if new_commits.is_empty() {
            return Ok(latest_for_branch);
        }

        let result = match (&latest_train, &latest_for_branch) {
            (None, _) | (_, None) => {
                if let Some(stale) = &latest_for_branch {
                    self.tickets.close_train_tickets(stale).await.ok();
                }
                self.create_and_start(branch, &new_commits).await?
            }
            (Some(latest), Some(branch_train)) if latest.is_deploying() || latest.is_done() => {
                self.tickets.close_train_tickets(branch_train).await.ok();
                self.create_and_start(branch, &new_commits).await?
            }
            (Some(latest), Some(branch_train)) if latest.id == branch_train.id && !branch_train.closed => {
                self.extend_and_start(branch_train.id, &new_commits).await?
            }
            (Some(latest), Some(branch_train)) if latest.id == branch_train.id && branch_train.closed => {
                self.store.queue_commits(branch_train.id, &new_commits).await?
            }
            (Some(_), Some(branch_train)) => {
                // latest_for_branch is an earlier train: branch switch.
                self.tickets.close_train_tickets(branch_train).await.ok();
                self.duplicate_and_start(branch_train.id, &new_commits).await?
            }
        };

        self.cache.invalidate().await;
        Ok(Some(result))
    }

    async fn gather_new_commits(
        &self,
        branch: &str,
        latest_train: Option<&Train>,
        latest_for_branch: Option<&Train>,
    ) -> anyhow::Result<Vec<NewCommit>> {
        let commits = match (latest_train, latest_for_branch) {
            (None, _) => self.code.commits_on_branch(branch, BOOTSTRAP_COMMIT_COUNT).await?,
            (Some(latest), None) => self.code.compare_refs(&latest.head_sha, branch).await?,
            (Some(_), Some(branch_train)) => {
                self.code.commits_on_branch_after(branch, &branch_train.head_sha).await?
            }
        };
        Ok(commits.into_iter().map(to_new_commit).collect())
    }

    async fn create_and_start(self: &Arc<Self>, branch: &str, commits: &[NewCommit]) -> anyhow::Result<Train> {
        let (engineer_name, engineer_email) = self.choose_engineer(commits);
        let train = self
            .store
            .create_train(branch, commits, engineer_name.as_deref(), engineer_email.as_deref())
            .await?;
        self.messaging.notify_created(&train).await.ok();
        self.start_phase(train.active_phases.delivery.id).await?;
        self.store.train(train.id).await?.context("reload created train")
    }

    async fn extend_and_start(self: &Arc<Self>, train_id: u64, commits: &[NewCommit]) -> anyhow::Result<Train> {
        let train = self.store.extend_train(train_id, commits).await?;
        self.messaging.notify_extended(&train).await.ok();
        self.start_phase(train.active_phases.delivery.id).await?;
        self.store.train(train.id).await?.context("reload extended train")
    }

    async fn duplicate_and_start(self: &Arc<Self>, source_train_id: u64, new_commits: &[NewCommit]) -> anyhow::Result<Train> {
        let train = self.store.duplicate_train(source_train_id, new_commits).await?;
        self.messaging.notify_duplicated(&train).await.ok();
        self.start_phase(train.active_phases.delivery.id).await?;
        self.store.train(train.id).await?.context("reload duplicated train")
    }

    // ── 4.4.2 engineer selection ────────────────────────────────────

    fn choose_engineer(&self, commits: &[NewCommit]) -> (Option<String>, Option<String>) {
        let candidates: Vec<&NewCommit> = commits.iter().filter(|c| !self.is_robot_email(&c.author_email)).collect();
        match candidates.choose(&mut rand::thread_rng()) {
            Some(c) => (Some(c.author_name.clone()), Some(c.author_email.clone())),
            None => (None, None),
        }
    }

    // ── 4.4.3 start phase ────────────────────────────────────────────

    pub async fn start_phase(self: &Arc<Self>, phase_id: u64) -> anyhow::Result<()> {
        let train = self.train_owning_phase(phase_id).await?;
        let phase_type = self.phase_type_of(&train, phase_id);

        if phase_type == PhaseType::Verification {
            if let Err(err) = self.phase_group_delivered(&train).await {
                warn!(train_id = train.id, error = %err, "phaseGroupDelivered failed");
                self.store.error_phase(phase_id, err.to_string()).await.ok();
            }
        }

        self.store.start_phase(phase_id).await.context("start phase")?;

        if phase_type == PhaseType::Deploy {
            self.check_branch(&train.branch).await.ok();
        }

        let params = BuildParams {
            job_name: phase_type.as_str().to_string(),
            phase_type,
            train_id: train.id,
            delivery_phase_id: train.active_phases.delivery.id,
            verification_phase_id: train.active_phases.verification.id,
            deploy_phase_id: train.active_phases.deploy.id,
            branch: train.branch.clone(),
            head_sha: train.head_sha.clone(),
            build_user: train.engineer.as_ref().map(|u| u.email.clone()),
            hostname: None,
        };
        if let Err(err) = self.build.trigger_job(params).await {
            warn!(train_id = train.id, error = %err, "build trigger failed");
            self.store.error_phase(phase_id, err.to_string()).await.ok();
        }

        self.cache.invalidate().await;
        self.check_phase_completion(phase_id).await?;
        Ok(())
    }

    async fn train_owning_phase(&self, phase_id: u64) -> anyhow::Result<Train> {
        self.store
            .train_by_phase_id(phase_id)
            .await?
            .context("phase does not belong to any train")
    }

    fn phase_type_of(&self, train: &Train, phase_id: u64) -> PhaseType {
        if train.active_phases.delivery.id == phase_id {
            PhaseType::Delivery
        } else if train.active_phases.verification.id == phase_id {
            PhaseType::Verification
        } else {
            PhaseType::Deploy
        }
    }

    // ── 4.4.4 phase completion check ────────────────────────────────

    pub async fn check_phase_completion(self: &Arc<Self>, phase_id: u64) -> anyhow::Result<()> {
        let _guard = self.locks.phase_completion.lock().await;

        let train = self.train_owning_phase(phase_id).await?;
        let phase_type = self.phase_type_of(&train, phase_id);
        let phase = train.active_phases.phase(phase_type);

        let extras: Vec<Ticket> = if phase_type == PhaseType::Verification {
            train.tickets.clone()
        } else {
            Vec::new()
        };

        let was_complete = phase.is_complete();
        let expected = self.config.jobs.for_phase(phase_type);
        let is_complete = phase_engine::phase_complete(&phase.completed_job_names(), &extras, expected);

        if was_complete && is_complete {
            return Ok(());
        }

        if was_complete && !is_complete {
            self.store.uncomplete_phase(phase_id).await?;
            if phase_type == PhaseType::Verification {
                self.messaging.notify_unverified(&train).await.ok();
            }
            return Ok(());
        }

        if !is_complete {
            return Ok(());
        }

        if !train.active_phases.earlier_phases_complete(phase_type) {
            return Ok(());
        }

        if phase.started_at.is_none() {
            return Ok(());
        }

        self.store.complete_phase(phase_id).await?;
        self.metrics.count("phase.completed", &[("phase", phase_type.as_str())]);

        match phase_type {
            PhaseType::Delivery => {
                // Dispatched as an independent task (design notes: "async
                // background work after transitions") since this function
                // is still holding `phaseCompletion`, which `start_phase`
                // would try to re-acquire via its own completion check.
                let this = Arc::clone(self);
                let verification_id = train.active_phases.verification.id;
                tokio::spawn(async move {
                    if let Err(err) = this.start_phase(verification_id).await {
                        warn!(error = %err, "failed to start verification phase");
                    }
                });
            }
            PhaseType::Verification => {
                if train.active_phases.verification.id == phase_id {
                    self.messaging.notify_verified(&train).await.ok();
                }
                let this = Arc::clone(self);
                let train_id = train.id;
                tokio::spawn(async move {
                    if let Err(err) = this.deploy_if_ready(train_id).await {
                        warn!(error = %err, "deployIfReady failed");
                    }
                });
            }
            PhaseType::Deploy => {
                let deployed = self.store.deploy_train(train.id).await?;
                self.emit_deploy_metrics(&deployed);
                self.messaging.notify_deployed(&deployed).await.ok();
                self.check_branch(&deployed.branch).await.ok();
                if let Some(next_id) = deployed.next_id {
                    let this = Arc::clone(self);
                    tokio::spawn(async move {
                        if let Err(err) = this.deploy_if_ready(next_id).await {
                            warn!(error = %err, "deployIfReady(next) failed");
                        }
                    });
                }
            }
        }

        Ok(())
    }

    fn emit_deploy_metrics(&self, train: &Train) {
        self.metrics.count("train.deployed", &[]);
        if let (Some(created), Some(deployed)) = (Some(train.created_at), train.deployed_at) {
            let lifetime = deployed.signed_duration_since(created).to_std().unwrap_or_default();
            self.metrics.timing("train.lifetime", lifetime, &[]);
        }
    }

    // ── 4.4.5 deploy gating ─────────────────────────────────────────

    pub async fn deploy_if_ready(self: &Arc<Self>, train_id: u64) -> anyhow::Result<()> {
        let _guard = self.locks.deploy_train.lock().await;

        let train = match self.store.train(train_id).await? {
            Some(t) => t,
            None => return Ok(()),
        };

        if !train.is_deployable() {
            return Ok(());
        }

        self.messaging.notify_deploying(&train).await.ok();
        self.start_phase(train.active_phases.deploy.id).await?;
        Ok(())
    }

    // ── 4.4.6 rollback ───────────────────────────────────────────────

    pub async fn rollback(&self, train_id: u64) -> Result<(), ConductorError> {
        let train = self
            .store
            .train(train_id)
            .await
            .map_err(ConductorError::Persistence)?
            .ok_or_else(|| ConductorError::not_found("train"))?;

        let rollback_job = self
            .config
            .rollback_job
            .clone()
            .filter(|_| train.can_rollback(self.config.rollback_job.is_some()));
        let rollback_job = match rollback_job {
            Some(j) => j,
            None => return Err(ConductorError::conflict("train cannot be rolled back")),
        };

        self.messaging.notify_rollback(&train).await.ok();

        if let Some(latest) = self.store.latest_train().await.map_err(ConductorError::Persistence)? {
            if !latest.is_done() {
                if latest.is_deploying() {
                    self.store.cancel_train(latest.id).await.map_err(ConductorError::Persistence)?;
                } else {
                    self.store
                        .block_train(latest.id, Some("rollback".to_string()))
                        .await
                        .map_err(ConductorError::Persistence)?;
                }

                if let Some(previous_id) = latest.previous_id {
                    if let Some(previous) = self.store.train(previous_id).await.map_err(ConductorError::Persistence)? {
                        if !previous.is_done() {
                            self.store.cancel_train(previous.id).await.map_err(ConductorError::Persistence)?;
                        }
                    }
                }
            }
        }

        let params = BuildParams {
            job_name: rollback_job,
            phase_type: PhaseType::Deploy,
            train_id: train.id,
            delivery_phase_id: train.active_phases.delivery.id,
            verification_phase_id: train.active_phases.verification.id,
            deploy_phase_id: train.active_phases.deploy.id,
            branch: train.branch.clone(),
            head_sha: train.head_sha.clone(),
            build_user: train.engineer.as_ref().map(|u| u.email.clone()),
            hostname: Some(self.config.hostname.clone()),
        };
        self.build.trigger_job(params).await.map_err(ConductorError::External)?;

        Ok(())
    }

    // ── 4.5 ticket-gated verification ───────────────────────────────

    pub async fn phase_group_delivered(&self, train: &Train) -> anyhow::Result<()> {
        let _guard = self.locks.ticket_modification.lock().await;

        let pg_head_sha = train.active_phases.head_sha.clone();

        let new_commits_needing_tickets = train.new_commits_needing_tickets(
            &pg_head_sha,
            self.config.no_staging_verification,
            &self.config.no_staging_verification_emails,
        );

        let tickets = if !new_commits_needing_tickets.is_empty() {
            let created = self.tickets.create_tickets(train, &new_commits_needing_tickets).await?;
            self.store.write_tickets(train.id, created.clone()).await?;
            created
        } else {
            Vec::new()
        };

        let new_commits = match &train.last_delivered_sha {
            None => train.commits_since(&pg_head_sha),
            Some(last) => train.commits_between(&pg_head_sha, last),
        };

        self.messaging.notify_delivered(train, &new_commits, &tickets).await.ok();
        Ok(())
    }

    /// Background reconciliation with the ticket tracker (§4.5
    /// `SyncTickets`). Called by the reconciler, not by request handlers.
    pub async fn sync_tickets(self: &Arc<Self>) -> anyhow::Result<()> {
        let _guard = self.locks.ticket_modification.lock().await;

        let train = match self.store.latest_train().await? {
            Some(t) if !t.is_deploying() && !t.is_deployed() => t,
            _ => return Ok(()),
        };

        let synced = match self.tickets.sync_tickets(&train).await {
            Ok(s) => s,
            Err(err) => {
                // Open Question 1: the error is logged, not propagated; the
                // write below proceeds with whatever partial result came back.
                warn!(train_id = train.id, error = %err, "ticket sync failed");
                return Ok(());
            }
        };

        let mut all = synced.new;
        all.extend(synced.updated);
        if !all.is_empty() {
            self.store.write_tickets(train.id, all).await?;
        }

        let refreshed = self.store.train(train.id).await?.context("reload train after sync")?;
        match refreshed.active_phase_type() {
            PhaseType::Verification => {
                self.check_phase_completion(refreshed.active_phases.verification.id).await?;
            }
            PhaseType::Deploy if refreshed.active_phases.deploy.started_at.is_none() => {
                self.store.uncomplete_phase(refreshed.active_phases.verification.id).await?;
                self.check_phase_completion(refreshed.active_phases.verification.id).await?;
            }
            _ => {}
        }

        Ok(())
    }

    // ── 4.6 schedule reconciler ──────────────────────────────────────

    pub async fn reconcile_schedule(self: &Arc<Self>, now: chrono::DateTime<Utc>, mode_is_manual: bool) -> anyhow::Result<()> {
        let _guard = self.locks.train_close.lock().await;

        let train = match self.store.latest_train().await? {
            Some(t) => t,
            None => return Ok(()),
        };

        if train.is_deploying() || train.is_deployed() || train.schedule_override || mode_is_manual {
            return Ok(());
        }

        let options = self.store.options().await?;
        let auto_closeable = options.in_close_time(now) && train.engineer.is_some() && !train.schedule_override;

        if auto_closeable && !train.closed {
            self.store.close_train(train.id, false).await?;
            self.deploy_if_ready(train.id).await?;
            self.messaging.notify_closed(&train).await.ok();
        } else if !auto_closeable && train.closed {
            self.store.open_train(train.id, false).await?;
            self.messaging.notify_opened(&train).await.ok();
            self.check_branch(&train.branch).await.ok();
        }

        Ok(())
    }

    // ── job liveness (§6 job endpoints feed this) ───────────────────

    pub async fn complete_job(self: &Arc<Self>, phase_id: u64, name: &str, result: JobResult, metadata: String) -> anyhow::Result<()> {
        self.store.complete_job(phase_id, name, result, metadata).await?;
        self.check_phase_completion(phase_id).await
    }

    pub async fn restart_phase(self: &Arc<Self>, phase_id: u64) -> Result<(), ConductorError> {
        let phase = self.store.replace_phase(phase_id).await.map_err(|err| {
            ConductorError::conflict(format!("cannot restart phase: {err}"))
        })?;
        self.start_phase(phase.id).await.map_err(ConductorError::External)?;
        Ok(())
    }

    // ── train lifecycle endpoints (§6) ───────────────────────────────
    // Mirrors `validateMutableTrain`: a train that isn't the latest, or
    // that's already deployed/deploying, cannot be closed/opened/
    // extended/blocked/unblocked through these entry points.

    async fn load_mutable_train(&self, train_id: u64) -> Result<Train, ConductorError> {
        let train = self
            .store
            .train(train_id)
            .await
            .map_err(ConductorError::Persistence)?
            .ok_or_else(|| ConductorError::not_found("train"))?;
        if train.next_id.is_some() {
            return Err(ConductorError::conflict(format!("train {train_id} is not the latest train")));
        }
        if train.is_deployed() {
            return Err(ConductorError::conflict("train already deployed"));
        }
        if train.is_deploying() {
            return Err(ConductorError::conflict("train is deploying"));
        }
        Ok(train)
    }

    async fn reload_mutable_train(&self, train_id: u64) -> Result<Train, ConductorError> {
        self.store
            .train(train_id)
            .await
            .map_err(ConductorError::Persistence)?
            .ok_or_else(|| ConductorError::not_found("train"))
    }

    pub async fn close_train(self: &Arc<Self>, train_id: u64) -> Result<Train, ConductorError> {
        let _guard = self.locks.train_close.lock().await;
        let train = self.load_mutable_train(train_id).await?;
        if train.closed {
            return Err(ConductorError::conflict("train already closed"));
        }

        let closed = self.store.close_train(train_id, true).await.map_err(ConductorError::Persistence)?;
        self.messaging.notify_closed(&closed).await.ok();
        self.cache.invalidate().await;
        self.deploy_if_ready(train_id).await.map_err(ConductorError::External)?;

        self.reload_mutable_train(train_id).await
    }

    pub async fn open_train(self: &Arc<Self>, train_id: u64) -> Result<Train, ConductorError> {
        let _guard = self.locks.train_close.lock().await;
        let train = self.load_mutable_train(train_id).await?;
        if !train.closed {
            return Err(ConductorError::conflict("train already opened"));
        }

        let opened = self.store.open_train(train_id, true).await.map_err(ConductorError::Persistence)?;
        self.messaging.notify_opened(&opened).await.ok();
        self.cache.invalidate().await;
        self.check_branch(&opened.branch).await.map_err(ConductorError::External)?;

        self.reload_mutable_train(train_id).await
    }

    /// Manual re-check of the branch for new commits: reopen (preserving
    /// `schedule_override`), dispatch, re-close.
    pub async fn extend_train(self: &Arc<Self>, train_id: u64) -> Result<Train, ConductorError> {
        let _guard = self.locks.train_close.lock().await;
        let train = self.load_mutable_train(train_id).await?;
        let schedule_override = train.schedule_override;

        self.store.open_train(train_id, schedule_override).await.map_err(ConductorError::Persistence)?;
        self.check_branch(&train.branch).await.map_err(ConductorError::External)?;
        self.store.close_train(train_id, schedule_override).await.map_err(ConductorError::Persistence)?;
        self.cache.invalidate().await;

        self.reload_mutable_train(train_id).await
    }

    pub async fn block_train(self: &Arc<Self>, train_id: u64) -> Result<Train, ConductorError> {
        let train = self.load_mutable_train(train_id).await?;
        if train.blocked {
            return Err(ConductorError::conflict("train already blocked"));
        }

        let blocked = self.store.block_train(train_id, None).await.map_err(ConductorError::Persistence)?;
        self.messaging.notify_blocked(&blocked).await.ok();
        self.cache.invalidate().await;
        Ok(blocked)
    }

    pub async fn unblock_train(self: &Arc<Self>, train_id: u64) -> Result<Train, ConductorError> {
        let train = self.load_mutable_train(train_id).await?;
        if !train.blocked {
            return Err(ConductorError::conflict("train is not blocked"));
        }

        let unblocked = self.store.unblock_train(train_id).await.map_err(ConductorError::Persistence)?;
        self.messaging.notify_unblocked(&unblocked).await.ok();
        self.cache.invalidate().await;
        self.deploy_if_ready(train_id).await.map_err(ConductorError::External)?;

        self.reload_mutable_train(train_id).await
    }

    pub async fn cancel_train(self: &Arc<Self>, train_id: u64) -> Result<Train, ConductorError> {
        let train = self
            .store
            .train(train_id)
            .await
            .map_err(ConductorError::Persistence)?
            .ok_or_else(|| ConductorError::not_found("train"))?;
        if train.is_done() {
            return Err(ConductorError::conflict("train is already done"));
        }

        let cancelled = self.store.cancel_train(train_id).await.map_err(ConductorError::Persistence)?;
        self.messaging.notify_cancelled(&cancelled).await.ok();
        self.cache.invalidate().await;

        if cancelled.next_id.is_some() {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                let Ok(Some(latest)) = this.store.latest_train().await else { return };
                if let Err(err) = this.deploy_if_ready(latest.id).await {
                    warn!(error = %err, "deployIfReady after cancel failed");
                }
            });
        }

        Ok(cancelled)
    }
}

fn to_new_commit(c: Commit) -> NewCommit {
    NewCommit {
        sha: c.sha,
        author_name: c.author_name,
        author_email: c.author_email,
        message: c.message,
        url: c.url,
        created_at: c.created_at,
    }
}

fn phase_owns(train: &Train, phase_id: u64) -> bool {
    train.active_phases.delivery.id == phase_id
        || train.active_phases.verification.id == phase_id
        || train.active_phases.deploy.id == phase_id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_owns_matches_any_of_the_three_active_phases() {
        use crate::domain::job::Job;
        use crate::domain::phase::{Phase, PhaseGroup};

        let train = Train {
            id: 1,
            branch: "master".to_string(),
            tail_sha: "a".to_string(),
            head_sha: "a".to_string(),
            engineer: None,
            created_at: Utc::now(),
            deployed_at: None,
            cancelled_at: None,
            closed: false,
            schedule_override: false,
            blocked: false,
            blocked_reason: None,
            commits: Vec::new(),
            tickets: Vec::new(),
            active_phases: PhaseGroup {
                id: 1,
                head_sha: "a".to_string(),
                delivery: Phase::new(10, 1, PhaseType::Delivery, vec![Job::new(1, "deliver")]),
                verification: Phase::new(11, 1, PhaseType::Verification, vec![Job::new(2, "verify")]),
                deploy: Phase::new(12, 1, PhaseType::Deploy, vec![Job::new(3, "deploy")]),
            },
            previous_id: None,
            next_id: None,
            previous_train_done: true,
            last_delivered_sha: None,
        };

        assert!(phase_owns(&train, 11));
        assert!(!phase_owns(&train, 99));
    }

    // ── train lifecycle endpoints, against the real in-memory store ──

    use crate::ports::CodePort;
    use async_trait::async_trait;
    use conductor_store::InMemoryStore;

    struct NoCommits;

    #[async_trait]
    impl CodePort for NoCommits {
        async fn commits_on_branch(&self, _branch: &str, _max: usize) -> anyhow::Result<Vec<Commit>> {
            Ok(Vec::new())
        }
        async fn commits_on_branch_after(&self, _branch: &str, _sha: &str) -> anyhow::Result<Vec<Commit>> {
            Ok(Vec::new())
        }
        async fn compare_refs(&self, _old: &str, _new: &str) -> anyhow::Result<Vec<Commit>> {
            Ok(Vec::new())
        }
        fn parse_webhook_for_branch(&self, _body: &[u8], _headers: &[(String, String)]) -> anyhow::Result<Option<String>> {
            Ok(None)
        }
    }

    struct NoBuild;

    #[async_trait]
    impl BuildPort for NoBuild {
        async fn trigger_job(&self, _params: BuildParams) -> anyhow::Result<Option<String>> {
            Ok(None)
        }
    }

    struct NoTickets;

    #[async_trait]
    impl TicketPort for NoTickets {
        async fn create_tickets(&self, _train: &Train, _commits: &[Commit]) -> anyhow::Result<Vec<Ticket>> {
            Ok(Vec::new())
        }
        async fn close_tickets(&self, _tickets: &[Ticket]) -> anyhow::Result<()> {
            Ok(())
        }
        async fn delete_tickets(&self, _train: &Train) -> anyhow::Result<()> {
            Ok(())
        }
        async fn sync_tickets(&self, _train: &Train) -> anyhow::Result<crate::ports::TicketSyncResult> {
            Ok(crate::ports::TicketSyncResult { new: Vec::new(), updated: Vec::new() })
        }
        async fn close_train_tickets(&self, _train: &Train) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct SilentMessaging;

    #[async_trait]
    impl MessagingPort for SilentMessaging {
        async fn notify_created(&self, _train: &Train) -> anyhow::Result<()> {
            Ok(())
        }
        async fn notify_extended(&self, _train: &Train) -> anyhow::Result<()> {
            Ok(())
        }
        async fn notify_duplicated(&self, _train: &Train) -> anyhow::Result<()> {
            Ok(())
        }
        async fn notify_delivered(&self, _train: &Train, _new_commits: &[Commit], _tickets: &[Ticket]) -> anyhow::Result<()> {
            Ok(())
        }
        async fn notify_verified(&self, _train: &Train) -> anyhow::Result<()> {
            Ok(())
        }
        async fn notify_unverified(&self, _train: &Train) -> anyhow::Result<()> {
            Ok(())
        }
        async fn notify_deploying(&self, _train: &Train) -> anyhow::Result<()> {
            Ok(())
        }
        async fn notify_deployed(&self, _train: &Train) -> anyhow::Result<()> {
            Ok(())
        }
        async fn notify_closed(&self, _train: &Train) -> anyhow::Result<()> {
            Ok(())
        }
        async fn notify_opened(&self, _train: &Train) -> anyhow::Result<()> {
            Ok(())
        }
        async fn notify_blocked(&self, _train: &Train) -> anyhow::Result<()> {
            Ok(())
        }
        async fn notify_unblocked(&self, _train: &Train) -> anyhow::Result<()> {
            Ok(())
        }
        async fn notify_cancelled(&self, _train: &Train) -> anyhow::Result<()> {
            Ok(())
        }
        async fn notify_rollback(&self, _train: &Train) -> anyhow::Result<()> {
            Ok(())
        }
        async fn notify_job_failed(&self, _train: &Train, _job_name: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct NoMetrics;

    impl MetricsSink for NoMetrics {
        fn count(&self, _name: &str, _tags: &[(&str, &str)]) {}
        fn timing(&self, _name: &str, _duration: std::time::Duration, _tags: &[(&str, &str)]) {}
    }

    fn one_commit(sha: &str) -> crate::store::NewCommit {
        crate::store::NewCommit {
            sha: sha.to_string(),
            author_name: "dev".to_string(),
            author_email: "dev@example.com".to_string(),
            message: "change".to_string(),
            url: String::new(),
            created_at: Utc::now(),
        }
    }

    fn test_orchestrator() -> (Arc<Orchestrator>, Arc<dyn PersistencePort>) {
        let store: Arc<dyn PersistencePort> = Arc::new(InMemoryStore::new());
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&store),
            Arc::new(NoCommits),
            Arc::new(NoBuild),
            Arc::new(NoTickets),
            Arc::new(SilentMessaging),
            Arc::new(NoMetrics),
            OrchestratorConfig {
                robot_emails: Vec::new(),
                no_staging_verification: false,
                no_staging_verification_emails: Vec::new(),
                rollback_job: None,
                hostname: "test-host".to_string(),
                jobs: crate::domain::job::JobNames::default(),
            },
        ));
        (orchestrator, store)
    }

    #[tokio::test]
    async fn close_train_rejects_an_already_closed_train() {
        let (orchestrator, store) = test_orchestrator();
        let train = store.create_train("master", &[one_commit("c1")], Some("dev"), Some("dev@example.com")).await.unwrap();
        orchestrator.close_train(train.id).await.unwrap();
        assert!(orchestrator.close_train(train.id).await.is_err());
    }

    #[tokio::test]
    async fn close_then_open_round_trips_through_the_orchestrator() {
        let (orchestrator, store) = test_orchestrator();
        let train = store.create_train("master", &[one_commit("c1")], None, None).await.unwrap();
        let closed = orchestrator.close_train(train.id).await.unwrap();
        assert!(closed.closed);
        let opened = orchestrator.open_train(train.id).await.unwrap();
        assert!(!opened.closed);
    }

    #[tokio::test]
    async fn open_train_rejects_a_train_that_is_not_closed() {
        let (orchestrator, store) = test_orchestrator();
        let train = store.create_train("master", &[one_commit("c1")], None, None).await.unwrap();
        assert!(orchestrator.open_train(train.id).await.is_err());
    }

    #[tokio::test]
    async fn block_then_unblock_round_trips_through_the_orchestrator() {
        let (orchestrator, store) = test_orchestrator();
        let train = store.create_train("master", &[one_commit("c1")], None, None).await.unwrap();
        let blocked = orchestrator.block_train(train.id).await.unwrap();
        assert!(blocked.blocked);
        assert!(orchestrator.block_train(train.id).await.is_err());
        let unblocked = orchestrator.unblock_train(train.id).await.unwrap();
        assert!(!unblocked.blocked);
        assert!(orchestrator.unblock_train(train.id).await.is_err());
    }

    #[tokio::test]
    async fn cancel_train_rejects_a_train_that_is_already_done() {
        let (orchestrator, store) = test_orchestrator();
        let train = store.create_train("master", &[one_commit("c1")], None, None).await.unwrap();
        orchestrator.cancel_train(train.id).await.unwrap();
        assert!(orchestrator.cancel_train(train.id).await.is_err());
    }

    #[tokio::test]
    async fn mutable_train_actions_reject_a_non_latest_train() {
        let (orchestrator, store) = test_orchestrator();
        let first = store.create_train("master", &[one_commit("c1")], None, None).await.unwrap();
        store.deploy_train(first.id).await.unwrap();
        store.create_train("master", &[one_commit("c1")], None, None).await.unwrap();
        assert!(orchestrator.close_train(first.id).await.is_err());
    }
}
