//! `InMemoryStore`: the reference `PersistencePort` implementation.
//! Guarded by a single `tokio::sync::RwLock` over process state, mirroring
//! the teacher's `borg-agent` role of "the concrete thing that implements
//! a core port" — here there is exactly one concrete implementation, not
//! several backend choices, since the real relational driver is an
//! out-of-scope external collaborator.

use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use conductor_core::domain::commit::Commit;
use conductor_core::domain::config::{Config, Mode, Options};
use conductor_core::domain::job::{Job, JobNames, JobResult};
use conductor_core::domain::phase::{Phase, PhaseGroup, PhaseType};
use conductor_core::domain::ticket::Ticket;
use conductor_core::domain::train::Train;
use conductor_core::domain::user::User;
use conductor_core::store::{NewCommit, PersistencePort};
use tokio::sync::RwLock;

struct StoredTrain {
    id: u64,
    branch: String,
    engineer: Option<User>,
    created_at: chrono::DateTime<Utc>,
    deployed_at: Option<chrono::DateTime<Utc>>,
    cancelled_at: Option<chrono::DateTime<Utc>>,
    closed: bool,
    schedule_override: bool,
    blocked: bool,
    blocked_reason: Option<String>,
    commits: Vec<Commit>,
    tickets: Vec<Ticket>,
    /// Chronological history of PhaseGroups; the last entry is active.
    phase_groups: Vec<PhaseGroup>,
}

impl StoredTrain {
    fn is_done(&self) -> bool {
        self.deployed_at.is_some() || self.cancelled_at.is_some()
    }

    fn active(&self) -> &PhaseGroup {
        self.phase_groups.last().expect("a train always has an active phase group")
    }

    fn active_mut(&mut self) -> &mut PhaseGroup {
        self.phase_groups.last_mut().expect("a train always has an active phase group")
    }
}

#[derive(Default)]
struct State {
    next_id: u64,
    config: Config,
    job_names: JobNames,
    /// Insertion order == id order since ids are monotone.
    trains: std::collections::BTreeMap<u64, StoredTrain>,
    users: HashMap<String, User>,
    commit_registry: HashMap<String, Commit>,
    metadata: HashMap<(String, String), String>,
}

impl State {
    fn mint_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn upsert_commit(&mut self, nc: &NewCommit, branch: &str) -> Commit {
        if let Some(existing) = self.commit_registry.get(&nc.sha) {
            return existing.clone();
        }
        let id = self.mint_id();
        let commit = Commit {
            id,
            sha: nc.sha.clone(),
            branch: branch.to_string(),
            author_name: nc.author_name.clone(),
            author_email: nc.author_email.clone(),
            message: nc.message.clone(),
            url: nc.url.clone(),
            created_at: nc.created_at,
        };
        self.commit_registry.insert(nc.sha.clone(), commit.clone());
        commit
    }

    fn get_or_create_user(&mut self, name: &str, email: &str) -> User {
        if let Some(existing) = self.users.get(email) {
            return existing.clone();
        }
        let id = self.mint_id();
        let user = User {
            id,
            email: email.to_string(),
            name: name.to_string(),
        };
        self.users.insert(email.to_string(), user.clone());
        user
    }

    fn new_phase_group(&mut self, head_sha: &str) -> PhaseGroup {
        let pg_id = self.mint_id();
        let delivery = Phase::new(self.mint_id(), pg_id, PhaseType::Delivery, seed_jobs(self, PhaseType::Delivery));
        let verification = Phase::new(self.mint_id(), pg_id, PhaseType::Verification, seed_jobs(self, PhaseType::Verification));
        let deploy = Phase::new(self.mint_id(), pg_id, PhaseType::Deploy, seed_jobs(self, PhaseType::Deploy));
        PhaseGroup {
            id: pg_id,
            head_sha: head_sha.to_string(),
            delivery,
            verification,
            deploy,
        }
    }

    /// Appends `commits` (dedup-inserted globally, appended only if not
    /// already on this train) and returns the updated tail/head-ordered
    /// list and whether anything new was actually appended.
    fn merge_commits(&mut self, existing: &[Commit], new_commits: &[NewCommit], branch: &str) -> Vec<Commit> {
        let mut merged = existing.to_vec();
        let known: std::collections::HashSet<String> = merged.iter().map(|c| c.sha.clone()).collect();
        for nc in new_commits {
            if known.contains(&nc.sha) {
                continue;
            }
            merged.push(self.upsert_commit(nc, branch));
        }
        merged
    }

    fn hydrate(&self, stored: &StoredTrain) -> Train {
        let branch_trains: Vec<&StoredTrain> = self.trains.values().filter(|t| t.branch == stored.branch).collect();
        let idx = branch_trains.iter().position(|t| t.id == stored.id).unwrap_or(0);
        let previous_id = if idx > 0 { Some(branch_trains[idx - 1].id) } else { None };
        let next_id = branch_trains.get(idx + 1).map(|t| t.id);
        let previous_train_done = previous_id
            .map(|pid| self.trains.get(&pid).map(StoredTrain::is_done).unwrap_or(true))
            .unwrap_or(true);

        let last_delivered_sha = stored
            .phase_groups
            .iter()
            .rev()
            .skip(1)
            .find(|pg| pg.delivery.completed_at.is_some())
            .map(|pg| pg.head_sha.clone());

        let active = stored.active();
        Train {
            id: stored.id,
            branch: stored.branch.clone(),
            tail_sha: stored.commits.first().map(|c| c.sha.clone()).unwrap_or_default(),
            head_sha: stored.commits.last().map(|c| c.sha.clone()).unwrap_or_default(),
            engineer: stored.engineer.clone(),
            created_at: stored.created_at,
            deployed_at: stored.deployed_at,
            cancelled_at: stored.cancelled_at,
            closed: stored.closed,
            schedule_override: stored.schedule_override,
            blocked: stored.blocked,
            blocked_reason: stored.blocked_reason.clone(),
            commits: stored.commits.clone(),
            tickets: stored.tickets.clone(),
            active_phases: active.clone(),
            previous_id,
            next_id,
            previous_train_done,
            last_delivered_sha,
        }
    }

    fn find_phase_train_id(&self, phase_id: u64) -> Option<u64> {
        self.trains
            .values()
            .find(|t| {
                let pg = t.active();
                pg.delivery.id == phase_id || pg.verification.id == phase_id || pg.deploy.id == phase_id
            })
            .map(|t| t.id)
    }
}

fn seed_jobs(state: &mut State, phase_type: PhaseType) -> Vec<Job> {
    let names = state.job_names.for_phase(phase_type).to_vec();
    names.into_iter().map(|name| Job::new(state.mint_id(), name)).collect()
}

pub struct InMemoryStore {
    state: RwLock<State>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_job_names(JobNames::default())
    }

    pub fn with_job_names(job_names: JobNames) -> Self {
        Self {
            state: RwLock::new(State {
                job_names,
                ..State::default()
            }),
        }
    }
}

#[async_trait]
impl PersistencePort for InMemoryStore {
    async fn config(&self) -> Result<Config> {
        Ok(self.state.read().await.config.clone())
    }

    async fn set_mode(&self, mode: Mode) -> Result<()> {
        self.state.write().await.config.mode = mode;
        Ok(())
    }

    async fn set_options(&self, options: Options) -> Result<()> {
        let mut guard = self.state.write().await;
        if options.validation_error.is_some() {
            guard.config.options = Options::default();
        } else {
            guard.config.options = options;
        }
        Ok(())
    }

    async fn create_train(
        &self,
        branch: &str,
        commits: &[NewCommit],
        engineer_name: Option<&str>,
        engineer_email: Option<&str>,
    ) -> Result<Train> {
        let mut guard = self.state.write().await;
        if commits.is_empty() {
            bail!("cannot create a train with no commits");
        }

        let commit_rows = guard.merge_commits(&[], commits, branch);
        let head_sha = commit_rows.last().unwrap().sha.clone();
        let phase_group = guard.new_phase_group(&head_sha);
        let engineer = match (engineer_name, engineer_email) {
            (Some(name), Some(email)) => Some(guard.get_or_create_user(name, email)),
            _ => None,
        };

        let id = guard.mint_id();
        let stored = StoredTrain {
            id,
            branch: branch.to_string(),
            engineer,
            created_at: Utc::now(),
            deployed_at: None,
            cancelled_at: None,
            closed: false,
            schedule_override: false,
            blocked: false,
            blocked_reason: None,
            commits: commit_rows,
            tickets: Vec::new(),
            phase_groups: vec![phase_group],
        };
        guard.trains.insert(id, stored);
        let hydrated = guard.hydrate(guard.trains.get(&id).unwrap());
        Ok(hydrated)
    }

    async fn extend_train(&self, train_id: u64, commits: &[NewCommit]) -> Result<Train> {
        let mut guard = self.state.write().await;
        let branch = guard.trains.get(&train_id).context("train not found")?.branch.clone();
        let existing = guard.trains.get(&train_id).unwrap().commits.clone();
        let merged = guard.merge_commits(&existing, commits, &branch);
        let head_sha = merged.last().context("train has no commits")?.sha.clone();
        let new_group = guard.new_phase_group(&head_sha);

        let stored = guard.trains.get_mut(&train_id).context("train not found")?;
        stored.commits = merged;
        stored.phase_groups.push(new_group);

        let hydrated = guard.hydrate(guard.trains.get(&train_id).unwrap());
        Ok(hydrated)
    }

    async fn duplicate_train(&self, source_train_id: u64, new_commits: &[NewCommit]) -> Result<Train> {
        let mut guard = self.state.write().await;
        let source = guard.trains.get(&source_train_id).context("source train not found")?;
        let branch = source.branch.clone();
        let engineer = source.engineer.clone();
        let carried = source.commits.clone();

        let merged = guard.merge_commits(&carried, new_commits, &branch);
        let head_sha = merged.last().context("no commits to duplicate")?.sha.clone();
        let phase_group = guard.new_phase_group(&head_sha);

        let id = guard.mint_id();
        let stored = StoredTrain {
            id,
            branch,
            engineer,
            created_at: Utc::now(),
            deployed_at: None,
            cancelled_at: None,
            closed: false,
            schedule_override: false,
            blocked: false,
            blocked_reason: None,
            commits: merged,
            tickets: Vec::new(),
            phase_groups: vec![phase_group],
        };
        guard.trains.insert(id, stored);
        let hydrated = guard.hydrate(guard.trains.get(&id).unwrap());
        Ok(hydrated)
    }

    async fn queue_commits(&self, train_id: u64, commits: &[NewCommit]) -> Result<Train> {
        let mut guard = self.state.write().await;
        let branch = guard.trains.get(&train_id).context("train not found")?.branch.clone();
        let existing = guard.trains.get(&train_id).unwrap().commits.clone();
        let merged = guard.merge_commits(&existing, commits, &branch);
        guard.trains.get_mut(&train_id).unwrap().commits = merged;
        let hydrated = guard.hydrate(guard.trains.get(&train_id).unwrap());
        Ok(hydrated)
    }

    async fn cancel_train(&self, train_id: u64) -> Result<Train> {
        let mut guard = self.state.write().await;
        guard.trains.get_mut(&train_id).context("train not found")?.cancelled_at = Some(Utc::now());
        Ok(guard.hydrate(guard.trains.get(&train_id).unwrap()))
    }

    async fn deploy_train(&self, train_id: u64) -> Result<Train> {
        let mut guard = self.state.write().await;
        guard.trains.get_mut(&train_id).context("train not found")?.deployed_at = Some(Utc::now());
        Ok(guard.hydrate(guard.trains.get(&train_id).unwrap()))
    }

    async fn close_train(&self, train_id: u64, schedule_override: bool) -> Result<Train> {
        let mut guard = self.state.write().await;
        let stored = guard.trains.get_mut(&train_id).context("train not found")?;
        stored.closed = true;
        stored.schedule_override = schedule_override;
        Ok(guard.hydrate(guard.trains.get(&train_id).unwrap()))
    }

    async fn open_train(&self, train_id: u64, schedule_override: bool) -> Result<Train> {
        let mut guard = self.state.write().await;
        let stored = guard.trains.get_mut(&train_id).context("train not found")?;
        stored.closed = false;
        stored.schedule_override = schedule_override;
        Ok(guard.hydrate(guard.trains.get(&train_id).unwrap()))
    }

    async fn block_train(&self, train_id: u64, reason: Option<String>) -> Result<Train> {
        let mut guard = self.state.write().await;
        let stored = guard.trains.get_mut(&train_id).context("train not found")?;
        stored.blocked = true;
        stored.blocked_reason = reason;
        Ok(guard.hydrate(guard.trains.get(&train_id).unwrap()))
    }

    async fn unblock_train(&self, train_id: u64) -> Result<Train> {
        let mut guard = self.state.write().await;
        let stored = guard.trains.get_mut(&train_id).context("train not found")?;
        stored.blocked = false;
        stored.blocked_reason = None;
        Ok(guard.hydrate(guard.trains.get(&train_id).unwrap()))
    }

    async fn train(&self, train_id: u64) -> Result<Option<Train>> {
        let guard = self.state.read().await;
        Ok(guard.trains.get(&train_id).map(|t| guard.hydrate(t)))
    }

    async fn latest_train(&self) -> Result<Option<Train>> {
        let guard = self.state.read().await;
        Ok(guard.trains.values().last().map(|t| guard.hydrate(t)))
    }

    async fn latest_train_for_branch(&self, branch: &str) -> Result<Option<Train>> {
        let guard = self.state.read().await;
        Ok(guard.trains.values().filter(|t| t.branch == branch).last().map(|t| guard.hydrate(t)))
    }

    async fn trains_by_commit(&self, sha: &str) -> Result<Vec<Train>> {
        let guard = self.state.read().await;
        Ok(guard
            .trains
            .values()
            .filter(|t| t.commits.iter().any(|c| c.sha == sha))
            .map(|t| guard.hydrate(t))
            .collect())
    }

    async fn train_by_phase_id(&self, phase_id: u64) -> Result<Option<Train>> {
        let guard = self.state.read().await;
        Ok(guard.find_phase_train_id(phase_id).map(|id| guard.hydrate(guard.trains.get(&id).unwrap())))
    }

    async fn start_phase(&self, phase_id: u64) -> Result<Phase> {
        let mut guard = self.state.write().await;
        let train_id = guard.find_phase_train_id(phase_id).context("phase not found")?;
        let stored = guard.trains.get_mut(&train_id).unwrap();
        let pg = stored.active_mut();
        let phase = phase_mut_by_id(pg, phase_id).context("phase not in active phase group")?;
        phase.started_at = Some(Utc::now());
        Ok(phase.clone())
    }

    async fn complete_phase(&self, phase_id: u64) -> Result<Phase> {
        let mut guard = self.state.write().await;
        let train_id = guard.find_phase_train_id(phase_id).context("phase not found")?;
        let stored = guard.trains.get_mut(&train_id).unwrap();
        let pg = stored.active_mut();
        let phase = phase_mut_by_id(pg, phase_id).context("phase not in active phase group")?;
        phase.completed_at = Some(Utc::now());
        phase.error = None;
        Ok(phase.clone())
    }

    async fn uncomplete_phase(&self, phase_id: u64) -> Result<Phase> {
        let mut guard = self.state.write().await;
        let train_id = guard.find_phase_train_id(phase_id).context("phase not found")?;
        let stored = guard.trains.get_mut(&train_id).unwrap();
        let pg = stored.active_mut();
        let phase = phase_mut_by_id(pg, phase_id).context("phase not in active phase group")?;
        phase.completed_at = None;
        Ok(phase.clone())
    }

    async fn error_phase(&self, phase_id: u64, error: String) -> Result<Phase> {
        let mut guard = self.state.write().await;
        let train_id = guard.find_phase_train_id(phase_id).context("phase not found")?;
        let stored = guard.trains.get_mut(&train_id).unwrap();
        let pg = stored.active_mut();
        let phase = phase_mut_by_id(pg, phase_id).context("phase not in active phase group")?;
        phase.error = Some(error);
        Ok(phase.clone())
    }

    async fn replace_phase(&self, phase_id: u64) -> Result<Phase> {
        let mut guard = self.state.write().await;
        let train_id = guard.find_phase_train_id(phase_id).context("phase not found")?;

        let phase_type = {
            let stored = guard.trains.get(&train_id).unwrap();
            let pg = stored.active();
            let existing = phase_mut_by_id_ref(pg, phase_id).context("phase not in active phase group")?;
            if existing.is_complete() {
                bail!("cannot restart an already-complete phase");
            }
            existing.phase_type
        };

        let replacement_id = guard.mint_id();
        let jobs = seed_jobs(&mut guard, phase_type);
        let stored = guard.trains.get_mut(&train_id).unwrap();
        let pg_id = stored.active().id;
        let replacement = Phase::new(replacement_id, pg_id, phase_type, jobs);
        let pg = stored.active_mut();
        *pg.phase_mut(phase_type) = replacement.clone();
        Ok(replacement)
    }

    async fn create_job(&self, phase_id: u64, name: &str) -> Result<u64> {
        let mut guard = self.state.write().await;
        let id = guard.mint_id();
        let train_id = guard.find_phase_train_id(phase_id).context("phase not found")?;
        let stored = guard.trains.get_mut(&train_id).unwrap();
        let pg = stored.active_mut();
        let phase = phase_mut_by_id(pg, phase_id).context("phase not in active phase group")?;
        phase.jobs.push(Job::new(id, name));
        Ok(id)
    }

    async fn start_job(&self, phase_id: u64, name: &str, url: String) -> Result<()> {
        let mut guard = self.state.write().await;
        let train_id = guard.find_phase_train_id(phase_id).context("phase not found")?;
        let stored = guard.trains.get_mut(&train_id).unwrap();
        let pg = stored.active_mut();
        let phase = phase_mut_by_id(pg, phase_id).context("phase not in active phase group")?;
        let job = phase.jobs.iter_mut().find(|j| j.name == name).context("job not found")?;
        job.start(Utc::now(), url);
        Ok(())
    }

    async fn complete_job(&self, phase_id: u64, name: &str, result: JobResult, metadata: String) -> Result<()> {
        let mut guard = self.state.write().await;
        let train_id = guard.find_phase_train_id(phase_id).context("phase not found")?;
        let stored = guard.trains.get_mut(&train_id).unwrap();
        let pg = stored.active_mut();
        let phase = phase_mut_by_id(pg, phase_id).context("phase not in active phase group")?;
        let job = phase.jobs.iter_mut().find(|j| j.name == name).context("job not found")?;
        if job.is_complete() {
            bail!("job {name} is already complete");
        }
        job.complete(Utc::now(), result, metadata);
        Ok(())
    }

    async fn restart_job(&self, phase_id: u64, name: &str, url: String) -> Result<()> {
        let mut guard = self.state.write().await;
        let train_id = guard.find_phase_train_id(phase_id).context("phase not found")?;
        let stored = guard.trains.get_mut(&train_id).unwrap();
        let pg = stored.active_mut();
        let phase = phase_mut_by_id(pg, phase_id).context("phase not in active phase group")?;
        let job = phase.jobs.iter_mut().find(|j| j.name == name).context("job not found")?;
        job.restart(Utc::now(), url);
        Ok(())
    }

    async fn write_tickets(&self, train_id: u64, tickets: Vec<Ticket>) -> Result<Vec<Ticket>> {
        let mut guard = self.state.write().await;
        let stored = guard.trains.get_mut(&train_id).context("train not found")?;
        for ticket in tickets {
            if let Some(existing) = stored.tickets.iter_mut().find(|t| t.key == ticket.key) {
                *existing = ticket;
            } else {
                stored.tickets.push(ticket);
            }
        }
        Ok(stored.tickets.clone())
    }

    async fn update_ticket(&self, ticket_id: u64, ticket: Ticket) -> Result<Ticket> {
        let mut guard = self.state.write().await;
        for stored in guard.trains.values_mut() {
            if let Some(existing) = stored.tickets.iter_mut().find(|t| t.id == ticket_id) {
                *existing = ticket;
                return Ok(existing.clone());
            }
        }
        bail!("ticket {ticket_id} not found")
    }

    async fn metadata_namespaces(&self) -> Result<Vec<String>> {
        let guard = self.state.read().await;
        let mut namespaces: Vec<String> = guard.metadata.keys().map(|(ns, _)| ns.clone()).collect();
        namespaces.sort();
        namespaces.dedup();
        Ok(namespaces)
    }

    async fn metadata_get(&self, ns: &str, key: &str) -> Result<Option<String>> {
        let guard = self.state.read().await;
        Ok(guard.metadata.get(&(ns.to_string(), key.to_string())).cloned())
    }

    async fn metadata_set(&self, ns: &str, key: &str, value: String) -> Result<()> {
        let mut guard = self.state.write().await;
        guard.metadata.insert((ns.to_string(), key.to_string()), value);
        Ok(())
    }

    async fn metadata_delete(&self, ns: &str, key: &str) -> Result<()> {
        let mut guard = self.state.write().await;
        guard.metadata.remove(&(ns.to_string(), key.to_string()));
        Ok(())
    }

    async fn metadata_delete_namespace(&self, ns: &str) -> Result<()> {
        let mut guard = self.state.write().await;
        guard.metadata.retain(|(n, _), _| n != ns);
        Ok(())
    }

    async fn metadata_list(&self, ns: &str) -> Result<Vec<(String, String)>> {
        let guard = self.state.read().await;
        Ok(guard
            .metadata
            .iter()
            .filter(|((n, _), _)| n == ns)
            .map(|((_, k), v)| (k.clone(), v.clone()))
            .collect())
    }
}

fn phase_mut_by_id(pg: &mut PhaseGroup, phase_id: u64) -> Option<&mut Phase> {
    if pg.delivery.id == phase_id {
        Some(&mut pg.delivery)
    } else if pg.verification.id == phase_id {
        Some(&mut pg.verification)
    } else if pg.deploy.id == phase_id {
        Some(&mut pg.deploy)
    } else {
        None
    }
}

fn phase_mut_by_id_ref(pg: &PhaseGroup, phase_id: u64) -> Option<&Phase> {
    if pg.delivery.id == phase_id {
        Some(&pg.delivery)
    } else if pg.verification.id == phase_id {
        Some(&pg.verification)
    } else if pg.deploy.id == phase_id {
        Some(&pg.deploy)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(sha: &str) -> NewCommit {
        NewCommit {
            sha: sha.to_string(),
            author_name: "dev".to_string(),
            author_email: "dev@example.com".to_string(),
            message: "change".to_string(),
            url: String::new(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn create_train_hydrates_tail_and_head() {
        let store = InMemoryStore::new();
        let train = store
            .create_train("master", &[commit("c1"), commit("c2")], Some("dev"), Some("dev@example.com"))
            .await
            .unwrap();
        assert_eq!(train.tail_sha, "c1");
        assert_eq!(train.head_sha, "c2");
        assert!(train.previous_id.is_none());
        assert!(train.previous_train_done);
    }

    #[tokio::test]
    async fn extend_train_replaces_active_phase_group_and_keeps_tail() {
        let store = InMemoryStore::new();
        let train = store.create_train("master", &[commit("c1")], None, None).await.unwrap();
        let extended = store.extend_train(train.id, &[commit("c2")]).await.unwrap();
        assert_eq!(extended.tail_sha, "c1");
        assert_eq!(extended.head_sha, "c2");
        assert_eq!(extended.active_phases.head_sha, "c2");
    }

    #[tokio::test]
    async fn second_train_on_branch_sees_first_as_previous() {
        let store = InMemoryStore::new();
        let first = store.create_train("master", &[commit("c1")], None, None).await.unwrap();
        store.deploy_train(first.id).await.unwrap();
        let second = store.create_train("master", &[commit("c2")], None, None).await.unwrap();
        assert_eq!(second.previous_id, Some(first.id));
        assert!(second.previous_train_done);
    }

    #[tokio::test]
    async fn complete_job_rejects_an_already_complete_job() {
        let store = InMemoryStore::new();
        let train = store.create_train("master", &[commit("c1")], None, None).await.unwrap();
        let phase_id = train.active_phases.delivery.id;
        store.complete_job(phase_id, "deliver", JobResult::Ok, String::new()).await.unwrap();
        assert!(store.complete_job(phase_id, "deliver", JobResult::Ok, String::new()).await.is_err());
    }

    #[tokio::test]
    async fn replace_phase_rejects_already_complete_phase() {
        let store = InMemoryStore::new();
        let train = store.create_train("master", &[commit("c1")], None, None).await.unwrap();
        let phase_id = train.active_phases.delivery.id;
        store.start_phase(phase_id).await.unwrap();
        store.complete_job(phase_id, "deliver", JobResult::Ok, String::new()).await.unwrap();
        store.complete_phase(phase_id).await.unwrap();
        assert!(store.replace_phase(phase_id).await.is_err());
    }

    #[tokio::test]
    async fn close_then_open_round_trips_the_closed_flag() {
        let store = InMemoryStore::new();
        let train = store.create_train("master", &[commit("c1")], None, None).await.unwrap();
        let closed = store.close_train(train.id, true).await.unwrap();
        assert!(closed.closed);
        assert!(closed.schedule_override);
        let opened = store.open_train(train.id, false).await.unwrap();
        assert!(!opened.closed);
        assert!(!opened.schedule_override);
    }

    #[tokio::test]
    async fn block_then_unblock_round_trips_the_blocked_flag_and_reason() {
        let store = InMemoryStore::new();
        let train = store.create_train("master", &[commit("c1")], None, None).await.unwrap();
        let blocked = store.block_train(train.id, Some("merge conflict".to_string())).await.unwrap();
        assert!(blocked.blocked);
        assert_eq!(blocked.blocked_reason.as_deref(), Some("merge conflict"));
        let unblocked = store.unblock_train(train.id).await.unwrap();
        assert!(!unblocked.blocked);
        assert!(unblocked.blocked_reason.is_none());
    }

    #[tokio::test]
    async fn cancel_train_sets_cancelled_at() {
        let store = InMemoryStore::new();
        let train = store.create_train("master", &[commit("c1")], None, None).await.unwrap();
        let cancelled = store.cancel_train(train.id).await.unwrap();
        assert!(cancelled.cancelled_at.is_some());
        assert!(cancelled.next_id.is_none());
    }

    #[tokio::test]
    async fn metadata_is_scoped_per_namespace_and_deletable() {
        let store = InMemoryStore::new();
        store.metadata_set("ns-a", "k1", "v1".to_string()).await.unwrap();
        store.metadata_set("ns-b", "k1", "v2".to_string()).await.unwrap();

        assert_eq!(store.metadata_get("ns-a", "k1").await.unwrap().as_deref(), Some("v1"));
        assert_eq!(store.metadata_get("ns-b", "k1").await.unwrap().as_deref(), Some("v2"));

        let namespaces = store.metadata_namespaces().await.unwrap();
        assert!(namespaces.contains(&"ns-a".to_string()));
        assert!(namespaces.contains(&"ns-b".to_string()));

        store.metadata_delete("ns-a", "k1").await.unwrap();
        assert!(store.metadata_get("ns-a", "k1").await.unwrap().is_none());

        store.metadata_delete_namespace("ns-b").await.unwrap();
        assert!(store.metadata_list("ns-b").await.unwrap().is_empty());
    }
}
