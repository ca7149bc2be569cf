//! Background periodic loops (C6): ticket sync, job liveness, and
//! schedule reconciliation, each on its own wall-clock ticker, guarded
//! by an outer supervisor that relaunches the set if any task panics.
//! Mirrors the "tick loop — inner spawn catches panics so the loop
//! never dies" shape used for the foreground periodic task.

use std::sync::Arc;
use std::time::Duration;

use tracing::error;

use crate::domain::config::Mode;
use crate::orchestrator::Orchestrator;
use crate::store::PersistencePort;

pub struct ReconcilerConfig {
    pub sync_tickets_interval: Duration,
    pub check_jobs_interval: Duration,
    pub check_train_lock_interval: Duration,
    pub startup_delay: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            sync_tickets_interval: Duration::from_secs(10),
            check_jobs_interval: Duration::from_secs(5),
            check_train_lock_interval: Duration::from_secs(5),
            startup_delay: Duration::from_secs(0),
        }
    }
}

/// Spawns the three reconciler loops under a panic-isolating supervisor
/// and returns immediately; the loops run until the process exits.
pub fn spawn(orchestrator: Arc<Orchestrator>, store: Arc<dyn PersistencePort>, config: ReconcilerConfig) {
    tokio::spawn(async move {
        tokio::time::sleep(config.startup_delay).await;

        loop {
            let orchestrator = Arc::clone(&orchestrator);
            let store = Arc::clone(&store);
            let sync_tickets_interval = config.sync_tickets_interval;
            let check_jobs_interval = config.check_jobs_interval;
            let check_train_lock_interval = config.check_train_lock_interval;

            let handle = tokio::spawn(async move {
                run_loop_group(orchestrator, store, sync_tickets_interval, check_jobs_interval, check_train_lock_interval).await;
            });

            match handle.await {
                Ok(()) => error!("reconciler loop group exited unexpectedly, relaunching"),
                Err(join_err) => error!("reconciler loop group panicked: {join_err}, relaunching"),
            }
        }
    });
}

async fn run_loop_group(
    orchestrator: Arc<Orchestrator>,
    store: Arc<dyn PersistencePort>,
    sync_tickets_interval: Duration,
    check_jobs_interval: Duration,
    check_train_lock_interval: Duration,
) {
    let mut sync_tickets_tick = tokio::time::interval(sync_tickets_interval);
    let mut check_jobs_tick = tokio::time::interval(check_jobs_interval);
    let mut check_train_lock_tick = tokio::time::interval(check_train_lock_interval);

    loop {
        tokio::select! {
            _ = sync_tickets_tick.tick() => {
                if let Err(err) = orchestrator.sync_tickets().await {
                    error!(error = %err, "syncTickets tick failed");
                }
            }
            _ = check_jobs_tick.tick() => {
                if let Err(err) = check_jobs(&orchestrator, &store).await {
                    error!(error = %err, "checkJobs tick failed");
                }
            }
            _ = check_train_lock_tick.tick() => {
                let mode_is_manual = match store.mode().await {
                    Ok(m) => m == Mode::Manual,
                    Err(err) => {
                        error!(error = %err, "failed to load mode for schedule reconcile");
                        continue;
                    }
                };
                if let Err(err) = orchestrator.reconcile_schedule(now(), mode_is_manual).await {
                    error!(error = %err, "checkTrainLock tick failed");
                }
            }
        }
    }
}

/// Liveness pass over the latest train's active-phase jobs. The phase
/// completion predicate is re-evaluated for the active phase so a job
/// that completed out-of-band (e.g. a webhook the build runner failed
/// to deliver) is still picked up.
async fn check_jobs(orchestrator: &Arc<Orchestrator>, store: &Arc<dyn PersistencePort>) -> anyhow::Result<()> {
    let train = match store.latest_train().await? {
        Some(t) if !t.is_done() => t,
        _ => return Ok(()),
    };

    let active_phase_id = train.active_phases.phase(train.active_phase_type()).id;
    orchestrator.check_phase_completion(active_phase_id).await
}

fn now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}
