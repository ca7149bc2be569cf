mod auth;
mod envelope;
mod logging;
mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::middleware;
use conductor_adapters::{GithubAuth, GithubCode, JenkinsBuild, JiraTicket, SlackMessaging, TracingMetrics};
use conductor_core::orchestrator::{Orchestrator, OrchestratorConfig};
use conductor_core::ports::{AuthPort, CodePort};
use conductor_core::reconciler::{self, ReconcilerConfig};
use conductor_core::settings::Settings;
use conductor_core::store::PersistencePort;
use conductor_store::InMemoryStore;

/// Shared across every handler. The ports are already type-erased
/// behind their trait objects, so swapping an adapter in tests means
/// constructing a different `AppState`, not touching `routes`.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<dyn PersistencePort>,
    pub code: Arc<dyn CodePort>,
    pub auth: Arc<dyn AuthPort>,
    pub branch_regex: Arc<regex::Regex>,
    pub session_signing_key: Arc<str>,
    pub job_names: Arc<conductor_core::domain::job::JobNames>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let settings = Settings::from_env();

    let job_names = settings.job_names();
    let store: Arc<dyn PersistencePort> = Arc::new(InMemoryStore::with_job_names(job_names.clone()));
    let code: Arc<dyn CodePort> = Arc::new(GithubCode::new(
        settings.github_token.clone(),
        settings.github_owner.clone(),
        settings.github_repo.clone(),
        settings.code_host_webhook_secret.clone(),
    ));
    let build = Arc::new(JenkinsBuild::new(
        settings.jenkins_base_url.clone(),
        settings.jenkins_user.clone(),
        settings.jenkins_token.clone(),
    ));
    let tickets = Arc::new(JiraTicket::new(
        settings.jira_base_url.clone(),
        settings.jira_user.clone(),
        settings.jira_token.clone(),
        settings.jira_project.clone(),
        settings.jira_parent_issue_type.clone(),
        settings.jira_issue_type.clone(),
        settings.robot_emails.clone(),
    ));
    let messaging = Arc::new(SlackMessaging::new(settings.slack_bot_token.clone(), settings.slack_channel.clone()));
    let auth: Arc<dyn AuthPort> = Arc::new(GithubAuth::new(
        settings.github_oauth_client_id.clone(),
        settings.github_oauth_client_secret.clone(),
        settings.admin_emails.clone(),
    ));
    let metrics = Arc::new(TracingMetrics);

    let orchestrator_config = OrchestratorConfig {
        robot_emails: settings.robot_emails.clone(),
        no_staging_verification: settings.no_staging_verification,
        no_staging_verification_emails: settings.no_staging_verification_emails.clone(),
        rollback_job: (!settings.jenkins_rollback_job.is_empty()).then(|| settings.jenkins_rollback_job.clone()),
        hostname: settings.hostname.clone(),
        jobs: job_names.clone(),
    };

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&store),
        Arc::clone(&code),
        build,
        tickets,
        messaging,
        metrics,
        orchestrator_config,
    ));

    let reconciler_config = ReconcilerConfig {
        sync_tickets_interval: Duration::from_secs(settings.sync_tickets_interval_s),
        check_jobs_interval: Duration::from_secs(settings.check_jobs_interval_s),
        check_train_lock_interval: Duration::from_secs(settings.check_train_lock_interval_s),
        startup_delay: Duration::from_secs(settings.startup_delay_s),
    };
    reconciler::spawn(Arc::clone(&orchestrator), Arc::clone(&store), reconciler_config);

    let branch_regex = regex::Regex::new(&settings.branch_regex).unwrap_or_else(|err| {
        tracing::error!(error = %err, pattern = settings.branch_regex, "invalid branch regex, falling back to ^master$");
        regex::Regex::new("^master$").expect("fallback regex is valid")
    });

    let state = AppState {
        orchestrator,
        store,
        code,
        auth,
        branch_regex: Arc::new(branch_regex),
        session_signing_key: Arc::from(settings.session_signing_key.as_str()),
        job_names: Arc::new(job_names),
    };

    let app = routes::router(state).layer(middleware::from_fn(envelope::strip_format_suffix));

    let addr = format!("{}:{}", settings.bind_addr, settings.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(err) => {
            tracing::error!(error = %err, addr, "failed to bind listener");
            std::process::exit(1);
        }
    };
    tracing::info!(addr, "conductor-server listening");

    axum::serve(listener, app).await?;
    Ok(())
}
