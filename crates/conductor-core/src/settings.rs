//! Process configuration loaded from the environment / an optional
//! `.env` file. Distinct from the persisted `Config` singleton in
//! `domain::config` — this is boot-time wiring, that is orchestrator state.

use std::collections::HashMap;

/// Process-level settings read once at boot.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub port: u16,

    pub code_host_webhook_secret: String,
    pub branch_regex: String,
    pub robot_emails: Vec<String>,
    pub no_staging_verification: bool,
    pub no_staging_verification_emails: Vec<String>,

    pub delivery_jobs: Vec<String>,
    pub verification_jobs: Vec<String>,
    pub deploy_jobs: Vec<String>,
    pub custom_delivery_jobs: Option<Vec<String>>,
    pub custom_verification_jobs: Option<Vec<String>>,
    pub custom_deploy_jobs: Option<Vec<String>>,

    pub github_token: String,
    pub github_repo: String,
    pub github_owner: String,

    pub github_oauth_client_id: String,
    pub github_oauth_client_secret: String,
    pub admin_emails: Vec<String>,

    pub jenkins_base_url: String,
    pub jenkins_user: String,
    pub jenkins_token: String,
    pub jenkins_rollback_job: String,

    pub jira_base_url: String,
    pub jira_user: String,
    pub jira_token: String,
    pub jira_project: String,
    pub jira_parent_issue_type: String,
    pub jira_issue_type: String,

    pub slack_bot_token: String,
    pub slack_channel: String,

    pub session_signing_key: String,

    pub sync_tickets_interval_s: u64,
    pub check_jobs_interval_s: u64,
    pub check_train_lock_interval_s: u64,
    pub startup_delay_s: u64,

    pub hostname: String,
}

fn parse_dotenv() -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Ok(contents) = std::fs::read_to_string(".env") else {
        return map;
    };
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            map.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    map
}

fn get(key: &str, dotenv: &HashMap<String, String>) -> Option<String> {
    std::env::var(key).ok().or_else(|| dotenv.get(key).cloned())
}

fn get_str(key: &str, dotenv: &HashMap<String, String>, default: &str) -> String {
    get(key, dotenv).unwrap_or_else(|| default.to_string())
}

fn get_bool(key: &str, dotenv: &HashMap<String, String>, default: bool) -> bool {
    match get(key, dotenv).as_deref() {
        Some("true") | Some("1") => true,
        Some("false") | Some("0") => false,
        _ => default,
    }
}

fn get_u16(key: &str, dotenv: &HashMap<String, String>, default: u16) -> u16 {
    get(key, dotenv).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn get_u64(key: &str, dotenv: &HashMap<String, String>, default: u64) -> u64 {
    get(key, dotenv).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn get_list(key: &str, dotenv: &HashMap<String, String>) -> Vec<String> {
    get(key, dotenv)
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn get_list_opt(key: &str, dotenv: &HashMap<String, String>) -> Option<Vec<String>> {
    get(key, dotenv).map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
}

impl Settings {
    pub fn from_env() -> Self {
        let dotenv = parse_dotenv();

        Self {
            bind_addr: get_str("CONDUCTOR_BIND", &dotenv, "0.0.0.0"),
            port: get_u16("CONDUCTOR_PORT", &dotenv, 8080),

            code_host_webhook_secret: get_str("CONDUCTOR_WEBHOOK_SECRET", &dotenv, ""),
            branch_regex: get_str("CONDUCTOR_BRANCH_REGEX", &dotenv, "^master$"),
            robot_emails: get_list("CONDUCTOR_ROBOT_EMAILS", &dotenv),
            no_staging_verification: get_bool("CONDUCTOR_NO_STAGING_VERIFICATION", &dotenv, false),
            no_staging_verification_emails: get_list(
                "CONDUCTOR_NO_STAGING_VERIFICATION_EMAILS",
                &dotenv,
            ),

            delivery_jobs: {
                let jobs = get_list("CONDUCTOR_DELIVERY_JOBS", &dotenv);
                if jobs.is_empty() { vec!["deliver".to_string()] } else { jobs }
            },
            verification_jobs: {
                let jobs = get_list("CONDUCTOR_VERIFICATION_JOBS", &dotenv);
                if jobs.is_empty() { vec!["verify".to_string()] } else { jobs }
            },
            deploy_jobs: {
                let jobs = get_list("CONDUCTOR_DEPLOY_JOBS", &dotenv);
                if jobs.is_empty() { vec!["deploy".to_string()] } else { jobs }
            },
            custom_delivery_jobs: get_list_opt("CONDUCTOR_CUSTOM_DELIVERY_JOBS", &dotenv),
            custom_verification_jobs: get_list_opt("CONDUCTOR_CUSTOM_VERIFICATION_JOBS", &dotenv),
            custom_deploy_jobs: get_list_opt("CONDUCTOR_CUSTOM_DEPLOY_JOBS", &dotenv),

            github_token: get_str("GITHUB_TOKEN", &dotenv, ""),
            github_repo: get_str("GITHUB_REPO", &dotenv, ""),
            github_owner: get_str("GITHUB_OWNER", &dotenv, ""),

            github_oauth_client_id: get_str("GITHUB_OAUTH_CLIENT_ID", &dotenv, ""),
            github_oauth_client_secret: get_str("GITHUB_OAUTH_CLIENT_SECRET", &dotenv, ""),
            admin_emails: get_list("CONDUCTOR_ADMIN_EMAILS", &dotenv),

            jenkins_base_url: get_str("JENKINS_BASE_URL", &dotenv, ""),
            jenkins_user: get_str("JENKINS_USER", &dotenv, ""),
            jenkins_token: get_str("JENKINS_TOKEN", &dotenv, ""),
            jenkins_rollback_job: get_str("JENKINS_ROLLBACK_JOB", &dotenv, ""),

            jira_base_url: get_str("JIRA_BASE_URL", &dotenv, ""),
            jira_user: get_str("JIRA_USER", &dotenv, ""),
            jira_token: get_str("JIRA_TOKEN", &dotenv, ""),
            jira_project: get_str("JIRA_PROJECT", &dotenv, ""),
            jira_parent_issue_type: get_str("JIRA_PARENT_ISSUE_TYPE", &dotenv, "Epic"),
            jira_issue_type: get_str("JIRA_ISSUE_TYPE", &dotenv, "Task"),

            slack_bot_token: get_str("SLACK_BOT_TOKEN", &dotenv, ""),
            slack_channel: get_str("SLACK_CHANNEL", &dotenv, "#conductor"),

            session_signing_key: get_str("CONDUCTOR_SESSION_KEY", &dotenv, "dev-insecure-key"),

            sync_tickets_interval_s: get_u64("CONDUCTOR_SYNC_TICKETS_INTERVAL_S", &dotenv, 10),
            check_jobs_interval_s: get_u64("CONDUCTOR_CHECK_JOBS_INTERVAL_S", &dotenv, 5),
            check_train_lock_interval_s: get_u64(
                "CONDUCTOR_CHECK_TRAIN_LOCK_INTERVAL_S",
                &dotenv,
                5,
            ),
            startup_delay_s: get_u64("CONDUCTOR_STARTUP_DELAY_S", &dotenv, 0),

            hostname: get_str(
                "CONDUCTOR_HOSTNAME",
                &dotenv,
                &std::env::var("HOSTNAME").unwrap_or_else(|_| "conductor".to_string()),
            ),
        }
    }

    /// Resolves the custom-override fallback from §4.3: a configured
    /// `custom_*_jobs` list wins outright over the base list for its phase,
    /// even if set to an empty list; unset (`None`) falls through to base.
    pub fn job_names(&self) -> crate::domain::job::JobNames {
        crate::domain::job::JobNames {
            delivery: self.custom_delivery_jobs.clone().unwrap_or_else(|| self.delivery_jobs.clone()),
            verification: self.custom_verification_jobs.clone().unwrap_or_else(|| self.verification_jobs.clone()),
            deploy: self.custom_deploy_jobs.clone().unwrap_or_else(|| self.deploy_jobs.clone()),
        }
    }

    pub fn is_robot_email(&self, email: &str) -> bool {
        self.robot_emails.iter().any(|e| e.eq_ignore_ascii_case(email))
    }

    pub fn is_no_staging_verification_user(&self, email: &str) -> bool {
        self.no_staging_verification
            || self
                .no_staging_verification_emails
                .iter()
                .any(|e| e.eq_ignore_ascii_case(email))
    }
}
