pub mod auth_github;
pub mod build_jenkins;
pub mod code_github;
pub mod messaging_slack;
pub mod metrics_tracing;
pub mod ticket_jira;

pub use auth_github::GithubAuth;
pub use build_jenkins::JenkinsBuild;
pub use code_github::GithubCode;
pub use messaging_slack::SlackMessaging;
pub use metrics_tracing::TracingMetrics;
pub use ticket_jira::JiraTicket;
