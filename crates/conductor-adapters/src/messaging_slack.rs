//! `MessagingPort` over Slack's `chat.postMessage` Web API.

use anyhow::{Context, Result};
use async_trait::async_trait;
use conductor_core::domain::commit::Commit;
use conductor_core::domain::ticket::Ticket;
use conductor_core::domain::train::Train;
use conductor_core::ports::MessagingPort;
use tracing::error;

pub struct SlackMessaging {
    http: reqwest::Client,
    token: String,
    channel: String,
}

impl SlackMessaging {
    pub fn new(token: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            token: token.into(),
            channel: channel.into(),
        }
    }

    async fn post(&self, text: &str) -> Result<()> {
        let resp: serde_json::Value = self
            .http
            .post("https://slack.com/api/chat.postMessage")
            .bearer_auth(&self.token)
            .json(&serde_json::json!({
                "channel": self.channel,
                "text": text,
                "as_user": true,
            }))
            .send()
            .await
            .context("posting to slack")?
            .json()
            .await
            .context("decoding slack response")?;

        if resp["ok"].as_bool() != Some(true) {
            error!(slack_error = %resp["error"], "slack rejected the message");
        }
        Ok(())
    }

    fn train_summary(train: &Train) -> String {
        format!("Train {} ({})", train.id, train.branch)
    }
}

#[async_trait]
impl MessagingPort for SlackMessaging {
    async fn notify_created(&self, train: &Train) -> Result<()> {
        self.post(&format!("{} created at {}", Self::train_summary(train), &train.head_sha[..7.min(train.head_sha.len())])).await
    }

    async fn notify_extended(&self, train: &Train) -> Result<()> {
        self.post(&format!("{} extended to {}", Self::train_summary(train), &train.head_sha[..7.min(train.head_sha.len())])).await
    }

    async fn notify_duplicated(&self, train: &Train) -> Result<()> {
        self.post(&format!("{} opened from a closed predecessor", Self::train_summary(train))).await
    }

    async fn notify_delivered(&self, train: &Train, new_commits: &[Commit], tickets: &[Ticket]) -> Result<()> {
        self.post(&format!(
            "{} delivered {} new commit(s), {} ticket(s) opened",
            Self::train_summary(train),
            new_commits.len(),
            tickets.len()
        ))
        .await
    }

    async fn notify_verified(&self, train: &Train) -> Result<()> {
        self.post(&format!("{} verified", Self::train_summary(train))).await
    }

    async fn notify_unverified(&self, train: &Train) -> Result<()> {
        self.post(&format!("{} is no longer verified, new commits arrived", Self::train_summary(train))).await
    }

    async fn notify_deploying(&self, train: &Train) -> Result<()> {
        self.post(&format!("{} is deploying", Self::train_summary(train))).await
    }

    async fn notify_deployed(&self, train: &Train) -> Result<()> {
        self.post(&format!("{} deployed", Self::train_summary(train))).await
    }

    async fn notify_closed(&self, train: &Train) -> Result<()> {
        self.post(&format!("{} closed", Self::train_summary(train))).await
    }

    async fn notify_opened(&self, train: &Train) -> Result<()> {
        self.post(&format!("{} reopened", Self::train_summary(train))).await
    }

    async fn notify_blocked(&self, train: &Train) -> Result<()> {
        let reason = train.blocked_reason.clone().unwrap_or_default();
        self.post(&format!("{} blocked: {}", Self::train_summary(train), reason)).await
    }

    async fn notify_unblocked(&self, train: &Train) -> Result<()> {
        self.post(&format!("{} unblocked", Self::train_summary(train))).await
    }

    async fn notify_cancelled(&self, train: &Train) -> Result<()> {
        self.post(&format!("{} cancelled", Self::train_summary(train))).await
    }

    async fn notify_rollback(&self, train: &Train) -> Result<()> {
        self.post(&format!("Rolling back {}", Self::train_summary(train))).await
    }

    async fn notify_job_failed(&self, train: &Train, job_name: &str) -> Result<()> {
        self.post(&format!("{}: job `{}` failed", Self::train_summary(train), job_name)).await
    }
}
