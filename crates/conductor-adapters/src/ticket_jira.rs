//! `TicketPort` over the JIRA REST API. One parent issue per train
//! ("Train {id}"), one sub-task per distinct commit author.

use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use conductor_core::domain::commit::Commit;
use conductor_core::domain::ticket::Ticket;
use conductor_core::domain::train::Train;
use conductor_core::ports::{TicketPort, TicketSyncResult};

const DONE_TRANSITION: &str = "Done";

pub struct JiraTicket {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    project: String,
    parent_issue_type: String,
    issue_type: String,
    robot_emails: Vec<String>,
}

impl JiraTicket {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        project: impl Into<String>,
        parent_issue_type: impl Into<String>,
        issue_type: impl Into<String>,
        robot_emails: Vec<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
            project: project.into(),
            parent_issue_type: parent_issue_type.into(),
            issue_type: issue_type.into(),
            robot_emails,
        }
    }

    fn parent_summary(train: &Train) -> String {
        format!("Train {}", train.id)
    }

    async fn search(&self, jql: &str) -> Result<Vec<serde_json::Value>> {
        let url = format!("{}/rest/api/2/search", self.base_url);
        let body: serde_json::Value = self
            .http
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .query(&[("jql", jql)])
            .send()
            .await
            .context("searching jira")?
            .error_for_status()
            .context("jira search returned an error status")?
            .json()
            .await
            .context("decoding jira search response")?;
        Ok(body["issues"].as_array().cloned().unwrap_or_default())
    }

    async fn get_parent_issue(&self, train: &Train) -> Result<Option<serde_json::Value>> {
        let jql = format!(
            "project = {} and summary ~ '{}' ORDER BY createdDate DESC",
            self.project,
            Self::parent_summary(train)
        );
        Ok(self.search(&jql).await?.into_iter().next())
    }

    async fn create_issue(&self, fields: serde_json::Value) -> Result<serde_json::Value> {
        let url = format!("{}/rest/api/2/issue", self.base_url);
        let created: serde_json::Value = self
            .http
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&serde_json::json!({ "fields": fields }))
            .send()
            .await
            .context("creating jira issue")?
            .error_for_status()
            .context("jira issue creation returned an error status")?
            .json()
            .await
            .context("decoding jira issue creation response")?;

        let key = created["key"].as_str().context("created issue missing key")?;
        let url = format!("{}/rest/api/2/issue/{}", self.base_url, key);
        self.http
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .context("re-fetching created jira issue")?
            .error_for_status()?
            .json()
            .await
            .context("decoding re-fetched jira issue")
    }

    async fn close_issues_by_keys(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let transitions_url = format!("{}/rest/api/2/issue/{}/transitions", self.base_url, keys[0]);
        let transitions: serde_json::Value = self
            .http
            .get(&transitions_url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .context("fetching jira transitions")?
            .error_for_status()?
            .json()
            .await
            .context("decoding jira transitions response")?;

        let done_id = transitions["transitions"]
            .as_array()
            .into_iter()
            .flatten()
            .find(|t| t["name"].as_str() == Some(DONE_TRANSITION))
            .and_then(|t| t["id"].as_str())
            .context("could not find the Done transition id")?
            .to_string();

        for key in keys {
            let url = format!("{}/rest/api/2/issue/{}/transitions", self.base_url, key);
            self.http
                .post(&url)
                .basic_auth(&self.username, Some(&self.password))
                .json(&serde_json::json!({ "transition": { "id": done_id } }))
                .send()
                .await
                .with_context(|| format!("transitioning jira issue {key} to done"))?
                .error_for_status()
                .with_context(|| format!("jira transition of {key} returned an error status"))?;
        }
        Ok(())
    }

    fn is_robot(&self, email: &str) -> bool {
        self.robot_emails.iter().any(|r| r.eq_ignore_ascii_case(email))
    }

    fn user_for_issue(issue: &serde_json::Value) -> (String, String) {
        let assignee = &issue["fields"]["assignee"];
        if !assignee.is_null() {
            return (
                assignee["emailAddress"].as_str().unwrap_or_default().to_string(),
                assignee["displayName"].as_str().unwrap_or_default().to_string(),
            );
        }
        let reporter = &issue["fields"]["reporter"];
        (
            reporter["emailAddress"].as_str().unwrap_or_default().to_string(),
            reporter["displayName"].as_str().unwrap_or_default().to_string(),
        )
    }

    fn ticket_from_issue(&self, train_id: u64, issue: &serde_json::Value, commits: Vec<Commit>) -> Ticket {
        let (email, name) = Self::user_for_issue(issue);
        let key = issue["key"].as_str().unwrap_or_default().to_string();
        Ticket {
            id: 0,
            train_id,
            key: key.clone(),
            summary: issue["fields"]["summary"].as_str().unwrap_or_default().to_string(),
            assignee_email: email,
            assignee_name: name,
            url: format!("{}/browse/{}", self.base_url, key),
            created_at: Utc::now(),
            closed_at: None,
            deleted_at: None,
            commits,
        }
    }
}

#[async_trait]
impl TicketPort for JiraTicket {
    async fn create_tickets(&self, train: &Train, commits: &[Commit]) -> Result<Vec<Ticket>> {
        if commits.is_empty() {
            bail!("no commits passed to create_tickets");
        }

        let parent = match self.get_parent_issue(train).await? {
            Some(issue) => issue,
            None => {
                self.create_issue(serde_json::json!({
                    "project": { "key": self.project },
                    "issuetype": { "name": self.parent_issue_type },
                    "summary": Self::parent_summary(train),
                    "assignee": { "name": self.username },
                    "reporter": { "name": self.username },
                }))
                .await?
            }
        };
        let parent_id = parent["id"].as_str().context("parent issue missing id")?.to_string();

        let mut by_email: HashMap<String, Vec<Commit>> = HashMap::new();
        for commit in commits {
            if self.is_robot(&commit.author_email) {
                continue;
            }
            by_email.entry(commit.author_email.clone()).or_default().push(commit.clone());
        }

        let mut tickets = Vec::with_capacity(by_email.len());
        for (_, author_commits) in by_email {
            let first = &author_commits[0];
            let issue = self
                .create_issue(serde_json::json!({
                    "project": { "key": self.project },
                    "issuetype": { "name": self.issue_type },
                    "summary": first.message.lines().next().unwrap_or(&first.message),
                    "parent": { "id": parent_id },
                    "reporter": { "name": self.username },
                }))
                .await?;
            tickets.push(self.ticket_from_issue(train.id, &issue, author_commits));
        }
        Ok(tickets)
    }

    async fn close_tickets(&self, tickets: &[Ticket]) -> Result<()> {
        let keys: Vec<String> = tickets.iter().map(|t| t.key.clone()).collect();
        self.close_issues_by_keys(&keys).await
    }

    async fn delete_tickets(&self, train: &Train) -> Result<()> {
        let parent = self.get_parent_issue(train).await?.context("no parent issue for train")?;
        let key = parent["key"].as_str().context("parent issue missing key")?;
        let url = format!("{}/rest/api/2/issue/{}?deleteSubtasks=true", self.base_url, key);
        self.http
            .delete(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .context("deleting jira issue")?
            .error_for_status()
            .context("jira issue deletion returned an error status")?;
        Ok(())
    }

    async fn sync_tickets(&self, train: &Train) -> Result<TicketSyncResult> {
        let parent = self.get_parent_issue(train).await?.context("no parent issue for train")?;
        let parent_key = parent["key"].as_str().context("parent issue missing key")?;
        let jql = format!(
            "project = {} and parent in ({}) and issuetype = '{}'",
            self.project, parent_key, self.issue_type
        );
        let issues = self.search(&jql).await?;

        let mut by_key: HashMap<&str, &serde_json::Value> =
            issues.iter().filter_map(|i| i["key"].as_str().map(|k| (k, i))).collect();
        let mut known: HashMap<&str, &Ticket> = train.tickets.iter().map(|t| (t.key.as_str(), t)).collect();

        let mut new = Vec::new();
        let mut updated = Vec::new();

        for (key, issue) in by_key.drain() {
            if !known.contains_key(key) {
                new.push(self.ticket_from_issue(train.id, issue, Vec::new()));
            }
        }

        for (key, ticket) in known.drain() {
            let Some(issue) = issues.iter().find(|i| i["key"].as_str() == Some(key)) else {
                if ticket.deleted_at.is_none() {
                    let mut deleted = ticket.clone();
                    deleted.deleted_at = Some(Utc::now());
                    updated.push(deleted);
                }
                continue;
            };

            let mut next = ticket.clone();
            let mut changed = false;

            let issue_done = issue["fields"]["status"]["name"].as_str() == Some(DONE_TRANSITION);
            if issue_done != ticket.closed_at.is_some() {
                next.closed_at = if issue_done { Some(Utc::now()) } else { None };
                changed = true;
            }

            if let Some(summary) = issue["fields"]["summary"].as_str() {
                if summary != ticket.summary {
                    next.summary = summary.to_string();
                    changed = true;
                }
            }

            let (email, name) = Self::user_for_issue(issue);
            if email != ticket.assignee_email {
                next.assignee_email = email;
                changed = true;
            }
            if name != ticket.assignee_name {
                next.assignee_name = name;
                changed = true;
            }

            if changed {
                updated.push(next);
            }
        }

        Ok(TicketSyncResult { new, updated })
    }

    async fn close_train_tickets(&self, train: &Train) -> Result<()> {
        let parent = self.get_parent_issue(train).await?.context("no parent issue for train")?;
        let parent_key = parent["key"].as_str().context("parent issue missing key")?.to_string();
        let jql = format!(
            "project = {} and parent in ({}) and issuetype = '{}'",
            self.project, parent_key, self.issue_type
        );
        let mut keys: Vec<String> = self
            .search(&jql)
            .await?
            .iter()
            .filter_map(|i| i["key"].as_str().map(|s| s.to_string()))
            .collect();
        keys.push(parent_key);
        self.close_issues_by_keys(&keys).await
    }
}
