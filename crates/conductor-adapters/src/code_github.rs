//! `CodePort` over the GitHub REST API (commits/compare) plus push-webhook
//! parsing with HMAC signature verification.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conductor_core::domain::commit::Commit;
use conductor_core::ports::CodePort;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub struct GithubCode {
    http: reqwest::Client,
    token: String,
    owner: String,
    repo: String,
    webhook_secret: String,
}

impl GithubCode {
    pub fn new(token: impl Into<String>, owner: impl Into<String>, repo: impl Into<String>, webhook_secret: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .user_agent("conductor (github-code-adapter)")
                .build()
                .unwrap_or_default(),
            token: token.into(),
            owner: owner.into(),
            repo: repo.into(),
            webhook_secret: webhook_secret.into(),
        }
    }

    fn commits_url(&self, branch: &str, max: usize) -> String {
        format!(
            "https://api.github.com/repos/{}/{}/commits?sha={}&per_page={}",
            self.owner, self.repo, branch, max
        )
    }

    async fn fetch_commits(&self, url: &str, branch: &str) -> Result<Vec<Commit>> {
        let body: serde_json::Value = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .context("requesting commits from github")?
            .error_for_status()
            .context("github commits request returned an error status")?
            .json()
            .await
            .context("decoding github commits response")?;

        let entries = body.as_array().cloned().unwrap_or_default();
        entries.iter().map(|entry| parse_commit(entry, branch)).collect()
    }
}

fn parse_commit(entry: &serde_json::Value, branch: &str) -> Result<Commit> {
    let sha = entry["sha"].as_str().context("commit missing sha")?.to_string();
    let commit = &entry["commit"];
    Ok(Commit {
        id: 0,
        sha,
        branch: branch.to_string(),
        author_name: commit["author"]["name"].as_str().unwrap_or_default().to_string(),
        author_email: commit["author"]["email"].as_str().unwrap_or_default().to_string(),
        message: commit["message"].as_str().unwrap_or_default().to_string(),
        url: entry["html_url"].as_str().unwrap_or_default().to_string(),
        created_at: commit["author"]["date"]
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(Utc::now),
    })
}

#[async_trait]
impl CodePort for GithubCode {
    async fn commits_on_branch(&self, branch: &str, max: usize) -> Result<Vec<Commit>> {
        self.fetch_commits(&self.commits_url(branch, max), branch).await
    }

    async fn commits_on_branch_after(&self, branch: &str, sha: &str) -> Result<Vec<Commit>> {
        let all = self.fetch_commits(&self.commits_url(branch, 100), branch).await?;
        // GitHub returns newest-first; keep everything strictly after `sha`, tail-to-head order.
        let mut after = Vec::new();
        for commit in all.into_iter() {
            if commit.sha == sha {
                break;
            }
            after.push(commit);
        }
        after.reverse();
        Ok(after)
    }

    async fn compare_refs(&self, old: &str, new: &str) -> Result<Vec<Commit>> {
        let url = format!(
            "https://api.github.com/repos/{}/{}/compare/{}...{}",
            self.owner, self.repo, old, new
        );
        let body: serde_json::Value = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .context("requesting compare from github")?
            .error_for_status()
            .context("github compare request returned an error status")?
            .json()
            .await
            .context("decoding github compare response")?;

        body["commits"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .iter()
            .map(|entry| parse_commit(entry, new))
            .collect()
    }

    fn parse_webhook_for_branch(&self, body: &[u8], headers: &[(String, String)]) -> Result<Option<String>> {
        let signature = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("x-hub-signature-256"))
            .map(|(_, value)| value.as_str())
            .context("missing x-hub-signature-256 header")?;
        verify_signature(&self.webhook_secret, body, signature)?;

        let event = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("x-github-event"))
            .map(|(_, value)| value.as_str())
            .unwrap_or_default();
        if event != "push" {
            return Ok(None);
        }

        let payload: serde_json::Value = serde_json::from_slice(body).context("decoding push webhook body")?;
        let ref_field = match payload["ref"].as_str() {
            Some(r) => r,
            None => return Ok(None),
        };
        Ok(ref_field.strip_prefix("refs/heads/").map(|b| b.to_string()))
    }
}

fn verify_signature(secret: &str, body: &[u8], header_value: &str) -> Result<()> {
    let expected_hex = header_value.strip_prefix("sha256=").context("unexpected signature format")?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).context("invalid webhook secret")?;
    mac.update(body);
    let computed = mac.finalize().into_bytes();
    let expected = hex_decode(expected_hex)?;
    if computed.as_slice() != expected.as_slice() {
        bail!("webhook signature mismatch");
    }
    Ok(())
}

fn hex_decode(s: &str) -> Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        bail!("odd-length hex signature");
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).context("invalid hex digit in signature"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_verification_rejects_wrong_secret() {
        let body = b"{\"ref\":\"refs/heads/master\"}";
        let mut mac = HmacSha256::new_from_slice(b"correct").unwrap();
        mac.update(body);
        let sig = format!("sha256={}", hex_encode(&mac.finalize().into_bytes()));
        assert!(verify_signature("wrong", body, &sig).is_err());
        assert!(verify_signature("correct", body, &sig).is_ok());
    }

    fn hex_encode(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }
}
