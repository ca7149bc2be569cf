//! `AuthPort` over GitHub's OAuth2 web flow: exchange a short-lived
//! `code` for an access token, then resolve the caller's identity.

use anyhow::{Context, Result};
use async_trait::async_trait;
use conductor_core::ports::{AuthPort, AuthedUser, Role};

pub struct GithubAuth {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    admin_emails: Vec<String>,
}

impl GithubAuth {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>, admin_emails: Vec<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            admin_emails,
        }
    }

    fn role_for(&self, email: &str) -> Role {
        if self.admin_emails.iter().any(|e| e.eq_ignore_ascii_case(email)) {
            Role::Admin
        } else {
            Role::User
        }
    }
}

#[async_trait]
impl AuthPort for GithubAuth {
    async fn authenticate(&self, credential: &str) -> Result<AuthedUser> {
        let token_resp: serde_json::Value = self
            .http
            .post("https://github.com/login/oauth/access_token")
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", credential),
            ])
            .send()
            .await
            .context("exchanging oauth code with github")?
            .json()
            .await
            .context("decoding github oauth token response")?;

        let access_token = token_resp["access_token"]
            .as_str()
            .context("github did not return an access_token")?;

        let profile: serde_json::Value = self
            .http
            .get("https://api.github.com/user")
            .bearer_auth(access_token)
            .header("User-Agent", "conductor (github-auth-adapter)")
            .send()
            .await
            .context("fetching github user profile")?
            .error_for_status()
            .context("github user profile request returned an error status")?
            .json()
            .await
            .context("decoding github user profile")?;

        let email = profile["email"].as_str().context("github profile has no public email")?.to_string();
        let name = profile["name"]
            .as_str()
            .or_else(|| profile["login"].as_str())
            .unwrap_or_default()
            .to_string();
        let role = self.role_for(&email);

        Ok(AuthedUser { email, name, role })
    }
}
