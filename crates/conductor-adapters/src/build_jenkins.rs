//! `BuildPort` over Jenkins' `buildWithParameters` endpoint, Basic-auth
//! like the job trigger it replaces.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use conductor_core::ports::{BuildPort, BuildParams};

pub struct JenkinsBuild {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl JenkinsBuild {
    pub fn new(base_url: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    fn params_for(&self, params: &BuildParams) -> Vec<(&'static str, String)> {
        vec![
            ("TRAIN_ID", params.train_id.to_string()),
            ("PHASE_TYPE", params.phase_type.as_str().to_string()),
            ("DELIVERY_PHASE_ID", params.delivery_phase_id.to_string()),
            ("VERIFICATION_PHASE_ID", params.verification_phase_id.to_string()),
            ("DEPLOY_PHASE_ID", params.deploy_phase_id.to_string()),
            ("BRANCH", params.branch.clone()),
            ("HEAD_SHA", params.head_sha.clone()),
            ("BUILD_USER", params.build_user.clone().unwrap_or_default()),
            ("HOSTNAME", params.hostname.clone().unwrap_or_default()),
        ]
    }
}

#[async_trait]
impl BuildPort for JenkinsBuild {
    async fn trigger_job(&self, params: BuildParams) -> Result<Option<String>> {
        let url = format!("{}/job/{}/buildWithParameters", self.base_url, params.job_name);
        let query = self.params_for(&params);

        let resp = self
            .http
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .query(&query)
            .send()
            .await
            .context("triggering jenkins job")?;

        if resp.status().as_u16() != 201 {
            bail!("jenkins returned {} triggering {}", resp.status(), params.job_name);
        }

        // Jenkins' queue-item Location header, if present, is the closest
        // thing to a job run URL available before the build is scheduled.
        Ok(resp
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string()))
    }
}
