use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::domain::commit::Commit;
use crate::domain::phase::{PhaseGroup, PhaseType};
use crate::domain::ticket::Ticket;
use crate::domain::user::User;

/// An ordered batch of commits on a branch being shepherded through
/// Delivery, Verification, and Deploy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Train {
    pub id: u64,
    pub branch: String,
    pub tail_sha: String,
    pub head_sha: String,
    pub engineer: Option<User>,
    pub created_at: DateTime<Utc>,
    pub deployed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub closed: bool,
    pub schedule_override: bool,
    pub blocked: bool,
    pub blocked_reason: Option<String>,
    /// Tail -> head.
    pub commits: Vec<Commit>,
    pub tickets: Vec<Ticket>,
    pub active_phases: PhaseGroup,
    /// Populated by the persistence port on hydrate; `None` means "this
    /// is the latest train" or "this is the first train" respectively.
    pub previous_id: Option<u64>,
    pub next_id: Option<u64>,
    pub previous_train_done: bool,
    /// Cached by `PhaseGroupDelivered`; `None` until loaded.
    pub last_delivered_sha: Option<String>,
}

impl Train {
    pub fn is_deploying(&self) -> bool {
        self.active_phases.deploy.started_at.is_some() && self.active_phases.deploy.completed_at.is_none()
    }

    pub fn is_deployed(&self) -> bool {
        self.deployed_at.is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled_at.is_some()
    }

    pub fn is_done(&self) -> bool {
        self.is_deployed() || self.is_cancelled()
    }

    /// The furthest-along phase that has been *started*: Deploy if
    /// Deploy has started, else Verification if Verification has
    /// started, else Delivery. Tracks the source's `SetActivePhase`.
    pub fn active_phase_type(&self) -> PhaseType {
        if self.active_phases.deploy.started_at.is_some() {
            PhaseType::Deploy
        } else if self.active_phases.verification.started_at.is_some() {
            PhaseType::Verification
        } else {
            PhaseType::Delivery
        }
    }

    /// §4.4.5.
    pub fn is_deployable(&self) -> bool {
        self.next_id.is_none()
            && self.previous_train_done
            && self.active_phase_type() == PhaseType::Verification
            && self.active_phases.verification.is_complete()
            && self.closed
            && !self.blocked
            && !self.is_done()
    }

    pub fn not_deployable_reason(&self) -> Option<String> {
        if self.is_deployable() || self.active_phase_type() != PhaseType::Verification || self.is_done() {
            return None;
        }

        let reason = if self.next_id.is_some() {
            "Not the latest train.".to_string()
        } else if !self.active_phases.verification.is_complete() {
            "Waiting for verification.".to_string()
        } else if !self.closed {
            "Train is not closed.".to_string()
        } else if self.blocked {
            match &self.blocked_reason {
                Some(r) => format!("Train is blocked due to {r}."),
                None => "Train is blocked.".to_string(),
            }
        } else if !self.previous_train_done {
            "Previous train is still deploying.".to_string()
        } else {
            return None;
        };

        Some(reason)
    }

    pub fn can_rollback(&self, rollback_job_configured: bool) -> bool {
        self.is_done() && rollback_job_configured
    }

    /// Commits from `head_sha` back through the train's head, inclusive
    /// of `head_sha`.
    pub fn commits_since(&self, head_sha: &str) -> Vec<Commit> {
        let end_index = self
            .commits
            .iter()
            .position(|c| c.sha == head_sha)
            .map(|i| i + 1)
            .unwrap_or(self.commits.len());
        self.commits[..end_index].to_vec()
    }

    /// Commits strictly after `tail_sha` up to and including `head_sha`.
    pub fn commits_between(&self, head_sha: &str, tail_sha: &str) -> Vec<Commit> {
        let mut out = Vec::new();
        let mut in_between = false;
        for commit in &self.commits {
            if in_between {
                out.push(commit.clone());
            }
            if commit.sha == tail_sha {
                in_between = true;
            } else if commit.sha == head_sha {
                break;
            }
        }
        out
    }

    /// §4.5 step 1.
    pub fn new_commits_needing_tickets(
        &self,
        head_sha: &str,
        no_staging_verification_flag: bool,
        no_staging_verification_emails: &[String],
    ) -> Vec<Commit> {
        let commits_on_tickets: HashSet<&str> = self
            .tickets
            .iter()
            .flat_map(|t| t.commits.iter().map(|c| c.sha.as_str()))
            .collect();

        self.commits_since(head_sha)
            .into_iter()
            .filter(|commit| {
                if commits_on_tickets.contains(commit.sha.as_str()) {
                    return false;
                }
                if commit.is_no_verify() {
                    return false;
                }
                let is_no_staging_author = no_staging_verification_flag
                    || no_staging_verification_emails
                        .iter()
                        .any(|e| e.eq_ignore_ascii_case(&commit.author_email));
                if is_no_staging_author && !commit.is_needs_staging() {
                    return false;
                }
                true
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::Job;
    use crate::domain::phase::Phase;

    fn commit(sha: &str, email: &str, message: &str) -> Commit {
        Commit {
            id: 0,
            sha: sha.to_string(),
            branch: "master".to_string(),
            author_name: "someone".to_string(),
            author_email: email.to_string(),
            message: message.to_string(),
            url: String::new(),
            created_at: Utc::now(),
        }
    }

    fn empty_phase_group(head_sha: &str) -> PhaseGroup {
        PhaseGroup {
            id: 1,
            head_sha: head_sha.to_string(),
            delivery: Phase::new(1, 1, PhaseType::Delivery, vec![Job::new(1, "deliver")]),
            verification: Phase::new(2, 1, PhaseType::Verification, vec![Job::new(2, "verify")]),
            deploy: Phase::new(3, 1, PhaseType::Deploy, vec![Job::new(3, "deploy")]),
        }
    }

    fn base_train(commits: Vec<Commit>) -> Train {
        Train {
            id: 1,
            branch: "master".to_string(),
            tail_sha: commits.first().unwrap().sha.clone(),
            head_sha: commits.last().unwrap().sha.clone(),
            engineer: None,
            created_at: Utc::now(),
            deployed_at: None,
            cancelled_at: None,
            closed: false,
            schedule_override: false,
            blocked: false,
            blocked_reason: None,
            commits,
            tickets: Vec::new(),
            active_phases: empty_phase_group("c3"),
            previous_id: None,
            next_id: None,
            previous_train_done: true,
            last_delivered_sha: None,
        }
    }

    #[test]
    fn commits_since_is_inclusive_of_head() {
        let commits = vec![commit("c1", "a@x.com", ""), commit("c2", "a@x.com", ""), commit("c3", "a@x.com", "")];
        let train = base_train(commits);
        let since = train.commits_since("c2");
        assert_eq!(since.iter().map(|c| c.sha.clone()).collect::<Vec<_>>(), vec!["c1", "c2"]);
    }

    #[test]
    fn commits_between_excludes_tail_includes_head() {
        let commits = vec![commit("c1", "a@x.com", ""), commit("c2", "a@x.com", ""), commit("c3", "a@x.com", "")];
        let train = base_train(commits);
        let between = train.commits_between("c3", "c1");
        assert_eq!(between.iter().map(|c| c.sha.clone()).collect::<Vec<_>>(), vec!["c2", "c3"]);
    }

    #[test]
    fn no_verify_commit_is_excluded_from_tickets() {
        let commits = vec![commit("c1", "a@x.com", "fix things [no-verify]")];
        let train = base_train(commits);
        assert!(train.new_commits_needing_tickets("c1", false, &[]).is_empty());
    }

    #[test]
    fn no_staging_author_needs_staging_marker_to_get_a_ticket() {
        let commits = vec![commit("c1", "pilot@x.com", "normal change")];
        let train = base_train(commits);
        assert!(train
            .new_commits_needing_tickets("c1", false, &["pilot@x.com".to_string()])
            .is_empty());

        let commits = vec![commit("c1", "pilot@x.com", "change [needs-staging]")];
        let train = base_train(commits);
        assert_eq!(
            train
                .new_commits_needing_tickets("c1", false, &["pilot@x.com".to_string()])
                .len(),
            1
        );
    }

    #[test]
    fn is_deployable_requires_closed_and_unblocked_and_verified() {
        let commits = vec![commit("c1", "a@x.com", "")];
        let mut train = base_train(commits);
        train.active_phases.delivery.started_at = Some(Utc::now());
        train.active_phases.delivery.completed_at = Some(Utc::now());
        train.active_phases.verification.started_at = Some(Utc::now());
        train.active_phases.verification.completed_at = Some(Utc::now());
        train.closed = true;
        assert!(train.is_deployable());

        train.blocked = true;
        assert!(!train.is_deployable());
        assert_eq!(
            train.not_deployable_reason(),
            Some("Train is blocked.".to_string())
        );
    }
}
