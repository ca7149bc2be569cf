//! Completion predicate and phase replacement (C4). Pure functions over
//! the domain model; no I/O, no locks.

use crate::domain::ticket::Ticket;

/// `multiset(completedJobNames) == multiset(expected)`. `expected` comes
/// from the caller's configured `JobNames` for the phase in question.
pub fn jobs_complete(completed_job_names: &[String], expected: &[String]) -> bool {
    if completed_job_names.len() != expected.len() {
        return false;
    }

    let mut remaining: Vec<&str> = expected.iter().map(String::as_str).collect();
    for name in completed_job_names {
        match remaining.iter().position(|e| *e == name.as_str()) {
            Some(idx) => {
                remaining.swap_remove(idx);
            }
            None => return false,
        }
    }
    remaining.is_empty()
}

/// `JobsComplete ∧ ∀e ∈ extras: e.IsComplete()`. `extras` is the set of
/// tickets for a Verification phase; empty for the other two.
pub fn phase_complete(completed_job_names: &[String], extras: &[Ticket], expected: &[String]) -> bool {
    jobs_complete(completed_job_names, expected) && extras.iter().all(Ticket::is_complete)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ticket(closed: bool) -> Ticket {
        Ticket {
            id: 1,
            train_id: 1,
            key: "T-1".to_string(),
            summary: String::new(),
            assignee_name: String::new(),
            assignee_email: String::new(),
            url: String::new(),
            created_at: Utc::now(),
            closed_at: if closed { Some(Utc::now()) } else { None },
            deleted_at: None,
            commits: Vec::new(),
        }
    }

    #[test]
    fn jobs_complete_requires_exact_multiset_match() {
        let expected = vec!["deliver".to_string()];
        assert!(jobs_complete(&["deliver".to_string()], &expected));
        assert!(!jobs_complete(&[], &expected));
        assert!(!jobs_complete(&["deliver".to_string(), "deliver".to_string()], &expected));
        assert!(!jobs_complete(&["verify".to_string()], &expected));
    }

    #[test]
    fn phase_complete_blocks_on_open_tickets() {
        let jobs = vec!["verify".to_string()];
        assert!(phase_complete(&jobs, &[ticket(true), ticket(true)], &jobs));
        assert!(!phase_complete(&jobs, &[ticket(true), ticket(false)], &jobs));
    }

    #[test]
    fn phase_complete_with_no_extras_only_needs_jobs() {
        let expected = vec!["deploy".to_string()];
        assert!(phase_complete(&["deploy".to_string()], &[], &expected));
    }
}
