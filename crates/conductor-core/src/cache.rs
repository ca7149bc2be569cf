//! Short-lived cache over `latestTrain()` reads (§4.7). Process-local,
//! TTL 5s, invalidated on any write that changes the latest train's
//! identity. Background loops bypass this and read the store directly.

use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::domain::train::Train;

const TTL: Duration = Duration::from_secs(5);

struct Entry {
    train: Option<Train>,
    cached_at: Instant,
}

pub struct LatestTrainCache {
    inner: RwLock<Option<Entry>>,
}

impl Default for LatestTrainCache {
    fn default() -> Self {
        Self::new()
    }
}

impl LatestTrainCache {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    pub async fn get(&self) -> Option<CacheHit> {
        let guard = self.inner.read().await;
        let entry = guard.as_ref()?;
        if entry.cached_at.elapsed() >= TTL {
            return None;
        }
        Some(CacheHit(entry.train.clone()))
    }

    pub async fn set(&self, train: Option<Train>) {
        let mut guard = self.inner.write().await;
        *guard = Some(Entry {
            train,
            cached_at: Instant::now(),
        });
    }

    pub async fn invalidate(&self) {
        let mut guard = self.inner.write().await;
        *guard = None;
    }
}

/// Wraps the cached value so "cache hit, no train exists" is
/// distinguishable from "cache miss".
pub struct CacheHit(pub Option<Train>);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::phase::{Phase, PhaseGroup, PhaseType};
    use crate::domain::job::Job;
    use chrono::Utc;

    fn sample_train() -> Train {
        Train {
            id: 1,
            branch: "master".to_string(),
            tail_sha: "a".to_string(),
            head_sha: "a".to_string(),
            engineer: None,
            created_at: Utc::now(),
            deployed_at: None,
            cancelled_at: None,
            closed: false,
            schedule_override: false,
            blocked: false,
            blocked_reason: None,
            commits: Vec::new(),
            tickets: Vec::new(),
            active_phases: PhaseGroup {
                id: 1,
                head_sha: "a".to_string(),
                delivery: Phase::new(1, 1, PhaseType::Delivery, vec![Job::new(1, "deliver")]),
                verification: Phase::new(2, 1, PhaseType::Verification, vec![Job::new(2, "verify")]),
                deploy: Phase::new(3, 1, PhaseType::Deploy, vec![Job::new(3, "deploy")]),
            },
            previous_id: None,
            next_id: None,
            previous_train_done: true,
            last_delivered_sha: None,
        }
    }

    #[tokio::test]
    async fn miss_before_any_set() {
        let cache = LatestTrainCache::new();
        assert!(cache.get().await.is_none());
    }

    #[tokio::test]
    async fn hit_returns_set_value() {
        let cache = LatestTrainCache::new();
        cache.set(Some(sample_train())).await;
        let hit = cache.get().await.expect("should be a hit");
        assert_eq!(hit.0.unwrap().id, 1);
    }

    #[tokio::test]
    async fn invalidate_forces_a_miss() {
        let cache = LatestTrainCache::new();
        cache.set(Some(sample_train())).await;
        cache.invalidate().await;
        assert!(cache.get().await.is_none());
    }
}
