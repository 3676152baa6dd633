//! Per-client token buckets, one per endpoint class.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};

use crate::error::AnalysisError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointClass {
    GameAnalysis,
    PositionAnalysis,
    JobStatus,
    EngineConfig,
}

impl EndpointClass {
    pub const ALL: [Self; 4] = [
        Self::GameAnalysis,
        Self::PositionAnalysis,
        Self::JobStatus,
        Self::EngineConfig,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::GameAnalysis => "game_analysis",
            Self::PositionAnalysis => "position_analysis",
            Self::JobStatus => "job_status",
            Self::EngineConfig => "engine_config",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointQuota {
    pub per_hour: u32,
    /// Bucket capacity
    pub burst: u32,
}

impl EndpointQuota {
    pub const fn new(per_hour: u32, burst: u32) -> Self {
        Self { per_hour, burst }
    }

    fn refill(&self, elapsed: Duration) -> f64 {
        // multiply before dividing so whole refill intervals land exactly on 1.0
        elapsed.as_secs_f64() * f64::from(self.per_hour) / 3600.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateQuotas {
    pub game_analysis: EndpointQuota,
    pub position_analysis: EndpointQuota,
    pub job_status: EndpointQuota,
    pub engine_config: EndpointQuota,
}

impl Default for RateQuotas {
    fn default() -> Self {
        Self {
            game_analysis: EndpointQuota::new(60, 3),
            position_analysis: EndpointQuota::new(600, 10),
            job_status: EndpointQuota::new(3600, 30),
            engine_config: EndpointQuota::new(30, 2),
        }
    }
}

impl RateQuotas {
    pub fn get(&self, class: EndpointClass) -> EndpointQuota {
        match class {
            EndpointClass::GameAnalysis => self.game_analysis,
            EndpointClass::PositionAnalysis => self.position_analysis,
            EndpointClass::JobStatus => self.job_status,
            EndpointClass::EngineConfig => self.engine_config,
        }
    }
}

#[derive(Debug, Clone)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

impl Bucket {
    fn full(quota: &EndpointQuota, now: Instant) -> Self {
        Self {
            tokens: f64::from(quota.burst),
            last_refill: now,
            last_seen: now,
        }
    }

    fn refill(&mut self, quota: &EndpointQuota, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + quota.refill(elapsed)).min(f64::from(quota.burst));
        self.last_refill = now;
    }

    fn is_full(&self, quota: &EndpointQuota, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens + quota.refill(elapsed) >= f64::from(quota.burst)
    }
}

type BucketKey = (String, EndpointClass);

/// Admission control in front of the scheduler.
pub struct RateGuard {
    quotas: RateQuotas,
    max_entries: usize,
    buckets: Mutex<HashMap<BucketKey, Bucket>>,
}

impl RateGuard {
    pub fn new(quotas: RateQuotas, max_entries: usize) -> Self {
        Self {
            quotas,
            max_entries: max_entries.max(1),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<BucketKey, Bucket>> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn quotas(&self) -> &RateQuotas {
        &self.quotas
    }

    /// Take one token for `client` on `class`; false when the bucket is empty.
    pub fn allow(&self, client: &str, class: EndpointClass) -> bool {
        self.try_take(client, class).is_ok()
    }

    /// Like [`allow`](Self::allow) but reports how long until a token is free.
    pub fn check(&self, client: &str, class: EndpointClass) -> Result<(), AnalysisError> {
        self.try_take(client, class)
            .map_err(|retry_after| AnalysisError::RateLimited { retry_after })
    }

    fn try_take(&self, client: &str, class: EndpointClass) -> Result<(), Duration> {
        let quota = self.quotas.get(class);
        let now = Instant::now();
        let mut buckets = self.lock();

        let key = (client.to_string(), class);
        if !buckets.contains_key(&key) && buckets.len() >= self.max_entries {
            Self::cleanup(&mut buckets, &self.quotas, self.max_entries, now);
        }
        let bucket = buckets
            .entry(key)
            .or_insert_with(|| Bucket::full(&quota, now));
        bucket.refill(&quota, now);
        bucket.last_seen = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(());
        }

        let wait = if quota.per_hour > 0 {
            Duration::from_secs_f64((1.0 - bucket.tokens) * 3600.0 / f64::from(quota.per_hour))
        } else {
            Duration::from_secs(3600)
        };
        tracing::debug!(client, class = class.as_str(), retry_after_ms = wait.as_millis() as u64, "Rate limited");
        Err(wait)
    }

    /// Drop idle entries; returns how many were removed.
    ///
    /// A full bucket behaves exactly like a missing one, so those go first.
    /// If the table is still over its ceiling the least-recently-seen half
    /// is dropped as well.
    pub fn evict(&self) -> usize {
        let now = Instant::now();
        let mut buckets = self.lock();
        Self::cleanup(&mut buckets, &self.quotas, self.max_entries, now)
    }

    fn cleanup(
        buckets: &mut HashMap<BucketKey, Bucket>,
        quotas: &RateQuotas,
        max_entries: usize,
        now: Instant,
    ) -> usize {
        let before = buckets.len();
        buckets.retain(|(_, class), bucket| !bucket.is_full(&quotas.get(*class), now));

        if buckets.len() >= max_entries {
            let mut by_age: Vec<(Instant, BucketKey)> = buckets
                .iter()
                .map(|(key, bucket)| (bucket.last_seen, key.clone()))
                .collect();
            by_age.sort_by_key(|(seen, _)| *seen);
            let drop_count = by_age.len() / 2;
            for (_, key) in by_age.into_iter().take(drop_count.max(1)) {
                buckets.remove(&key);
            }
        }

        let removed = before - buckets.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = buckets.len(), "Rate guard cleanup");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> RateGuard {
        RateGuard::new(RateQuotas::default(), 100)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_refill_interval() {
        let guard = guard();
        for _ in 0..3 {
            assert!(guard.allow("1.2.3.4", EndpointClass::GameAnalysis));
        }
        assert!(!guard.allow("1.2.3.4", EndpointClass::GameAnalysis));

        // 60/hour refills one token per minute
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(!guard.allow("1.2.3.4", EndpointClass::GameAnalysis));
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(guard.allow("1.2.3.4", EndpointClass::GameAnalysis));
        assert!(!guard.allow("1.2.3.4", EndpointClass::GameAnalysis));
    }

    #[tokio::test(start_paused = true)]
    async fn test_buckets_are_per_client_and_class() {
        let guard = guard();
        for _ in 0..2 {
            assert!(guard.allow("a", EndpointClass::EngineConfig));
        }
        assert!(!guard.allow("a", EndpointClass::EngineConfig));
        assert!(guard.allow("b", EndpointClass::EngineConfig));
        assert!(guard.allow("a", EndpointClass::JobStatus));
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_reports_retry_after() {
        let guard = guard();
        guard.check("a", EndpointClass::EngineConfig).unwrap();
        guard.check("a", EndpointClass::EngineConfig).unwrap();
        match guard.check("a", EndpointClass::EngineConfig) {
            Err(AnalysisError::RateLimited { retry_after }) => {
                // 30/hour: one token every 120s
                assert_eq!(retry_after.as_secs(), 120);
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_never_exceeds_burst() {
        let guard = guard();
        assert!(guard.allow("a", EndpointClass::GameAnalysis));
        tokio::time::advance(Duration::from_secs(3600)).await;
        for _ in 0..3 {
            assert!(guard.allow("a", EndpointClass::GameAnalysis));
        }
        assert!(!guard.allow("a", EndpointClass::GameAnalysis));
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_drops_full_buckets_first() {
        let guard = guard();
        assert!(guard.allow("idle", EndpointClass::JobStatus));
        for _ in 0..3 {
            assert!(guard.allow("busy", EndpointClass::GameAnalysis));
        }
        // job_status refills a token per second; the game bucket stays drained
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(guard.evict(), 1);
        assert_eq!(guard.len(), 1);
        assert!(!guard.allow("busy", EndpointClass::GameAnalysis));
    }

    #[tokio::test(start_paused = true)]
    async fn test_table_ceiling_drops_least_recently_seen_half() {
        let guard = RateGuard::new(RateQuotas::default(), 4);
        for client in ["a", "b", "c", "d"] {
            for _ in 0..3 {
                assert!(guard.allow(client, EndpointClass::GameAnalysis));
            }
            tokio::time::advance(Duration::from_millis(10)).await;
        }
        assert_eq!(guard.len(), 4);

        assert!(guard.allow("e", EndpointClass::GameAnalysis));
        // "a" and "b" went; drained "c" and "d" stay drained
        assert_eq!(guard.len(), 3);
        assert!(!guard.allow("c", EndpointClass::GameAnalysis));
        assert!(guard.allow("a", EndpointClass::GameAnalysis));
    }
}
