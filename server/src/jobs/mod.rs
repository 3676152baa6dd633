//! Bounded table of analysis jobs.
//!
//! Each job sits behind its own reader/writer lock. The [`JobHandle`]
//! returned by [`JobTable::create`] is the only writer; pollers take
//! snapshots under the read lock.

mod types;

pub use types::{AnalysisJob, JobCounts, JobId, JobProgress, JobStatus, ProgressSnapshot};

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::time::{Duration, Instant};

use crate::types::{GameAnalysis, MoveAnalysis, SearchSettings};

/// Unix timestamp in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

struct JobEntry {
    job: AnalysisJob,
    started: Option<Instant>,
    finished: Option<Instant>,
}

impl JobEntry {
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        self.finished.is_some_and(|at| now.saturating_duration_since(at) >= ttl)
    }

    fn finish(&mut self, status: JobStatus) {
        let now = Instant::now();
        self.job.status = status;
        self.job.completed_at = Some(now_millis());
        self.job.processing_time_ms = self
            .started
            .map_or(0, |s| now.saturating_duration_since(s).as_millis() as u64);
        self.finished = Some(now);
    }
}

type SharedEntry = Arc<RwLock<JobEntry>>;

pub struct JobTable {
    jobs: RwLock<HashMap<JobId, SharedEntry>>,
    capacity: usize,
    ttl: Duration,
}

impl JobTable {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Register a queued job, evicting finished ones first if the table is full.
    pub fn create(&self, fingerprint: String, settings: SearchSettings) -> JobHandle {
        let id = JobId::new();
        let entry = Arc::new(RwLock::new(JobEntry {
            job: AnalysisJob {
                id,
                fingerprint,
                settings,
                status: JobStatus::Queued,
                progress: JobProgress::default(),
                result: None,
                error: None,
                partial_moves: Vec::new(),
                created_at: now_millis(),
                started_at: None,
                completed_at: None,
                processing_time_ms: 0,
                from_cache: false,
            },
            started: None,
            finished: None,
        }));

        let mut jobs = write(&self.jobs);
        if jobs.len() >= self.capacity {
            let removed = Self::evict_to(&mut jobs, Instant::now(), self.ttl, self.capacity - 1);
            if jobs.len() >= self.capacity {
                tracing::warn!(removed, active = jobs.len(), "Job table full of active jobs");
            }
        }
        jobs.insert(id, Arc::clone(&entry));
        JobHandle { id, entry }
    }

    fn entry(&self, id: JobId) -> Option<SharedEntry> {
        let now = Instant::now();
        let entry = read(&self.jobs).get(&id).cloned()?;
        if read(&entry).is_expired(now, self.ttl) {
            write(&self.jobs).remove(&id);
            return None;
        }
        Some(entry)
    }

    /// Full job state; None for unknown or expired ids.
    pub fn snapshot(&self, id: JobId) -> Option<AnalysisJob> {
        self.entry(id).map(|e| read(&e).job.clone())
    }

    pub fn progress(&self, id: JobId) -> Option<ProgressSnapshot> {
        self.entry(id).map(|e| {
            let entry = read(&e);
            ProgressSnapshot {
                job_id: id,
                status: entry.job.status,
                progress: entry.job.progress,
                error: entry.job.error.clone(),
            }
        })
    }

    /// Apply the eviction policy as of `now`: expired finished jobs, then
    /// the oldest finished jobs until the table is within capacity. Active
    /// jobs are never evicted.
    pub fn evict(&self, now: Instant) -> usize {
        let mut jobs = write(&self.jobs);
        Self::evict_to(&mut jobs, now, self.ttl, self.capacity)
    }

    fn evict_to(jobs: &mut HashMap<JobId, SharedEntry>, now: Instant, ttl: Duration, target: usize) -> usize {
        let before = jobs.len();
        jobs.retain(|_, e| !read(e).is_expired(now, ttl));

        if jobs.len() > target {
            let mut finished: Vec<(Instant, JobId)> = jobs
                .iter()
                .filter_map(|(id, e)| read(e).finished.map(|at| (at, *id)))
                .collect();
            finished.sort();
            let excess = jobs.len() - target;
            for (_, id) in finished.into_iter().take(excess) {
                jobs.remove(&id);
            }
        }

        let removed = before - jobs.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = jobs.len(), "Evicted jobs");
        }
        removed
    }

    pub fn counts(&self) -> JobCounts {
        let mut counts = JobCounts::default();
        for entry in read(&self.jobs).values() {
            counts.add(read(entry).job.status);
        }
        counts
    }

    pub fn len(&self) -> usize {
        read(&self.jobs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Single writer for one job.
///
/// Dropping a handle whose job has not finished marks it failed, so a job
/// can never be left analysing after its task is gone.
pub struct JobHandle {
    id: JobId,
    entry: SharedEntry,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn snapshot(&self) -> AnalysisJob {
        read(&self.entry).job.clone()
    }

    pub fn status(&self) -> JobStatus {
        read(&self.entry).job.status
    }

    /// queued -> analyzing
    pub fn start(&self, total_moves: u32) {
        let mut entry = write(&self.entry);
        if entry.job.status != JobStatus::Queued {
            return;
        }
        entry.job.status = JobStatus::Analyzing;
        entry.job.started_at = Some(now_millis());
        entry.job.progress.total_moves = total_moves;
        entry.started = Some(Instant::now());
    }

    /// Report `positions_done` of `positions_total` evaluated. Values that
    /// would move progress backwards are ignored.
    pub fn record_progress(&self, positions_done: u32, positions_total: u32, average_ms: u64) {
        let mut entry = write(&self.entry);
        if entry.job.status != JobStatus::Analyzing || positions_total == 0 {
            return;
        }
        let progress = &mut entry.job.progress;
        let done = positions_done.min(positions_total);
        let percentage = (u64::from(done) * 100 / u64::from(positions_total)) as u8;

        progress.current_move = progress.current_move.max(done.saturating_sub(1));
        progress.percentage = progress.percentage.max(percentage);
        progress.average_ms_per_move = average_ms;
        progress.estimated_remaining_ms = u64::from(positions_total - done) * average_ms;
    }

    pub fn push_partial(&self, m: MoveAnalysis) {
        write(&self.entry).job.partial_moves.push(m);
    }

    /// -> completed. The partial list is dropped; the result carries every move.
    pub fn complete(&self, result: GameAnalysis) {
        let mut entry = write(&self.entry);
        if entry.job.status.is_finished() {
            return;
        }
        entry.job.progress.total_moves = result.total_moves;
        entry.job.progress.current_move = result.total_moves;
        entry.job.progress.percentage = 100;
        entry.job.progress.estimated_remaining_ms = 0;
        entry.job.partial_moves.clear();
        entry.job.result = Some(result);
        entry.finish(JobStatus::Completed);
    }

    /// Completed straight from the cache, without an analysing phase.
    pub fn complete_from_cache(&self, result: GameAnalysis) {
        write(&self.entry).job.from_cache = true;
        self.complete(result);
    }

    /// -> failed, keeping partial moves.
    pub fn fail(&self, error: impl Into<String>) {
        let mut entry = write(&self.entry);
        if entry.job.status.is_finished() {
            return;
        }
        entry.job.error = Some(error.into());
        entry.finish(JobStatus::Failed);
    }

    pub fn cancel(&self) {
        let mut entry = write(&self.entry);
        if entry.job.status.is_finished() {
            return;
        }
        entry.finish(JobStatus::Cancelled);
    }
}

impl Drop for JobHandle {
    fn drop(&mut self) {
        let mut entry = write(&self.entry);
        if !entry.job.status.is_finished() {
            tracing::warn!(job_id = %self.id, "Job handle dropped before the job finished");
            entry.job.error = Some("analysis task ended unexpectedly".to_string());
            entry.finish(JobStatus::Failed);
        }
    }
}
