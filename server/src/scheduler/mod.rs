//! Turns requests into pool work: background game jobs, synchronous
//! position lookups, engine reconfiguration and periodic maintenance.

mod game;
mod position;

use std::sync::{Arc, Mutex, PoisonError, Weak};

use engine::{AnalysisContempt, EngineFactory, EngineOptions, WorkerPool};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::Instrument;

use crate::cache::{CacheStats, ResultCache};
use crate::config::ServerConfig;
use crate::error::AnalysisError;
use crate::jobs::{AnalysisJob, JobCounts, JobId, JobTable, ProgressSnapshot};
use crate::openings::OpeningBook;
use crate::rate_guard::RateGuard;
use crate::types::{GameAnalysis, PositionResult, SearchSettings};

/// Options accepted with a game. Unset or zero depth and time both mean
/// "use the server defaults"; setting either one disables the other's default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameOptions {
    pub depth: Option<i64>,
    pub time_per_move_ms: Option<i64>,
    pub multi_pv: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionOptions {
    pub depth: Option<i64>,
    pub time_limit_ms: Option<i64>,
    pub multi_pv: Option<i64>,
}

/// Engine option changes; unset fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfigUpdate {
    pub threads: Option<i64>,
    pub hash: Option<i64>,
    pub contempt: Option<i64>,
    pub analysis_contempt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfigResponse {
    pub options: EngineOptions,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    pub games_expired: usize,
    pub positions_expired: usize,
    pub jobs_evicted: usize,
    pub clients_evicted: usize,
}

/// Bounds and defaults for search settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisLimits {
    pub default_depth: u32,
    pub max_depth: u32,
    pub default_time_ms: u64,
    pub max_time_ms: u64,
    pub default_multi_pv: u32,
    pub max_multi_pv: u32,
}

impl AnalysisLimits {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            default_depth: config.default_depth,
            max_depth: config.max_depth,
            default_time_ms: config.default_time_ms,
            max_time_ms: config.max_time_ms,
            default_multi_pv: config.default_multi_pv,
            max_multi_pv: config.max_multi_pv,
        }
    }

    /// Validate raw request values and fill in defaults.
    pub fn resolve(
        &self,
        depth: Option<i64>,
        time_ms: Option<i64>,
        multi_pv: Option<i64>,
    ) -> Result<SearchSettings, AnalysisError> {
        let depth = in_range("depth", depth, 0, i64::from(self.max_depth))?;
        let time_ms = in_range("timeLimit", time_ms, 0, i64::try_from(self.max_time_ms).unwrap_or(i64::MAX))?;
        let multi_pv = in_range("multiPv", multi_pv, 1, i64::from(self.max_multi_pv))?;

        let (depth, time_ms) = match (depth.unwrap_or(0), time_ms.unwrap_or(0)) {
            (0, 0) => (self.default_depth, self.default_time_ms),
            (d, t) => (d as u32, t as u64),
        };
        Ok(SearchSettings {
            depth,
            time_limit_ms: time_ms,
            multi_pv: multi_pv.map_or(self.default_multi_pv, |n| n as u32),
        })
    }
}

fn in_range(name: &str, value: Option<i64>, min: i64, max: i64) -> Result<Option<i64>, AnalysisError> {
    match value {
        Some(v) if v < min || v > max => Err(AnalysisError::validation(format!(
            "{name} must be between {min} and {max} (got {v})"
        ))),
        other => Ok(other),
    }
}

pub struct Scheduler<F: EngineFactory> {
    pool: Arc<WorkerPool<F>>,
    jobs: JobTable,
    games: ResultCache<GameAnalysis>,
    positions: ResultCache<PositionResult>,
    rate_guard: Arc<RateGuard>,
    book: Arc<dyn OpeningBook>,
    limits: AnalysisLimits,
    cache_ttl: Duration,
    options: Mutex<EngineOptions>,
}

impl<F: EngineFactory> Scheduler<F> {
    pub fn new(
        pool: Arc<WorkerPool<F>>,
        config: &ServerConfig,
        book: Arc<dyn OpeningBook>,
        rate_guard: Arc<RateGuard>,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool,
            jobs: JobTable::new(config.job_max_entries, config.job_ttl),
            games: ResultCache::new(config.cache_max_entries),
            positions: ResultCache::new(config.cache_max_entries),
            rate_guard,
            book,
            limits: AnalysisLimits::from_config(config),
            cache_ttl: config.cache_ttl,
            options: Mutex::new(config.engine_options.clone()),
        })
    }

    pub fn pool(&self) -> &Arc<WorkerPool<F>> {
        &self.pool
    }

    pub fn rate_guard(&self) -> &Arc<RateGuard> {
        &self.rate_guard
    }

    pub fn limits(&self) -> &AnalysisLimits {
        &self.limits
    }

    pub fn job_counts(&self) -> JobCounts {
        self.jobs.counts()
    }

    pub fn game_cache_stats(&self) -> CacheStats {
        self.games.stats()
    }

    pub fn position_cache_stats(&self) -> CacheStats {
        self.positions.stats()
    }

    /// Queue a game for analysis and return its job id without waiting.
    ///
    /// A cached result for the same moves and settings yields a job that is
    /// already completed.
    pub fn submit_game(self: &Arc<Self>, pgn: &str, options: &GameOptions) -> Result<JobId, AnalysisError> {
        if pgn.trim().is_empty() {
            return Err(AnalysisError::validation("pgn must not be empty"));
        }
        let settings = self
            .limits
            .resolve(options.depth, options.time_per_move_ms, options.multi_pv)?;
        let game = chess::parse_pgn(pgn)?;
        let key = format!("game|{}|{}", game.fingerprint(), settings.cache_suffix());

        let handle = self.jobs.create(key.clone(), settings);
        let job_id = handle.id();

        if let Some(result) = self.games.get(&key) {
            tracing::info!(%job_id, moves = result.total_moves, "Game served from cache");
            handle.complete_from_cache(result);
            return Ok(job_id);
        }

        tracing::info!(%job_id, moves = game.moves.len(), depth = settings.depth, "Game analysis queued");
        let this = Arc::clone(self);
        let span = tracing::info_span!("game_analysis", %job_id);
        tokio::spawn(
            async move {
                handle.start(game.moves.len() as u32);
                let outcome = this
                    .games
                    .get_or_compute(&key, this.cache_ttl, || {
                        game::analyze_game(&this.pool, this.book.as_ref(), &handle, &game, settings)
                    })
                    .await;
                match outcome {
                    Ok((result, coalesced)) => {
                        tracing::info!(
                            coalesced,
                            white_accuracy = result.summary.white.accuracy,
                            black_accuracy = result.summary.black.accuracy,
                            "Game analysis complete"
                        );
                        if coalesced {
                            handle.complete_from_cache(result);
                        } else {
                            handle.complete(result);
                        }
                    }
                    Err(e) => {
                        tracing::error!("Game analysis failed: {}", e);
                        handle.fail(e.to_string());
                    }
                }
            }
            .instrument(span),
        );

        Ok(job_id)
    }

    /// Evaluate one position. Inputs are validated before the pool is touched.
    pub async fn submit_position(&self, fen: &str, options: &PositionOptions) -> Result<PositionResult, AnalysisError> {
        let fen = fen.trim();
        if fen.is_empty() {
            return Err(AnalysisError::validation("fen must not be empty"));
        }
        let settings = self
            .limits
            .resolve(options.depth, options.time_limit_ms, options.multi_pv)?;
        let board = chess::parse_fen(fen)?;
        let fen = chess::format_fen(&board);
        let key = format!("position|{fen}|{}", settings.cache_suffix());

        let (mut result, cached) = self
            .positions
            .get_or_compute(&key, self.cache_ttl, || {
                position::analyze_position(&self.pool, &board, &fen, settings)
            })
            .await?;
        result.cached = cached;
        Ok(result)
    }

    pub fn get_progress(&self, id: JobId) -> Result<ProgressSnapshot, AnalysisError> {
        self.jobs
            .progress(id)
            .ok_or_else(|| AnalysisError::JobNotFound(id.to_string()))
    }

    pub fn get_result(&self, id: JobId) -> Result<AnalysisJob, AnalysisError> {
        self.jobs
            .snapshot(id)
            .ok_or_else(|| AnalysisError::JobNotFound(id.to_string()))
    }

    /// Validate an option update and broadcast it to every worker.
    pub async fn reconfigure(&self, update: &EngineConfigUpdate) -> Result<EngineConfigResponse, AnalysisError> {
        let threads = in_range("threads", update.threads, 1, 16)?;
        let hash = in_range("hash", update.hash, 1, 2048)?;
        let contempt = in_range("contempt", update.contempt, -100, 100)?;
        let analysis_contempt = update
            .analysis_contempt
            .as_deref()
            .map(|s| s.parse::<AnalysisContempt>())
            .transpose()
            .map_err(AnalysisError::Validation)?;

        if threads.is_none() && hash.is_none() && contempt.is_none() && analysis_contempt.is_none() {
            return Err(AnalysisError::validation("no engine options given"));
        }

        let options = {
            let mut current = self.options.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(t) = threads {
                current.threads = t as u32;
            }
            if let Some(h) = hash {
                current.hash_mb = h as u32;
            }
            if let Some(c) = contempt {
                current.contempt = c as i32;
            }
            if let Some(a) = analysis_contempt {
                current.analysis_contempt = a;
            }
            current.clone()
        };

        let generation = self.pool.reconfigure(options.clone()).await;
        Ok(EngineConfigResponse { options, generation })
    }

    /// One sweep over caches, the job table and the rate guard.
    pub fn run_maintenance(&self) -> MaintenanceReport {
        let report = MaintenanceReport {
            games_expired: self.games.evict_expired(),
            positions_expired: self.positions.evict_expired(),
            jobs_evicted: self.jobs.evict(Instant::now()),
            clients_evicted: self.rate_guard.evict(),
        };
        tracing::debug!(?report, "Maintenance sweep");
        report
    }

    /// Run [`run_maintenance`](Self::run_maintenance) every `interval` until
    /// the scheduler is dropped.
    pub fn spawn_maintenance(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(this) = weak.upgrade() else {
                    break;
                };
                this.run_maintenance();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::mock::MockEngineFactory;
    use engine::PoolConfig;

    use crate::error::ErrorKind;
    use crate::jobs::JobStatus;
    use crate::openings::NoOpeningBook;
    use crate::rate_guard::RateQuotas;

    fn limits() -> AnalysisLimits {
        AnalysisLimits::from_config(&ServerConfig::default())
    }

    async fn scheduler(factory: MockEngineFactory, config: ServerConfig) -> Arc<Scheduler<MockEngineFactory>> {
        let pool = WorkerPool::start(
            factory,
            PoolConfig {
                size: 2,
                acquire_timeout: Duration::from_secs(5),
                options: config.engine_options.clone(),
            },
        )
        .await
        .unwrap();
        let guard = Arc::new(RateGuard::new(RateQuotas::default(), 100));
        Scheduler::new(pool, &config, Arc::new(NoOpeningBook), guard)
    }

    async fn wait_finished(s: &Scheduler<MockEngineFactory>, id: JobId) -> AnalysisJob {
        for _ in 0..500 {
            let job = s.get_result(id).unwrap();
            if job.status.is_finished() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {id} did not finish");
    }

    #[test]
    fn test_resolve_defaults_and_bounds() {
        let l = limits();
        let s = l.resolve(None, None, None).unwrap();
        assert_eq!((s.depth, s.time_limit_ms, s.multi_pv), (12, 1000, 2));

        let s = l.resolve(Some(1), None, Some(1)).unwrap();
        assert_eq!((s.depth, s.time_limit_ms), (1, 0));

        let s = l.resolve(Some(0), Some(0), None).unwrap();
        assert_eq!((s.depth, s.time_limit_ms), (12, 1000));

        assert!(l.resolve(Some(-1), None, None).is_err());
        assert!(l.resolve(Some(31), None, None).is_err());
        assert!(l.resolve(None, Some(40_000), None).is_err());
        assert!(l.resolve(None, Some(-5), None).is_err());
        assert!(l.resolve(None, None, Some(0)).is_err());
        assert!(l.resolve(None, None, Some(6)).is_err());
    }

    proptest::proptest! {
        #[test]
        fn prop_resolved_settings_stay_in_bounds(depth in -50i64..50, time in -1000i64..50_000, lines in -2i64..8) {
            let l = limits();
            match l.resolve(Some(depth), Some(time), Some(lines)) {
                Ok(s) => {
                    proptest::prop_assert!(s.depth <= l.max_depth);
                    proptest::prop_assert!(s.time_limit_ms <= l.max_time_ms);
                    proptest::prop_assert!((1..=l.max_multi_pv).contains(&s.multi_pv));
                }
                Err(e) => proptest::prop_assert_eq!(e.kind(), ErrorKind::ValidationError),
            }
        }
    }

    #[tokio::test]
    async fn test_game_job_completes_with_summary() {
        let s = scheduler(MockEngineFactory::new(), ServerConfig::default()).await;
        let options = GameOptions {
            depth: Some(2),
            ..Default::default()
        };
        let id = s.submit_game("1. e4 e5 2. Nf3 Nc6 *", &options).unwrap();
        let job = wait_finished(&s, id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.error.is_none());
        let result = job.result.unwrap();
        assert_eq!(result.analysis.moves.len(), 4);
        assert_eq!(result.total_moves, 4);
        assert_eq!(job.progress.percentage, 100);
        assert_eq!(
            result.summary.white.classifications.total() + result.summary.black.classifications.total(),
            4
        );
    }

    #[tokio::test]
    async fn test_second_submission_is_served_from_cache() {
        let factory = MockEngineFactory::new();
        let s = scheduler(factory.clone(), ServerConfig::default()).await;
        let options = GameOptions {
            depth: Some(1),
            ..Default::default()
        };
        let first = s.submit_game("1. d4 d5", &options).unwrap();
        wait_finished(&s, first).await;
        let evaluations = factory.evaluation_count();

        let second = s.submit_game("1.d4 d5 *", &options).unwrap();
        let job = s.get_result(second).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.from_cache);
        assert_eq!(factory.evaluation_count(), evaluations);
    }

    #[tokio::test]
    async fn test_concurrent_identical_games_share_one_analysis() {
        let factory = MockEngineFactory::new().with_delay(Duration::from_millis(20));
        let s = scheduler(factory.clone(), ServerConfig::default()).await;
        let options = GameOptions {
            depth: Some(1),
            ..Default::default()
        };
        let first = s.submit_game("1. e4 e5 2. Nf3", &options).unwrap();
        let second = s.submit_game("1. e4 e5 2. Nf3 *", &options).unwrap();
        assert_ne!(first, second);

        let a = wait_finished(&s, first).await;
        let b = wait_finished(&s, second).await;
        assert_eq!(a.status, JobStatus::Completed);
        assert_eq!(b.status, JobStatus::Completed);
        assert_eq!(usize::from(a.from_cache) + usize::from(b.from_cache), 1);
        assert_eq!(a.result.unwrap().total_moves, 3);
        assert_eq!(b.result.unwrap().total_moves, 3);

        // three plies plus the starting position, searched once
        assert_eq!(factory.evaluation_count(), 4);
        assert_eq!(s.game_cache_stats().computations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_failure_fails_job_and_keeps_partials() {
        let factory = MockEngineFactory::new().with_delay(Duration::from_millis(10));
        let s = scheduler(factory.clone(), ServerConfig::default()).await;
        let options = GameOptions {
            depth: Some(1),
            ..Default::default()
        };
        let id = s.submit_game("1. e4 e5 2. Nf3 Nc6", &options).unwrap();

        // two positions done, the third one in flight
        tokio::time::sleep(Duration::from_millis(25)).await;
        factory.time_out_next_evaluations(1);

        let job = wait_finished(&s, id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.result.is_none());
        assert!(job.error.as_deref().unwrap_or_default().contains("timed out"));
        assert_eq!(job.partial_moves.len(), 1);
        assert_eq!(job.partial_moves[0].san, "e4");
    }

    #[tokio::test]
    async fn test_invalid_input_is_rejected_up_front() {
        let factory = MockEngineFactory::new();
        let s = scheduler(factory.clone(), ServerConfig::default()).await;
        assert!(matches!(
            s.submit_game("   ", &GameOptions::default()),
            Err(AnalysisError::Validation(_))
        ));
        assert!(matches!(
            s.submit_game("1. e5", &GameOptions::default()),
            Err(AnalysisError::Validation(_))
        ));
        assert!(matches!(
            s.submit_position("not a fen", &PositionOptions::default()).await,
            Err(AnalysisError::Validation(_))
        ));
        assert_eq!(factory.evaluation_count(), 0);
        assert_eq!(s.job_counts().total(), 0);
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let s = scheduler(MockEngineFactory::new(), ServerConfig::default()).await;
        assert!(matches!(
            s.get_progress(JobId::new()),
            Err(AnalysisError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reconfigure_validates_and_broadcasts() {
        let factory = MockEngineFactory::new();
        let s = scheduler(factory.clone(), ServerConfig::default()).await;

        let bad = EngineConfigUpdate {
            threads: Some(64),
            ..Default::default()
        };
        assert!(matches!(s.reconfigure(&bad).await, Err(AnalysisError::Validation(_))));
        let bad = EngineConfigUpdate {
            analysis_contempt: Some("always".into()),
            ..Default::default()
        };
        assert!(matches!(s.reconfigure(&bad).await, Err(AnalysisError::Validation(_))));
        assert!(s.reconfigure(&EngineConfigUpdate::default()).await.is_err());

        let update = EngineConfigUpdate {
            threads: Some(2),
            analysis_contempt: Some("White".into()),
            ..Default::default()
        };
        let response = s.reconfigure(&update).await.unwrap();
        assert_eq!(response.options.threads, 2);
        assert_eq!(response.options.hash_mb, 64);
        assert_eq!(response.options.analysis_contempt, AnalysisContempt::White);
        assert_eq!(factory.engines_with_options(&response.options), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_expires_cached_positions() {
        let config = ServerConfig {
            cache_ttl: Duration::from_secs(10),
            ..ServerConfig::default()
        };
        let s = scheduler(MockEngineFactory::new(), config).await;
        let options = PositionOptions {
            depth: Some(1),
            ..Default::default()
        };
        s.submit_position(chess::START_FEN, &options).await.unwrap();
        assert_eq!(s.position_cache_stats().entries, 1);

        tokio::time::advance(Duration::from_secs(11)).await;
        let report = s.run_maintenance();
        assert_eq!(report.positions_expired, 1);
        assert_eq!(s.position_cache_stats().entries, 0);
    }
}
