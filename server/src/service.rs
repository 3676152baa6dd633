//! Client-facing facade. Every call passes the rate guard for its endpoint
//! class before the scheduler sees it.

use std::sync::Arc;

use engine::{EngineFactory, PoolStatus};
use serde::{Deserialize, Serialize};

use crate::cache::CacheStats;
use crate::context::AppContext;
use crate::error::AnalysisError;
use crate::jobs::{AnalysisJob, JobCounts, JobId, ProgressSnapshot};
use crate::rate_guard::EndpointClass;
use crate::scheduler::{EngineConfigResponse, EngineConfigUpdate, GameOptions, PositionOptions, Scheduler};
use crate::types::PositionResult;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeGameRequest {
    pub pgn: String,
    #[serde(default)]
    pub options: GameOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzePositionRequest {
    pub fen: String,
    pub depth: Option<i64>,
    pub multi_pv: Option<i64>,
    pub time_limit_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetProgressRequest {
    pub job_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetResultRequest {
    pub job_id: String,
}

pub type UpdateEngineConfigRequest = EngineConfigUpdate;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeGameResponse {
    pub job_id: JobId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub version: &'static str,
    pub uptime_secs: u64,
    pub pool: PoolStatus,
    pub game_cache: CacheStats,
    pub position_cache: CacheStats,
    pub jobs: JobCounts,
}

pub struct AnalysisService<F: EngineFactory> {
    scheduler: Arc<Scheduler<F>>,
    context: AppContext,
}

impl<F: EngineFactory> AnalysisService<F> {
    pub fn new(scheduler: Arc<Scheduler<F>>, context: AppContext) -> Self {
        Self { scheduler, context }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler<F>> {
        &self.scheduler
    }

    fn admit(&self, client: &str, class: EndpointClass) -> Result<(), AnalysisError> {
        self.scheduler.rate_guard().check(client, class).inspect_err(|_| {
            tracing::warn!(client, endpoint = class.as_str(), "Rate limit exceeded");
        })
    }

    pub fn analyze_game(&self, client: &str, request: &AnalyzeGameRequest) -> Result<AnalyzeGameResponse, AnalysisError> {
        tracing::info!(client, bytes = request.pgn.len(), "analyze_game");
        self.admit(client, EndpointClass::GameAnalysis)?;
        let job_id = self.scheduler.submit_game(&request.pgn, &request.options)?;
        Ok(AnalyzeGameResponse { job_id })
    }

    pub async fn analyze_position(
        &self,
        client: &str,
        request: &AnalyzePositionRequest,
    ) -> Result<PositionResult, AnalysisError> {
        tracing::info!(client, fen = %request.fen, "analyze_position");
        self.admit(client, EndpointClass::PositionAnalysis)?;
        let options = PositionOptions {
            depth: request.depth,
            time_limit_ms: request.time_limit_ms,
            multi_pv: request.multi_pv,
        };
        self.scheduler.submit_position(&request.fen, &options).await
    }

    pub fn get_progress(&self, client: &str, request: &GetProgressRequest) -> Result<ProgressSnapshot, AnalysisError> {
        tracing::debug!(client, job_id = %request.job_id, "get_progress");
        self.admit(client, EndpointClass::JobStatus)?;
        self.scheduler.get_progress(parse_job_id(&request.job_id)?)
    }

    pub fn get_result(&self, client: &str, request: &GetResultRequest) -> Result<AnalysisJob, AnalysisError> {
        tracing::debug!(client, job_id = %request.job_id, "get_result");
        self.admit(client, EndpointClass::JobStatus)?;
        self.scheduler.get_result(parse_job_id(&request.job_id)?)
    }

    pub async fn update_engine_config(
        &self,
        client: &str,
        request: &UpdateEngineConfigRequest,
    ) -> Result<EngineConfigResponse, AnalysisError> {
        tracing::info!(client, ?request, "update_engine_config");
        self.admit(client, EndpointClass::EngineConfig)?;
        self.scheduler.reconfigure(request).await
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            version: self.context.version(),
            uptime_secs: self.context.uptime().as_secs(),
            pool: self.scheduler.pool().status(),
            game_cache: self.scheduler.game_cache_stats(),
            position_cache: self.scheduler.position_cache_stats(),
            jobs: self.scheduler.job_counts(),
        }
    }
}

fn parse_job_id(raw: &str) -> Result<JobId, AnalysisError> {
    raw.trim()
        .parse()
        .map_err(|_| AnalysisError::validation(format!("malformed job id: {raw}")))
}
