//! Game-review analysis backend: job scheduling, caching, rate limiting and
//! the service facade an HTTP layer mounts.

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod jobs;
pub mod openings;
pub mod rate_guard;
pub mod scheduler;
pub mod service;
pub mod types;

pub use cache::{CacheStats, ResultCache};
pub use config::{ConfigError, ServerConfig};
pub use context::AppContext;
pub use error::{AnalysisError, ErrorKind, ErrorResponse};
pub use jobs::{AnalysisJob, JobCounts, JobHandle, JobId, JobProgress, JobStatus, JobTable};
pub use openings::{NoOpeningBook, Opening, OpeningBook, StaticOpeningBook};
pub use rate_guard::{EndpointClass, EndpointQuota, RateGuard, RateQuotas};
pub use scheduler::{
    AnalysisLimits, EngineConfigResponse, EngineConfigUpdate, GameOptions, MaintenanceReport, PositionOptions,
    Scheduler,
};
pub use service::{
    AnalysisService, AnalyzeGameRequest, AnalyzePositionRequest, GetProgressRequest, GetResultRequest,
    HealthStatus, UpdateEngineConfigRequest,
};
pub use types::{GameAnalysis, MoveAnalysis, PositionResult, SearchSettings};
