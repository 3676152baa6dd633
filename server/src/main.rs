use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use engine::{PoolConfig, StockfishFactory, WorkerPool, WorkerTimeouts};
use review_server::{
    AnalysisService, AnalyzeGameRequest, AnalyzePositionRequest, AppContext, GameOptions, GetResultRequest,
    JobStatus, NoOpeningBook, RateGuard, Scheduler, ServerConfig,
};
use serde::Serialize;

const CLIENT: &str = "cli";

#[derive(Parser)]
#[command(name = "review-server", version, about = "Chess game review analysis backend")]
struct Cli {
    /// Engine binary; defaults to ANALYSIS_ENGINE_PATH, then a Stockfish on the usual paths.
    #[arg(long, global = true)]
    engine_path: Option<PathBuf>,

    /// Number of engine processes.
    #[arg(long, global = true)]
    pool_size: Option<usize>,

    /// Log filter, e.g. `debug` or `review_server=trace`. Overrides RUST_LOG.
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Review a whole game from a PGN file, or `-` for stdin.
    Game {
        pgn: String,
        #[arg(long)]
        depth: Option<i64>,
        /// Per-move time limit in milliseconds.
        #[arg(long)]
        time_ms: Option<i64>,
        #[arg(long)]
        lines: Option<i64>,
    },
    /// Evaluate a single FEN position.
    Position {
        fen: String,
        #[arg(long)]
        depth: Option<i64>,
        #[arg(long)]
        time_ms: Option<i64>,
        #[arg(long)]
        lines: Option<i64>,
    },
    /// Start the pool and report its health.
    Health,
}

fn init_tracing(directive: Option<&str>) {
    use tracing_subscriber::fmt::format::FmtSpan;
    let filter = match directive {
        Some(d) => tracing_subscriber::EnvFilter::new(d),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_pgn(source: &str) -> anyhow::Result<String> {
    if source == "-" {
        let mut pgn = String::new();
        std::io::stdin().read_to_string(&mut pgn).context("reading PGN from stdin")?;
        return Ok(pgn);
    }
    std::fs::read_to_string(source).with_context(|| format!("reading {source}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log.as_deref());

    let mut config = ServerConfig::from_env()?;
    if let Some(path) = cli.engine_path.clone() {
        config.engine_path = Some(path);
    }
    if let Some(size) = cli.pool_size {
        config.pool_size = size;
    }
    let Some(engine_path) = config.resolve_engine_path() else {
        bail!("no engine binary found; set ANALYSIS_ENGINE_PATH or pass --engine-path");
    };

    tracing::info!(engine = %engine_path.display(), pool_size = config.pool_size, "Starting analysis backend");

    let context = AppContext::new();
    let pool = WorkerPool::start(
        StockfishFactory::new(engine_path, WorkerTimeouts::default()),
        PoolConfig {
            size: config.pool_size,
            acquire_timeout: config.acquire_timeout,
            options: config.engine_options.clone(),
        },
    )
    .await?;

    let guard = Arc::new(RateGuard::new(config.rate_quotas, config.rate_max_clients));
    let scheduler = Scheduler::new(Arc::clone(&pool), &config, Arc::new(NoOpeningBook), guard);
    let maintenance = scheduler.spawn_maintenance(config.maintenance_interval);
    let service = AnalysisService::new(scheduler, context);

    let outcome = run(&service, cli.command).await;

    maintenance.abort();
    pool.shutdown().await;
    outcome
}

async fn run(service: &AnalysisService<StockfishFactory>, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Game {
            pgn,
            depth,
            time_ms,
            lines,
        } => {
            let request = AnalyzeGameRequest {
                pgn: read_pgn(&pgn)?,
                options: GameOptions {
                    depth,
                    time_per_move_ms: time_ms,
                    multi_pv: lines,
                },
            };
            let job_id = service.analyze_game(CLIENT, &request)?.job_id;
            let poll = GetResultRequest {
                job_id: job_id.to_string(),
            };

            let mut last_percentage = None;
            loop {
                let job = service.scheduler().get_result(job_id)?;
                if last_percentage != Some(job.progress.percentage) {
                    tracing::info!(
                        %job_id,
                        status = job.status.as_str(),
                        percentage = job.progress.percentage,
                        remaining_ms = job.progress.estimated_remaining_ms,
                        "Progress"
                    );
                    last_percentage = Some(job.progress.percentage);
                }
                if job.status.is_finished() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            }

            let job = service.get_result(CLIENT, &poll)?;
            print_json(&job)?;
            if job.status != JobStatus::Completed {
                bail!(job.error.unwrap_or_else(|| format!("job ended as {}", job.status.as_str())));
            }
            Ok(())
        }
        Command::Position {
            fen,
            depth,
            time_ms,
            lines,
        } => {
            let request = AnalyzePositionRequest {
                fen,
                depth,
                multi_pv: lines,
                time_limit_ms: time_ms,
            };
            let result = service.analyze_position(CLIENT, &request).await?;
            print_json(&result)
        }
        Command::Health => print_json(&service.health()),
    }
}
