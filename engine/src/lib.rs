pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod pool;
pub mod uci;
pub mod worker;

pub use error::EngineError;
pub use pool::{PoolConfig, PoolStatus, PooledWorker, WorkerPool};
pub use uci::{UciError, UciMessage};
pub use worker::{find_engine_binary, StockfishFactory, UciWorker, WorkerTimeouts};

use chess::AnalysisScore;
use cozy_chess::Move;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Grace period added on top of a search's move time before the worker
/// gives up on `bestmove`.
pub const TIMEOUT_GRACE: Duration = Duration::from_secs(5);

/// Wall-clock budget for searches bounded only by depth, up to
/// [`DEPTH_ONLY_BASE_DEPTH`].
pub const DEPTH_ONLY_BUDGET: Duration = Duration::from_secs(60);
pub const DEPTH_ONLY_BASE_DEPTH: u32 = 20;
/// Budget growth per ply beyond [`DEPTH_ONLY_BASE_DEPTH`].
pub const DEPTH_ONLY_GROWTH: f64 = 1.3;
pub const MAX_DEPTH_ONLY_BUDGET: Duration = Duration::from_secs(15 * 60);

/// Deadline for `go depth N` with no move time. Search cost grows
/// geometrically with depth, so the budget does too.
pub fn depth_only_budget(depth: u32) -> Duration {
    let extra = depth.saturating_sub(DEPTH_ONLY_BASE_DEPTH).min(64);
    let budget = DEPTH_ONLY_BUDGET.mul_f64(DEPTH_ONLY_GROWTH.powi(extra as i32));
    budget.min(MAX_DEPTH_ONLY_BUDGET)
}

/// Move time used when a search has neither a depth nor a time limit.
pub const FALLBACK_MOVETIME_MS: u64 = 1000;

/// Value of the `Analysis Contempt` engine option.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisContempt {
    #[default]
    Off,
    White,
    Black,
    Both,
}

impl AnalysisContempt {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "Off",
            Self::White => "White",
            Self::Black => "Black",
            Self::Both => "Both",
        }
    }
}

impl std::str::FromStr for AnalysisContempt {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "white" => Ok(Self::White),
            "black" => Ok(Self::Black),
            "both" => Ok(Self::Both),
            other => Err(format!(
                "analysis contempt must be one of Off, White, Black, Both (got {other:?})"
            )),
        }
    }
}

/// Engine-wide options, applied to every worker in a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineOptions {
    pub threads: u32,
    pub hash_mb: u32,
    pub contempt: i32,
    pub analysis_contempt: AnalysisContempt,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            threads: 1,
            hash_mb: 64,
            contempt: 0,
            analysis_contempt: AnalysisContempt::Off,
        }
    }
}

impl EngineOptions {
    /// `setoption` lines for these options, clamped to what Stockfish accepts.
    pub fn setoption_commands(&self) -> Vec<String> {
        vec![
            format!("setoption name Threads value {}", self.threads.clamp(1, 16)),
            format!("setoption name Hash value {}", self.hash_mb.clamp(1, 2048)),
            format!(
                "setoption name Contempt value {}",
                self.contempt.clamp(-100, 100)
            ),
            format!(
                "setoption name Analysis Contempt value {}",
                self.analysis_contempt.as_str()
            ),
            "setoption name UCI_AnalyseMode value true".to_string(),
        ]
    }
}

/// Bounds for a single search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchLimits {
    /// 0 = no depth limit
    pub depth: u32,
    /// 0 = no time limit
    pub movetime_ms: u64,
    /// Number of principal variations (MultiPV), at least 1
    pub lines: u32,
    /// Deadline for `bestmove`, measured from `go`
    pub timeout: Duration,
}

impl SearchLimits {
    pub fn new(depth: u32, movetime_ms: u64, lines: u32) -> Self {
        let timeout = if movetime_ms > 0 {
            Duration::from_millis(movetime_ms) + TIMEOUT_GRACE
        } else if depth > 0 {
            depth_only_budget(depth)
        } else {
            Duration::from_millis(FALLBACK_MOVETIME_MS) + TIMEOUT_GRACE
        };
        Self {
            depth,
            movetime_ms,
            lines: lines.max(1),
            timeout,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The `go` command for these limits.
    pub fn go_command(&self) -> String {
        match (self.depth, self.movetime_ms) {
            (0, 0) => format!("go movetime {FALLBACK_MOVETIME_MS}"),
            (depth, 0) => format!("go depth {depth}"),
            (0, movetime) => format!("go movetime {movetime}"),
            (depth, movetime) => format!("go depth {depth} movetime {movetime}"),
        }
    }
}

/// Engine analysis information from one `info` line
#[derive(Debug, Clone, Default)]
pub struct EngineInfo {
    pub depth: Option<u32>,
    pub seldepth: Option<u32>,
    pub time_ms: Option<u64>,
    pub nodes: Option<u64>,
    pub score: Option<AnalysisScore>,
    pub pv: Vec<Move>, // Principal variation
    pub multipv: Option<u32>,
    pub currmove: Option<Move>,
    pub hashfull: Option<u16>,
    pub nps: Option<u64>,
}

/// One principal variation of a multi-PV search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PvLine {
    pub multipv: u32,
    pub score: AnalysisScore,
    pub depth: u32,
    /// Standard UCI moves, first move first
    pub pv: Vec<String>,
}

/// Result of one search. Scores are from the side to move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineEvaluation {
    pub score: AnalysisScore,
    pub depth: u32,
    pub seldepth: u32,
    /// Absent when the position has no legal moves
    pub best_move: Option<String>,
    pub ponder: Option<String>,
    pub pv: Vec<String>,
    pub nodes: u64,
    pub time_ms: u64,
    pub mate_in: Option<i32>,
    /// All lines ordered by MultiPV index; `lines[0]` is the main line
    pub lines: Vec<PvLine>,
}

impl EngineEvaluation {
    /// Evaluation for a position with no legal moves: mated (mate 0) or drawn.
    pub fn terminal(checkmated: bool) -> Self {
        let score = if checkmated {
            AnalysisScore::Mate(0)
        } else {
            AnalysisScore::Centipawns(0)
        };
        Self {
            score,
            depth: 0,
            seldepth: 0,
            best_move: None,
            ponder: None,
            pv: Vec::new(),
            nodes: 0,
            time_ms: 0,
            mate_in: checkmated.then_some(0),
            lines: Vec::new(),
        }
    }
}

/// A single engine instance that evaluates one position at a time.
///
/// Implementations are not reentrant; `&mut self` on `evaluate` makes
/// interleaved searches on one instance unrepresentable.
pub trait AnalysisEngine: Send + 'static {
    fn id(&self) -> usize;

    fn configure(
        &mut self,
        options: &EngineOptions,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    fn evaluate(
        &mut self,
        fen: &str,
        limits: &SearchLimits,
    ) -> impl Future<Output = Result<EngineEvaluation, EngineError>> + Send;

    /// False once the engine has crashed, timed out or exited.
    fn is_healthy(&mut self) -> bool;

    fn shutdown(self) -> impl Future<Output = ()> + Send;
}

/// Creates engines for a [`WorkerPool`].
pub trait EngineFactory: Send + Sync + 'static {
    type Engine: AnalysisEngine;

    fn spawn(&self, id: usize) -> impl Future<Output = Result<Self::Engine, EngineError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_limits_timeouts() {
        let timed = SearchLimits::new(0, 1000, 1);
        assert_eq!(timed.timeout, Duration::from_millis(1000) + TIMEOUT_GRACE);
        assert_eq!(timed.go_command(), "go movetime 1000");

        let deep = SearchLimits::new(18, 0, 3);
        assert_eq!(deep.timeout, DEPTH_ONLY_BUDGET);
        assert_eq!(deep.go_command(), "go depth 18");

        // the deepest allowed search gets far more than the base budget
        let deepest = SearchLimits::new(30, 0, 1);
        assert!(deepest.timeout > DEPTH_ONLY_BUDGET * 10);
        assert!(deepest.timeout <= MAX_DEPTH_ONLY_BUDGET);

        assert_eq!(SearchLimits::new(12, 500, 0).lines, 1);
        assert_eq!(
            SearchLimits::new(12, 500, 1).go_command(),
            "go depth 12 movetime 500"
        );
    }

    #[test]
    fn test_depth_only_budget_grows_and_caps() {
        assert_eq!(depth_only_budget(1), DEPTH_ONLY_BUDGET);
        assert_eq!(depth_only_budget(DEPTH_ONLY_BASE_DEPTH), DEPTH_ONLY_BUDGET);
        let mut previous = DEPTH_ONLY_BUDGET;
        for depth in DEPTH_ONLY_BASE_DEPTH + 1..=40 {
            let budget = depth_only_budget(depth);
            assert!(budget >= previous);
            previous = budget;
        }
        assert_eq!(depth_only_budget(u32::MAX), MAX_DEPTH_ONLY_BUDGET);
    }

    #[test]
    fn test_setoption_commands_clamp() {
        let options = EngineOptions {
            threads: 64,
            hash_mb: 0,
            contempt: 500,
            analysis_contempt: AnalysisContempt::Both,
        };
        let cmds = options.setoption_commands();
        assert!(cmds.contains(&"setoption name Threads value 16".to_string()));
        assert!(cmds.contains(&"setoption name Hash value 1".to_string()));
        assert!(cmds.contains(&"setoption name Contempt value 100".to_string()));
        assert!(cmds.contains(&"setoption name Analysis Contempt value Both".to_string()));
    }

    #[test]
    fn test_analysis_contempt_parse() {
        assert_eq!("white".parse::<AnalysisContempt>(), Ok(AnalysisContempt::White));
        assert!("sideways".parse::<AnalysisContempt>().is_err());
    }

    #[test]
    fn test_terminal_evaluation() {
        let mated = EngineEvaluation::terminal(true);
        assert_eq!(mated.score, AnalysisScore::Mate(0));
        assert_eq!(mated.best_move, None);
        assert_eq!(EngineEvaluation::terminal(false).score, AnalysisScore::Centipawns(0));
    }
}
