//! Result payloads returned to clients.

use analysis::{CriticalMoment, DisplayEvaluation, MoveClassification, PhaseBoundaries, PositionClassification};
use chess::{AnalysisScore, GameResult, PieceColor};
use engine::{EngineEvaluation, SearchLimits};
use serde::Serialize;

use crate::openings::Opening;

/// Search settings after defaults are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchSettings {
    /// 0 = no depth limit
    pub depth: u32,
    /// 0 = no time limit
    pub time_limit_ms: u64,
    pub multi_pv: u32,
}

impl SearchSettings {
    pub fn limits(&self) -> SearchLimits {
        SearchLimits::new(self.depth, self.time_limit_ms, self.multi_pv)
    }

    pub fn cache_suffix(&self) -> String {
        format!("d{}|t{}|l{}", self.depth, self.time_limit_ms, self.multi_pv)
    }
}

/// Starting position of an analysed game.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionAnalysis {
    pub fen: String,
    pub evaluation: EngineEvaluation,
    pub display: DisplayEvaluation,
}

/// One analysed ply.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveAnalysis {
    /// 1-based
    pub ply: u32,
    pub move_number: u16,
    pub color: PieceColor,
    pub san: String,
    pub uci: String,
    pub fen_before: String,
    pub fen_after: String,
    /// Engine view of the position after the move; `bestMove` is the reply
    pub evaluation: EngineEvaluation,
    /// What the engine wanted instead of the played move
    pub engine_best_move: Option<String>,
    pub engine_best_san: Option<String>,
    /// Mover's win probability before and after the move
    pub win_before: f64,
    pub win_after: f64,
    /// Display values from White's point of view
    pub display: DisplayEvaluation,
    pub classification: MoveClassification,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nag: Option<u8>,
}

impl MoveAnalysis {
    /// Mover's win-probability loss; negative when the move improved things.
    pub fn drop(&self) -> f64 {
        self.win_before - self.win_after
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameMoves {
    pub initial: PositionAnalysis,
    pub moves: Vec<MoveAnalysis>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationCounts {
    pub book: u32,
    pub best: u32,
    pub excellent: u32,
    pub good: u32,
    pub inaccuracy: u32,
    pub mistake: u32,
    pub blunder: u32,
    pub brilliant: u32,
    pub great: u32,
    pub miss: u32,
}

impl ClassificationCounts {
    pub fn add(&mut self, c: MoveClassification) {
        let slot = match c {
            MoveClassification::Book => &mut self.book,
            MoveClassification::Best => &mut self.best,
            MoveClassification::Excellent => &mut self.excellent,
            MoveClassification::Good => &mut self.good,
            MoveClassification::Inaccuracy => &mut self.inaccuracy,
            MoveClassification::Mistake => &mut self.mistake,
            MoveClassification::Blunder => &mut self.blunder,
            MoveClassification::Brilliant => &mut self.brilliant,
            MoveClassification::Great => &mut self.great,
            MoveClassification::Miss => &mut self.miss,
        };
        *slot += 1;
    }

    pub fn total(&self) -> u32 {
        self.book
            + self.best
            + self.excellent
            + self.good
            + self.inaccuracy
            + self.mistake
            + self.blunder
            + self.brilliant
            + self.great
            + self.miss
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SideSummary {
    pub accuracy: f64,
    pub classifications: ClassificationCounts,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSummary {
    pub white: SideSummary,
    pub black: SideSummary,
}

/// Completed analysis of a game.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameAnalysis {
    pub analysis: GameMoves,
    pub summary: GameSummary,
    pub critical_moments: Vec<CriticalMoment>,
    pub phases: PhaseBoundaries,
    pub opening: Option<Opening>,
    pub result: GameResult,
    pub total_moves: u32,
    pub settings: SearchSettings,
}

/// One alternative line of a position search.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineAnalysis {
    pub multipv: u32,
    pub score: AnalysisScore,
    pub depth: u32,
    pub pv: Vec<String>,
    pub display: DisplayEvaluation,
}

/// Answer to a single-position request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionResult {
    pub fen: String,
    pub settings: SearchSettings,
    pub evaluation: EngineEvaluation,
    /// Display values from the side to move's point of view
    pub display: DisplayEvaluation,
    pub lines: Vec<LineAnalysis>,
    pub classification: PositionClassification,
    pub cached: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_counts() {
        let mut counts = ClassificationCounts::default();
        for c in MoveClassification::ALL {
            counts.add(c);
        }
        counts.add(MoveClassification::Blunder);
        assert_eq!(counts.total(), 11);
        assert_eq!(counts.blunder, 2);
        let json = serde_json::to_value(counts).unwrap();
        assert_eq!(json["blunder"], 2);
    }

    #[test]
    fn test_settings_limits() {
        let s = SearchSettings {
            depth: 1,
            time_limit_ms: 0,
            multi_pv: 2,
        };
        assert_eq!(s.limits().go_command(), "go depth 1");
        assert_eq!(s.cache_suffix(), "d1|t0|l2");
    }
}
