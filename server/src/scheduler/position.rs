use std::sync::Arc;

use analysis::{classify_position, to_white_cp, DisplayEvaluation};
use chess::PieceColor;
use cozy_chess::Board;
use engine::{EngineFactory, WorkerPool};

use super::game::evaluate_position;
use crate::error::AnalysisError;
use crate::types::{LineAnalysis, PositionResult, SearchSettings};

/// Single-position search. Display values are from the side to move.
pub(super) async fn analyze_position<F: EngineFactory>(
    pool: &Arc<WorkerPool<F>>,
    board: &Board,
    fen: &str,
    settings: SearchSettings,
) -> Result<PositionResult, AnalysisError> {
    let evaluation = evaluate_position(pool, board, fen, &settings.limits()).await?;
    let white_to_move = PieceColor::from(board.side_to_move()) == PieceColor::White;
    let display = DisplayEvaluation::standalone(to_white_cp(evaluation.score, white_to_move), white_to_move);

    let lines = evaluation
        .lines
        .iter()
        .map(|line| LineAnalysis {
            multipv: line.multipv,
            score: line.score,
            depth: line.depth,
            pv: line.pv.clone(),
            display: DisplayEvaluation::standalone(to_white_cp(line.score, white_to_move), white_to_move),
        })
        .collect();

    tracing::debug!(
        fen,
        score = %evaluation.score,
        best_move = ?evaluation.best_move,
        depth = evaluation.depth,
        "Position analysed"
    );

    Ok(PositionResult {
        fen: fen.to_string(),
        settings,
        evaluation,
        display,
        lines,
        classification: classify_position(board),
        cached: false,
    })
}
