//! Full-game pipeline: one engine search per position, then labels,
//! accuracy and structure over the whole game.

use std::sync::Arc;

use analysis::{
    classify_in_context, find_critical_moments, game_accuracy_from, helpers::is_sacrifice,
    phase_boundaries, to_white_cp, to_win_probability, EvaluationSmoother, MoveContext,
};
use chess::{MaterialCount, PgnGame, PieceColor};
use cozy_chess::Board;
use engine::{EngineEvaluation, EngineFactory, SearchLimits, WorkerPool};
use tokio::time::Instant;

use crate::error::AnalysisError;
use crate::jobs::JobHandle;
use crate::openings::OpeningBook;
use crate::types::{
    ClassificationCounts, GameAnalysis, GameMoves, GameSummary, MoveAnalysis, PositionAnalysis,
    SearchSettings, SideSummary,
};

/// Evaluate `fen`, answering finished positions without the engine.
pub(super) async fn evaluate_position<F: EngineFactory>(
    pool: &Arc<WorkerPool<F>>,
    board: &Board,
    fen: &str,
    limits: &SearchLimits,
) -> Result<EngineEvaluation, AnalysisError> {
    if chess::is_game_over(board) {
        return Ok(EngineEvaluation::terminal(chess::is_checkmate(board)));
    }
    Ok(pool.evaluate(fen, limits).await?)
}

/// Analyse every position of `game`, reporting progress and partial moves
/// through `handle` as it goes.
pub(super) async fn analyze_game<F: EngineFactory>(
    pool: &Arc<WorkerPool<F>>,
    book: &dyn OpeningBook,
    handle: &JobHandle,
    game: &PgnGame,
    settings: SearchSettings,
) -> Result<GameAnalysis, AnalysisError> {
    let limits = settings.limits();
    let start = chess::parse_fen(&game.start_fen)?;
    let total_positions = game.moves.len() as u32 + 1;
    let started = Instant::now();

    let initial = evaluate_position(pool, &start, &game.start_fen, &limits).await?;
    handle.record_progress(1, total_positions, elapsed_ms(started));

    let mut review = GameReview::new(game, book, &start, initial);

    for (i, m) in game.moves.iter().enumerate() {
        let after = chess::parse_fen(&m.fen_after)?;
        let evaluation = match evaluate_position(pool, &after, &m.fen_after, &limits).await {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(ply = i + 1, san = %m.san, "Position evaluation failed: {}", e);
                return Err(e);
            }
        };

        let analysed = review.push_move(i, evaluation)?;
        tracing::debug!(
            ply = analysed.ply,
            color = analysed.color.as_str(),
            san = %analysed.san,
            score = %analysed.evaluation.score,
            classification = analysed.classification.as_str(),
            win_after = analysed.win_after,
            "Ply analysed"
        );
        handle.push_partial(analysed);

        let done = i as u32 + 2;
        handle.record_progress(done, total_positions, elapsed_ms(started) / u64::from(done));
    }

    Ok(review.finish(settings))
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Running state while walking a game's plies in order.
struct GameReview<'a> {
    game: &'a PgnGame,
    book: &'a dyn OpeningBook,
    first_mover: PieceColor,
    ucis: Vec<String>,
    smoother: EvaluationSmoother,
    /// White's win probability at every position, start included
    win_white: Vec<f64>,
    initial: PositionAnalysis,
    /// Evaluation of the position the next move is played from
    previous: EngineEvaluation,
    moves: Vec<MoveAnalysis>,
    in_book: bool,
    last_drop: Option<f64>,
}

impl<'a> GameReview<'a> {
    fn new(game: &'a PgnGame, book: &'a dyn OpeningBook, start: &Board, initial: EngineEvaluation) -> Self {
        let first_mover = PieceColor::from(start.side_to_move());
        let white_to_move = first_mover == PieceColor::White;
        let cp_white = to_white_cp(initial.score, white_to_move);

        let mut smoother = EvaluationSmoother::new();
        let display = smoother.next(cp_white, true);

        Self {
            game,
            book,
            first_mover,
            ucis: game.moves.iter().map(|m| m.uci.clone()).collect(),
            smoother,
            win_white: vec![to_win_probability(cp_white, true)],
            initial: PositionAnalysis {
                fen: game.start_fen.clone(),
                evaluation: initial.clone(),
                display,
            },
            previous: initial,
            moves: Vec::with_capacity(game.moves.len()),
            in_book: true,
            last_drop: None,
        }
    }

    /// Label move `index` given the evaluation of the position it produced.
    fn push_move(&mut self, index: usize, after: EngineEvaluation) -> Result<MoveAnalysis, AnalysisError> {
        let m = &self.game.moves[index];
        let before = &self.previous;
        let mover_white = m.color == PieceColor::White;

        let cp_before = to_white_cp(before.score, mover_white);
        let cp_after = to_white_cp(after.score, !mover_white);
        let win_before = to_win_probability(cp_before, mover_white);
        let win_after = to_win_probability(cp_after, mover_white);
        let second_best_win = before
            .lines
            .get(1)
            .map(|line| to_win_probability(to_white_cp(line.score, mover_white), mover_white));

        let board_before = chess::parse_fen(&m.fen_before)?;
        self.in_book = self.in_book && self.book.is_book_line(&self.ucis[..=index]);

        let classification = classify_in_context(&MoveContext {
            played: &m.uci,
            best: before.best_move.as_deref(),
            win_before,
            win_after,
            second_best_win,
            is_book: self.in_book,
            is_sacrifice: is_sacrifice(&board_before, m.mv),
            opponent_previous_drop: self.last_drop,
        });
        self.last_drop = Some(win_before - win_after);

        let engine_best_move = before.best_move.clone();
        let engine_best_san = engine_best_move
            .as_deref()
            .and_then(|uci| san_of_uci(&board_before, uci));

        self.win_white.push(to_win_probability(cp_after, true));
        let display = self.smoother.next(cp_after, true);

        let analysed = MoveAnalysis {
            ply: index as u32 + 1,
            move_number: m.move_number,
            color: m.color,
            san: m.san.clone(),
            uci: m.uci.clone(),
            fen_before: m.fen_before.clone(),
            fen_after: m.fen_after.clone(),
            evaluation: after.clone(),
            engine_best_move,
            engine_best_san,
            win_before,
            win_after,
            display,
            classification,
            nag: classification.to_nag(),
        };
        self.previous = after;
        self.moves.push(analysed.clone());
        Ok(analysed)
    }

    fn finish(self, settings: SearchSettings) -> GameAnalysis {
        let mut white = ClassificationCounts::default();
        let mut black = ClassificationCounts::default();
        for m in &self.moves {
            match m.color {
                PieceColor::White => white.add(m.classification),
                PieceColor::Black => black.add(m.classification),
            }
        }

        // move number of the position after each ply
        let positions: Vec<(MaterialCount, u16)> = self
            .game
            .moves
            .iter()
            .filter_map(|m| {
                let board = chess::parse_fen(&m.fen_after).ok()?;
                let number = match m.color {
                    PieceColor::White => m.move_number,
                    PieceColor::Black => m.move_number.saturating_add(1),
                };
                Some((MaterialCount::of(&board), number))
            })
            .collect();

        GameAnalysis {
            summary: GameSummary {
                white: SideSummary {
                    accuracy: game_accuracy_from(&self.win_white, PieceColor::White, self.first_mover),
                    classifications: white,
                },
                black: SideSummary {
                    accuracy: game_accuracy_from(&self.win_white, PieceColor::Black, self.first_mover),
                    classifications: black,
                },
            },
            critical_moments: find_critical_moments(&self.win_white, self.first_mover),
            phases: phase_boundaries(&positions),
            opening: self.book.lookup(&self.ucis),
            result: self.game.result,
            total_moves: self.moves.len() as u32,
            settings,
            analysis: GameMoves {
                initial: self.initial,
                moves: self.moves,
            },
        }
    }
}

/// SAN for an engine move given in standard UCI, if it is legal here.
fn san_of_uci(board: &Board, uci: &str) -> Option<String> {
    let legal = chess::legal_moves(board);
    let mv = chess::convert_uci_castling_to_cozy(chess::parse_uci_move(uci).ok()?, &legal);
    legal.contains(&mv).then(|| chess::format_san(board, mv))
}

#[cfg(test)]
mod tests {
    use super::*;
    use analysis::MoveClassification;
    use chess::AnalysisScore;
    use engine::mock::MockEngineFactory;
    use engine::{EngineOptions, PoolConfig, PvLine};
    use tokio::time::Duration;

    use crate::jobs::JobTable;
    use crate::openings::{NoOpeningBook, StaticOpeningBook};

    async fn pool(factory: MockEngineFactory) -> Arc<WorkerPool<MockEngineFactory>> {
        WorkerPool::start(
            factory,
            PoolConfig {
                size: 1,
                acquire_timeout: Duration::from_secs(5),
                options: EngineOptions::default(),
            },
        )
        .await
        .unwrap()
    }

    fn settings() -> SearchSettings {
        SearchSettings {
            depth: 1,
            time_limit_ms: 0,
            multi_pv: 2,
        }
    }

    fn scripted(score: AnalysisScore, best: &str) -> EngineEvaluation {
        EngineEvaluation {
            score,
            depth: 1,
            seldepth: 1,
            best_move: Some(best.to_string()),
            ponder: None,
            pv: vec![best.to_string()],
            nodes: 1,
            time_ms: 1,
            mate_in: None,
            lines: vec![PvLine {
                multipv: 1,
                score,
                depth: 1,
                pv: vec![best.to_string()],
            }],
        }
    }

    #[test]
    fn test_san_of_uci() {
        let board = chess::parse_fen(chess::START_FEN).unwrap();
        assert_eq!(san_of_uci(&board, "g1f3").as_deref(), Some("Nf3"));
        assert_eq!(san_of_uci(&board, "e2e5"), None);
        assert_eq!(san_of_uci(&board, "junk"), None);
    }

    #[tokio::test]
    async fn test_single_move_game() {
        let pool = pool(MockEngineFactory::new()).await;
        let jobs = JobTable::new(4, Duration::from_secs(60));
        let game = chess::parse_pgn("1. e4").unwrap();
        let handle = jobs.create("g".into(), settings());
        handle.start(game.moves.len() as u32);

        let result = analyze_game(&pool, &NoOpeningBook, &handle, &game, settings())
            .await
            .unwrap();
        assert_eq!(result.analysis.moves.len(), 1);
        let m = &result.analysis.moves[0];
        assert_eq!(m.move_number, 1);
        assert_eq!(m.color, PieceColor::White);
        assert_eq!(m.san, "e4");
        assert_eq!(m.ply, 1);

        // the engine's reply must be legal after 1. e4
        let after = chess::parse_fen(&m.fen_after).unwrap();
        let reply = m.evaluation.best_move.as_deref().unwrap();
        assert!(san_of_uci(&after, reply).is_some());

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.partial_moves.len(), 1);
        assert_eq!(snapshot.progress.percentage, 100);
    }

    #[tokio::test]
    async fn test_checkmate_is_not_sent_to_engine() {
        let factory = MockEngineFactory::new();
        let pool = pool(factory.clone()).await;
        let jobs = JobTable::new(4, Duration::from_secs(60));
        let game = chess::parse_pgn("1. f3 e5 2. g4 Qh4# 0-1").unwrap();
        let handle = jobs.create("g".into(), settings());
        handle.start(game.moves.len() as u32);

        let result = analyze_game(&pool, &NoOpeningBook, &handle, &game, settings())
            .await
            .unwrap();
        // five positions, the last one mate
        assert_eq!(factory.evaluation_count(), 4);
        let last = result.analysis.moves.last().unwrap();
        assert_eq!(last.evaluation.score, AnalysisScore::Mate(0));
        assert_eq!(last.color, PieceColor::Black);
        assert!(last.win_after > 0.99);
        assert!(last.evaluation.best_move.is_none());
    }

    #[tokio::test]
    async fn test_blunder_is_labelled_and_flagged_critical() {
        let game = chess::parse_pgn("1. e4 e5 2. Qh5").unwrap();
        let factory = MockEngineFactory::new();
        // White is fine after 1...e5; after 2. Qh5 the engine sees Black winning
        factory.script(&game.moves[1].fen_after, scripted(AnalysisScore::Centipawns(30), "g1f3"));
        factory.script(&game.moves[2].fen_after, scripted(AnalysisScore::Centipawns(800), "g8f6"));

        let pool = pool(factory).await;
        let jobs = JobTable::new(4, Duration::from_secs(60));
        let handle = jobs.create("g".into(), settings());
        handle.start(game.moves.len() as u32);

        let result = analyze_game(&pool, &NoOpeningBook, &handle, &game, settings())
            .await
            .unwrap();
        let qh5 = &result.analysis.moves[2];
        assert_eq!(qh5.san, "Qh5");
        assert_eq!(qh5.engine_best_san.as_deref(), Some("Nf3"));
        assert_eq!(qh5.classification, MoveClassification::Blunder);
        assert_eq!(qh5.nag, Some(4));
        assert!(qh5.drop() > 0.4);
        assert_eq!(result.summary.white.classifications.blunder, 1);
        assert!(result.critical_moments.iter().any(|c| c.ply == 3 && c.color == PieceColor::White));
        assert!(result.summary.white.accuracy < result.summary.black.accuracy);
    }

    #[tokio::test]
    async fn test_book_moves_and_opening_name() {
        let book = StaticOpeningBook::default()
            .with("C20", "King's Pawn Game", "e2e4 e7e5")
            .with("B00", "King's Pawn", "e2e4");
        let pool = pool(MockEngineFactory::new()).await;
        let jobs = JobTable::new(4, Duration::from_secs(60));
        let game = chess::parse_pgn("1. e4 e5 2. Nf3").unwrap();
        let handle = jobs.create("g".into(), settings());
        handle.start(game.moves.len() as u32);

        let result = analyze_game(&pool, &book, &handle, &game, settings())
            .await
            .unwrap();
        let labels: Vec<_> = result.analysis.moves.iter().map(|m| m.classification).collect();
        assert_eq!(labels[0], MoveClassification::Book);
        assert_eq!(labels[1], MoveClassification::Book);
        assert_ne!(labels[2], MoveClassification::Book);
        assert_eq!(result.opening.unwrap().eco, "C20");
    }
}
