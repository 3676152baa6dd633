//! In-process engines for tests.
//!
//! Enabled for this crate's tests and, through the `mock` feature, for
//! dependent crates. Evaluations are deterministic: the first legal move is
//! "best" and the score is the material balance for the side to move,
//! unless a position has been scripted.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chess::{AnalysisScore, MaterialCount, PieceColor};

use crate::{AnalysisEngine, EngineError, EngineEvaluation, EngineFactory, EngineOptions, PvLine, SearchLimits};

#[derive(Default)]
struct MockShared {
    spawns: AtomicUsize,
    evaluations: AtomicUsize,
    configures: AtomicUsize,
    shutdowns: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    overlaps: AtomicUsize,
    fail_spawns: AtomicUsize,
    crash_next: AtomicUsize,
    timeout_next: AtomicUsize,
    fail_configures: AtomicUsize,
    delay: Mutex<Duration>,
    scripted: Mutex<HashMap<String, EngineEvaluation>>,
    options: Mutex<HashMap<usize, EngineOptions>>,
    busy: Mutex<HashSet<usize>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Take one unit from a countdown, returning true if one was available.
fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .is_ok()
}

/// Factory handle; clones share counters and injected faults.
#[derive(Clone, Default)]
pub struct MockEngineFactory {
    shared: Arc<MockShared>,
}

impl MockEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every evaluation sleeps for `delay` (tokio time, so paused clocks apply).
    pub fn with_delay(self, delay: Duration) -> Self {
        *lock(&self.shared.delay) = delay;
        self
    }

    /// Return `evaluation` whenever `fen` is searched.
    pub fn script(&self, fen: &str, evaluation: EngineEvaluation) {
        let key = chess::normalize_fen(fen).unwrap_or_else(|_| fen.to_string());
        lock(&self.shared.scripted).insert(key, evaluation);
    }

    pub fn fail_next_spawns(&self, n: usize) {
        self.shared.fail_spawns.store(n, Ordering::Release);
    }

    pub fn crash_next_evaluations(&self, n: usize) {
        self.shared.crash_next.store(n, Ordering::Release);
    }

    pub fn time_out_next_evaluations(&self, n: usize) {
        self.shared.timeout_next.store(n, Ordering::Release);
    }

    pub fn fail_next_configures(&self, n: usize) {
        self.shared.fail_configures.store(n, Ordering::Release);
    }

    pub fn spawn_count(&self) -> usize {
        self.shared.spawns.load(Ordering::Acquire)
    }

    /// Evaluation attempts, failed ones included.
    pub fn evaluation_count(&self) -> usize {
        self.shared.evaluations.load(Ordering::Acquire)
    }

    pub fn configure_count(&self) -> usize {
        self.shared.configures.load(Ordering::Acquire)
    }

    pub fn shutdown_count(&self) -> usize {
        self.shared.shutdowns.load(Ordering::Acquire)
    }

    /// Highest number of evaluations observed running at once.
    pub fn max_concurrency(&self) -> usize {
        self.shared.max_in_flight.load(Ordering::Acquire)
    }

    /// Evaluations that started on an engine already evaluating.
    pub fn overlapping_evaluations(&self) -> usize {
        self.shared.overlaps.load(Ordering::Acquire)
    }

    /// Live engines whose latest configuration equals `options`.
    pub fn engines_with_options(&self, options: &EngineOptions) -> usize {
        lock(&self.shared.options)
            .values()
            .filter(|o| *o == options)
            .count()
    }
}

impl EngineFactory for MockEngineFactory {
    type Engine = MockEngine;

    async fn spawn(&self, id: usize) -> Result<MockEngine, EngineError> {
        if take_one(&self.shared.fail_spawns) {
            return Err(EngineError::Unavailable(format!("mock spawn {id} refused")));
        }
        self.shared.spawns.fetch_add(1, Ordering::AcqRel);
        Ok(MockEngine {
            id,
            shared: Arc::clone(&self.shared),
            dead: false,
        })
    }
}

pub struct MockEngine {
    id: usize,
    shared: Arc<MockShared>,
    dead: bool,
}

/// Decrements the in-flight gauges on every exit path.
struct InFlight<'a> {
    shared: &'a MockShared,
    id: usize,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.shared.in_flight.fetch_sub(1, Ordering::AcqRel);
        lock(&self.shared.busy).remove(&self.id);
    }
}

impl AnalysisEngine for MockEngine {
    fn id(&self) -> usize {
        self.id
    }

    async fn configure(&mut self, options: &EngineOptions) -> Result<(), EngineError> {
        self.shared.configures.fetch_add(1, Ordering::AcqRel);
        if take_one(&self.shared.fail_configures) {
            self.dead = true;
            return Err(EngineError::Protocol("mock readyok withheld".to_string()));
        }
        lock(&self.shared.options).insert(self.id, options.clone());
        Ok(())
    }

    async fn evaluate(
        &mut self,
        fen: &str,
        limits: &SearchLimits,
    ) -> Result<EngineEvaluation, EngineError> {
        if self.dead {
            return Err(EngineError::Crashed("mock engine is dead".to_string()));
        }
        self.shared.evaluations.fetch_add(1, Ordering::AcqRel);

        let now = self.shared.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.shared.max_in_flight.fetch_max(now, Ordering::AcqRel);
        if !lock(&self.shared.busy).insert(self.id) {
            self.shared.overlaps.fetch_add(1, Ordering::AcqRel);
        }
        let _in_flight = InFlight {
            shared: &self.shared,
            id: self.id,
        };

        let delay = *lock(&self.shared.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if take_one(&self.shared.crash_next) {
            self.dead = true;
            return Err(EngineError::Crashed("mock engine exited".to_string()));
        }
        if take_one(&self.shared.timeout_next) {
            self.dead = true;
            return Err(EngineError::Timeout(limits.timeout));
        }

        let key = chess::normalize_fen(fen).unwrap_or_else(|_| fen.to_string());
        if let Some(scripted) = lock(&self.shared.scripted).get(&key) {
            return Ok(scripted.clone());
        }
        default_evaluation(fen, limits)
    }

    fn is_healthy(&mut self) -> bool {
        !self.dead
    }

    async fn shutdown(self) {
        self.shared.shutdowns.fetch_add(1, Ordering::AcqRel);
        lock(&self.shared.options).remove(&self.id);
    }
}

fn default_evaluation(fen: &str, limits: &SearchLimits) -> Result<EngineEvaluation, EngineError> {
    let board = chess::parse_fen(fen).map_err(|e| EngineError::Protocol(e.to_string()))?;
    let legal = chess::legal_moves(&board);
    if legal.is_empty() {
        return Ok(EngineEvaluation::terminal(chess::is_checkmate(&board)));
    }

    let balance = MaterialCount::of(&board).balance() * 100;
    let mover_cp = match PieceColor::from(board.side_to_move()) {
        PieceColor::White => balance,
        PieceColor::Black => -balance,
    };
    let depth = limits.depth.max(1);

    let lines: Vec<PvLine> = legal
        .iter()
        .take(limits.lines.max(1) as usize)
        .enumerate()
        .map(|(i, &mv)| PvLine {
            multipv: i as u32 + 1,
            score: AnalysisScore::Centipawns(mover_cp - 10 * i as i32),
            depth,
            pv: vec![chess::format_standard_uci(&board, mv)],
        })
        .collect();

    Ok(EngineEvaluation {
        score: lines[0].score,
        depth,
        seldepth: depth,
        best_move: lines[0].pv.first().cloned(),
        ponder: None,
        pv: lines[0].pv.clone(),
        nodes: 1000 * u64::from(depth),
        time_ms: 1,
        mate_in: None,
        lines,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_evaluation_is_legal_and_material_based() {
        let factory = MockEngineFactory::new();
        let mut engine = factory.spawn(0).await.unwrap();
        // Black to move, White up a queen
        let fen = "4k3/8/8/8/8/8/8/3QK3 b - - 0 1";
        let eval = engine.evaluate(fen, &SearchLimits::new(3, 0, 2)).await.unwrap();
        assert_eq!(eval.score, AnalysisScore::Centipawns(-900));
        assert_eq!(eval.lines.len(), 2);

        let board = chess::parse_fen(fen).unwrap();
        let best = eval.best_move.unwrap();
        assert!(chess::legal_moves(&board)
            .into_iter()
            .any(|mv| chess::format_standard_uci(&board, mv) == best));
    }

    #[tokio::test]
    async fn test_scripted_and_injected_failures() {
        let factory = MockEngineFactory::new();
        let scripted = EngineEvaluation::terminal(false);
        factory.script(chess::START_FEN, scripted.clone());
        let mut engine = factory.spawn(0).await.unwrap();
        let limits = SearchLimits::new(1, 0, 1);
        assert_eq!(engine.evaluate(chess::START_FEN, &limits).await.unwrap(), scripted);

        factory.crash_next_evaluations(1);
        assert!(engine.evaluate(chess::START_FEN, &limits).await.is_err());
        assert!(!engine.is_healthy());
        assert_eq!(factory.evaluation_count(), 2);
    }
}
