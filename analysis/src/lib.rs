//! Pure transforms from engine scores to what a reviewer sees: win
//! probabilities, move labels, accuracy and game structure.

pub mod accuracy;
pub mod classify;
pub mod critical;
pub mod helpers;
pub mod normalize;
pub mod phase;
pub mod position;

pub use accuracy::{game_accuracy, game_accuracy_from, move_accuracy};
pub use chess::AnalysisScore;
pub use classify::{classify_in_context, classify_move, MoveClassification, MoveContext};
pub use critical::{find_critical_moments, CriticalMoment, CRITICAL_SWING};
pub use normalize::{
    assess, cap_score, score_to_cp, smooth, to_eval_bar, to_white_cp, to_win_probability,
    Assessment, DisplayEvaluation, EvaluationSmoother,
};
pub use phase::{classify_phase, phase_boundaries, GamePhase, PhaseBoundaries};
pub use position::{classify_position, KingSafety, KingSafetyTag, PositionClassification};
