//! Score normalization: centipawns -> win probability -> display values.
//!
//! The constants are calibrated against large game databases and are used
//! verbatim; displayed accuracy depends on their exact values.

use chess::AnalysisScore;
use serde::{Deserialize, Serialize};

/// Sigmoid slope mapping centipawns to win probability.
pub const WIN_PROBABILITY_K: f64 = 0.00368208;
pub const MIN_WIN_PROBABILITY: f64 = 0.001;
pub const MAX_WIN_PROBABILITY: f64 = 0.999;

/// Display scores are clamped to +/- this many centipawns.
pub const DISPLAY_CAP_CP: i32 = 1000;

/// Centipawn stand-in for any forced mate.
pub const MATE_CP: i32 = 10_000;

pub const SMOOTHING_ALPHA: f64 = 0.15;
/// Used instead of [`SMOOTHING_ALPHA`] when the raw value jumps by more than
/// [`SWING_THRESHOLD`], so real blunders show up promptly.
pub const SWING_ALPHA: f64 = 0.3;
pub const SWING_THRESHOLD: f64 = 0.3;

/// Smoothed probability moving less than this counts as stable.
pub const STABILITY_THRESHOLD: f64 = 0.05;

/// Win probability for the player of interest.
///
/// `cp_white` is from White's point of view; `is_mover_white` selects whose
/// probability is returned.
pub fn to_win_probability(cp_white: i32, is_mover_white: bool) -> f64 {
    let cp = f64::from(cp_white);
    let cp = if is_mover_white { cp } else { -cp };
    let p = 1.0 / (1.0 + (-WIN_PROBABILITY_K * cp).exp());
    p.clamp(MIN_WIN_PROBABILITY, MAX_WIN_PROBABILITY)
}

/// Centipawn value of an engine score, from the same side as the score.
///
/// Every mate maps to +/-[`MATE_CP`]; mate 0 means the side to move is mated.
pub fn score_to_cp(score: AnalysisScore) -> i32 {
    match score {
        AnalysisScore::Centipawns(cp) => cp.clamp(-MATE_CP, MATE_CP),
        AnalysisScore::Mate(n) if n > 0 => MATE_CP,
        AnalysisScore::Mate(_) => -MATE_CP,
    }
}

/// Convert a side-to-move score into centipawns from White's point of view.
pub fn to_white_cp(score: AnalysisScore, white_to_move: bool) -> i32 {
    let cp = score_to_cp(score);
    if white_to_move {
        cp
    } else {
        -cp
    }
}

pub fn cap_score(cp: i32) -> i32 {
    cp.clamp(-DISPLAY_CAP_CP, DISPLAY_CAP_CP)
}

/// Exponential blend of a new probability with the previous smoothed one.
pub fn smooth(p_new: f64, p_prev: f64) -> f64 {
    let alpha = if (p_new - p_prev).abs() > SWING_THRESHOLD {
        SWING_ALPHA
    } else {
        SMOOTHING_ALPHA
    };
    (alpha * p_new + (1.0 - alpha) * p_prev).clamp(0.0, 1.0)
}

/// Evaluation bar position in [-1, 1], square-root compressed around 0.5.
pub fn to_eval_bar(p: f64) -> f64 {
    let advantage = p - 0.5;
    let magnitude = (advantage.abs() / 0.5).sqrt();
    (advantage.signum() * magnitude).clamp(-1.0, 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assessment {
    Winning,
    MuchBetter,
    SlightlyBetter,
    Equal,
    SlightlyWorse,
    MuchWorse,
    Losing,
}

impl Assessment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Winning => "winning",
            Self::MuchBetter => "much_better",
            Self::SlightlyBetter => "slightly_better",
            Self::Equal => "equal",
            Self::SlightlyWorse => "slightly_worse",
            Self::MuchWorse => "much_worse",
            Self::Losing => "losing",
        }
    }
}

/// Qualitative label for a win probability.
pub fn assess(p: f64) -> Assessment {
    if p >= 0.90 {
        Assessment::Winning
    } else if p >= 0.75 {
        Assessment::MuchBetter
    } else if p > 0.55 {
        // (0.55, 0.60) reads as a small edge, same as >= 0.60
        Assessment::SlightlyBetter
    } else if p >= 0.45 {
        Assessment::Equal
    } else if p >= 0.40 {
        Assessment::SlightlyWorse
    } else if p >= 0.25 {
        Assessment::MuchWorse
    } else {
        Assessment::Losing
    }
}

/// What a client renders for one evaluated position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayEvaluation {
    pub win_probability: f64,
    pub smoothed_win_probability: f64,
    /// Capped centipawns from the displayed perspective
    pub display_score: i32,
    pub eval_bar: f64,
    pub assessment: Assessment,
    pub is_stable: bool,
}

impl DisplayEvaluation {
    /// Display values for a position seen on its own, without history.
    pub fn standalone(cp_white: i32, perspective_white: bool) -> Self {
        EvaluationSmoother::new().next(cp_white, perspective_white)
    }
}

/// Carries the previous smoothed probability across the moves of a game.
#[derive(Debug, Clone, Default)]
pub struct EvaluationSmoother {
    previous: Option<f64>,
}

impl EvaluationSmoother {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn previous(&self) -> Option<f64> {
        self.previous
    }

    pub fn next(&mut self, cp_white: i32, perspective_white: bool) -> DisplayEvaluation {
        let raw = to_win_probability(cp_white, perspective_white);
        let smoothed = self.previous.map_or(raw, |prev| smooth(raw, prev));
        let is_stable = self
            .previous
            .map_or(true, |prev| (smoothed - prev).abs() < STABILITY_THRESHOLD);
        self.previous = Some(smoothed);

        let cp = if perspective_white { cp_white } else { cp_white.saturating_neg() };
        DisplayEvaluation {
            win_probability: raw,
            smoothed_win_probability: smoothed,
            display_score: cap_score(cp),
            eval_bar: to_eval_bar(smoothed),
            assessment: assess(raw),
            is_stable,
        }
    }
}
