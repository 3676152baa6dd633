//! Per-move quality labels from win-probability drops.

use serde::{Deserialize, Serialize};

/// Largest mover win-probability drop for each label.
pub const EXCELLENT_MAX_DROP: f64 = 0.02;
pub const GOOD_MAX_DROP: f64 = 0.05;
pub const INACCURACY_MAX_DROP: f64 = 0.10;
pub const MISTAKE_MAX_DROP: f64 = 0.20;

/// A best move is "great" when the runner-up was at least this much worse.
pub const GREAT_MARGIN: f64 = 0.20;
/// A drop this large right after the opponent's error counts as a miss.
pub const MISS_DROP: f64 = 0.10;
pub const OPPONENT_ERROR_DROP: f64 = 0.20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveClassification {
    /// Played from the opening book.
    Book,
    /// The engine's top choice.
    Best,
    Excellent,
    Good,
    Inaccuracy,
    Mistake,
    Blunder,
    /// Best move that gives up material without being already winning.
    Brilliant,
    /// Best move that was the only good one.
    Great,
    /// Failed to punish the opponent's error.
    Miss,
}

impl MoveClassification {
    pub const ALL: [Self; 10] = [
        Self::Book,
        Self::Best,
        Self::Excellent,
        Self::Good,
        Self::Inaccuracy,
        Self::Mistake,
        Self::Blunder,
        Self::Brilliant,
        Self::Great,
        Self::Miss,
    ];

    /// NAG (Numeric Annotation Glyph) for PGN export.
    pub fn to_nag(self) -> Option<u8> {
        match self {
            Self::Brilliant => Some(3), // !!
            Self::Great => Some(1),
            Self::Excellent => Some(1), // !
            Self::Inaccuracy => Some(6), // ?!
            Self::Mistake | Self::Miss => Some(2), // ?
            Self::Blunder => Some(4),    // ??
            Self::Book | Self::Best | Self::Good => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Book => "book",
            Self::Best => "best",
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Inaccuracy => "inaccuracy",
            Self::Mistake => "mistake",
            Self::Blunder => "blunder",
            Self::Brilliant => "brilliant",
            Self::Great => "great",
            Self::Miss => "miss",
        }
    }
}

/// Label a move from the mover's win probability before and after it.
///
/// Moves are compared in standard UCI text; a move equal to the engine's
/// choice is always `Best`.
pub fn classify_move(
    win_before: f64,
    win_after: f64,
    played: &str,
    best: Option<&str>,
) -> MoveClassification {
    if best == Some(played) {
        return MoveClassification::Best;
    }
    let drop = win_before - win_after;
    if drop <= EXCELLENT_MAX_DROP {
        MoveClassification::Excellent
    } else if drop <= GOOD_MAX_DROP {
        MoveClassification::Good
    } else if drop <= INACCURACY_MAX_DROP {
        MoveClassification::Inaccuracy
    } else if drop <= MISTAKE_MAX_DROP {
        MoveClassification::Mistake
    } else {
        MoveClassification::Blunder
    }
}

/// Everything known about a move beyond the two probabilities.
#[derive(Debug, Clone, Default)]
pub struct MoveContext<'a> {
    pub played: &'a str,
    pub best: Option<&'a str>,
    /// Mover's win probability before and after the move
    pub win_before: f64,
    pub win_after: f64,
    /// Mover's win probability had the engine's second line been played
    pub second_best_win: Option<f64>,
    pub is_book: bool,
    pub is_sacrifice: bool,
    /// How much the opponent's previous move cost them
    pub opponent_previous_drop: Option<f64>,
}

pub fn classify_in_context(ctx: &MoveContext<'_>) -> MoveClassification {
    if ctx.is_book {
        return MoveClassification::Book;
    }

    let base = classify_move(ctx.win_before, ctx.win_after, ctx.played, ctx.best);
    if base == MoveClassification::Best {
        if ctx.is_sacrifice && ctx.win_before < 0.9 && ctx.win_after >= 0.5 {
            return MoveClassification::Brilliant;
        }
        let only_move = ctx
            .second_best_win
            .is_some_and(|second| ctx.win_after - second >= GREAT_MARGIN);
        if only_move {
            return MoveClassification::Great;
        }
        return base;
    }

    let drop = ctx.win_before - ctx.win_after;
    let opponent_erred = ctx
        .opponent_previous_drop
        .is_some_and(|d| d >= OPPONENT_ERROR_DROP);
    if drop > MISS_DROP && opponent_erred {
        return MoveClassification::Miss;
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_drop_ladder() {
        let c = |after| classify_move(0.60, after, "e2e4", Some("d2d4"));
        assert_eq!(c(0.59), MoveClassification::Excellent);
        assert_eq!(c(0.56), MoveClassification::Good);
        assert_eq!(c(0.52), MoveClassification::Inaccuracy);
        assert_eq!(c(0.45), MoveClassification::Mistake);
        assert_eq!(c(0.30), MoveClassification::Blunder);
    }

    #[test]
    fn test_gain_is_excellent_without_engine_match() {
        assert_eq!(
            classify_move(0.4, 0.5, "e2e4", None),
            MoveClassification::Excellent
        );
    }

    #[test]
    fn test_nag_mapping() {
        assert_eq!(MoveClassification::Brilliant.to_nag(), Some(3));
        assert_eq!(MoveClassification::Blunder.to_nag(), Some(4));
        assert_eq!(MoveClassification::Inaccuracy.to_nag(), Some(6));
        assert_eq!(MoveClassification::Best.to_nag(), None);
        assert_eq!(MoveClassification::Book.to_nag(), None);
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&MoveClassification::Inaccuracy).unwrap();
        assert_eq!(json, "\"inaccuracy\"");
        for c in MoveClassification::ALL {
            assert_eq!(serde_json::to_string(&c).unwrap(), format!("\"{}\"", c.as_str()));
        }
    }

    #[test]
    fn test_book_wins_over_everything() {
        let ctx = MoveContext {
            played: "e2e4",
            best: Some("d2d4"),
            win_before: 0.5,
            win_after: 0.1,
            is_book: true,
            ..Default::default()
        };
        assert_eq!(classify_in_context(&ctx), MoveClassification::Book);
    }

    #[test]
    fn test_brilliant_and_great() {
        let sacrifice = MoveContext {
            played: "c4f7",
            best: Some("c4f7"),
            win_before: 0.55,
            win_after: 0.7,
            is_sacrifice: true,
            ..Default::default()
        };
        assert_eq!(classify_in_context(&sacrifice), MoveClassification::Brilliant);

        // Already winning: just the best move
        let winning = MoveContext {
            win_before: 0.95,
            win_after: 0.96,
            ..sacrifice.clone()
        };
        assert_eq!(classify_in_context(&winning), MoveClassification::Best);

        let only_move = MoveContext {
            played: "g1f3",
            best: Some("g1f3"),
            win_before: 0.5,
            win_after: 0.5,
            second_best_win: Some(0.25),
            ..Default::default()
        };
        assert_eq!(classify_in_context(&only_move), MoveClassification::Great);
    }

    #[test]
    fn test_miss_after_opponent_blunder() {
        let ctx = MoveContext {
            played: "a2a3",
            best: Some("d1h5"),
            win_before: 0.85,
            win_after: 0.6,
            opponent_previous_drop: Some(0.35),
            ..Default::default()
        };
        assert_eq!(classify_in_context(&ctx), MoveClassification::Miss);

        let no_error = MoveContext {
            opponent_previous_drop: Some(0.05),
            ..ctx
        };
        assert_eq!(classify_in_context(&no_error), MoveClassification::Blunder);
    }

    proptest! {
        #[test]
        fn prop_best_move_is_always_best(before in 0.0f64..=1.0, after in 0.0f64..=1.0) {
            prop_assert_eq!(
                classify_move(before, after, "e2e4", Some("e2e4")),
                MoveClassification::Best
            );
        }
    }
}
