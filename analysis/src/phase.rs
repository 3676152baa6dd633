//! Opening / middlegame / endgame boundaries.

use chess::MaterialCount;
use serde::{Deserialize, Serialize};

/// Non-pawn material (both sides, pawn units) at or below which it is an endgame.
pub const ENDGAME_MAX_NON_PAWN: u32 = 26;
/// The opening lasts through this full-move number while material is intact.
pub const OPENING_MAX_MOVE: u16 = 12;
/// Non-pawn material needed to still be in the opening (62 at the start).
pub const OPENING_MIN_NON_PAWN: u32 = 56;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GamePhase {
    Opening,
    Middlegame,
    Endgame,
}

impl GamePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Opening => "opening",
            Self::Middlegame => "middlegame",
            Self::Endgame => "endgame",
        }
    }
}

/// Phase of a single position, without history.
pub fn classify_phase(material: &MaterialCount, move_number: u16) -> GamePhase {
    let non_pawn = material.total_non_pawn();
    if non_pawn <= ENDGAME_MAX_NON_PAWN {
        GamePhase::Endgame
    } else if move_number <= OPENING_MAX_MOVE && non_pawn >= OPENING_MIN_NON_PAWN {
        GamePhase::Opening
    } else {
        GamePhase::Middlegame
    }
}

/// First ply (1-based) of each later phase, if the game reached it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseBoundaries {
    pub middlegame_start: Option<u32>,
    pub endgame_start: Option<u32>,
}

impl PhaseBoundaries {
    pub fn phase_at(&self, ply: u32) -> GamePhase {
        match (self.middlegame_start, self.endgame_start) {
            (_, Some(end)) if ply >= end => GamePhase::Endgame,
            (Some(mid), _) if ply >= mid => GamePhase::Middlegame,
            _ => GamePhase::Opening,
        }
    }
}

/// Boundaries over the positions reached after each ply.
///
/// `positions[i]` is the material and full-move number after ply `i + 1`.
/// Phases never go backwards: a game that trades into an endgame stays
/// there, and an endgame reached straight from the opening also marks the
/// middlegame start at the same ply.
pub fn phase_boundaries(positions: &[(MaterialCount, u16)]) -> PhaseBoundaries {
    let mut boundaries = PhaseBoundaries::default();
    let mut current = GamePhase::Opening;

    for (i, (material, move_number)) in positions.iter().enumerate() {
        let ply = i as u32 + 1;
        let phase = classify_phase(material, *move_number).max(current);
        if phase > current {
            if boundaries.middlegame_start.is_none() {
                boundaries.middlegame_start = Some(ply);
            }
            if phase == GamePhase::Endgame {
                boundaries.endgame_start = Some(ply);
            }
            current = phase;
        }
    }

    boundaries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn material(fen: &str) -> MaterialCount {
        MaterialCount::of(&chess::parse_fen(fen).unwrap())
    }

    const ROOK_ENDING: &str = "4k3/pppr4/8/8/8/8/PPPR4/4K3 w - - 0 40";

    #[test]
    fn test_single_position_phases() {
        let start = material(chess::START_FEN);
        assert_eq!(classify_phase(&start, 1), GamePhase::Opening);
        assert_eq!(classify_phase(&start, 13), GamePhase::Middlegame);
        assert_eq!(classify_phase(&material(ROOK_ENDING), 40), GamePhase::Endgame);

        // queens off early: no longer the opening
        let queenless = material("rnb1kbnr/pppppppp/8/8/8/8/PPPPPPPP/RNB1KBNR w KQkq - 0 6");
        assert_eq!(classify_phase(&queenless, 6), GamePhase::Middlegame);
    }

    #[test]
    fn test_boundaries_are_monotone() {
        let start = material(chess::START_FEN);
        let ending = material(ROOK_ENDING);
        let positions = vec![
            (start, 1),
            (start, 14),
            (ending, 30),
            // an endgame never returns to the middlegame
            (start, 31),
        ];
        let b = phase_boundaries(&positions);
        assert_eq!(b.middlegame_start, Some(2));
        assert_eq!(b.endgame_start, Some(3));
        assert_eq!(b.phase_at(1), GamePhase::Opening);
        assert_eq!(b.phase_at(2), GamePhase::Middlegame);
        assert_eq!(b.phase_at(4), GamePhase::Endgame);
    }

    #[test]
    fn test_short_game_stays_in_opening() {
        let start = material(chess::START_FEN);
        let b = phase_boundaries(&[(start, 1), (start, 2)]);
        assert_eq!(b, PhaseBoundaries::default());
    }

    #[test]
    fn test_opening_straight_to_endgame() {
        let ending = material(ROOK_ENDING);
        let b = phase_boundaries(&[(ending, 1)]);
        assert_eq!(b.middlegame_start, Some(1));
        assert_eq!(b.endgame_start, Some(1));
    }
}
