//! Coarse classification of a single position.

use chess::{MaterialCount, PieceColor};
use cozy_chess::{BitBoard, Board, Color, Piece, Rank};
use serde::{Deserialize, Serialize};

use crate::helpers::{attacked_squares, attackers_of, file_bitboard, king_zone_files, rank_bitboard};
use crate::phase::{classify_phase, GamePhase};

/// Exposure at or above which a king is under attack.
pub const UNDER_ATTACK_EXPOSURE: f32 = 0.6;
/// Exposure at or above which a king is exposed.
pub const EXPOSED_EXPOSURE: f32 = 0.35;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KingSafetyTag {
    Safe,
    Exposed,
    UnderAttack,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KingSafety {
    pub tag: KingSafetyTag,
    /// Number of shield pawns present (0-3).
    pub pawn_shield: u8,
    /// King-adjacent files without own pawns (0-3).
    pub open_files: u8,
    /// Weighted attack on the king zone: Q=4, R=3, B=2, N=2, P=1, K=1.
    pub attack_weight: u16,
    /// Composite exposure from 0.0 (safe) to 1.0 (exposed).
    pub exposure: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionClassification {
    pub phase: GamePhase,
    /// White minus Black, in pawn units
    pub material_balance: i32,
    pub material: MaterialCount,
    pub white_king: KingSafety,
    pub black_king: KingSafety,
}

pub fn classify_position(board: &Board) -> PositionClassification {
    let material = MaterialCount::of(board);
    let move_number = u16::try_from(board.fullmove_number()).unwrap_or(u16::MAX);
    PositionClassification {
        phase: classify_phase(&material, move_number),
        material_balance: material.balance(),
        white_king: king_safety(board, Color::White),
        black_king: king_safety(board, Color::Black),
        material,
    }
}

fn king_safety(board: &Board, color: Color) -> KingSafety {
    let enemy = !color;
    let Some(king_sq) = (board.pieces(Piece::King) & board.colors(color)).into_iter().next() else {
        return KingSafety {
            tag: KingSafetyTag::UnderAttack,
            pawn_shield: 0,
            open_files: 3,
            attack_weight: 0,
            exposure: 1.0,
        };
    };

    let king_zone = cozy_chess::get_king_moves(king_sq) | BitBoard::from(king_sq);
    let own_pawns = board.pieces(Piece::Pawn) & board.colors(color);
    let shield_ranks = match color {
        Color::White => rank_bitboard(Rank::Second) | rank_bitboard(Rank::Third),
        Color::Black => rank_bitboard(Rank::Seventh) | rank_bitboard(Rank::Sixth),
    };

    let mut pawn_shield = 0u8;
    let mut open_files = 0u8;
    for file in king_zone_files(king_sq) {
        let on_file = own_pawns & file_bitboard(file);
        if on_file.is_empty() {
            open_files += 1;
        } else if !(on_file & shield_ranks).is_empty() {
            pawn_shield += 1;
        }
    }

    let zone_attacked = (attacked_squares(board, enemy) & king_zone).len();
    let mut attackers = BitBoard::EMPTY;
    for sq in king_zone {
        attackers |= attackers_of(board, sq, enemy);
    }
    let attack_weight: u16 = attackers
        .into_iter()
        .filter_map(|sq| board.piece_on(sq))
        .map(|piece| match piece {
            Piece::Queen => 4,
            Piece::Rook => 3,
            Piece::Bishop | Piece::Knight => 2,
            Piece::Pawn | Piece::King => 1,
        })
        .sum();

    let shield_deficit = (3.0 - f32::from(pawn_shield)) / 3.0;
    let open_file_factor = f32::from(open_files) / 3.0;
    let attack_factor = (f32::from(attack_weight) / 20.0).min(1.0);
    let zone_control = zone_attacked as f32 / king_zone.len() as f32;
    let exposure = (0.25 * shield_deficit
        + 0.20 * open_file_factor
        + 0.30 * attack_factor
        + 0.25 * zone_control)
        .clamp(0.0, 1.0);

    let in_check = board.side_to_move() == color && !board.checkers().is_empty();
    let tag = if in_check || exposure >= UNDER_ATTACK_EXPOSURE {
        KingSafetyTag::UnderAttack
    } else if exposure >= EXPOSED_EXPOSURE {
        KingSafetyTag::Exposed
    } else {
        KingSafetyTag::Safe
    };

    KingSafety {
        tag,
        pawn_shield,
        open_files,
        attack_weight,
        exposure,
    }
}

impl PositionClassification {
    pub fn king(&self, color: PieceColor) -> &KingSafety {
        match color {
            PieceColor::White => &self.white_king,
            PieceColor::Black => &self.black_king,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(fen: &str) -> PositionClassification {
        classify_position(&chess::parse_fen(fen).unwrap())
    }

    #[test]
    fn test_start_position() {
        let c = classify(chess::START_FEN);
        assert_eq!(c.phase, GamePhase::Opening);
        assert_eq!(c.material_balance, 0);
        assert_eq!(c.white_king.tag, KingSafetyTag::Safe);
        assert_eq!(c.black_king.tag, KingSafetyTag::Safe);
        assert_eq!(c.white_king.pawn_shield, 3);
        assert!(c.white_king.exposure < 0.1);
    }

    #[test]
    fn test_bare_kings_are_exposed() {
        let c = classify("4k3/8/8/8/8/8/8/4K3 w - - 0 50");
        assert_eq!(c.phase, GamePhase::Endgame);
        assert_eq!(c.white_king.open_files, 3);
        assert_eq!(c.white_king.tag, KingSafetyTag::Exposed);
    }

    #[test]
    fn test_check_is_under_attack() {
        // Fool's mate final position
        let c = classify("rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3");
        assert_eq!(c.white_king.tag, KingSafetyTag::UnderAttack);
        assert_eq!(c.black_king.tag, KingSafetyTag::Safe);
    }

    #[test]
    fn test_material_balance_sign() {
        let c = classify("4k3/8/8/8/8/8/8/3QK3 w - - 0 1");
        assert_eq!(c.material_balance, 9);
        assert_eq!(c.king(PieceColor::Black).tag, c.black_king.tag);
    }

    #[test]
    fn test_serialized_tags() {
        let json = serde_json::to_string(&KingSafetyTag::UnderAttack).unwrap();
        assert_eq!(json, "\"under_attack\"");
    }
}
