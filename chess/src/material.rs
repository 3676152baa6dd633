//! Material counting in conventional pawn units.

use cozy_chess::{Board, Color, Piece};
use serde::{Deserialize, Serialize};

use crate::types::PieceColor;

/// Conventional piece values (pawn = 1). The king counts as zero.
pub fn pawn_units(piece: Piece) -> u32 {
    match piece {
        Piece::Pawn => 1,
        Piece::Knight | Piece::Bishop => 3,
        Piece::Rook => 5,
        Piece::Queen => 9,
        Piece::King => 0,
    }
}

/// Piece counts for one side, excluding the king.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideMaterial {
    pub pawns: u32,
    pub knights: u32,
    pub bishops: u32,
    pub rooks: u32,
    pub queens: u32,
}

impl SideMaterial {
    pub fn points(&self) -> u32 {
        self.pawns + self.non_pawn_points()
    }

    pub fn non_pawn_points(&self) -> u32 {
        3 * (self.knights + self.bishops) + 5 * self.rooks + 9 * self.queens
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialCount {
    pub white: SideMaterial,
    pub black: SideMaterial,
}

impl MaterialCount {
    pub fn of(board: &Board) -> Self {
        Self {
            white: side(board, Color::White),
            black: side(board, Color::Black),
        }
    }

    pub fn side(&self, color: PieceColor) -> &SideMaterial {
        match color {
            PieceColor::White => &self.white,
            PieceColor::Black => &self.black,
        }
    }

    /// White points minus Black points.
    pub fn balance(&self) -> i32 {
        self.white.points() as i32 - self.black.points() as i32
    }

    /// Non-pawn material of both sides combined.
    pub fn total_non_pawn(&self) -> u32 {
        self.white.non_pawn_points() + self.black.non_pawn_points()
    }
}

fn side(board: &Board, color: Color) -> SideMaterial {
    let count = |piece| (board.pieces(piece) & board.colors(color)).len();
    SideMaterial {
        pawns: count(Piece::Pawn),
        knights: count(Piece::Knight),
        bishops: count(Piece::Bishop),
        rooks: count(Piece::Rook),
        queens: count(Piece::Queen),
    }
}
