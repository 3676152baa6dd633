pub mod analysis;
pub mod fen;
pub mod material;
pub mod pgn;
pub mod types;
pub mod uci;

pub use analysis::AnalysisScore;
pub use fen::{format_fen, normalize_fen, parse_fen, FenError};
pub use material::{pawn_units, MaterialCount, SideMaterial};
pub use pgn::{format_san, parse_pgn, parse_san, GameResult, PgnError, PgnGame, PgnMove, SanError};
pub use types::PieceColor;
pub use uci::{
    convert_uci_castling_to_cozy, format_standard_uci, format_uci_move, is_castling,
    parse_uci_move, MoveParseError,
};

use cozy_chess::{Board, GameStatus, Move};

pub const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// All legal moves for the side to move (castling in king-to-rook form).
pub fn legal_moves(board: &Board) -> Vec<Move> {
    let mut moves = Vec::new();
    board.generate_moves(|mvs| {
        moves.extend(mvs);
        false
    });
    moves
}

/// True when the side to move has no legal moves (checkmate or stalemate).
pub fn is_game_over(board: &Board) -> bool {
    board.status() != GameStatus::Ongoing
}

/// True when the side to move is checkmated.
pub fn is_checkmate(board: &Board) -> bool {
    board.status() == GameStatus::Won
}
