use cozy_chess::{BitBoard, Board, Color, File, Move, Piece, Rank, Square};

/// Returns the union of all attack squares for a given color.
pub fn attacked_squares(board: &Board, color: Color) -> BitBoard {
    let mut attacks = BitBoard::EMPTY;
    for piece in Piece::ALL {
        for sq in board.pieces(piece) & board.colors(color) {
            attacks |= piece_attacks(board, sq, piece, color);
        }
    }
    attacks
}

/// Returns all pieces of `color` that attack the given square.
pub fn attackers_of(board: &Board, sq: Square, color: Color) -> BitBoard {
    let occupied = board.occupied();
    let ours = board.colors(color);
    let diagonal = board.pieces(Piece::Bishop) | board.pieces(Piece::Queen);
    let straight = board.pieces(Piece::Rook) | board.pieces(Piece::Queen);

    // A pawn of `color` attacks `sq` iff an enemy pawn on `sq` would attack it back
    (cozy_chess::get_pawn_attacks(sq, !color) & board.pieces(Piece::Pawn)
        | cozy_chess::get_knight_moves(sq) & board.pieces(Piece::Knight)
        | cozy_chess::get_bishop_moves(sq, occupied) & diagonal
        | cozy_chess::get_rook_moves(sq, occupied) & straight
        | cozy_chess::get_king_moves(sq) & board.pieces(Piece::King))
        & ours
}

/// Standard piece values in centipawns.
pub fn piece_value(piece: Piece) -> u16 {
    match piece {
        Piece::Pawn => 100,
        Piece::Knight => 320,
        Piece::Bishop => 330,
        Piece::Rook => 500,
        Piece::Queen => 900,
        Piece::King => 20000,
    }
}

/// Returns the attack bitboard for a specific piece on a square.
pub fn piece_attacks(board: &Board, sq: Square, piece: Piece, color: Color) -> BitBoard {
    let occupied = board.occupied();
    match piece {
        Piece::Pawn => cozy_chess::get_pawn_attacks(sq, color),
        Piece::Knight => cozy_chess::get_knight_moves(sq),
        Piece::Bishop => cozy_chess::get_bishop_moves(sq, occupied),
        Piece::Rook => cozy_chess::get_rook_moves(sq, occupied),
        Piece::Queen => {
            cozy_chess::get_bishop_moves(sq, occupied) | cozy_chess::get_rook_moves(sq, occupied)
        }
        Piece::King => cozy_chess::get_king_moves(sq),
    }
}

/// The king's file and its neighbours, clamped to the board.
pub fn king_zone_files(king_sq: Square) -> impl Iterator<Item = File> {
    let king_file = king_sq.file() as usize;
    let min_file = king_file.saturating_sub(1);
    let max_file = (king_file + 1).min(7);
    (min_file..=max_file).filter_map(File::try_index)
}

pub fn file_bitboard(file: File) -> BitBoard {
    Rank::ALL
        .iter()
        .fold(BitBoard::EMPTY, |bb, &rank| bb | BitBoard::from(Square::new(file, rank)))
}

pub fn rank_bitboard(rank: Rank) -> BitBoard {
    File::ALL
        .iter()
        .fold(BitBoard::EMPTY, |bb, &file| bb | BitBoard::from(Square::new(file, rank)))
}

/// True when `mv` puts a piece where the opponent can win it for less.
///
/// Either the destination is attacked by a cheaper enemy piece, or it is
/// attacked and left undefended, and in both cases the piece is worth more
/// than whatever it captured. Pawn and king moves never count.
pub fn is_sacrifice(board: &Board, mv: Move) -> bool {
    let Some(piece) = board.piece_on(mv.from) else {
        return false;
    };
    if matches!(piece, Piece::Pawn | Piece::King) {
        return false;
    }

    let mover = board.side_to_move();
    let captured = match (board.piece_on(mv.to), board.color_on(mv.to)) {
        (Some(target), Some(color)) if color != mover => piece_value(target),
        _ => 0,
    };
    let moved_value = piece_value(piece);
    if moved_value <= captured {
        return false;
    }

    let mut after = board.clone();
    if after.try_play(mv).is_err() {
        return false;
    }

    let attackers = attackers_of(&after, mv.to, !mover);
    let Some(cheapest) = attackers
        .into_iter()
        .filter_map(|sq| after.piece_on(sq))
        .map(piece_value)
        .min()
    else {
        return false;
    };
    let defended = !attackers_of(&after, mv.to, mover).is_empty();

    cheapest < moved_value || !defended
}
