use cozy_chess::{Board, GameStatus, Move, Piece, Square};

use crate::legal_moves;
use crate::uci::{
    convert_uci_castling_to_cozy, file_char, format_square, format_uci_move, is_castling,
    parse_square, parse_uci_move, rank_char,
};

/// Parse Standard Algebraic Notation (SAN) move
///
/// Tolerates trailing check/annotation marks (`+`, `#`, `!`, `?`), `0-0`
/// castling spellings and redundant disambiguation. Text that is not SAN
/// but is a legal UCI move (`e2e4`) is accepted as well.
pub fn parse_san(board: &Board, san: &str) -> Result<Move, SanError> {
    let text = san.trim().trim_end_matches(['+', '#', '!', '?']);
    let text = text.strip_suffix("e.p.").unwrap_or(text).trim_end();
    if text.is_empty() {
        return Err(SanError::Empty);
    }

    let legal = legal_moves(board);

    match text {
        "O-O" | "0-0" => return find_castle(board, &legal, true, san),
        "O-O-O" | "0-0-0" => return find_castle(board, &legal, false, san),
        _ => {}
    }

    if let Some(pattern) = SanPattern::parse(text) {
        let candidates: Vec<Move> = legal
            .iter()
            .copied()
            .filter(|&mv| pattern.matches(board, mv))
            .collect();
        match candidates.len() {
            1 => return Ok(candidates[0]),
            0 => {}
            _ => return Err(SanError::Ambiguous(san.to_string())),
        }
    }

    // UCI fallback
    if let Ok(mv) = parse_uci_move(text) {
        let mv = convert_uci_castling_to_cozy(mv, &legal);
        if legal.contains(&mv) {
            return Ok(mv);
        }
    }

    Err(SanError::Illegal(san.to_string()))
}

fn find_castle(board: &Board, legal: &[Move], kingside: bool, san: &str) -> Result<Move, SanError> {
    legal
        .iter()
        .copied()
        .find(|&mv| is_castling(board, mv) && (mv.to.file() > mv.from.file()) == kingside)
        .ok_or_else(|| SanError::Illegal(san.to_string()))
}

/// Structural pieces of a SAN token, after suffixes are stripped.
struct SanPattern {
    piece: Piece,
    from_file: Option<char>,
    from_rank: Option<char>,
    to: Square,
    promotion: Option<Piece>,
}

impl SanPattern {
    fn parse(text: &str) -> Option<Self> {
        let (body, promotion) = match text.split_once('=') {
            Some((body, promo)) => (body, Some(promotion_piece(promo)?)),
            None => {
                // "e8Q" without '='
                let last = text.chars().last()?;
                let has_trailing_piece = text.len() >= 3
                    && "QRBN".contains(last)
                    && text[..text.len() - 1].ends_with(|c: char| c.is_ascii_digit());
                if has_trailing_piece {
                    (&text[..text.len() - 1], Some(promotion_piece(&last.to_string())?))
                } else {
                    (text, None)
                }
            }
        };

        let (piece, rest) = match body.chars().next()? {
            'N' => (Piece::Knight, &body[1..]),
            'B' => (Piece::Bishop, &body[1..]),
            'R' => (Piece::Rook, &body[1..]),
            'Q' => (Piece::Queen, &body[1..]),
            'K' => (Piece::King, &body[1..]),
            _ => (Piece::Pawn, body),
        };

        let squares: String = rest.chars().filter(|&c| c != 'x' && c != '-' && c != ':').collect();
        if squares.len() < 2 || !squares.is_ascii() {
            return None;
        }
        let to = parse_square(&squares[squares.len() - 2..]).ok()?;

        let mut from_file = None;
        let mut from_rank = None;
        for c in squares[..squares.len() - 2].chars() {
            match c {
                'a'..='h' if from_file.is_none() => from_file = Some(c),
                '1'..='8' if from_rank.is_none() => from_rank = Some(c),
                _ => return None,
            }
        }

        Some(Self {
            piece,
            from_file,
            from_rank,
            to,
            promotion,
        })
    }

    fn matches(&self, board: &Board, mv: Move) -> bool {
        board.piece_on(mv.from) == Some(self.piece)
            && !is_castling(board, mv)
            && mv.to == self.to
            && mv.promotion == self.promotion
            && self.from_file.map_or(true, |f| file_char(mv.from.file()) == f)
            && self.from_rank.map_or(true, |r| rank_char(mv.from.rank()) == r)
    }
}

fn promotion_piece(s: &str) -> Option<Piece> {
    match s {
        "Q" | "q" => Some(Piece::Queen),
        "R" | "r" => Some(Piece::Rook),
        "B" | "b" => Some(Piece::Bishop),
        "N" | "n" => Some(Piece::Knight),
        _ => None,
    }
}

/// Format a move as SAN
///
/// `mv` must be legal on `board`; anything else is rendered as raw UCI.
pub fn format_san(board: &Board, mv: Move) -> String {
    let Some(piece) = board.piece_on(mv.from) else {
        return format_uci_move(mv);
    };

    let mut san = String::new();

    if is_castling(board, mv) {
        san.push_str(if mv.to.file() > mv.from.file() {
            "O-O"
        } else {
            "O-O-O"
        });
    } else if piece == Piece::Pawn {
        // A file change is always a capture, en passant included
        if mv.from.file() != mv.to.file() {
            san.push(file_char(mv.from.file()));
            san.push('x');
        }
        san.push_str(&format_square(mv.to));
        if let Some(promo) = mv.promotion {
            san.push('=');
            san.push(piece_letter(promo));
        }
    } else {
        san.push(piece_letter(piece));
        san.push_str(&disambiguation(board, mv, piece));
        if board.color_on(mv.to).is_some() {
            san.push('x');
        }
        san.push_str(&format_square(mv.to));
    }

    let mut after = board.clone();
    if after.try_play(mv).is_ok() {
        if after.status() == GameStatus::Won {
            san.push('#');
        } else if !after.checkers().is_empty() {
            san.push('+');
        }
    }

    san
}

fn disambiguation(board: &Board, mv: Move, piece: Piece) -> String {
    let rivals: Vec<Square> = legal_moves(board)
        .into_iter()
        .filter(|other| {
            other.to == mv.to && other.from != mv.from && board.piece_on(other.from) == Some(piece)
        })
        .map(|other| other.from)
        .collect();

    if rivals.is_empty() {
        return String::new();
    }

    let shares_file = rivals.iter().any(|sq| sq.file() == mv.from.file());
    let shares_rank = rivals.iter().any(|sq| sq.rank() == mv.from.rank());

    if !shares_file {
        file_char(mv.from.file()).to_string()
    } else if !shares_rank {
        rank_char(mv.from.rank()).to_string()
    } else {
        format_square(mv.from)
    }
}

fn piece_letter(piece: Piece) -> char {
    match piece {
        Piece::Pawn => 'P',
        Piece::Knight => 'N',
        Piece::Bishop => 'B',
        Piece::Rook => 'R',
        Piece::Queen => 'Q',
        Piece::King => 'K',
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SanError {
    #[error("Empty move text")]
    Empty,
    #[error("Illegal or unparseable move: {0}")]
    Illegal(String),
    #[error("Ambiguous move: {0}")]
    Ambiguous(String),
}
