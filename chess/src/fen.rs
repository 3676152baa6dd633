use cozy_chess::Board;

/// Parse a FEN string into a Board
pub fn parse_fen(fen: &str) -> Result<Board, FenError> {
    let trimmed = fen.trim();
    if trimmed.is_empty() {
        return Err(FenError::Empty);
    }
    if trimmed.split_whitespace().count() < 4 {
        return Err(FenError::InvalidFormat(trimmed.to_string()));
    }

    // cozy-chess accepts both standard and Shredder castling fields
    trimmed
        .parse()
        .map_err(|_| FenError::InvalidFormat(trimmed.to_string()))
}

/// Format a Board as a FEN string
pub fn format_fen(board: &Board) -> String {
    board.to_string()
}

/// Canonical form of a FEN: parsed and re-emitted, so that whitespace and
/// missing move counters do not produce distinct cache keys.
pub fn normalize_fen(fen: &str) -> Result<String, FenError> {
    parse_fen(fen).map(|board| format_fen(&board))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FenError {
    #[error("FEN is empty")]
    Empty,
    #[error("Invalid FEN: {0}")]
    InvalidFormat(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start_position() {
        let board = parse_fen(crate::START_FEN).unwrap();
        assert_eq!(format_fen(&board), format_fen(&Board::default()));
    }

    #[test]
    fn test_empty_fen_rejected() {
        assert_eq!(parse_fen("   "), Err(FenError::Empty));
    }

    #[test]
    fn test_garbage_fen_rejected() {
        assert!(matches!(
            parse_fen("not a fen at all"),
            Err(FenError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_normalize_collapses_whitespace() {
        let messy = "  rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR   b KQkq - 0 1 ";
        let clean = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1";
        assert_eq!(normalize_fen(messy).unwrap(), normalize_fen(clean).unwrap());
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = normalize_fen(crate::START_FEN).unwrap();
        assert_eq!(normalize_fen(&once).unwrap(), once);
    }
}
