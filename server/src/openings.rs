//! Opening-book collaborator. The book's contents live outside this crate;
//! lookups here only need to say which named line a game follows.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Opening {
    pub eco: String,
    pub name: String,
    /// Standard UCI moves from the initial position
    pub moves: Vec<String>,
}

pub trait OpeningBook: Send + Sync + 'static {
    /// The deepest known opening whose moves are a prefix of `moves_uci`.
    fn lookup(&self, moves_uci: &[String]) -> Option<Opening>;

    /// True while `moves_uci` still follows some book line.
    fn is_book_line(&self, moves_uci: &[String]) -> bool;
}

/// Book with no entries; nothing is ever "book".
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpeningBook;

impl OpeningBook for NoOpeningBook {
    fn lookup(&self, _moves_uci: &[String]) -> Option<Opening> {
        None
    }

    fn is_book_line(&self, _moves_uci: &[String]) -> bool {
        false
    }
}

/// In-memory list of openings.
#[derive(Debug, Clone, Default)]
pub struct StaticOpeningBook {
    entries: Vec<Opening>,
}

impl StaticOpeningBook {
    pub fn new(entries: Vec<Opening>) -> Self {
        Self { entries }
    }

    /// Add an entry from a space-separated UCI line.
    pub fn with(mut self, eco: &str, name: &str, line: &str) -> Self {
        self.entries.push(Opening {
            eco: eco.to_string(),
            name: name.to_string(),
            moves: line.split_whitespace().map(str::to_string).collect(),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl OpeningBook for StaticOpeningBook {
    fn lookup(&self, moves_uci: &[String]) -> Option<Opening> {
        self.entries
            .iter()
            .filter(|o| !o.moves.is_empty() && moves_uci.starts_with(&o.moves))
            .max_by_key(|o| o.moves.len())
            .cloned()
    }

    fn is_book_line(&self, moves_uci: &[String]) -> bool {
        !moves_uci.is_empty() && self.entries.iter().any(|o| o.moves.starts_with(moves_uci))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn moves(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    fn book() -> StaticOpeningBook {
        StaticOpeningBook::default()
            .with("C20", "King's Pawn Game", "e2e4 e7e5")
            .with("C50", "Italian Game", "e2e4 e7e5 g1f3 b8c6 f1c4")
            .with("B20", "Sicilian Defence", "e2e4 c7c5")
    }

    #[test]
    fn test_lookup_picks_deepest_prefix() {
        let b = book();
        let italian = moves("e2e4 e7e5 g1f3 b8c6 f1c4 f8c5 c2c3");
        assert_eq!(b.lookup(&italian).unwrap().eco, "C50");
        assert_eq!(b.lookup(&moves("e2e4 e7e5 d2d4")).unwrap().eco, "C20");
        assert!(b.lookup(&moves("d2d4")).is_none());
    }

    #[test]
    fn test_book_line_membership() {
        let b = book();
        assert!(b.is_book_line(&moves("e2e4")));
        assert!(b.is_book_line(&moves("e2e4 e7e5 g1f3")));
        assert!(!b.is_book_line(&moves("e2e4 e7e5 d2d4")));
        assert!(!b.is_book_line(&[]));
        assert!(!NoOpeningBook.is_book_line(&moves("e2e4")));
    }
}
