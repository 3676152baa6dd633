use std::collections::HashMap;

use cozy_chess::{Board, Move};
use serde::{Deserialize, Serialize};

use super::san::{format_san, parse_san, SanError};
use crate::fen::{format_fen, parse_fen, FenError};
use crate::types::PieceColor;
use crate::uci::format_standard_uci;

/// A parsed PGN game
#[derive(Debug, Clone)]
pub struct PgnGame {
    pub tags: HashMap<String, String>,
    pub start_fen: String,
    pub moves: Vec<PgnMove>,
    pub result: GameResult,
}

/// A single move in PGN with its surrounding positions
#[derive(Debug, Clone)]
pub struct PgnMove {
    pub mv: Move,
    /// Canonical SAN, regenerated from the board rather than copied from input
    pub san: String,
    /// Standard UCI (castling as the king's two-square move)
    pub uci: String,
    pub fen_before: String,
    pub fen_after: String,
    pub move_number: u16,
    pub color: PieceColor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameResult {
    #[serde(rename = "1-0")]
    WhiteWins,
    #[serde(rename = "0-1")]
    BlackWins,
    #[serde(rename = "1/2-1/2")]
    Draw,
    #[serde(rename = "*")]
    Ongoing,
}

impl GameResult {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "1-0" => Some(Self::WhiteWins),
            "0-1" => Some(Self::BlackWins),
            "1/2-1/2" | "½-½" => Some(Self::Draw),
            "*" => Some(Self::Ongoing),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::WhiteWins => "1-0",
            Self::BlackWins => "0-1",
            Self::Draw => "1/2-1/2",
            Self::Ongoing => "*",
        }
    }
}

impl PgnGame {
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags.get(name).map(String::as_str)
    }

    /// Normalized identity of the game: start position plus canonical SAN.
    /// Two inputs differing only in tags, comments, spacing or move-number
    /// style share a fingerprint.
    pub fn fingerprint(&self) -> String {
        let sans: Vec<&str> = self.moves.iter().map(|m| m.san.as_str()).collect();
        format!("{}|{}", self.start_fen, sans.join(" "))
    }
}

/// Parse a PGN string into a game
///
/// Accepts a full PGN with tag pairs, or bare movetext such as `1. e4 e5`.
/// Comments, variations and NAGs are skipped.
pub fn parse_pgn(input: &str) -> Result<PgnGame, PgnError> {
    if input.trim().is_empty() {
        return Err(PgnError::Empty);
    }

    let tokens = tokenize(input)?;

    let mut tags = HashMap::new();
    let mut san_tokens = Vec::new();
    let mut result = GameResult::Ongoing;

    for token in tokens {
        match token {
            Token::Tag(key, value) => {
                tags.insert(key, value);
            }
            Token::Word(word) => {
                if let Some(r) = GameResult::from_token(&word) {
                    result = r;
                    continue;
                }
                let san = strip_move_number(&word);
                if san.is_empty() || is_annotation(san) {
                    continue;
                }
                san_tokens.push(san.to_string());
            }
        }
    }

    let mut board = match tags.get("FEN") {
        Some(fen) => parse_fen(fen).map_err(PgnError::BadFen)?,
        None => Board::default(),
    };
    let start_fen = format_fen(&board);

    let mut moves = Vec::with_capacity(san_tokens.len());
    for (index, text) in san_tokens.iter().enumerate() {
        let mv = parse_san(&board, text).map_err(|source| PgnError::IllegalMove {
            ply: index + 1,
            san: text.clone(),
            source,
        })?;

        let fen_before = format_fen(&board);
        let san = format_san(&board, mv);
        let uci = format_standard_uci(&board, mv);
        let move_number = board.fullmove_number();
        let color = PieceColor::from(board.side_to_move());

        board.play_unchecked(mv);

        moves.push(PgnMove {
            mv,
            san,
            uci,
            fen_before,
            fen_after: format_fen(&board),
            move_number,
            color,
        });
    }

    if moves.is_empty() {
        return Err(PgnError::NoMoves);
    }

    Ok(PgnGame {
        tags,
        start_fen,
        moves,
        result,
    })
}

enum Token {
    Tag(String, String),
    Word(String),
}

fn tokenize(input: &str) -> Result<Vec<Token>, PgnError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    let mut word = String::new();

    macro_rules! flush {
        () => {
            if !word.is_empty() {
                tokens.push(Token::Word(std::mem::take(&mut word)));
            }
        };
    }

    while let Some(c) = chars.next() {
        match c {
            '[' => {
                flush!();
                let mut raw = String::new();
                let mut in_quotes = false;
                loop {
                    match chars.next() {
                        Some('\\') if in_quotes => {
                            if let Some(escaped) = chars.next() {
                                raw.push(escaped);
                            }
                        }
                        Some('"') => {
                            in_quotes = !in_quotes;
                            raw.push('"');
                        }
                        Some(']') if !in_quotes => break,
                        Some(ch) => raw.push(ch),
                        None => return Err(PgnError::InvalidTag(raw)),
                    }
                }
                let (key, value) = parse_tag(&raw)?;
                tokens.push(Token::Tag(key, value));
            }
            '{' => {
                flush!();
                skip_comment(&mut chars);
            }
            ';' => {
                flush!();
                for ch in chars.by_ref() {
                    if ch == '\n' {
                        break;
                    }
                }
            }
            '(' => {
                flush!();
                let mut depth = 1usize;
                while depth > 0 {
                    match chars.next() {
                        Some('(') => depth += 1,
                        Some(')') => depth -= 1,
                        Some('{') => skip_comment(&mut chars),
                        Some(_) => {}
                        None => return Err(PgnError::UnclosedVariation),
                    }
                }
            }
            // stray closer left by malformed input
            ')' => flush!(),
            '$' => {
                flush!();
                while chars.peek().is_some_and(|ch| ch.is_ascii_digit()) {
                    chars.next();
                }
            }
            c if c.is_whitespace() => flush!(),
            c => word.push(c),
        }
    }
    flush!();

    Ok(tokens)
}

fn skip_comment(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    for ch in chars.by_ref() {
        if ch == '}' {
            break;
        }
    }
}

fn parse_tag(raw: &str) -> Result<(String, String), PgnError> {
    let raw = raw.trim();
    let (key, rest) = raw
        .split_once(char::is_whitespace)
        .ok_or_else(|| PgnError::InvalidTag(raw.to_string()))?;
    let value = rest
        .trim()
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .ok_or_else(|| PgnError::InvalidTag(raw.to_string()))?;
    Ok((key.to_string(), value.to_string()))
}

/// "12." / "12..." / "12.e4" -> "" / "" / "e4"
fn strip_move_number(word: &str) -> &str {
    let digits = word.len() - word.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return word.trim_start_matches('.');
    }
    let rest = &word[digits..];
    if rest.is_empty() {
        // bare move number without dots
        return "";
    }
    if rest.starts_with('.') {
        rest.trim_start_matches('.')
    } else {
        word
    }
}

fn is_annotation(word: &str) -> bool {
    word.chars().all(|c| matches!(c, '!' | '?' | '+' | '-' | '='))
}

#[derive(Debug, thiserror::Error)]
pub enum PgnError {
    #[error("PGN is empty")]
    Empty,
    #[error("PGN contains no moves")]
    NoMoves,
    #[error("Invalid tag: {0}")]
    InvalidTag(String),
    #[error("Unclosed variation")]
    UnclosedVariation,
    #[error("Invalid FEN tag: {0}")]
    BadFen(#[source] FenError),
    #[error("Illegal move at ply {ply}: {san}")]
    IllegalMove {
        ply: usize,
        san: String,
        #[source]
        source: SanError,
    },
}
