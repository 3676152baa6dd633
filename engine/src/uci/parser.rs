use crate::EngineInfo;
use chess::{parse_uci_move, AnalysisScore};
use cozy_chess::Move;

/// Incoming message from UCI engine
#[derive(Debug, Clone)]
pub enum UciMessage {
    Id { name: String, value: String },
    UciOk,
    ReadyOk,
    /// `mv` is `None` for `bestmove (none)` in positions without legal moves
    BestMove { mv: Option<Move>, ponder: Option<Move> },
    Info(EngineInfo),
    /// `option name ...` advertisements and other lines we accept but ignore
    Other(String),
}

/// Parse a UCI message line
pub fn parse_uci_message(line: &str) -> Result<UciMessage, crate::UciError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();

    match tokens.first() {
        Some(&"uciok") => Ok(UciMessage::UciOk),
        Some(&"readyok") => Ok(UciMessage::ReadyOk),

        Some(&"id") => {
            if tokens.len() < 3 {
                return Err(crate::UciError::MalformedMessage(line.to_string()));
            }
            let name = tokens[1].to_string();
            let value = tokens[2..].join(" ");
            Ok(UciMessage::Id { name, value })
        }

        Some(&"bestmove") => {
            let Some(&best) = tokens.get(1) else {
                return Err(crate::UciError::MalformedMessage(line.to_string()));
            };
            let mv = match best {
                "(none)" | "0000" => None,
                text => Some(parse_uci_move(text)?),
            };
            let ponder = match (tokens.get(2), tokens.get(3)) {
                (Some(&"ponder"), Some(&text)) => parse_uci_move(text).ok(),
                _ => None,
            };
            Ok(UciMessage::BestMove { mv, ponder })
        }

        Some(&"info") => Ok(UciMessage::Info(parse_info_line(&tokens[1..]))),

        Some(&"option") | Some(&"copyprotection") | Some(&"registration") => {
            Ok(UciMessage::Other(line.to_string()))
        }

        _ => Err(crate::UciError::UnknownMessage(line.to_string())),
    }
}

/// Parse an "info" line from the engine
fn parse_info_line(tokens: &[&str]) -> EngineInfo {
    let mut info = EngineInfo::default();
    let mut i = 0;

    while i < tokens.len() {
        match tokens[i] {
            "depth" => {
                i += 1;
                info.depth = tokens.get(i).and_then(|s| s.parse().ok());
            }
            "seldepth" => {
                i += 1;
                info.seldepth = tokens.get(i).and_then(|s| s.parse().ok());
            }
            "time" => {
                i += 1;
                info.time_ms = tokens.get(i).and_then(|s| s.parse().ok());
            }
            "nodes" => {
                i += 1;
                info.nodes = tokens.get(i).and_then(|s| s.parse().ok());
            }
            "nps" => {
                i += 1;
                info.nps = tokens.get(i).and_then(|s| s.parse().ok());
            }
            "score" => {
                i += 1;
                if let Some(&score_type) = tokens.get(i) {
                    i += 1;
                    if let Some(value_str) = tokens.get(i) {
                        info.score = match score_type {
                            "cp" => value_str.parse().ok().map(AnalysisScore::Centipawns),
                            "mate" => value_str.parse().ok().map(AnalysisScore::Mate),
                            _ => None,
                        };
                    }
                }
            }
            "pv" => {
                // Collect all moves until next keyword
                i += 1;
                while i < tokens.len() && !is_keyword(tokens[i]) {
                    if let Ok(mv) = parse_uci_move(tokens[i]) {
                        info.pv.push(mv);
                    }
                    i += 1;
                }
                continue; // Don't increment i again
            }
            "multipv" => {
                i += 1;
                info.multipv = tokens.get(i).and_then(|s| s.parse().ok());
            }
            "currmove" => {
                i += 1;
                info.currmove = tokens.get(i).and_then(|s| parse_uci_move(s).ok());
            }
            "hashfull" => {
                i += 1;
                info.hashfull = tokens.get(i).and_then(|s| s.parse().ok());
            }
            // Free text runs to the end of the line
            "string" => break,
            _ => {
                // Unknown keyword (lowerbound, tbhits, ...), skip
            }
        }
        i += 1;
    }

    info
}

fn is_keyword(token: &str) -> bool {
    matches!(
        token,
        "depth"
            | "seldepth"
            | "time"
            | "nodes"
            | "score"
            | "pv"
            | "multipv"
            | "currmove"
            | "currmovenumber"
            | "hashfull"
            | "nps"
            | "tbhits"
            | "cpuload"
            | "string"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chess::format_uci_move;

    #[test]
    fn test_parse_bestmove() {
        let msg = parse_uci_message("bestmove e2e4 ponder e7e5").unwrap();
        match msg {
            UciMessage::BestMove { mv, ponder } => {
                assert_eq!(format_uci_move(mv.unwrap()), "e2e4");
                assert_eq!(format_uci_move(ponder.unwrap()), "e7e5");
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_parse_bestmove_none() {
        let msg = parse_uci_message("bestmove (none)").unwrap();
        assert!(matches!(msg, UciMessage::BestMove { mv: None, ponder: None }));
    }

    #[test]
    fn test_parse_info() {
        let msg = parse_uci_message("info depth 12 score cp 35 nodes 15234 pv e2e4 e7e5").unwrap();
        match msg {
            UciMessage::Info(info) => {
                assert_eq!(info.depth, Some(12));
                assert_eq!(info.score, Some(AnalysisScore::Centipawns(35)));
                assert_eq!(info.nodes, Some(15234));
                assert_eq!(info.pv.len(), 2);
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_parse_multipv_mate_with_bound() {
        let line = "info depth 20 seldepth 24 multipv 2 score mate -3 upperbound nodes 9 time 40 pv h7h8q";
        let UciMessage::Info(info) = parse_uci_message(line).unwrap() else {
            panic!("Wrong message type");
        };
        assert_eq!(info.multipv, Some(2));
        assert_eq!(info.score, Some(AnalysisScore::Mate(-3)));
        assert_eq!(info.seldepth, Some(24));
        assert_eq!(info.time_ms, Some(40));
        assert_eq!(info.pv.len(), 1);
    }

    #[test]
    fn test_info_string_and_options_ignored() {
        let UciMessage::Info(info) = parse_uci_message("info string NNUE evaluation enabled").unwrap()
        else {
            panic!("Wrong message type");
        };
        assert!(info.score.is_none());
        assert!(matches!(
            parse_uci_message("option name Hash type spin default 16 min 1 max 33554432"),
            Ok(UciMessage::Other(_))
        ));
        assert!(parse_uci_message("bogus").is_err());
    }
}
