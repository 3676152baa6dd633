//! Engine score type shared by the engine, analysis and server crates.

use serde::{Deserialize, Serialize};

/// Engine evaluation score.
///
/// Centipawns: positive = side-to-move is better.
/// Mate: positive N = side-to-move mates in N moves,
/// negative N = side-to-move gets mated in N moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum AnalysisScore {
    #[serde(rename = "cp")]
    Centipawns(i32),
    Mate(i32),
}

impl AnalysisScore {
    pub fn display(&self) -> String {
        match self {
            Self::Centipawns(cp) => format!("{:+.2}", *cp as f64 / 100.0),
            Self::Mate(m) => {
                if *m > 0 {
                    format!("+M{}", m)
                } else {
                    format!("-M{}", m.abs())
                }
            }
        }
    }
}

impl std::fmt::Display for AnalysisScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(AnalysisScore::Centipawns(35).to_string(), "+0.35");
        assert_eq!(AnalysisScore::Mate(3).to_string(), "+M3");
        assert_eq!(AnalysisScore::Mate(-2).to_string(), "-M2");
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_string(&AnalysisScore::Centipawns(-12)).unwrap();
        assert_eq!(json, r#"{"type":"cp","value":-12}"#);
    }
}
