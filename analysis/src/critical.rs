use chess::PieceColor;
use serde::{Deserialize, Serialize};

/// Mover win-probability swing beyond which a ply is a turning point.
pub const CRITICAL_SWING: f64 = 0.20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CriticalMoment {
    /// 1-based ply index
    pub ply: u32,
    pub color: PieceColor,
    /// Mover's win probability before and after the ply
    pub win_before: f64,
    pub win_after: f64,
    /// Signed change for the mover; negative means the move hurt
    pub swing: f64,
}

/// Plies where the mover's win probability moved by more than [`CRITICAL_SWING`].
///
/// `win_probs_white` has one entry per position, the initial one included.
pub fn find_critical_moments(win_probs_white: &[f64], first_mover: PieceColor) -> Vec<CriticalMoment> {
    let mut mover = first_mover;
    let mut moments = Vec::new();

    for (i, pair) in win_probs_white.windows(2).enumerate() {
        let (before, after) = match mover {
            PieceColor::White => (pair[0], pair[1]),
            PieceColor::Black => (1.0 - pair[0], 1.0 - pair[1]),
        };
        let swing = after - before;
        if swing.abs() > CRITICAL_SWING {
            moments.push(CriticalMoment {
                ply: i as u32 + 1,
                color: mover,
                win_before: before,
                win_after: after,
                swing,
            });
        }
        mover = mover.opposite();
    }

    moments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_game_has_no_critical_moments() {
        let probs = [0.5, 0.52, 0.49, 0.55, 0.6];
        assert!(find_critical_moments(&probs, PieceColor::White).is_empty());
    }

    #[test]
    fn test_blunder_is_reported_from_the_movers_side() {
        // Black's second ply hands White a winning position
        let probs = [0.5, 0.5, 0.5, 0.5, 0.85];
        let moments = find_critical_moments(&probs, PieceColor::White);
        assert_eq!(moments.len(), 1);
        let m = &moments[0];
        assert_eq!(m.ply, 4);
        assert_eq!(m.color, PieceColor::Black);
        assert!((m.swing + 0.35).abs() < 1e-9);
    }

    #[test]
    fn test_threshold_is_strict() {
        let probs = [0.5, 0.7];
        assert!(find_critical_moments(&probs, PieceColor::White).is_empty());
        let probs = [0.5, 0.71];
        assert_eq!(find_critical_moments(&probs, PieceColor::White).len(), 1);
    }
}
