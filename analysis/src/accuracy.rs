//! Per-game accuracy from a sequence of win probabilities.

use chess::PieceColor;

/// Accuracy of one move from the mover's win probability before and after.
///
/// The drop is measured in win-percent points; gains count as zero drop.
pub fn move_accuracy(win_before: f64, win_after: f64) -> f64 {
    let drop = ((win_before - win_after) * 100.0).max(0.0);
    (103.1668 * (-0.04354 * drop).exp() - 3.1669).clamp(0.0, 100.0)
}

/// Accuracy for `side` in a game that White started.
///
/// `win_probs_white` holds White's win probability for every position,
/// the initial one included, so a game of N plies has N+1 entries.
pub fn game_accuracy(win_probs_white: &[f64], side: PieceColor) -> f64 {
    game_accuracy_from(win_probs_white, side, PieceColor::White)
}

/// Like [`game_accuracy`] for games starting from a set-up position.
pub fn game_accuracy_from(win_probs_white: &[f64], side: PieceColor, first_mover: PieceColor) -> f64 {
    let mut mover = first_mover;
    let mut total = 0.0;
    let mut count = 0usize;

    for pair in win_probs_white.windows(2) {
        if mover == side {
            let (before, after) = match mover {
                PieceColor::White => (pair[0], pair[1]),
                PieceColor::Black => (1.0 - pair[0], 1.0 - pair[1]),
            };
            total += move_accuracy(before, after);
            count += 1;
        }
        mover = mover.opposite();
    }

    if count == 0 {
        return 100.0;
    }
    (total / count as f64).clamp(0.0, 100.0)
}
