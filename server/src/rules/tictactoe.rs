//! Three-mark tic-tac-toe
//!
//! Classic 3x3 grid with a twist: a player holds at most three marks at
//! once. Placing a fourth requires vacating one of their existing marks in
//! the same move, so late-game play becomes mark shuffling rather than a
//! guaranteed draw. Rounds reset the board; the session runs a fixed number
//! of rounds.

use super::{DisconnectPolicy, Outcome, Rejected, RuleEngine, Verdict};
use shared::{Board, Move, GRID_CELLS};

/// Marks one player may hold on the board simultaneously.
pub const MARK_CAP: usize = 3;
/// Rounds played before the session ends.
pub const ROUND_LIMIT: u32 = 5;

/// The 8 winning triples, as (start, end) display endpoints in cell order.
const LINES: [[usize; 3]; 8] = [
    [0, 4, 8],
    [0, 1, 2],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [2, 4, 6],
    [3, 4, 5],
    [6, 7, 8],
];

pub struct TicTacToe;

impl RuleEngine for TicTacToe {
    fn initial_board(&self, _capacity: usize) -> Board {
        Board::Marks(vec![0; GRID_CELLS])
    }

    fn validate(&self, board: &Board, seat: u8, mv: &Move) -> Result<Verdict, Rejected> {
        let cells = match board {
            Board::Marks(cells) => cells,
            _ => return Err(Rejected),
        };
        let (from, to) = match mv {
            Move::Place { from, to } => (*from, *to),
            _ => return Err(Rejected),
        };

        // Cells are 1-based on the wire; from == 0 means nothing vacated.
        if from > 9 || to < 1 || to > 9 {
            return Err(Rejected);
        }

        let held = cells.iter().filter(|&&c| c == seat).count();
        if held >= MARK_CAP && from == 0 {
            return Err(Rejected);
        }
        if cells[(to - 1) as usize] != 0 {
            return Err(Rejected);
        }
        // The vacated cell must actually hold the mover's mark.
        if held >= MARK_CAP && cells[(from - 1) as usize] != seat {
            return Err(Rejected);
        }

        let mut next = cells.clone();
        next[(to - 1) as usize] = seat;
        if held >= MARK_CAP {
            next[(from - 1) as usize] = 0;
        }

        let outcome = match winning_line(&next, seat) {
            Some(line) => Outcome::RoundWon { line: Some(line) },
            None => Outcome::Continue,
        };
        Ok(Verdict {
            board: Board::Marks(next),
            outcome,
        })
    }

    fn disconnect_policy(&self) -> DisconnectPolicy {
        DisconnectPolicy::Forfeit
    }

    fn round_limit(&self) -> Option<u32> {
        Some(ROUND_LIMIT)
    }
}

/// Returns the 1-based endpoints of a completed triple, if any.
fn winning_line(cells: &[u8], seat: u8) -> Option<(u8, u8)> {
    LINES
        .iter()
        .find(|line| line.iter().all(|&i| cells[i] == seat))
        .map(|line| (line[0] as u8 + 1, line[2] as u8 + 1))
}
