//! Linear race to the last cell
//!
//! Each seat has a single scalar position on a 100-cell course. The client
//! resolves dice and any snake/ladder jumps before submitting, so a move is
//! just the final destination; the server checks range and detects the
//! finish. Positions are keyed by seat, so a finisher leaving the rotation
//! never shifts anyone else's lane.

use super::{DisconnectPolicy, Outcome, Rejected, RuleEngine, Verdict};
use shared::{Board, Move, LANE_FINAL_CELL};

pub struct Snakes;

impl RuleEngine for Snakes {
    fn initial_board(&self, capacity: usize) -> Board {
        Board::Lanes(vec![-1; capacity])
    }

    fn validate(&self, board: &Board, seat: u8, mv: &Move) -> Result<Verdict, Rejected> {
        let lanes = match board {
            Board::Lanes(lanes) => lanes,
            _ => return Err(Rejected),
        };
        let dest = match mv {
            Move::Advance { dest } => *dest,
            _ => return Err(Rejected),
        };

        if dest > LANE_FINAL_CELL {
            return Err(Rejected);
        }
        let lane = (seat as usize).wrapping_sub(1);
        if lane >= lanes.len() {
            return Err(Rejected);
        }

        let mut next = lanes.clone();
        next[lane] = dest as i16;

        let outcome = if dest == LANE_FINAL_CELL {
            Outcome::Finished
        } else {
            Outcome::Continue
        };

        Ok(Verdict {
            board: Board::Lanes(next),
            outcome,
        })
    }

    fn disconnect_policy(&self) -> DisconnectPolicy {
        DisconnectPolicy::Forfeit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_sets_own_lane_only() {
        let board = Board::Lanes(vec![4, 17, -1]);
        let verdict = Snakes
            .validate(&board, 2, &Move::Advance { dest: 23 })
            .unwrap();
        assert_eq!(verdict.board, Board::Lanes(vec![4, 23, -1]));
        assert_eq!(verdict.outcome, Outcome::Continue);
    }

    #[test]
    fn test_final_cell_wins() {
        let board = Board::Lanes(vec![95, 17]);
        let verdict = Snakes
            .validate(&board, 1, &Move::Advance { dest: 99 })
            .unwrap();
        assert_eq!(verdict.outcome, Outcome::Finished);
        assert_eq!(verdict.board, Board::Lanes(vec![99, 17]));
    }

    #[test]
    fn test_out_of_range_rejected() {
        let board = Board::Lanes(vec![4, 17]);
        assert!(Snakes
            .validate(&board, 1, &Move::Advance { dest: 100 })
            .is_err());
    }

    #[test]
    fn test_seat_outside_table_rejected() {
        let board = Board::Lanes(vec![4, 17]);
        assert!(Snakes
            .validate(&board, 3, &Move::Advance { dest: 30 })
            .is_err());
        assert!(Snakes
            .validate(&board, 0, &Move::Advance { dest: 30 })
            .is_err());
    }
}
