//! Four-quadrant race game
//!
//! A 60-cell board: a shared cross-shaped track plus a 4-cell home column
//! per seat. Each seat owns four numbered pieces and a fixed entry cell
//! where new pieces come onto the track. Dice handling lives client-side;
//! the server validates each submitted relocation batch against the board.
//! A batch applies atomically or not at all.

use super::{DisconnectPolicy, Outcome, Rejected, RuleEngine, Verdict};
use shared::{Board, Move, PieceStep, TRACK_CELLS};

pub const PIECES_PER_SEAT: u8 = 4;

/// Track cell where each seat's pieces enter, by seat index.
const ENTRY_CELLS: [i8; 4] = [42, 20, 9, 31];
/// First home cell per seat; each seat's home column is 4 cells.
const HOME_CELLS: [usize; 4] = [44, 48, 52, 56];

pub struct Ludo;

/// Piece ids owned by a seat: seat 1 holds 1..=4, seat 2 holds 5..=8, ...
fn owned_pieces(seat: u8) -> std::ops::RangeInclusive<u8> {
    let lo = (seat - 1) * PIECES_PER_SEAT + 1;
    lo..=lo + PIECES_PER_SEAT - 1
}

impl RuleEngine for Ludo {
    fn initial_board(&self, _capacity: usize) -> Board {
        Board::Track(vec![0; TRACK_CELLS])
    }

    fn validate(&self, board: &Board, seat: u8, mv: &Move) -> Result<Verdict, Rejected> {
        let cells = match board {
            Board::Track(cells) => cells,
            _ => return Err(Rejected),
        };
        let steps = match mv {
            Move::Pieces(steps) => steps,
            _ => return Err(Rejected),
        };
        if !(1..=4).contains(&seat) {
            return Err(Rejected);
        }

        let owned = owned_pieces(seat);
        let entry = ENTRY_CELLS[(seat - 1) as usize];
        let mut next = cells.clone();

        for step in steps {
            apply_step(&mut next, &owned, entry, step)?;
        }

        let outcome = if home_complete(&next, seat) {
            Outcome::Finished
        } else {
            Outcome::Continue
        };

        Ok(Verdict {
            board: Board::Track(next),
            outcome,
        })
    }

    fn disconnect_policy(&self) -> DisconnectPolicy {
        DisconnectPolicy::Continue
    }
}

fn apply_step(
    cells: &mut [u8],
    owned: &std::ops::RangeInclusive<u8>,
    entry: i8,
    step: &PieceStep,
) -> Result<(), Rejected> {
    let limit = TRACK_CELLS as i8;
    if step.from < -1 || step.from >= limit || step.to < -1 || step.to >= limit {
        return Err(Rejected);
    }
    if !owned.contains(&step.piece) {
        return Err(Rejected);
    }

    if step.from == -1 {
        // A new piece may only enter at the seat's fixed entry cell.
        if step.to != entry {
            return Err(Rejected);
        }
    } else if step.to >= 0 && cells[step.from as usize] != step.piece {
        return Err(Rejected);
    }

    if step.to >= 0 {
        // Landing on your own piece is illegal; opponents are displaced.
        if owned.contains(&cells[step.to as usize]) {
            return Err(Rejected);
        }
        cells[step.to as usize] = step.piece;
    }
    if step.from >= 0 && step.to >= 0 {
        cells[step.from as usize] = 0;
    }
    // A step with to == -1 applies nothing.
    Ok(())
}

/// Win check: all four of the seat's home cells hold the seat's own pieces,
/// whatever the rest of the board looks like.
fn home_complete(cells: &[u8], seat: u8) -> bool {
    let owned = owned_pieces(seat);
    let start = HOME_CELLS[(seat - 1) as usize];
    cells[start..start + PIECES_PER_SEAT as usize]
        .iter()
        .all(|piece| owned.contains(piece))
}
