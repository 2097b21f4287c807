//! Per-variant rule engines behind a common strategy trait
//!
//! Each variant supplies pure functions over its board representation:
//! validate-and-apply a proposed move, report the win condition, and declare
//! how a started session reacts to a participant dropping. The turn engine
//! is generic over this trait, so adding a variant never touches rotation,
//! deadlines, or rank accounting.

use shared::{Board, GameKind, Move};

pub mod ludo;
pub mod snakes;
pub mod tictactoe;

/// How a started session reacts to a participant's connection dropping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectPolicy {
    /// Keep playing; the sweeper skips the absent player's turns.
    Continue,
    /// Treat the drop as leaving the session; with one player left they
    /// are awarded the win and the session ends.
    Forfeit,
}

/// Session-level effect of an accepted move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Ordinary move; the turn rotates.
    Continue,
    /// The mover took the round. The returned board is the winning
    /// position (for display); the stored board resets, and the mover
    /// keeps the turn for the next round.
    RoundWon { line: Option<(u8, u8)> },
    /// The mover finished the race and leaves the rotation with a rank.
    Finished,
}

/// An accepted move: the board after application plus its session effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub board: Board,
    pub outcome: Outcome,
}

/// Marker for rejected moves. Rejections carry no detail and must leave
/// board and turn untouched; the caller reports `InvalidMove`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejected;

pub trait RuleEngine: Send + Sync {
    /// The empty board for a table of the given size.
    fn initial_board(&self, capacity: usize) -> Board;

    /// Validates `mv` for the player in `seat` and, when legal, returns the
    /// board after application. Pure: the input board is never mutated.
    fn validate(&self, board: &Board, seat: u8, mv: &Move) -> Result<Verdict, Rejected>;

    fn disconnect_policy(&self) -> DisconnectPolicy;

    /// Rounds after which the session ends, for round-based variants.
    fn round_limit(&self) -> Option<u32> {
        None
    }
}

/// Strategy lookup by game type.
pub fn engine_for(kind: GameKind) -> &'static dyn RuleEngine {
    match kind {
        GameKind::TicTacToe => &tictactoe::TicTacToe,
        GameKind::Ludo => &ludo::Ludo,
        GameKind::Snakes => &snakes::Snakes,
    }
}
