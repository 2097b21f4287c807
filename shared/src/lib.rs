use serde::{Deserialize, Serialize};
use std::fmt;

pub const PROTOCOL_VERSION: u32 = 1;

/// Cells on the tic-tac-toe grid.
pub const GRID_CELLS: usize = 9;
/// Cells on the ludo track, home columns included.
pub const TRACK_CELLS: usize = 60;
/// Final cell of the race lanes; reaching it wins.
pub const LANE_FINAL_CELL: u8 = 99;
/// Largest supported table.
pub const MAX_SEATS: usize = 4;

/// The game variants served by this process.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameKind {
    TicTacToe,
    Ludo,
    Snakes,
}

impl GameKind {
    /// Every variant this process serves.
    pub const ALL: [GameKind; 3] = [GameKind::TicTacToe, GameKind::Ludo, GameKind::Snakes];

    /// Legal table sizes per variant. Tic-tac-toe is strictly head-to-head;
    /// the race games seat two to four.
    pub fn valid_capacity(&self, capacity: usize) -> bool {
        match self {
            GameKind::TicTacToe => capacity == 2,
            GameKind::Ludo | GameKind::Snakes => (2..=MAX_SEATS).contains(&capacity),
        }
    }
}

impl fmt::Display for GameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameKind::TicTacToe => write!(f, "tictactoe"),
            GameKind::Ludo => write!(f, "ludo"),
            GameKind::Snakes => write!(f, "snakes"),
        }
    }
}

/// Externally-authenticated user identity. Sessions reference users by
/// username and never own them; `profile` is an avatar id for display.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UserRef {
    pub username: String,
    pub profile: u32,
}

impl UserRef {
    pub fn new(username: &str, profile: u32) -> Self {
        Self {
            username: username.to_string(),
            profile,
        }
    }
}

/// Variant-specific board representation.
///
/// - `Marks`: 9 grid cells, 0 empty, otherwise the owning seat number.
/// - `Track`: 60 track cells, 0 empty, otherwise a piece id 1..=16.
/// - `Lanes`: one scalar position per seat, -1 while off the board.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum Board {
    Marks(Vec<u8>),
    Track(Vec<u8>),
    Lanes(Vec<i16>),
}

/// One piece relocation on the ludo track. `from == -1` introduces a piece
/// from the yard; `to == -1` leaves the board untouched.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct PieceStep {
    pub from: i8,
    pub to: i8,
    pub piece: u8,
}

/// A proposed move, shaped per variant.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum Move {
    /// Tic-tac-toe: claim cell `to` (1..=9), vacating cell `from` when at
    /// the mark cap (`from == 0` means nothing vacated).
    Place { from: u8, to: u8 },
    /// Ludo: a batch of piece relocations applied atomically.
    Pieces(Vec<PieceStep>),
    /// Race lanes: jump the mover's own position to `dest`.
    Advance { dest: u8 },
}

/// A finishing rank produced by a move, forfeit, or departure.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Winner {
    pub username: String,
    pub rank: u32,
}

/// Seat assignment handed to clients so they can render the table.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ParticipantInfo {
    pub username: String,
    pub profile: u32,
    pub seat: u8,
}

/// Full session view sent on (re)join and session start.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub id: u64,
    pub kind: GameKind,
    pub board: Board,
    pub participants: Vec<ParticipantInfo>,
    pub active_seat: u8,
    pub started: bool,
    pub capacity: u32,
    pub remaining_secs: i64,
}

/// Recoverable request failures. Always unicast to the requesting
/// connection, never broadcast to the room.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No session or group exists for this caller.
    NotFound,
    /// The caller does not hold the active turn.
    NotYourTurn,
    /// The move violates the variant's rules; nothing changed.
    InvalidMove,
    /// A concurrent writer won the race; retry the whole operation.
    Conflict,
    /// Invite code unknown or already full, or an unsupported table size.
    Capacity,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::NotFound => write!(f, "no session for this user"),
            ErrorKind::NotYourTurn => write!(f, "not this user's turn"),
            ErrorKind::InvalidMove => write!(f, "move rejected"),
            ErrorKind::Conflict => write!(f, "concurrent update, retry"),
            ErrorKind::Capacity => write!(f, "unknown or full invite code"),
        }
    }
}

impl std::error::Error for ErrorKind {}

/// Everything that crosses the wire, both directions.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    // client -> server
    Hello {
        version: u32,
        user: UserRef,
    },
    CreateOrJoin {
        kind: GameKind,
        capacity: u32,
    },
    CreateInvite {
        kind: GameKind,
        capacity: u32,
    },
    JoinInvite {
        kind: GameKind,
        code: u32,
    },
    LeaveInvite,
    SubmitMove {
        kind: GameKind,
        mv: Move,
    },
    CheckDeadline {
        kind: GameKind,
    },
    LeaveSession {
        kind: GameKind,
    },
    Goodbye,

    // server -> client
    Welcome,
    SessionState(SessionSnapshot),
    InviteCreated {
        code: u32,
        members: Vec<ParticipantInfo>,
        capacity: u32,
    },
    GroupState {
        members: Vec<ParticipantInfo>,
        capacity: u32,
    },
    MoveApplied {
        board: Board,
        active_seat: u8,
        winners: Vec<Winner>,
        ended: bool,
        round: u32,
        win_counts: Vec<u32>,
        reset: bool,
        line: Option<(u8, u8)>,
        turn_secs: u64,
    },
    TurnChanged {
        active_seat: u8,
        board: Board,
        turn_secs: u64,
    },
    ParticipantLeft {
        username: String,
        winners: Vec<Winner>,
    },
    Failure(ErrorKind),
}
