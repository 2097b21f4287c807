//! Generic turn rotation and session lifecycle
//!
//! One engine drives every variant: it is the only code that changes whose
//! turn it is, the only code that assigns finishing ranks, and the only
//! code that moves a session into a terminal state. Variant differences
//! enter exclusively through the rule-engine trait.
//!
//! Operations read a working copy of the session, compute the next state
//! without holding any lock, and commit with a version check; a loser of a
//! concurrent race retries from a fresh read, up to a small bound.

use crate::rules::{self, DisconnectPolicy, Outcome};
use crate::store::{Session, SessionStore};
use log::{debug, info, warn};
use shared::{Board, ErrorKind, GameKind, Move, SessionSnapshot, UserRef, Winner};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Attempts before a contended operation reports `Conflict`.
const COMMIT_RETRIES: u32 = 3;

/// Outcome of an accepted move, for broadcast to the whole room.
#[derive(Debug, Clone)]
pub struct MoveResult {
    pub session_id: u64,
    pub kind: GameKind,
    pub board: Board,
    pub active_seat: u8,
    pub winners: Vec<Winner>,
    pub ended: bool,
    pub round: u32,
    pub win_counts: Vec<u32>,
    pub reset: bool,
    pub line: Option<(u8, u8)>,
    pub recipients: Vec<UserRef>,
}

/// A turn forced past its deadline.
#[derive(Debug, Clone)]
pub struct TimeoutAdvance {
    pub session_id: u64,
    pub kind: GameKind,
    pub board: Board,
    pub active_seat: u8,
    pub recipients: Vec<UserRef>,
}

/// A participant's departure and whatever ranks it produced.
#[derive(Debug, Clone)]
pub struct LeaveResult {
    pub session_id: u64,
    pub kind: GameKind,
    pub left: String,
    pub winners: Vec<Winner>,
    pub recipients: Vec<UserRef>,
}

/// What a disconnect did to one of the user's sessions.
#[derive(Debug, Clone)]
pub enum DisconnectEffect {
    /// A forming session lost a seat; re-broadcast the membership.
    MembershipChanged {
        snapshot: SessionSnapshot,
        recipients: Vec<UserRef>,
    },
    /// A started session treated the drop as a forfeit.
    Forfeited(LeaveResult),
}

#[derive(Clone)]
pub struct TurnEngine {
    sessions: Arc<RwLock<SessionStore>>,
    turn_ms: u64,
}

impl TurnEngine {
    pub fn new(sessions: Arc<RwLock<SessionStore>>, turn_ms: u64) -> Self {
        Self { sessions, turn_ms }
    }

    fn turn_secs(&self) -> u64 {
        self.turn_ms / 1000
    }

    /// Validates and applies a move for the caller, advancing the turn and
    /// resolving any finishing ranks. Rejections leave the session exactly
    /// as it was.
    pub async fn submit_move(
        &self,
        username: &str,
        kind: GameKind,
        mv: &Move,
        now_ms: u64,
    ) -> Result<MoveResult, ErrorKind> {
        for _ in 0..COMMIT_RETRIES {
            let session = {
                let store = self.sessions.read().await;
                store.find_by_user(kind, username)
            }
            .ok_or(ErrorKind::NotFound)?;

            if !session.started || session.active != username {
                return Err(ErrorKind::NotYourTurn);
            }
            let seat = session.seat_of(username).ok_or(ErrorKind::NotFound)?;

            let engine = rules::engine_for(kind);
            let verdict = engine
                .validate(&session.board, seat, mv)
                .map_err(|_| ErrorKind::InvalidMove)?;

            let mut s = session;
            let recipients = s.participants.clone();
            let mut winners = Vec::new();
            let mut ended = false;
            let mut reset = false;
            let mut line = None;
            let applied = verdict.board;

            match verdict.outcome {
                Outcome::Continue => {
                    s.board = applied.clone();
                    self.rotate(&mut s, username, now_ms);
                }
                Outcome::RoundWon { line: won_line } => {
                    // The winning position goes out for display; the stored
                    // board resets. Round winner keeps the turn.
                    s.board = engine.initial_board(s.capacity);
                    reset = true;
                    line = won_line;
                    s.win_counts[(seat - 1) as usize] += 1;
                    s.round += 1;
                    s.deadline_ms = now_ms + self.turn_ms;
                    if let Some(limit) = engine.round_limit() {
                        if s.round > limit {
                            ended = true;
                        }
                    }
                }
                Outcome::Finished => {
                    s.board = applied.clone();
                    winners.push(Winner {
                        username: username.to_string(),
                        rank: s.rank_count + 1,
                    });
                    s.rank_count += 1;
                    if s.participants.len() == 2 {
                        ended = true;
                        if s.rank_count < s.capacity as u32 - 1 {
                            if let Some(other) =
                                s.participants.iter().find(|p| p.username != username)
                            {
                                winners.push(Winner {
                                    username: other.username.clone(),
                                    rank: s.rank_count,
                                });
                            }
                        }
                    } else {
                        // Finished players leave the rotation but keep
                        // their seat in `turn_order` for reporting.
                        s.participants.retain(|p| p.username != username);
                        self.rotate(&mut s, username, now_ms);
                    }
                }
            }

            let result = MoveResult {
                session_id: s.id,
                kind,
                board: applied,
                active_seat: s.active_seat(),
                winners,
                ended,
                round: if ended { 0 } else { s.round },
                win_counts: s.win_counts.clone(),
                reset,
                line,
                recipients,
            };

            let mut store = self.sessions.write().await;
            let committed = if ended {
                store.delete_versioned(s.id, s.version).is_ok()
            } else {
                store.commit(s).is_ok()
            };
            if committed {
                if result.ended {
                    info!("session {} finished", result.session_id);
                }
                return Ok(result);
            }
            debug!("move by {} lost a commit race, retrying", username);
        }
        Err(ErrorKind::Conflict)
    }

    /// Client-triggered deadline check for the caller's session. A deadline
    /// still in the future is a no-op.
    pub async fn check_deadline(
        &self,
        username: &str,
        kind: GameKind,
        now_ms: u64,
    ) -> Result<Option<TimeoutAdvance>, ErrorKind> {
        for _ in 0..COMMIT_RETRIES {
            let session = {
                let store = self.sessions.read().await;
                store.find_by_user(kind, username)
            }
            .ok_or(ErrorKind::NotFound)?;

            if !session.started || session.deadline_ms == 0 || now_ms < session.deadline_ms {
                return Ok(None);
            }

            match self.force_advance(session, now_ms).await {
                Some(advance) => return Ok(Some(advance)),
                None => debug!("deadline advance lost a commit race, retrying"),
            }
        }
        Err(ErrorKind::Conflict)
    }

    /// One sweep pass: force-advance every started session whose deadline
    /// elapsed more than `grace_ms` ago. Losing a race with a concurrent
    /// move just skips that session; the next tick re-evaluates it.
    pub async fn sweep(&self, now_ms: u64, grace_ms: u64) -> Vec<TimeoutAdvance> {
        let due = {
            let store = self.sessions.read().await;
            store.sessions_past_deadline(now_ms, grace_ms)
        };

        let mut advances = Vec::new();
        for session in due {
            if let Some(advance) = self.force_advance(session, now_ms).await {
                advances.push(advance);
            }
        }
        advances
    }

    /// Removes the caller from their session. The last participant left
    /// behind in a started session is awarded the final rank.
    pub async fn leave_session(
        &self,
        username: &str,
        kind: GameKind,
        now_ms: u64,
    ) -> Result<LeaveResult, ErrorKind> {
        for _ in 0..COMMIT_RETRIES {
            let session = {
                let store = self.sessions.read().await;
                store.find_by_user(kind, username)
            }
            .ok_or(ErrorKind::NotFound)?;

            let mut s = session;
            let recipients = s.participants.clone();
            let mut winners = Vec::new();

            s.participants.retain(|p| p.username != username);
            if !s.started {
                // Forming sessions free the seat entirely.
                s.turn_order.retain(|u| u != username);
            }

            let delete = if s.participants.is_empty() {
                true
            } else if s.started && s.participants.len() == 1 {
                winners.push(Winner {
                    username: s.participants[0].username.clone(),
                    rank: s.rank_count + 1,
                });
                true
            } else {
                if s.active == username {
                    self.rotate(&mut s, username, now_ms);
                }
                false
            };

            let result = LeaveResult {
                session_id: s.id,
                kind,
                left: username.to_string(),
                winners,
                recipients,
            };

            let mut store = self.sessions.write().await;
            let committed = if delete {
                store.delete_versioned(s.id, s.version).is_ok()
            } else {
                store.commit(s).is_ok()
            };
            if committed {
                info!("{} left session {}", username, result.session_id);
                return Ok(result);
            }
        }
        Err(ErrorKind::Conflict)
    }

    /// Applies the transport-level disconnect to every session and reports
    /// what each variant did with it.
    pub async fn handle_disconnect(&self, user: &UserRef, now_ms: u64) -> Vec<DisconnectEffect> {
        let mut effects = Vec::new();
        for kind in GameKind::ALL {
            match self.disconnect_from(kind, user, now_ms).await {
                Ok(Some(effect)) => effects.push(effect),
                Ok(None) => {}
                Err(e) => warn!(
                    "disconnect cleanup for {} in {} failed: {}",
                    user.username, kind, e
                ),
            }
        }
        effects
    }

    async fn disconnect_from(
        &self,
        kind: GameKind,
        user: &UserRef,
        now_ms: u64,
    ) -> Result<Option<DisconnectEffect>, ErrorKind> {
        for _ in 0..COMMIT_RETRIES {
            let session = {
                let store = self.sessions.read().await;
                store.find_by_user(kind, &user.username)
            };
            let Some(session) = session else {
                return Ok(None);
            };

            if session.started {
                return match rules::engine_for(kind).disconnect_policy() {
                    // The session plays on; the sweeper walks past the
                    // absent player's turns.
                    DisconnectPolicy::Continue => Ok(None),
                    DisconnectPolicy::Forfeit => {
                        let result = self.leave_session(&user.username, kind, now_ms).await?;
                        Ok(Some(DisconnectEffect::Forfeited(result)))
                    }
                };
            }

            // Pre-game abandonment costs nothing: drop the seat outright.
            let mut s = session;
            s.participants.retain(|p| p.username != user.username);
            s.turn_order.retain(|u| *u != user.username);
            let recipients = s.participants.clone();
            let snapshot = s.snapshot(now_ms, self.turn_secs());
            let empty = s.participants.is_empty();

            let mut store = self.sessions.write().await;
            let committed = if empty {
                store.delete_versioned(s.id, s.version).is_ok()
            } else {
                store.commit(s).is_ok()
            };
            if committed {
                if empty {
                    return Ok(None);
                }
                return Ok(Some(DisconnectEffect::MembershipChanged {
                    snapshot,
                    recipients,
                }));
            }
        }
        Err(ErrorKind::Conflict)
    }

    /// Rotates past the current holder and re-arms the deadline; commits
    /// with a version check. `None` means a concurrent writer won.
    async fn force_advance(&self, session: Session, now_ms: u64) -> Option<TimeoutAdvance> {
        let mut s = session;
        let holder = s.active.clone();
        self.rotate(&mut s, &holder, now_ms);

        let advance = TimeoutAdvance {
            session_id: s.id,
            kind: s.kind,
            board: s.board.clone(),
            active_seat: s.active_seat(),
            recipients: s.participants.clone(),
        };

        let mut store = self.sessions.write().await;
        match store.commit(s) {
            Ok(()) => {
                debug!(
                    "session {} turn forced to seat {}",
                    advance.session_id, advance.active_seat
                );
                Some(advance)
            }
            Err(_) => None,
        }
    }

    /// Hands the turn to the next `turn_order` entry after `after` that is
    /// still seated, wrapping to the front, and re-arms the deadline. When
    /// `after` is no longer in the order the scan restarts at the top.
    fn rotate(&self, session: &mut Session, after: &str, now_ms: u64) {
        if let Some(next) = next_holder(session, after) {
            session.active = next;
        }
        session.deadline_ms = now_ms + self.turn_ms;
    }
}

fn next_holder(session: &Session, after: &str) -> Option<String> {
    let order = &session.turn_order;
    if order.is_empty() {
        return None;
    }
    let begin = match order.iter().position(|u| u == after) {
        Some(i) => i + 1,
        None => 0,
    };
    (0..order.len())
        .map(|k| &order[(begin + k) % order.len()])
        .find(|candidate| session.contains(candidate.as_str()))
        .cloned()
}
