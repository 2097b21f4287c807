//! Matchmaking: public queues and private invite-code lobbies
//!
//! Public play pairs a caller with the oldest still-forming session of the
//! requested kind and table size, or opens a new one. Private play gathers
//! players under a short numeric code and converts the group into a started
//! session the instant it fills. A user holds at most one open session per
//! game kind and at most one invite group overall; repeated requests are
//! answered from the existing record instead of creating duplicates.

use crate::rules;
use crate::store::{InviteStore, Session, SessionStore};
use log::info;
use rand::Rng;
use shared::{ErrorKind, GameKind, ParticipantInfo, SessionSnapshot, UserRef};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Result of `create_or_join`: the session view plus whether it should go
/// to the whole room (a membership change) or just the caller (a reconnect
/// or a fresh empty session).
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub snapshot: SessionSnapshot,
    pub broadcast: bool,
    /// Everyone currently seated, for room routing.
    pub recipients: Vec<UserRef>,
}

/// Result of `join_invite`.
#[derive(Debug, Clone)]
pub enum InviteJoin {
    /// The group filled: it became a started session and was deleted.
    Started {
        snapshot: SessionSnapshot,
        recipients: Vec<UserRef>,
    },
    /// Still gathering; refreshed membership for re-broadcast.
    Waiting {
        members: Vec<ParticipantInfo>,
        capacity: u32,
        recipients: Vec<UserRef>,
    },
}

/// Membership left behind after an invite departure.
#[derive(Debug, Clone)]
pub struct InviteLeft {
    pub members: Vec<ParticipantInfo>,
    pub capacity: u32,
    pub recipients: Vec<UserRef>,
}

#[derive(Clone)]
pub struct Matchmaker {
    sessions: Arc<RwLock<SessionStore>>,
    invites: Arc<RwLock<InviteStore>>,
    turn_ms: u64,
}

impl Matchmaker {
    pub fn new(
        sessions: Arc<RwLock<SessionStore>>,
        invites: Arc<RwLock<InviteStore>>,
        turn_ms: u64,
    ) -> Self {
        Self {
            sessions,
            invites,
            turn_ms,
        }
    }

    fn turn_secs(&self) -> u64 {
        self.turn_ms / 1000
    }

    /// Finds or creates a session for the caller. Idempotent: a caller who
    /// already has an open session of this kind gets its current snapshot
    /// back, whatever capacity they asked for this time.
    pub async fn create_or_join(
        &self,
        user: &UserRef,
        kind: GameKind,
        capacity: usize,
        now_ms: u64,
    ) -> Result<JoinOutcome, ErrorKind> {
        let mut store = self.sessions.write().await;

        if let Some(session) = store.find_by_user(kind, &user.username) {
            return Ok(JoinOutcome {
                snapshot: session.snapshot(now_ms, self.turn_secs()),
                broadcast: false,
                recipients: session.participants.clone(),
            });
        }

        if !kind.valid_capacity(capacity) {
            return Err(ErrorKind::Capacity);
        }

        if let Some(mut session) = store.oldest_waiting(kind, capacity) {
            session.participants.push(user.clone());
            session.turn_order.push(user.username.clone());
            if session.participants.len() == session.capacity {
                session.started = true;
                session.active = session.turn_order[0].clone();
                session.deadline_ms = now_ms + self.turn_ms;
                info!(
                    "session {} started with {} players",
                    session.id, session.capacity
                );
            }
            let snapshot = session.snapshot(now_ms, self.turn_secs());
            let recipients = session.participants.clone();
            store.commit(session).map_err(|_| ErrorKind::Conflict)?;
            return Ok(JoinOutcome {
                snapshot,
                broadcast: true,
                recipients,
            });
        }

        let board = rules::engine_for(kind).initial_board(capacity);
        let session = Session::forming(kind, user.clone(), capacity, board);
        let id = store.insert(session);
        let session = store
            .get(id)
            .cloned()
            .ok_or(ErrorKind::Conflict)?;
        Ok(JoinOutcome {
            snapshot: session.snapshot(now_ms, self.turn_secs()),
            broadcast: false,
            recipients: session.participants.clone(),
        })
    }

    /// Opens a private lobby and returns its code. A caller who already has
    /// a group gets that group's existing code back.
    pub async fn create_invite(
        &self,
        user: &UserRef,
        kind: GameKind,
        capacity: usize,
    ) -> Result<(u32, Vec<ParticipantInfo>, u32), ErrorKind> {
        if !kind.valid_capacity(capacity) {
            return Err(ErrorKind::Capacity);
        }
        let mut store = self.invites.write().await;

        if let Some(group) = store.find_by_user(&user.username) {
            return Ok((group.code, group.members_info(), group.capacity as u32));
        }

        let mut rng = rand::thread_rng();
        let code = loop {
            let candidate: u32 = rng.gen_range(10_000..=99_999);
            if !store.code_in_use(candidate) {
                break candidate;
            }
        };
        store.insert(kind, code, capacity, user.clone());
        let group = store.find_by_user(&user.username).ok_or(ErrorKind::Conflict)?;
        Ok((code, group.members_info(), group.capacity as u32))
    }

    /// Joins a private lobby by code. Filling the lobby converts it into a
    /// started session and deletes the group.
    pub async fn join_invite(
        &self,
        user: &UserRef,
        kind: GameKind,
        code: u32,
        now_ms: u64,
    ) -> Result<InviteJoin, ErrorKind> {
        let mut invites = self.invites.write().await;

        // Already grouped: answer with that group, join nothing new.
        if let Some(group) = invites.find_by_user(&user.username) {
            return Ok(InviteJoin::Waiting {
                members: group.members_info(),
                capacity: group.capacity as u32,
                recipients: group.members,
            });
        }

        let mut group = invites
            .find_by_code(kind, code)
            .ok_or(ErrorKind::Capacity)?;
        group.members.push(user.clone());

        if group.members.len() == group.capacity {
            let members = group.members.clone();
            let capacity = group.capacity;
            invites.remove(group.id);
            drop(invites);

            let mut sessions = self.sessions.write().await;
            let board = rules::engine_for(kind).initial_board(capacity);
            let turn_order: Vec<String> =
                members.iter().map(|m| m.username.clone()).collect();
            let session = Session {
                id: 0,
                kind,
                participants: members.clone(),
                turn_order: turn_order.clone(),
                capacity,
                active: turn_order[0].clone(),
                deadline_ms: now_ms + self.turn_ms,
                board,
                rank_count: 0,
                round: 1,
                win_counts: vec![0; capacity],
                started: true,
                version: 0,
            };
            let id = sessions.insert(session);
            let session = sessions.get(id).cloned().ok_or(ErrorKind::Conflict)?;
            info!("invite code {} converted into session {}", code, id);
            return Ok(InviteJoin::Started {
                snapshot: session.snapshot(now_ms, self.turn_secs()),
                recipients: members,
            });
        }

        let members = group.members_info();
        let capacity = group.capacity as u32;
        let recipients = group.members.clone();
        invites.commit(group).map_err(|_| ErrorKind::Conflict)?;
        Ok(InviteJoin::Waiting {
            members,
            capacity,
            recipients,
        })
    }

    /// Removes the caller from their invite group, if any. Returns the
    /// remaining membership, or `None` when there was no group or the
    /// group emptied and was deleted.
    pub async fn leave_invite(&self, username: &str) -> Option<InviteLeft> {
        let mut store = self.invites.write().await;
        let mut group = store.find_by_user(username)?;

        group.members.retain(|m| m.username != username);
        if group.members.is_empty() {
            store.remove(group.id);
            return None;
        }

        let members = group.members_info();
        let capacity = group.capacity as u32;
        let recipients = group.members.clone();
        store.commit(group).ok()?;
        Some(InviteLeft {
            members,
            capacity,
            recipients,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str) -> UserRef {
        UserRef::new(name, 1)
    }

    fn matchmaker() -> Matchmaker {
        Matchmaker::new(
            Arc::new(RwLock::new(SessionStore::new())),
            Arc::new(RwLock::new(InviteStore::new())),
            30_000,
        )
    }

    #[tokio::test]
    async fn test_first_caller_creates_forming_session() {
        let mm = matchmaker();
        let outcome = mm
            .create_or_join(&user("ada"), GameKind::Snakes, 2, 1_000)
            .await
            .unwrap();

        assert!(!outcome.broadcast);
        assert!(!outcome.snapshot.started);
        assert_eq!(outcome.snapshot.participants.len(), 1);
        assert_eq!(outcome.snapshot.active_seat, 1);
    }

    #[tokio::test]
    async fn test_second_caller_fills_and_starts() {
        let mm = matchmaker();
        let first = mm
            .create_or_join(&user("ada"), GameKind::Snakes, 2, 1_000)
            .await
            .unwrap();
        let second = mm
            .create_or_join(&user("lin"), GameKind::Snakes, 2, 2_000)
            .await
            .unwrap();

        assert_eq!(second.snapshot.id, first.snapshot.id);
        assert!(second.broadcast);
        assert!(second.snapshot.started);
        assert_eq!(second.snapshot.participants.len(), 2);
        assert_eq!(second.snapshot.active_seat, 1);
        assert_eq!(second.recipients.len(), 2);
    }

    #[tokio::test]
    async fn test_create_or_join_is_idempotent() {
        let mm = matchmaker();
        let first = mm
            .create_or_join(&user("ada"), GameKind::Ludo, 4, 1_000)
            .await
            .unwrap();
        let again = mm
            .create_or_join(&user("ada"), GameKind::Ludo, 4, 5_000)
            .await
            .unwrap();

        assert_eq!(again.snapshot.id, first.snapshot.id);
        assert!(!again.broadcast);
        // The same user may still queue for a different game kind.
        let other = mm
            .create_or_join(&user("ada"), GameKind::Snakes, 2, 5_000)
            .await
            .unwrap();
        assert_ne!(other.snapshot.kind, first.snapshot.kind);
    }

    #[tokio::test]
    async fn test_capacity_mismatch_opens_new_session() {
        let mm = matchmaker();
        let two = mm
            .create_or_join(&user("ada"), GameKind::Ludo, 2, 1_000)
            .await
            .unwrap();
        let four = mm
            .create_or_join(&user("lin"), GameKind::Ludo, 4, 1_000)
            .await
            .unwrap();

        assert_ne!(two.snapshot.id, four.snapshot.id);
        assert!(!four.snapshot.started);
    }

    #[tokio::test]
    async fn test_invalid_capacity_rejected() {
        let mm = matchmaker();
        let err = mm
            .create_or_join(&user("ada"), GameKind::TicTacToe, 3, 0)
            .await
            .unwrap_err();
        assert_eq!(err, ErrorKind::Capacity);
    }

    #[tokio::test]
    async fn test_invite_lifecycle() {
        let mm = matchmaker();
        let (code, members, capacity) = mm
            .create_invite(&user("ada"), GameKind::Ludo, 3)
            .await
            .unwrap();
        assert!((10_000..=99_999).contains(&code));
        assert_eq!(members.len(), 1);
        assert_eq!(capacity, 3);

        // Creating again returns the same code.
        let (again, _, _) = mm
            .create_invite(&user("ada"), GameKind::Ludo, 3)
            .await
            .unwrap();
        assert_eq!(again, code);

        let joined = mm
            .join_invite(&user("lin"), GameKind::Ludo, code, 1_000)
            .await
            .unwrap();
        match joined {
            InviteJoin::Waiting {
                members, capacity, ..
            } => {
                assert_eq!(members.len(), 2);
                assert_eq!(capacity, 3);
            }
            InviteJoin::Started { .. } => panic!("group should still be waiting"),
        }

        let full = mm
            .join_invite(&user("kay"), GameKind::Ludo, code, 2_000)
            .await
            .unwrap();
        match full {
            InviteJoin::Started {
                snapshot,
                recipients,
            } => {
                assert!(snapshot.started);
                assert_eq!(snapshot.participants.len(), 3);
                assert_eq!(snapshot.active_seat, 1);
                assert_eq!(recipients.len(), 3);
            }
            InviteJoin::Waiting { .. } => panic!("group should have started"),
        }

        // Group is gone: the code no longer resolves.
        let err = mm
            .join_invite(&user("moe"), GameKind::Ludo, code, 3_000)
            .await
            .unwrap_err();
        assert_eq!(err, ErrorKind::Capacity);
    }

    #[tokio::test]
    async fn test_unknown_code_rejected() {
        let mm = matchmaker();
        let err = mm
            .join_invite(&user("lin"), GameKind::Snakes, 11111, 0)
            .await
            .unwrap_err();
        assert_eq!(err, ErrorKind::Capacity);
    }

    #[tokio::test]
    async fn test_leave_invite() {
        let mm = matchmaker();
        let (code, _, _) = mm
            .create_invite(&user("ada"), GameKind::Snakes, 3)
            .await
            .unwrap();
        mm.join_invite(&user("lin"), GameKind::Snakes, code, 0)
            .await
            .unwrap();

        let left = mm.leave_invite("ada").await.unwrap();
        assert_eq!(left.members.len(), 1);
        assert_eq!(left.members[0].username, "lin");

        // Last member out deletes the group.
        assert!(mm.leave_invite("lin").await.is_none());
        assert!(mm.leave_invite("lin").await.is_none());
    }
}
