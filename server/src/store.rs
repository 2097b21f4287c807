//! Versioned document stores for sessions and invite groups
//!
//! These are the persistence boundary of the process: every session and
//! invite group is a document addressable by id, by the user it contains,
//! and (for groups) by invite code. Secondary indexes are maintained in the
//! same critical section as the primary map, so both lookups stay atomic
//! with respect to writers. Documents carry a version stamp; `commit`
//! rejects a stale writer with `Conflict`, and a document is replaced
//! wholesale or not at all.

use log::info;
use shared::{Board, GameKind, ParticipantInfo, SessionSnapshot, UserRef};
use std::collections::HashMap;

/// A stale commit: another writer updated (or deleted) the document after
/// this copy was read. The losing operation retries from scratch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conflict;

/// One game session. `turn_order` keeps every participant who ever started
/// (seat = index + 1), while `participants` shrinks as players finish or
/// leave; the rotation walks `turn_order` and skips anyone absent from
/// `participants`.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: u64,
    pub kind: GameKind,
    pub participants: Vec<UserRef>,
    pub turn_order: Vec<String>,
    pub capacity: usize,
    pub active: String,
    /// Absolute epoch-millis bound on the active turn; 0 while forming.
    pub deadline_ms: u64,
    pub board: Board,
    pub rank_count: u32,
    pub round: u32,
    pub win_counts: Vec<u32>,
    pub started: bool,
    pub version: u64,
}

impl Session {
    /// A fresh forming session seeded with its creator.
    pub fn forming(kind: GameKind, creator: UserRef, capacity: usize, board: Board) -> Self {
        let username = creator.username.clone();
        Self {
            id: 0,
            kind,
            participants: vec![creator],
            turn_order: vec![username.clone()],
            capacity,
            active: username,
            deadline_ms: 0,
            board,
            rank_count: 0,
            round: 1,
            win_counts: vec![0; capacity],
            started: false,
            version: 0,
        }
    }

    pub fn contains(&self, username: &str) -> bool {
        self.participants.iter().any(|p| p.username == username)
    }

    /// Seat number (1-based rotation slot) of a user, present or finished.
    pub fn seat_of(&self, username: &str) -> Option<u8> {
        self.turn_order
            .iter()
            .position(|u| u == username)
            .map(|i| i as u8 + 1)
    }

    pub fn active_seat(&self) -> u8 {
        self.seat_of(&self.active).unwrap_or(0)
    }

    pub fn participants_info(&self) -> Vec<ParticipantInfo> {
        self.participants
            .iter()
            .map(|p| ParticipantInfo {
                username: p.username.clone(),
                profile: p.profile,
                seat: self.seat_of(&p.username).unwrap_or(0),
            })
            .collect()
    }

    /// Client-facing view. Forming sessions report the full turn budget;
    /// started ones report what is left on the current deadline.
    pub fn snapshot(&self, now_ms: u64, turn_secs: u64) -> SessionSnapshot {
        let remaining_secs = if self.started && self.deadline_ms > 0 {
            (self.deadline_ms as i64 - now_ms as i64) / 1000
        } else {
            turn_secs as i64
        };
        SessionSnapshot {
            id: self.id,
            kind: self.kind,
            board: self.board.clone(),
            participants: self.participants_info(),
            active_seat: self.active_seat(),
            started: self.started,
            capacity: self.capacity as u32,
            remaining_secs,
        }
    }
}

/// Session documents indexed by id and by containing user.
pub struct SessionStore {
    sessions: HashMap<u64, Session>,
    by_user: HashMap<(GameKind, String), u64>,
    next_id: u64,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            by_user: HashMap::new(),
            next_id: 1,
        }
    }

    /// Stores a new session, assigning its id and initial version.
    pub fn insert(&mut self, mut session: Session) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        session.id = id;
        session.version = 1;
        for p in &session.participants {
            self.by_user.insert((session.kind, p.username.clone()), id);
        }
        info!("session {} created ({})", id, session.kind);
        self.sessions.insert(id, session);
        id
    }

    pub fn get(&self, id: u64) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn version_of(&self, id: u64) -> Option<u64> {
        self.sessions.get(&id).map(|s| s.version)
    }

    /// The session currently containing this user, as an owned working copy.
    pub fn find_by_user(&self, kind: GameKind, username: &str) -> Option<Session> {
        self.by_user
            .get(&(kind, username.to_string()))
            .and_then(|id| self.sessions.get(id))
            .cloned()
    }

    /// Oldest still-forming session of the kind with a matching table size.
    pub fn oldest_waiting(&self, kind: GameKind, capacity: usize) -> Option<Session> {
        self.sessions
            .values()
            .filter(|s| s.kind == kind && !s.started && s.capacity == capacity)
            .min_by_key(|s| s.id)
            .cloned()
    }

    /// Writes back a working copy. The copy's version must match the stored
    /// document's; on success the version is bumped and the user index is
    /// rebuilt for the document's current membership.
    pub fn commit(&mut self, mut session: Session) -> Result<(), Conflict> {
        let stored = self.sessions.get(&session.id).ok_or(Conflict)?;
        if stored.version != session.version {
            return Err(Conflict);
        }
        session.version += 1;
        let id = session.id;
        self.by_user.retain(|_, v| *v != id);
        for p in &session.participants {
            self.by_user.insert((session.kind, p.username.clone()), id);
        }
        self.sessions.insert(id, session);
        Ok(())
    }

    /// Deletes only if the caller's copy is current, keeping terminal
    /// transitions atomic with concurrent moves.
    pub fn delete_versioned(&mut self, id: u64, version: u64) -> Result<(), Conflict> {
        match self.sessions.get(&id) {
            Some(stored) if stored.version == version => {
                self.remove(id);
                Ok(())
            }
            _ => Err(Conflict),
        }
    }

    pub fn remove(&mut self, id: u64) -> bool {
        if self.sessions.remove(&id).is_some() {
            self.by_user.retain(|_, v| *v != id);
            info!("session {} deleted", id);
            true
        } else {
            false
        }
    }

    /// Started sessions whose deadline elapsed more than `grace_ms` ago.
    /// Single pass; never-armed deadlines are skipped.
    pub fn sessions_past_deadline(&self, now_ms: u64, grace_ms: u64) -> Vec<Session> {
        self.sessions
            .values()
            .filter(|s| s.started && s.deadline_ms > 0 && s.deadline_ms + grace_ms < now_ms)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// A private lobby gathering players under a short code before a session
/// exists. Converted to a session and deleted the moment it fills.
#[derive(Debug, Clone, PartialEq)]
pub struct InviteGroup {
    pub id: u64,
    pub code: u32,
    pub kind: GameKind,
    pub capacity: usize,
    pub members: Vec<UserRef>,
    pub version: u64,
}

impl InviteGroup {
    pub fn members_info(&self) -> Vec<ParticipantInfo> {
        self.members
            .iter()
            .enumerate()
            .map(|(i, m)| ParticipantInfo {
                username: m.username.clone(),
                profile: m.profile,
                seat: i as u8 + 1,
            })
            .collect()
    }
}

/// Invite groups indexed by id, by (kind, code), and by member.
/// A user belongs to at most one group across all kinds.
pub struct InviteStore {
    groups: HashMap<u64, InviteGroup>,
    by_code: HashMap<(GameKind, u32), u64>,
    by_user: HashMap<String, u64>,
    next_id: u64,
}

impl InviteStore {
    pub fn new() -> Self {
        Self {
            groups: HashMap::new(),
            by_code: HashMap::new(),
            by_user: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn insert(&mut self, kind: GameKind, code: u32, capacity: usize, creator: UserRef) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.by_code.insert((kind, code), id);
        self.by_user.insert(creator.username.clone(), id);
        self.groups.insert(
            id,
            InviteGroup {
                id,
                code,
                kind,
                capacity,
                members: vec![creator],
                version: 1,
            },
        );
        info!("invite group {} created with code {}", id, code);
        id
    }

    /// Codes are drawn against every open group, whatever the kind.
    pub fn code_in_use(&self, code: u32) -> bool {
        self.by_code.keys().any(|(_, c)| *c == code)
    }

    pub fn find_by_code(&self, kind: GameKind, code: u32) -> Option<InviteGroup> {
        self.by_code
            .get(&(kind, code))
            .and_then(|id| self.groups.get(id))
            .cloned()
    }

    pub fn find_by_user(&self, username: &str) -> Option<InviteGroup> {
        self.by_user
            .get(username)
            .and_then(|id| self.groups.get(id))
            .cloned()
    }

    pub fn commit(&mut self, mut group: InviteGroup) -> Result<(), Conflict> {
        let stored = self.groups.get(&group.id).ok_or(Conflict)?;
        if stored.version != group.version {
            return Err(Conflict);
        }
        group.version += 1;
        let id = group.id;
        self.by_user.retain(|_, v| *v != id);
        for m in &group.members {
            self.by_user.insert(m.username.clone(), id);
        }
        self.groups.insert(id, group);
        Ok(())
    }

    pub fn remove(&mut self, id: u64) -> bool {
        if let Some(group) = self.groups.remove(&id) {
            self.by_code.remove(&(group.kind, group.code));
            self.by_user.retain(|_, v| *v != id);
            info!("invite group {} deleted", id);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl Default for InviteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules;

    fn user(name: &str) -> UserRef {
        UserRef::new(name, 1)
    }

    fn forming_session(kind: GameKind, creator: &str, capacity: usize) -> Session {
        let board = rules::engine_for(kind).initial_board(capacity);
        Session::forming(kind, user(creator), capacity, board)
    }

    #[test]
    fn test_insert_assigns_id_and_indexes_user() {
        let mut store = SessionStore::new();
        let id = store.insert(forming_session(GameKind::Ludo, "ada", 4));

        assert_eq!(id, 1);
        let found = store.find_by_user(GameKind::Ludo, "ada").unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.version, 1);
        assert!(store.find_by_user(GameKind::Snakes, "ada").is_none());
    }

    #[test]
    fn test_commit_bumps_version() {
        let mut store = SessionStore::new();
        let id = store.insert(forming_session(GameKind::Ludo, "ada", 4));

        let mut copy = store.find_by_user(GameKind::Ludo, "ada").unwrap();
        copy.participants.push(user("lin"));
        copy.turn_order.push("lin".to_string());
        store.commit(copy).unwrap();

        let fresh = store.get(id).unwrap();
        assert_eq!(fresh.version, 2);
        assert!(fresh.contains("lin"));
        assert_eq!(store.find_by_user(GameKind::Ludo, "lin").unwrap().id, id);
    }

    #[test]
    fn test_stale_commit_conflicts() {
        let mut store = SessionStore::new();
        store.insert(forming_session(GameKind::Ludo, "ada", 4));

        let copy_a = store.find_by_user(GameKind::Ludo, "ada").unwrap();
        let mut copy_b = copy_a.clone();
        copy_b.participants.push(user("lin"));
        copy_b.turn_order.push("lin".to_string());

        store.commit(copy_b).unwrap();
        assert_eq!(store.commit(copy_a), Err(Conflict));
    }

    #[test]
    fn test_commit_drops_index_for_removed_participant() {
        let mut store = SessionStore::new();
        let mut session = forming_session(GameKind::Snakes, "ada", 2);
        session.participants.push(user("lin"));
        session.turn_order.push("lin".to_string());
        store.insert(session);

        let mut copy = store.find_by_user(GameKind::Snakes, "lin").unwrap();
        copy.participants.retain(|p| p.username != "lin");
        store.commit(copy).unwrap();

        assert!(store.find_by_user(GameKind::Snakes, "lin").is_none());
        assert!(store.find_by_user(GameKind::Snakes, "ada").is_some());
    }

    #[test]
    fn test_delete_versioned_requires_current_copy() {
        let mut store = SessionStore::new();
        let id = store.insert(forming_session(GameKind::Ludo, "ada", 2));

        let copy = store.get(id).unwrap().clone();
        let mut racing = copy.clone();
        racing.round = 2;
        store.commit(racing).unwrap();

        assert_eq!(store.delete_versioned(id, copy.version), Err(Conflict));
        let current = store.version_of(id).unwrap();
        store.delete_versioned(id, current).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_oldest_waiting_prefers_earliest() {
        let mut store = SessionStore::new();
        let first = store.insert(forming_session(GameKind::Ludo, "ada", 4));
        store.insert(forming_session(GameKind::Ludo, "lin", 4));
        store.insert(forming_session(GameKind::Ludo, "kay", 2));

        let found = store.oldest_waiting(GameKind::Ludo, 4).unwrap();
        assert_eq!(found.id, first);
        assert!(store.oldest_waiting(GameKind::Ludo, 3).is_none());
    }

    #[test]
    fn test_sessions_past_deadline_filters() {
        let mut store = SessionStore::new();
        let mut expired = forming_session(GameKind::Snakes, "ada", 2);
        expired.started = true;
        expired.deadline_ms = 1_000;
        store.insert(expired);

        let mut fresh = forming_session(GameKind::Snakes, "lin", 2);
        fresh.started = true;
        fresh.deadline_ms = 10_000;
        store.insert(fresh);

        // Forming session: deadline never armed.
        store.insert(forming_session(GameKind::Snakes, "kay", 2));

        let due = store.sessions_past_deadline(5_000, 2_000);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].participants[0].username, "ada");

        // Within the grace margin nothing is due.
        assert!(store.sessions_past_deadline(2_500, 2_000).is_empty());
    }

    #[test]
    fn test_snapshot_remaining_time() {
        let mut session = forming_session(GameKind::Snakes, "ada", 2);
        assert_eq!(session.snapshot(0, 30).remaining_secs, 30);

        session.started = true;
        session.deadline_ms = 45_000;
        assert_eq!(session.snapshot(20_000, 30).remaining_secs, 25);
    }

    #[test]
    fn test_invite_code_lookup_and_reuse() {
        let mut store = InviteStore::new();
        store.insert(GameKind::Ludo, 12345, 4, user("ada"));

        assert!(store.code_in_use(12345));
        assert!(!store.code_in_use(54321));
        assert!(store.find_by_code(GameKind::Ludo, 12345).is_some());
        // Same code under another kind does not resolve.
        assert!(store.find_by_code(GameKind::Snakes, 12345).is_none());

        let group = store.find_by_user("ada").unwrap();
        store.remove(group.id);
        assert!(!store.code_in_use(12345));
        assert!(store.find_by_user("ada").is_none());
    }

    #[test]
    fn test_invite_commit_reindexes_members() {
        let mut store = InviteStore::new();
        store.insert(GameKind::Snakes, 22222, 3, user("ada"));

        let mut group = store.find_by_user("ada").unwrap();
        group.members.push(user("lin"));
        store.commit(group).unwrap();

        assert_eq!(store.find_by_user("lin").unwrap().code, 22222);

        let mut group = store.find_by_user("lin").unwrap();
        group.members.retain(|m| m.username != "ada");
        store.commit(group).unwrap();
        assert!(store.find_by_user("ada").is_none());
    }
}
