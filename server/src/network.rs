//! Server network layer handling UDP communications and command dispatch

use crate::matchmaking::{InviteJoin, Matchmaker};
use crate::turn::{DisconnectEffect, TimeoutAdvance, TurnEngine};
use crate::util::now_millis;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{Packet, UserRef, PROTOCOL_VERSION};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};

/// Connections are dropped after this long without any packet. Clients
/// ping implicitly through deadline checks, so an honest idle player stays
/// registered.
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(120);

/// Messages sent from network tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: Packet,
        addr: SocketAddr,
    },
    ConnectionTimeout {
        user: UserRef,
    },
    SweepAdvances(Vec<TimeoutAdvance>),
    #[allow(dead_code)]
    Shutdown,
}

/// Messages sent from the dispatch path to the network sender task
#[derive(Debug)]
pub enum GameMessage {
    SendPacket {
        packet: Packet,
        addr: SocketAddr,
    },
    /// Room broadcast; addresses are resolved against the registry at
    /// send time so departed users are silently skipped.
    SendToUsers {
        packet: Packet,
        usernames: Vec<String>,
    },
}

/// One registered transport connection.
#[derive(Debug)]
pub struct Connection {
    pub user: UserRef,
    pub addr: SocketAddr,
    pub last_seen: Instant,
}

/// Maps transport addresses to user identities and back. Sessions reference
/// users, so all routing beyond the first hop is identity-keyed.
pub struct ConnectionRegistry {
    by_user: HashMap<String, Connection>,
    by_addr: HashMap<SocketAddr, String>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            by_user: HashMap::new(),
            by_addr: HashMap::new(),
        }
    }

    /// Registers a connection, replacing any previous address the user had
    /// (reconnects) and any previous user on this address.
    pub fn register(&mut self, user: UserRef, addr: SocketAddr) {
        if let Some(old) = self.by_user.get(&user.username) {
            self.by_addr.remove(&old.addr);
        }
        if let Some(previous) = self.by_addr.insert(addr, user.username.clone()) {
            if previous != user.username {
                self.by_user.remove(&previous);
            }
        }
        info!("{} connected from {}", user.username, addr);
        self.by_user.insert(
            user.username.clone(),
            Connection {
                user,
                addr,
                last_seen: Instant::now(),
            },
        );
    }

    pub fn unregister_addr(&mut self, addr: SocketAddr) -> Option<UserRef> {
        let username = self.by_addr.remove(&addr)?;
        let connection = self.by_user.remove(&username)?;
        info!("{} disconnected", username);
        Some(connection.user)
    }

    pub fn user_for(&self, addr: SocketAddr) -> Option<UserRef> {
        self.by_addr
            .get(&addr)
            .and_then(|username| self.by_user.get(username))
            .map(|c| c.user.clone())
    }

    pub fn addr_for(&self, username: &str) -> Option<SocketAddr> {
        self.by_user.get(username).map(|c| c.addr)
    }

    /// Refreshes the activity timestamp for the connection at `addr`.
    pub fn touch(&mut self, addr: SocketAddr) {
        if let Some(username) = self.by_addr.get(&addr) {
            if let Some(connection) = self.by_user.get_mut(username) {
                connection.last_seen = Instant::now();
            }
        }
    }

    /// Removes connections silent for longer than `timeout` and returns
    /// the users behind them for session cleanup.
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<UserRef> {
        let expired: Vec<SocketAddr> = self
            .by_user
            .values()
            .filter(|c| c.last_seen.elapsed() > timeout)
            .map(|c| c.addr)
            .collect();

        expired
            .into_iter()
            .filter_map(|addr| self.unregister_addr(addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_user.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_user.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Main server coordinating the transport edge and the game services
pub struct Server {
    socket: Arc<UdpSocket>,
    connections: Arc<RwLock<ConnectionRegistry>>,
    matchmaker: Matchmaker,
    turns: TurnEngine,
    turn_secs: u64,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    pub async fn new(
        addr: &str,
        matchmaker: Matchmaker,
        turns: TurnEngine,
        turn_secs: u64,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", addr);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            connections: Arc::new(RwLock::new(ConnectionRegistry::new())),
            matchmaker,
            turns,
            turn_secs,
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    /// Channel handle for external event producers (sweeper, shutdown).
    pub fn message_sender(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    async fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes the outgoing packet queue
    async fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let connections = Arc::clone(&self.connections);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::SendToUsers { packet, usernames } => {
                        let addrs: Vec<(String, SocketAddr)> = {
                            let registry = connections.read().await;
                            usernames
                                .iter()
                                .filter_map(|u| registry.addr_for(u).map(|a| (u.clone(), a)))
                                .collect()
                        };

                        for (username, addr) in addrs {
                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to {}: {}", username, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that drops silent connections and reports the users
    /// behind them for disconnect handling
    async fn spawn_connection_timeout_checker(&self) {
        let connections = Arc::clone(&self.connections);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(10));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut registry = connections.write().await;
                    registry.check_timeouts(CONNECTION_TIMEOUT)
                };

                for user in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ConnectionTimeout { user }) {
                        error!("Failed to send timeout message: {}", e);
                        break;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    async fn send_to(&self, packet: &Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket {
            packet: packet.clone(),
            addr,
        }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    async fn send_to_users(&self, packet: &Packet, users: &[UserRef]) {
        let usernames = users.iter().map(|u| u.username.clone()).collect();
        if let Err(e) = self.game_tx.send(GameMessage::SendToUsers {
            packet: packet.clone(),
            usernames,
        }) {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    async fn fail(&self, addr: SocketAddr, error: shared::ErrorKind) {
        self.send_to(&Packet::Failure(error), addr).await;
    }

    /// Processes one incoming packet: registration first, then identity
    /// resolution, then command dispatch.
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Hello { version, user } => {
                if version != PROTOCOL_VERSION {
                    warn!(
                        "{} connected with protocol {} (expected {})",
                        user.username, version, PROTOCOL_VERSION
                    );
                }
                {
                    let mut registry = self.connections.write().await;
                    registry.register(user, addr);
                }
                self.send_to(&Packet::Welcome, addr).await;
            }

            Packet::Goodbye => {
                let user = {
                    let mut registry = self.connections.write().await;
                    registry.unregister_addr(addr)
                };
                if let Some(user) = user {
                    self.handle_departure(user).await;
                }
            }

            command => {
                let user = {
                    let mut registry = self.connections.write().await;
                    registry.touch(addr);
                    registry.user_for(addr)
                };

                match user {
                    Some(user) => self.handle_command(user, command, addr).await,
                    None => warn!("Command from unregistered address {}", addr),
                }
            }
        }
    }

    /// Dispatches an authenticated command and routes the result back as a
    /// unicast or a room broadcast. Recoverable errors go only to the
    /// requesting connection.
    async fn handle_command(&mut self, user: UserRef, packet: Packet, addr: SocketAddr) {
        let now_ms = now_millis();

        match packet {
            Packet::CreateOrJoin { kind, capacity } => {
                match self
                    .matchmaker
                    .create_or_join(&user, kind, capacity as usize, now_ms)
                    .await
                {
                    Ok(outcome) => {
                        let packet = Packet::SessionState(outcome.snapshot);
                        if outcome.broadcast {
                            self.send_to_users(&packet, &outcome.recipients).await;
                        } else {
                            self.send_to(&packet, addr).await;
                        }
                    }
                    Err(e) => self.fail(addr, e).await,
                }
            }

            Packet::CreateInvite { kind, capacity } => {
                match self
                    .matchmaker
                    .create_invite(&user, kind, capacity as usize)
                    .await
                {
                    Ok((code, members, capacity)) => {
                        self.send_to(
                            &Packet::InviteCreated {
                                code,
                                members,
                                capacity,
                            },
                            addr,
                        )
                        .await;
                    }
                    Err(e) => self.fail(addr, e).await,
                }
            }

            Packet::JoinInvite { kind, code } => {
                match self.matchmaker.join_invite(&user, kind, code, now_ms).await {
                    Ok(InviteJoin::Started {
                        snapshot,
                        recipients,
                    }) => {
                        self.send_to_users(&Packet::SessionState(snapshot), &recipients)
                            .await;
                    }
                    Ok(InviteJoin::Waiting {
                        members,
                        capacity,
                        recipients,
                    }) => {
                        self.send_to_users(&Packet::GroupState { members, capacity }, &recipients)
                            .await;
                    }
                    Err(e) => self.fail(addr, e).await,
                }
            }

            Packet::LeaveInvite => {
                if let Some(left) = self.matchmaker.leave_invite(&user.username).await {
                    self.send_to_users(
                        &Packet::GroupState {
                            members: left.members,
                            capacity: left.capacity,
                        },
                        &left.recipients,
                    )
                    .await;
                }
            }

            Packet::SubmitMove { kind, mv } => {
                match self
                    .turns
                    .submit_move(&user.username, kind, &mv, now_ms)
                    .await
                {
                    Ok(result) => {
                        let packet = Packet::MoveApplied {
                            board: result.board,
                            active_seat: result.active_seat,
                            winners: result.winners,
                            ended: result.ended,
                            round: result.round,
                            win_counts: result.win_counts,
                            reset: result.reset,
                            line: result.line,
                            turn_secs: self.turn_secs,
                        };
                        self.send_to_users(&packet, &result.recipients).await;
                    }
                    Err(e) => self.fail(addr, e).await,
                }
            }

            Packet::CheckDeadline { kind } => {
                match self.turns.check_deadline(&user.username, kind, now_ms).await {
                    Ok(Some(advance)) => self.broadcast_turn_change(&advance).await,
                    // Deadline still running: nothing to say.
                    Ok(None) => {}
                    Err(e) => self.fail(addr, e).await,
                }
            }

            Packet::LeaveSession { kind } => {
                match self.turns.leave_session(&user.username, kind, now_ms).await {
                    Ok(result) => {
                        self.send_to_users(
                            &Packet::ParticipantLeft {
                                username: result.left,
                                winners: result.winners,
                            },
                            &result.recipients,
                        )
                        .await;
                    }
                    Err(e) => self.fail(addr, e).await,
                }
            }

            other => {
                warn!("Unexpected packet type from {}: {:?}", addr, other);
            }
        }
    }

    /// Session and lobby cleanup once a user is gone from the transport.
    async fn handle_departure(&self, user: UserRef) {
        let now_ms = now_millis();

        for effect in self.turns.handle_disconnect(&user, now_ms).await {
            match effect {
                DisconnectEffect::MembershipChanged {
                    snapshot,
                    recipients,
                } => {
                    self.send_to_users(&Packet::SessionState(snapshot), &recipients)
                        .await;
                }
                DisconnectEffect::Forfeited(result) => {
                    self.send_to_users(
                        &Packet::ParticipantLeft {
                            username: result.left,
                            winners: result.winners,
                        },
                        &result.recipients,
                    )
                    .await;
                }
            }
        }

        if let Some(left) = self.matchmaker.leave_invite(&user.username).await {
            self.send_to_users(
                &Packet::GroupState {
                    members: left.members,
                    capacity: left.capacity,
                },
                &left.recipients,
            )
            .await;
        }
    }

    async fn broadcast_turn_change(&self, advance: &TimeoutAdvance) {
        self.send_to_users(
            &Packet::TurnChanged {
                active_seat: advance.active_seat,
                board: advance.board.clone(),
                turn_secs: self.turn_secs,
            },
            &advance.recipients,
        )
        .await;
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver().await;
        self.spawn_network_sender().await;
        self.spawn_connection_timeout_checker().await;

        info!("Server started successfully");

        loop {
            match self.server_rx.recv().await {
                Some(ServerMessage::PacketReceived { packet, addr }) => {
                    self.handle_packet(packet, addr).await;
                }
                Some(ServerMessage::ConnectionTimeout { user }) => {
                    debug!("Connection timeout for {}", user.username);
                    self.handle_departure(user).await;
                }
                Some(ServerMessage::SweepAdvances(advances)) => {
                    for advance in &advances {
                        self.broadcast_turn_change(advance).await;
                    }
                }
                Some(ServerMessage::Shutdown) | None => {
                    info!("Server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}
