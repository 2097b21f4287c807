//! # Board-Game Session Server Library
//!
//! This library provides the authoritative server implementation for a set
//! of real-time turn-based board games sharing one matchmaking and
//! turn-rotation substrate. It owns the canonical session state, validates
//! every move server-side, and broadcasts results to the affected room.
//!
//! ## Core Responsibilities
//!
//! ### Matchmaking
//! Pairs waiting users into public sessions by game kind and table size,
//! and runs private invite-code lobbies that convert into started sessions
//! the moment they fill. A user holds at most one open session per game
//! kind; repeated join requests are answered idempotently from the
//! existing record.
//!
//! ### Turn Rotation and Session Lifecycle
//! A single turn engine drives every variant: whose turn it is, the
//! per-turn deadline, circular skip-aware rotation, finishing-rank
//! assignment, and the `Forming -> Active -> {Finished | Abandoned}` state
//! machine. Variant differences enter only through the rule-engine trait.
//!
//! ### Rule Enforcement
//! Each game variant contributes pure validate-and-apply functions over
//! its board representation. Rejected moves never mutate state and never
//! advance the turn.
//!
//! ### Deadline Sweeping
//! A cancellable recurring task force-advances any session whose turn
//! deadline has expired, so no session ever stalls on an unresponsive
//! participant.
//!
//! ## Architecture Design
//!
//! ### Event Dispatch Loop
//! All network events flow through one `tokio::select!`-driven loop, with
//! dedicated tasks for packet receive, packet send, connection timeouts,
//! and the deadline sweep. Session documents are the unit of mutual
//! exclusion: operations read a working copy, compute without holding a
//! lock, and commit with a version check, retrying when a concurrent
//! writer wins.
//!
//! ### UDP-Based Communication
//! Uses UDP sockets with bincode-serialized packets. Responses to a
//! request go back to the requesting connection; membership and move
//! results are broadcast to everyone seated in the session.
//!
//! ## Module Organization
//!
//! - [`store`] — versioned session and invite-group documents with
//!   identity-keyed lookups
//! - [`rules`] — per-variant rule engines behind one strategy trait
//! - [`matchmaking`] — public queues and private invite lobbies
//! - [`turn`] — the shared turn engine and disconnect handling
//! - [`sweeper`] — the recurring deadline sweep task
//! - [`network`] — UDP edge, connection registry, command dispatch
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::matchmaking::Matchmaker;
//! use server::network::Server;
//! use server::store::{InviteStore, SessionStore};
//! use server::sweeper::Sweeper;
//! use server::turn::TurnEngine;
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio::sync::RwLock;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sessions = Arc::new(RwLock::new(SessionStore::new()));
//!     let invites = Arc::new(RwLock::new(InviteStore::new()));
//!     let turn_ms = 30_000;
//!
//!     let matchmaker = Matchmaker::new(Arc::clone(&sessions), Arc::clone(&invites), turn_ms);
//!     let turns = TurnEngine::new(Arc::clone(&sessions), turn_ms);
//!
//!     let mut server = Server::new("127.0.0.1:8080", matchmaker, turns.clone(), 30).await?;
//!     let sweeper = Sweeper::spawn(turns, server.message_sender(), Duration::from_secs(35));
//!
//!     server.run().await?;
//!     sweeper.stop().await;
//!     Ok(())
//! }
//! ```

pub mod matchmaking;
pub mod network;
pub mod rules;
pub mod store;
pub mod sweeper;
pub mod turn;
pub mod util;
