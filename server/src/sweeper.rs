//! Periodic deadline sweep
//!
//! A single recurring task bounds every turn in the process: each tick it
//! asks the turn engine to force-advance all sessions whose deadline has
//! been expired for longer than the grace margin, and forwards the advances
//! to the main loop for room broadcast. The task is owned by process
//! lifecycle: it is spawned once at startup and stops when its shutdown
//! signal fires, not when a timer happens to be dropped.

use crate::network::ServerMessage;
use crate::turn::TurnEngine;
use crate::util::now_millis;
use log::{debug, error, info};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::interval;

/// How long past its deadline a turn may sit before the sweep takes it.
/// Keeps the sweep from racing a client-triggered deadline check that is
/// already in flight.
pub const SWEEP_GRACE_MS: u64 = 2_000;

/// Handle to the running sweep task.
pub struct Sweeper {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Spawns the sweep loop. `tick` must exceed the per-turn budget so a
    /// pass can never land ahead of a turn that has not expired yet.
    pub fn spawn(
        turns: TurnEngine,
        server_tx: mpsc::UnboundedSender<ServerMessage>,
        tick: Duration,
    ) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = interval(tick);
            // The first tick fires immediately; skip it.
            ticker.tick().await;

            info!("deadline sweeper running every {:?}", tick);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let advances = turns.sweep(now_millis(), SWEEP_GRACE_MS).await;
                        if advances.is_empty() {
                            continue;
                        }
                        debug!("sweep advanced {} session(s)", advances.len());
                        if let Err(e) = server_tx.send(ServerMessage::SweepAdvances(advances)) {
                            error!("failed to report sweep advances: {}", e);
                            break;
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        info!("deadline sweeper stopping");
                        break;
                    }
                }
            }
        });

        Self { shutdown, handle }
    }

    /// Signals the task to stop and waits for it to wind down.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}
