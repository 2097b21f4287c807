use clap::Parser;
use log::error;
use server::matchmaking::Matchmaker;
use server::network::{Server, ServerMessage};
use server::store::{InviteStore, SessionStore};
use server::sweeper::Sweeper;
use server::turn::TurnEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Main-method of the application.
/// Parses command-line arguments, wires the stores and services together,
/// then runs the network server with the deadline sweeper alongside.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "8080")]
        port: u16,
        /// Per-turn time budget in seconds
        #[clap(short, long, default_value = "30")]
        turn_secs: u64,
        /// Deadline sweep interval in seconds; must exceed the turn budget
        #[clap(short, long, default_value = "35")]
        sweep_secs: u64,
    }

    env_logger::init();

    // Parse command line arguments
    let args = Args::parse();

    // A sweep pass must never land ahead of a turn that has not expired.
    if args.sweep_secs <= args.turn_secs {
        error!(
            "sweep interval ({}s) must exceed the turn budget ({}s)",
            args.sweep_secs, args.turn_secs
        );
        std::process::exit(1);
    }

    // Shared document stores behind read-write locks
    let sessions = Arc::new(RwLock::new(SessionStore::new()));
    let invites = Arc::new(RwLock::new(InviteStore::new()));
    let turn_ms = args.turn_secs * 1000;

    let matchmaker = Matchmaker::new(Arc::clone(&sessions), Arc::clone(&invites), turn_ms);
    let turns = TurnEngine::new(Arc::clone(&sessions), turn_ms);

    // Create network server
    let address = format!("{}:{}", args.host, args.port);
    let mut server = Server::new(&address, matchmaker, turns.clone(), args.turn_secs).await?;
    let shutdown_tx = server.message_sender();

    // Spawn the deadline sweeper owned by this process's lifecycle
    let sweeper = Sweeper::spawn(
        turns,
        server.message_sender(),
        Duration::from_secs(args.sweep_secs),
    );

    // Spawn the server loop
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            eprintln!("Server error: {}", e);
        }
    });

    // Handle shutdown gracefully
    tokio::select! {
        result = server_handle => {
            if let Err(e) = result {
                eprintln!("Server task panicked: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            println!("Received Ctrl+C, shutting down gracefully...");
            let _ = shutdown_tx.send(ServerMessage::Shutdown);
        }
    }

    sweeper.stop().await;
    Ok(())
}
