//! xchat server - Entry Point
//!
//! Starts the coordinator actor, the token cleanup task, and the TCP
//! listener, then accepts connections until an operator signal triggers a
//! graceful, bounded drain.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use xchat::ai::HttpAiBackend;
use xchat::cleanup::run_token_cleanup;
use xchat::config::Config;
use xchat::server::Coordinator;
use xchat::session::handle_connection;
use xchat::store::credentials::CredentialStore;
use xchat::store::tokens::TokenStore;
use xchat::store::JsonFileStore;

/// Channel buffer size for coordinator commands
const CHANNEL_BUFFER_SIZE: usize = 256;

/// Default room created at bootstrap
const DEFAULT_ROOM: &str = "Lobby";
const DEFAULT_ROOM_CAPACITY: i32 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level, e.g. RUST_LOG=xchat=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("xchat=info")),
        )
        .init();

    let config = Config::parse();

    // File-backed stores; every mutation is a whole-file rewrite
    let credentials =
        CredentialStore::new(Arc::new(JsonFileStore::new(config.credentials_path())));
    let tokens = TokenStore::new(
        Arc::new(JsonFileStore::new(config.tokens_path())),
        config.token_ttl(),
    );
    let ai = Arc::new(HttpAiBackend::new(&config.ai_url, &config.ai_model));

    // Coordinator actor channel and startup
    let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
    let mut coordinator = Coordinator::new(
        cmd_rx,
        cmd_tx.clone(),
        credentials,
        tokens,
        ai,
        config.ai_timeout(),
    );
    coordinator.bootstrap_room(DEFAULT_ROOM, DEFAULT_ROOM_CAPACITY, false);
    tokio::spawn(coordinator.run());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let cleanup_task = tokio::spawn(run_token_cleanup(
        cmd_tx.clone(),
        config.cleanup_interval(),
        shutdown_rx.clone(),
    ));

    let listener = TcpListener::bind(&config.addr).await?;
    info!("Chat server listening on {}", config.addr);

    // Operator console: `q`/`quit` shuts the server down like ctrl-c.
    // Client-side `q` only ever closes that client's own connection.
    let mut console = BufReader::new(tokio::io::stdin()).lines();
    let mut console_open = true;

    // Connection accept loop: one session task per socket
    let mut sessions = JoinSet::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            line = console.next_line(), if console_open => {
                match line {
                    Ok(Some(l)) if matches!(l.trim(), "q" | "quit") => {
                        info!("Shutdown requested from console");
                        break;
                    }
                    Ok(Some(_)) => {}
                    // stdin closed (e.g. running detached); stop polling it
                    Ok(None) | Err(_) => console_open = false,
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        info!("New connection from {}", addr);
                        let cmd_tx = cmd_tx.clone();
                        let shutdown_rx = shutdown_rx.clone();
                        let push_interval = config.push_interval();
                        sessions.spawn(async move {
                            if let Err(e) = handle_connection(
                                stream,
                                addr.to_string(),
                                cmd_tx,
                                push_interval,
                                shutdown_rx,
                            )
                            .await
                            {
                                error!("Connection handler error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                }
            }
            // reap finished sessions so the set does not grow unbounded
            Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
        }
    }

    // Stop accepting, signal sessions and the cleanup task, then wait a
    // bounded time before force-terminating stragglers.
    drop(listener);
    let _ = shutdown_tx.send(true);

    let drained = tokio::time::timeout(config.drain_timeout(), async {
        while sessions.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!("Drain timeout reached, aborting remaining sessions");
        sessions.shutdown().await;
    }

    if tokio::time::timeout(Duration::from_secs(5), cleanup_task)
        .await
        .is_err()
    {
        warn!("Cleanup task was slow to stop");
    }

    // dropping the last command sender lets the coordinator exit
    drop(cmd_tx);
    info!("Server has shut down gracefully");
    Ok(())
}
