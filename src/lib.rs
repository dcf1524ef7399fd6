//! Multi-Room Chat Server Library
//!
//! A line-oriented TCP chat server with registered accounts, reconnect
//! tokens, capacity-limited rooms, and optional AI rooms where an external
//! model answers every message.
//!
//! # Features
//! - Registration and login backed by a file store
//! - Reconnect tokens with a sliding time-to-live
//! - Numbered room listing, room creation, capacity limits
//! - Periodic full-view pushes so idle clients see new messages
//! - AI rooms bridged to an HTTP completion endpoint
//! - Background sweep that purges expired tokens
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `Coordinator` is the central actor owning rooms, online users, and
//!   the credential/token stores
//! - Each connection runs a `session` task communicating with the
//!   coordinator via commands
//! - No locks needed - all state access goes through message passing
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio::net::TcpListener;
//! use tokio::sync::{mpsc, watch};
//! use xchat::ai::HttpAiBackend;
//! use xchat::server::Coordinator;
//! use xchat::session::handle_connection;
//! use xchat::store::credentials::CredentialStore;
//! use xchat::store::tokens::TokenStore;
//! use xchat::store::MemoryStore;
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = TcpListener::bind("127.0.0.1:8080").await.unwrap();
//!     let (cmd_tx, cmd_rx) = mpsc::channel(256);
//!     let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//!
//!     let mut coordinator = Coordinator::new(
//!         cmd_rx,
//!         cmd_tx.clone(),
//!         CredentialStore::new(Arc::new(MemoryStore::new())),
//!         TokenStore::new(Arc::new(MemoryStore::new()), Duration::from_secs(3600)),
//!         Arc::new(HttpAiBackend::new("http://localhost:11434/api/generate", "llama3")),
//!         Duration::from_secs(5),
//!     );
//!     coordinator.bootstrap_room("Lobby", 5, false);
//!     tokio::spawn(coordinator.run());
//!
//!     while let Ok((stream, addr)) = listener.accept().await {
//!         let cmd_tx = cmd_tx.clone();
//!         let shutdown_rx = shutdown_rx.clone();
//!         tokio::spawn(handle_connection(
//!             stream,
//!             addr.to_string(),
//!             cmd_tx,
//!             Duration::from_secs(2),
//!             shutdown_rx,
//!         ));
//!     }
//! }
//! ```

pub mod ai;
pub mod auth;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod room;
pub mod server;
pub mod session;
pub mod store;
pub mod types;
pub mod view;
pub mod wire;

// Re-export main types for convenience
pub use error::AppError;
pub use room::{ChatMessage, Room};
pub use server::{Command, Coordinator};
pub use session::handle_connection;
pub use types::{RoomId, UserId};
pub use wire::Envelope;
