//! Error types for the chat server
//!
//! Defines application-level errors using thiserror. Fatal errors (I/O,
//! broken channels) unwind the session; business errors (bad credentials,
//! full room) are reported to the client and the session carries on.

use thiserror::Error;

use crate::types::RoomId;

/// Application-level errors
///
/// Covers both fatal errors (connection termination) and
/// business errors (reported to the client, state unchanged).
#[derive(Debug, Error)]
pub enum AppError {
    /// IO error (fatal for the session it occurs on)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (persisted records)
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Channel send error (fatal - internal channel broken)
    #[error("Channel send error")]
    ChannelSend,

    /// Background task join failure (fatal - worker panicked or was cancelled)
    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// State-machine invariant breach: an operation that requires a grant
    /// ran without one (fatal - the session is in an impossible state)
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Room not found with the given id or listing number
    #[error("Room not found: {0}")]
    RoomNotFound(RoomId),

    /// Listing number did not match any room
    #[error("No room with that number")]
    NoSuchRoomNumber,

    /// Room is at its member capacity
    #[error("Room is full")]
    RoomFull,

    /// Client is already a member of the room
    #[error("Already in room")]
    AlreadyInRoom,

    /// Client is not a member of the room
    #[error("Not in room")]
    NotInRoom,

    /// Username already registered
    #[error("Username '{0}' is already taken")]
    UsernameTaken(String),

    /// Unknown username or wrong password
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// User already has a live session
    #[error("User already logged in")]
    AlreadyLoggedIn,

    /// Token not present in the token store
    #[error("Invalid token")]
    InvalidToken,

    /// Token present but past its expiry
    #[error("Token has expired")]
    TokenExpired,

    /// Password hashing / verification failure
    #[error("Password hashing error: {0}")]
    PasswordHash(String),

    /// AI backend failure or timeout
    #[error("AI backend unavailable: {0}")]
    AiUnavailable(String),
}

impl AppError {
    /// Whether this error should be reported to the client rather than
    /// tearing the session down.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            AppError::Io(_)
                | AppError::ChannelSend
                | AppError::Json(_)
                | AppError::Join(_)
                | AppError::NotAuthenticated
        )
    }
}
