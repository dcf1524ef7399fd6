//! Room struct definition
//!
//! A room is a named, capacity-bounded group chat with an append-only
//! message log. Capacity and duplicate checks happen inside [`Room::join`]
//! as one step; the coordinator's serial command loop makes that step
//! atomic against concurrent joiners.

use chrono::{DateTime, Local};

use crate::error::AppError;
use crate::types::{RoomId, UserId};

/// Sentinel for unbounded rooms.
pub const UNLIMITED_MEMBERS: i32 = -1;

/// One chat message, immutable once appended.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub author: String,
    pub sent_at: DateTime<Local>,
    pub content: String,
}

impl ChatMessage {
    pub fn new(author: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            sent_at: Local::now(),
            content: content.into(),
        }
    }
}

impl std::fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.sent_at.format("%H:%M"),
            self.author,
            self.content
        )
    }
}

/// Multi-member chat room
#[derive(Debug)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    /// `-1` means unbounded.
    pub max_members: i32,
    /// Routes posted messages to the AI collaborator.
    pub is_ai: bool,
    /// Members in join order, no duplicates.
    members: Vec<(UserId, String)>,
    /// Append-only ordered message log.
    messages: Vec<ChatMessage>,
}

/// One row of the hub's room listing.
#[derive(Debug, Clone)]
pub struct RoomSummary {
    pub id: RoomId,
    pub name: String,
    pub occupancy: usize,
    pub max_members: i32,
    pub is_ai: bool,
}

/// Consistent view of room state taken in one step, for display pushes.
#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    pub id: RoomId,
    pub name: String,
    pub max_members: i32,
    pub is_ai: bool,
    pub member_names: Vec<String>,
    pub messages: Vec<ChatMessage>,
}

impl Room {
    pub fn new(id: RoomId, name: impl Into<String>, max_members: i32, is_ai: bool) -> Self {
        Self {
            id,
            name: name.into(),
            max_members,
            is_ai,
            members: Vec::new(),
            messages: Vec::new(),
        }
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_member(&self, user_id: UserId) -> bool {
        self.members.iter().any(|(id, _)| *id == user_id)
    }

    fn is_full(&self) -> bool {
        self.max_members != UNLIMITED_MEMBERS && self.members.len() >= self.max_members as usize
    }

    /// Add a member, enforcing capacity and the no-duplicates invariant.
    ///
    /// Check and insert are one step; do not split this across awaits.
    pub fn join(&mut self, user_id: UserId, username: &str) -> Result<(), AppError> {
        if self.is_member(user_id) {
            return Err(AppError::AlreadyInRoom);
        }
        if self.is_full() {
            return Err(AppError::RoomFull);
        }
        self.members.push((user_id, username.to_string()));
        Ok(())
    }

    /// Remove a member. Leaving twice is a no-op, not an error.
    pub fn leave(&mut self, user_id: UserId) -> bool {
        let before = self.members.len();
        self.members.retain(|(id, _)| *id != user_id);
        self.members.len() != before
    }

    /// Append a message. Membership is the caller's responsibility.
    pub fn post(&mut self, author: &str, content: &str) -> ChatMessage {
        let msg = ChatMessage::new(author, content);
        self.messages.push(msg.clone());
        msg
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            id: self.id,
            name: self.name.clone(),
            occupancy: self.members.len(),
            max_members: self.max_members,
            is_ai: self.is_ai,
        }
    }

    /// Take a consistent copy of the whole room state in one call, so a
    /// concurrent join/leave cannot produce a torn read.
    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            id: self.id,
            name: self.name.clone(),
            max_members: self.max_members,
            is_ai: self.is_ai,
            member_names: self.members.iter().map(|(_, name)| name.clone()).collect(),
            messages: self.messages.clone(),
        }
    }
}
