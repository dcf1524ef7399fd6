//! Coordinator actor implementation
//!
//! The central actor that owns all shared mutable state: the room
//! registry, the live-client set, and the credential and token stores.
//! Sessions and the cleanup task talk to it over an mpsc command channel
//! with oneshot replies.
//!
//! The serial command loop is the single coarse serialization point the
//! design calls for: check-then-act sequences (username uniqueness at
//! registration, capacity and duplicate checks at join) execute inside
//! one command and cannot interleave.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::ai::{AiBackend, AI_AUTHOR};
use crate::error::AppError;
use crate::room::{Room, RoomSnapshot, RoomSummary};
use crate::store::credentials::{CredentialRecord, CredentialStore};
use crate::store::tokens::TokenStore;
use crate::types::{RoomId, UserId};

type Reply<T> = oneshot::Sender<Result<T, AppError>>;

/// Granted on successful registration, login, or token redemption.
#[derive(Debug, Clone)]
pub struct AuthGrant {
    pub user_id: UserId,
    pub username: String,
    /// Fresh session token; the client must adopt it.
    pub token: String,
    /// Room re-entered during a token reconnect, if any.
    pub resume_room: Option<RoomId>,
}

/// Commands sent from sessions and the cleanup task to the coordinator
#[derive(Debug)]
pub enum Command {
    /// Register with a hash the session already computed; scrypt never
    /// runs on the coordinator task. Uniqueness check and insert are one
    /// command, so the check-then-act stays atomic.
    Register {
        username: String,
        password_hash: String,
        address: String,
        reply: Reply<AuthGrant>,
    },
    /// First half of a login: fetch the stored credential so the session
    /// can verify the password on the blocking pool.
    LookupCredential {
        username: String,
        reply: Reply<Option<CredentialRecord>>,
    },
    /// Second half of a login, sent only after the session verified the
    /// password. The single-session check still happens here.
    CompleteLogin {
        user_id: UserId,
        username: String,
        reply: Reply<AuthGrant>,
    },
    RedeemToken {
        token: String,
        reply: Reply<AuthGrant>,
    },
    Logout {
        user_id: UserId,
        reply: Reply<()>,
    },
    ListRooms {
        reply: oneshot::Sender<Vec<RoomSummary>>,
    },
    CreateRoom {
        user_id: UserId,
        name: String,
        max_members: i32,
        is_ai: bool,
        reply: Reply<RoomSummary>,
    },
    /// Join by 1-based hub listing number; resolve and join are one step.
    JoinRoom {
        user_id: UserId,
        number: usize,
        reply: Reply<RoomSummary>,
    },
    LeaveRoom {
        user_id: UserId,
        room_id: RoomId,
        reply: oneshot::Sender<()>,
    },
    PostMessage {
        user_id: UserId,
        room_id: RoomId,
        content: String,
        reply: Reply<()>,
    },
    Snapshot {
        room_id: RoomId,
        reply: oneshot::Sender<Option<RoomSnapshot>>,
    },
    /// Session ended without a logout (drop, I/O error). The token stays
    /// valid so the user can reconnect with it.
    SessionClosed {
        user_id: UserId,
    },
    /// Completion (or failure) coming back from the AI collaborator.
    AiReply {
        room_id: RoomId,
        result: Result<String, AppError>,
    },
    PurgeExpiredTokens {
        reply: Reply<usize>,
    },
}

/// Live-session entry in the coordinator's client set.
#[derive(Debug)]
struct OnlineUser {
    username: String,
    room: Option<RoomId>,
}

/// The coordinator actor
pub struct Coordinator {
    /// Rooms in creation order; hub listing numbers are positions here.
    rooms: Vec<Room>,
    next_room_id: u64,
    /// Live client set: one entry per connected, authenticated session.
    online: HashMap<UserId, OnlineUser>,
    /// Last occupied room per user, kept across disconnects (not logout)
    /// so a token reconnect can resume there.
    last_room: HashMap<UserId, RoomId>,
    credentials: CredentialStore,
    tokens: TokenStore,
    ai: Arc<dyn AiBackend>,
    ai_timeout: Duration,
    /// Handle to our own mailbox, for AI completions posting back.
    cmd_tx: mpsc::Sender<Command>,
    receiver: mpsc::Receiver<Command>,
}

impl Coordinator {
    pub fn new(
        receiver: mpsc::Receiver<Command>,
        cmd_tx: mpsc::Sender<Command>,
        credentials: CredentialStore,
        tokens: TokenStore,
        ai: Arc<dyn AiBackend>,
        ai_timeout: Duration,
    ) -> Self {
        Self {
            rooms: Vec::new(),
            next_room_id: 0,
            online: HashMap::new(),
            last_room: HashMap::new(),
            credentials,
            tokens,
            ai,
            ai_timeout,
            cmd_tx,
            receiver,
        }
    }

    /// Create a room before the actor starts, e.g. the default lobby.
    pub fn bootstrap_room(&mut self, name: &str, max_members: i32, is_ai: bool) {
        let room = self.insert_room(name, max_members, is_ai);
        info!("Bootstrap room '{}' (id {})", name, room);
    }

    /// Run the coordinator event loop
    ///
    /// Continuously receives and processes commands until all senders are
    /// dropped, which is how shutdown reaches the actor.
    pub async fn run(mut self) {
        info!("Coordinator started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd).await;
        }

        info!("Coordinator shutting down");
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Register {
                username,
                password_hash,
                address,
                reply,
            } => {
                let _ = reply.send(self.handle_register(&username, &password_hash, &address).await);
            }
            Command::LookupCredential { username, reply } => {
                let _ = reply.send(self.credentials.lookup(&username).await);
            }
            Command::CompleteLogin {
                user_id,
                username,
                reply,
            } => {
                let _ = reply.send(self.handle_complete_login(user_id, &username).await);
            }
            Command::RedeemToken { token, reply } => {
                let _ = reply.send(self.handle_redeem(&token).await);
            }
            Command::Logout { user_id, reply } => {
                let _ = reply.send(self.handle_logout(user_id).await);
            }
            Command::ListRooms { reply } => {
                let _ = reply.send(self.rooms.iter().map(Room::summary).collect());
            }
            Command::CreateRoom {
                user_id,
                name,
                max_members,
                is_ai,
                reply,
            } => {
                let _ = reply.send(self.handle_create_room(user_id, &name, max_members, is_ai));
            }
            Command::JoinRoom {
                user_id,
                number,
                reply,
            } => {
                let _ = reply.send(self.handle_join_room(user_id, number));
            }
            Command::LeaveRoom {
                user_id,
                room_id,
                reply,
            } => {
                self.handle_leave_room(user_id, room_id);
                let _ = reply.send(());
            }
            Command::PostMessage {
                user_id,
                room_id,
                content,
                reply,
            } => {
                let _ = reply.send(self.handle_post(user_id, room_id, &content));
            }
            Command::Snapshot { room_id, reply } => {
                let _ = reply.send(self.room(room_id).map(Room::snapshot));
            }
            Command::SessionClosed { user_id } => {
                self.handle_session_closed(user_id);
            }
            Command::AiReply { room_id, result } => {
                self.handle_ai_reply(room_id, result);
            }
            Command::PurgeExpiredTokens { reply } => {
                let _ = reply.send(self.tokens.purge_expired().await);
            }
        }
    }

    fn room(&self, room_id: RoomId) -> Option<&Room> {
        self.rooms.iter().find(|r| r.id == room_id)
    }

    fn room_mut(&mut self, room_id: RoomId) -> Option<&mut Room> {
        self.rooms.iter_mut().find(|r| r.id == room_id)
    }

    fn insert_room(&mut self, name: &str, max_members: i32, is_ai: bool) -> RoomId {
        let id = RoomId(self.next_room_id);
        self.next_room_id += 1;
        self.rooms.push(Room::new(id, name, max_members, is_ai));
        id
    }

    async fn handle_register(
        &mut self,
        username: &str,
        password_hash: &str,
        address: &str,
    ) -> Result<AuthGrant, AppError> {
        // check and insert both happen inside this command; a concurrent
        // registration of the same name is queued behind us
        if self.credentials.is_taken(username).await? {
            return Err(AppError::UsernameTaken(username.to_string()));
        }
        let record = self
            .credentials
            .register(username, password_hash, address)
            .await?;
        let token = self.tokens.issue(record.user_id, username).await?;

        self.online.insert(
            record.user_id,
            OnlineUser {
                username: username.to_string(),
                room: None,
            },
        );
        info!("User '{}' registered (id {})", username, record.user_id);

        Ok(AuthGrant {
            user_id: record.user_id,
            username: username.to_string(),
            token,
            resume_room: None,
        })
    }

    /// Finish a login whose password the session already verified.
    async fn handle_complete_login(
        &mut self,
        user_id: UserId,
        username: &str,
    ) -> Result<AuthGrant, AppError> {
        if self.online.contains_key(&user_id) {
            return Err(AppError::AlreadyLoggedIn);
        }
        let token = self.tokens.issue(user_id, username).await?;

        self.online.insert(
            user_id,
            OnlineUser {
                username: username.to_string(),
                room: None,
            },
        );
        info!("User '{}' logged in", username);

        Ok(AuthGrant {
            user_id,
            username: username.to_string(),
            token,
            resume_room: None,
        })
    }

    async fn handle_redeem(&mut self, token: &str) -> Result<AuthGrant, AppError> {
        let record = self.tokens.redeem(token).await?;
        if self.online.contains_key(&record.user_id) {
            return Err(AppError::AlreadyLoggedIn);
        }
        // sliding expiry: a successful redeem re-issues with a full TTL
        let fresh = self.tokens.issue(record.user_id, &record.username).await?;

        // resume the last occupied room when it still exists and has space
        let mut resume_room = None;
        if let Some(room_id) = self.last_room.get(&record.user_id).copied() {
            let username = record.username.clone();
            if let Some(room) = self.room_mut(room_id) {
                if room.join(record.user_id, &username).is_ok() {
                    resume_room = Some(room_id);
                }
            }
        }

        self.online.insert(
            record.user_id,
            OnlineUser {
                username: record.username.clone(),
                room: resume_room,
            },
        );
        info!(
            "User '{}' reconnected with token (resume room: {:?})",
            record.username, resume_room
        );

        Ok(AuthGrant {
            user_id: record.user_id,
            username: record.username,
            token: fresh,
            resume_room,
        })
    }

    async fn handle_logout(&mut self, user_id: UserId) -> Result<(), AppError> {
        let Some(user) = self.online.remove(&user_id) else {
            return Ok(());
        };
        if let Some(room_id) = user.room {
            if let Some(room) = self.room_mut(room_id) {
                room.leave(user_id);
            }
        }
        // logout is explicit: no resume, no reusable token
        self.last_room.remove(&user_id);
        self.tokens.revoke(user_id, &user.username).await?;
        info!("User '{}' logged out", user.username);
        Ok(())
    }

    fn handle_create_room(
        &mut self,
        user_id: UserId,
        name: &str,
        max_members: i32,
        is_ai: bool,
    ) -> Result<RoomSummary, AppError> {
        let id = self.insert_room(name, max_members, is_ai);
        let creator = self
            .online
            .get(&user_id)
            .map(|u| u.username.as_str())
            .unwrap_or("?");
        info!("User '{}' created room '{}' (id {})", creator, name, id);
        match self.room(id) {
            Some(room) => Ok(room.summary()),
            None => Err(AppError::RoomNotFound(id)),
        }
    }

    fn handle_join_room(&mut self, user_id: UserId, number: usize) -> Result<RoomSummary, AppError> {
        let Some(user) = self.online.get(&user_id) else {
            return Err(AppError::InvalidCredentials);
        };
        // join is only legal from the hub
        if user.room.is_some() {
            return Err(AppError::AlreadyInRoom);
        }
        let username = user.username.clone();

        let Some(room) = number.checked_sub(1).and_then(|i| self.rooms.get_mut(i)) else {
            return Err(AppError::NoSuchRoomNumber);
        };
        room.join(user_id, &username)?;
        let summary = room.summary();
        let room_id = room.id;

        if let Some(user) = self.online.get_mut(&user_id) {
            user.room = Some(room_id);
        }
        self.last_room.insert(user_id, room_id);
        info!("User '{}' joined room '{}'", username, summary.name);
        Ok(summary)
    }

    fn handle_leave_room(&mut self, user_id: UserId, room_id: RoomId) {
        if let Some(room) = self.room_mut(room_id) {
            if room.leave(user_id) {
                debug!("User {} left room {}", user_id, room_id);
            }
        }
        if let Some(user) = self.online.get_mut(&user_id) {
            user.room = None;
        }
        // an explicit leave means no resume on reconnect
        self.last_room.remove(&user_id);
    }

    fn handle_post(
        &mut self,
        user_id: UserId,
        room_id: RoomId,
        content: &str,
    ) -> Result<(), AppError> {
        let Some(user) = self.online.get(&user_id) else {
            return Err(AppError::NotInRoom);
        };
        let author = user.username.clone();

        let ai = Arc::clone(&self.ai);
        let ai_timeout = self.ai_timeout;
        let cmd_tx = self.cmd_tx.clone();

        let Some(room) = self.room_mut(room_id) else {
            return Err(AppError::RoomNotFound(room_id));
        };
        if !room.is_member(user_id) {
            return Err(AppError::NotInRoom);
        }
        // the prompt itself is appended by build_context, so the history
        // handed to the backend stops before this post
        let history = room.is_ai.then(|| room.messages().to_vec());
        room.post(&author, content);
        debug!("User '{}' posted in room {}", author, room_id);

        if let Some(history) = history {
            // ask the collaborator off-actor; the answer (or a failure
            // notice) comes back later as an AiReply command, so a slow
            // backend never stalls the room
            let prompt = content.to_string();
            tokio::spawn(async move {
                let result =
                    match tokio::time::timeout(ai_timeout, ai.complete(&prompt, &history)).await {
                        Ok(res) => res,
                        Err(_) => Err(AppError::AiUnavailable("request timed out".into())),
                    };
                let _ = cmd_tx.send(Command::AiReply { room_id, result }).await;
            });
        }
        Ok(())
    }

    fn handle_ai_reply(&mut self, room_id: RoomId, result: Result<String, AppError>) {
        let Some(room) = self.room_mut(room_id) else {
            return;
        };
        match result {
            Ok(text) => {
                room.post(AI_AUTHOR, &text);
            }
            Err(e) => {
                warn!("AI backend failed for room {}: {}", room_id, e);
                room.post(AI_AUTHOR, &format!("[notice] {e}"));
            }
        }
    }

    fn handle_session_closed(&mut self, user_id: UserId) {
        let Some(user) = self.online.remove(&user_id) else {
            return;
        };
        if let Some(room_id) = user.room {
            if let Some(room) = self.room_mut(room_id) {
                room.leave(user_id);
            }
        }
        // token and last_room stay: the user may reconnect and resume
        info!("Session for '{}' closed", user.username);
        debug!("Online users: {}, rooms: {}", self.online.len(), self.rooms.len());
    }
}
