//! Per-connection session: the client state machine
//!
//! Each connection runs one session task that owns the read side of the
//! socket and drives `Unauthenticated -> InHub -> InRoom` transitions. Two
//! further tasks cooperate with it:
//!
//! - a writer task owning the socket's write half; everything outbound
//!   (read-loop replies and periodic pushes alike) goes through one mpsc
//!   channel, which serializes the shared writer;
//! - a pusher task, alive only while the session is in the hub or a room,
//!   re-rendering that view on a fixed cadence so other members' actions
//!   become visible without the observer typing anything. It is cancelled
//!   by signal the moment the session leaves the state it renders.
//!
//! Any I/O failure unwinds to a single teardown point in
//! [`handle_connection`], which reports the closed session to the
//! coordinator exactly once.

use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::auth;
use crate::error::AppError;
use crate::room::RoomSummary;
use crate::server::{AuthGrant, Command};
use crate::types::{RoomId, UserId};
use crate::view;
use crate::wire::{self, Envelope};

/// Authenticated identity carried by a session.
#[derive(Debug, Clone)]
struct AuthedUser {
    user_id: UserId,
    username: String,
}

/// Session states; room linkage lives in the state itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Unauthenticated,
    InHub,
    InRoom(RoomId),
    /// Terminal: connection closed or closing.
    Closed,
}

/// Outcome of a sub-dialog: move to a new state or fall back to the menu.
enum Flow {
    Next(SessionState),
    Back,
}

/// One prompt exchange with the client.
enum PromptInput {
    Value(String),
    /// Client typed `q` to back out.
    Cancelled,
    /// Connection closed (or server draining).
    Closed,
}

/// Handle a new connection end to end.
///
/// Splits the stream, spawns the writer task, runs the state machine, and
/// performs the one-shot teardown (report to coordinator, drain writer).
pub async fn handle_connection<S>(
    stream: S,
    peer: String,
    cmd_tx: mpsc::Sender<Command>,
    push_interval: Duration,
    shutdown: watch::Receiver<bool>,
) -> Result<(), AppError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    debug!("New connection from {}", peer);

    let (read_half, write_half) = tokio::io::split(stream);
    let (out_tx, out_rx) = mpsc::channel::<String>(64);
    let writer_task = tokio::spawn(write_loop(write_half, out_rx));

    let mut session = Session {
        peer: peer.clone(),
        cmd_tx: cmd_tx.clone(),
        out_tx,
        reader: BufReader::new(read_half),
        push_interval,
        shutdown,
        user: None,
    };

    let result = session.run().await;

    // teardown runs exactly once, whether the loop ended cleanly or an
    // I/O error unwound it; a logout has already cleared `user`
    if let Some(user) = session.user.take() {
        let _ = cmd_tx
            .send(Command::SessionClosed {
                user_id: user.user_id,
            })
            .await;
    }
    drop(session);
    let _ = writer_task.await;

    match &result {
        Ok(()) => info!("Connection from {} closed", peer),
        Err(e) => warn!("Connection from {} failed: {}", peer, e),
    }
    result
}

/// Writer task: the only owner of the socket's write half.
async fn write_loop<W>(mut writer: W, mut rx: mpsc::Receiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(msg) = rx.recv().await {
        if writer.write_all(msg.as_bytes()).await.is_err() {
            break;
        }
        if writer.write_all(b"\n").await.is_err() {
            break;
        }
        if writer.flush().await.is_err() {
            break;
        }
    }
    debug!("Writer task ended");
}

/// Periodic view pusher, one per hub/room occupancy.
///
/// Queries the coordinator for a fresh snapshot each tick and sends the
/// rendered view down the shared outbound channel. Stopping is signaled
/// through a watch channel and is idempotent.
struct Pusher {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Pusher {
    fn spawn_hub(
        cmd_tx: mpsc::Sender<Command>,
        out_tx: mpsc::Sender<String>,
        interval: Duration,
    ) -> Self {
        Self::spawn(interval, move || {
            let cmd_tx = cmd_tx.clone();
            let out_tx = out_tx.clone();
            async move {
                let (reply, rx) = oneshot::channel();
                if cmd_tx.send(Command::ListRooms { reply }).await.is_err() {
                    return false;
                }
                let Ok(rooms) = rx.await else { return false };
                let body = format!("{}{}", view::CLEAR_SCREEN, view::render_hub(&rooms));
                out_tx.send(body).await.is_ok()
            }
        })
    }

    fn spawn_room(
        cmd_tx: mpsc::Sender<Command>,
        out_tx: mpsc::Sender<String>,
        interval: Duration,
        room_id: RoomId,
    ) -> Self {
        Self::spawn(interval, move || {
            let cmd_tx = cmd_tx.clone();
            let out_tx = out_tx.clone();
            async move {
                let (reply, rx) = oneshot::channel();
                if cmd_tx.send(Command::Snapshot { room_id, reply }).await.is_err() {
                    return false;
                }
                let Ok(Some(snap)) = rx.await else { return false };
                let body = format!("{}{}", view::CLEAR_SCREEN, view::render_room(&snap));
                out_tx.send(body).await.is_ok()
            }
        })
    }

    fn spawn<F, Fut>(interval: Duration, tick: F) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = bool> + Send,
    {
        let (cancel, mut cancelled) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancelled.changed() => break,
                    _ = ticker.tick() => {
                        if !tick().await {
                            break;
                        }
                    }
                }
            }
        });
        Self { cancel, handle }
    }

    /// Signal the task to stop and wait for it. Cancelling an
    /// already-finished pusher is a no-op.
    async fn stop(self) {
        let _ = self.cancel.send(true);
        let _ = self.handle.await;
    }
}

struct Session<R> {
    peer: String,
    cmd_tx: mpsc::Sender<Command>,
    out_tx: mpsc::Sender<String>,
    reader: R,
    push_interval: Duration,
    shutdown: watch::Receiver<bool>,
    user: Option<AuthedUser>,
}

impl<R> Session<R>
where
    R: AsyncBufRead + Unpin,
{
    async fn run(&mut self) -> Result<(), AppError> {
        let mut state = SessionState::Unauthenticated;
        loop {
            state = match state {
                SessionState::Unauthenticated => self.auth_menu().await?,
                SessionState::InHub => self.hub().await?,
                SessionState::InRoom(room_id) => self.room(room_id).await?,
                SessionState::Closed => return Ok(()),
            };
        }
    }

    /// Read the next envelope, yielding `None` on EOF or server drain.
    async fn next_input(&mut self) -> Result<Option<Envelope>, AppError> {
        tokio::select! {
            _ = self.shutdown.changed() => {
                debug!("Session {} interrupted by shutdown", self.peer);
                Ok(None)
            }
            res = wire::read_envelope(&mut self.reader) => Ok(res?),
        }
    }

    async fn send(&self, msg: impl Into<String>) -> Result<(), AppError> {
        self.out_tx
            .send(msg.into())
            .await
            .map_err(|_| AppError::ChannelSend)
    }

    /// Prompt until the client supplies a non-empty value, backs out with
    /// `q`, or the connection closes.
    async fn prompt(&mut self, text: &str, empty_hint: &str) -> Result<PromptInput, AppError> {
        loop {
            self.send(text).await?;
            let Some(input) = self.next_input().await? else {
                return Ok(PromptInput::Closed);
            };
            let value = input.body.trim().to_string();
            if value.eq_ignore_ascii_case("q") {
                return Ok(PromptInput::Cancelled);
            }
            if !value.is_empty() {
                return Ok(PromptInput::Value(value));
            }
            self.send(empty_hint).await?;
        }
    }

    // ----- UNAUTHENTICATED -----

    async fn auth_menu(&mut self) -> Result<SessionState, AppError> {
        loop {
            self.send(format!("{}{}", view::CLEAR_SCREEN, view::AUTH_MENU))
                .await?;
            let Some(choice) = self.next_input().await? else {
                return Ok(SessionState::Closed);
            };
            match choice.body.trim() {
                "1" => match self.register_dialog().await? {
                    Flow::Next(state) => return Ok(state),
                    Flow::Back => continue,
                },
                "2" => {
                    // a token attached to the envelope is tried first; an
                    // invalid or expired one falls back to the prompts
                    if let Some(token) = choice.token {
                        match self.redeem_token(token).await? {
                            Flow::Next(state) => return Ok(state),
                            Flow::Back => {}
                        }
                    }
                    match self.login_dialog().await? {
                        Flow::Next(state) => return Ok(state),
                        Flow::Back => continue,
                    }
                }
                c if c.eq_ignore_ascii_case("q") => {
                    self.send("Goodbye.").await?;
                    return Ok(SessionState::Closed);
                }
                _ => {
                    self.send("Invalid choice. Please enter 1 for Register or 2 for Login.")
                        .await?;
                }
            }
        }
    }

    async fn register_dialog(&mut self) -> Result<Flow, AppError> {
        loop {
            let username = match self
                .prompt(
                    "Enter your username (or 'q' to quit):",
                    "Username cannot be empty.",
                )
                .await?
            {
                PromptInput::Value(v) => v,
                PromptInput::Cancelled => return Ok(Flow::Back),
                PromptInput::Closed => return Ok(Flow::Next(SessionState::Closed)),
            };
            let password = match self
                .prompt(
                    "Enter your password (or 'q' to quit):",
                    "Password cannot be empty.",
                )
                .await?
            {
                PromptInput::Value(v) => v,
                PromptInput::Cancelled => return Ok(Flow::Back),
                PromptInput::Closed => return Ok(Flow::Next(SessionState::Closed)),
            };

            // scrypt on the blocking pool; the coordinator only ever sees
            // the finished hash
            let password_hash = auth::hash_password_blocking(&password).await?;

            let (reply, rx) = oneshot::channel();
            self.cmd_tx
                .send(Command::Register {
                    username,
                    password_hash,
                    address: self.peer.clone(),
                    reply,
                })
                .await
                .map_err(|_| AppError::ChannelSend)?;
            match rx.await.map_err(|_| AppError::ChannelSend)? {
                Ok(grant) => {
                    let welcome = format!("Registration successful. Welcome {}", grant.username);
                    return self.adopt_grant(grant, welcome).await;
                }
                Err(e @ AppError::UsernameTaken(_)) => {
                    // loop back to pick a different name
                    self.send(e.to_string()).await?;
                }
                Err(e) if e.is_recoverable() => {
                    self.send(e.to_string()).await?;
                    return Ok(Flow::Back);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn login_dialog(&mut self) -> Result<Flow, AppError> {
        let username = match self
            .prompt(
                "Enter your username (or 'q' to quit):",
                "Username cannot be empty.",
            )
            .await?
        {
            PromptInput::Value(v) => v,
            PromptInput::Cancelled => return Ok(Flow::Back),
            PromptInput::Closed => return Ok(Flow::Next(SessionState::Closed)),
        };
        let password = match self
            .prompt(
                "Enter your password (or 'q' to quit):",
                "Password cannot be empty.",
            )
            .await?
        {
            PromptInput::Value(v) => v,
            PromptInput::Cancelled => return Ok(Flow::Back),
            PromptInput::Closed => return Ok(Flow::Next(SessionState::Closed)),
        };

        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::LookupCredential { username, reply })
            .await
            .map_err(|_| AppError::ChannelSend)?;
        let record = match rx.await.map_err(|_| AppError::ChannelSend)? {
            Ok(record) => record,
            Err(e) if e.is_recoverable() => {
                self.send(e.to_string()).await?;
                return Ok(Flow::Back);
            }
            Err(e) => return Err(e),
        };

        // verification runs on the blocking pool, off the coordinator and
        // off the async workers; unknown user and wrong password surface
        // identically
        let verified = match &record {
            Some(record) => {
                auth::verify_password_blocking(record.password_hash.clone(), password).await?
            }
            None => false,
        };
        let Some(record) = record.filter(|_| verified) else {
            self.send(AppError::InvalidCredentials.to_string()).await?;
            return Ok(Flow::Back);
        };

        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::CompleteLogin {
                user_id: record.user_id,
                username: record.username,
                reply,
            })
            .await
            .map_err(|_| AppError::ChannelSend)?;
        match rx.await.map_err(|_| AppError::ChannelSend)? {
            Ok(grant) => {
                let welcome = format!("Login successful. Welcome back {}", grant.username);
                self.adopt_grant(grant, welcome).await
            }
            Err(e) if e.is_recoverable() => {
                self.send(e.to_string()).await?;
                Ok(Flow::Back)
            }
            Err(e) => Err(e),
        }
    }

    async fn redeem_token(&mut self, token: String) -> Result<Flow, AppError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::RedeemToken { token, reply })
            .await
            .map_err(|_| AppError::ChannelSend)?;
        match rx.await.map_err(|_| AppError::ChannelSend)? {
            Ok(grant) => {
                let welcome = format!(
                    "Login successful with token. Welcome back {}",
                    grant.username
                );
                self.adopt_grant(grant, welcome).await
            }
            Err(e) if e.is_recoverable() => {
                self.send(e.to_string()).await?;
                Ok(Flow::Back)
            }
            Err(e) => Err(e),
        }
    }

    /// Record the authenticated identity and tell the client to adopt the
    /// fresh token (it rides on the welcome line's envelope).
    async fn adopt_grant(&mut self, grant: AuthGrant, welcome: String) -> Result<Flow, AppError> {
        self.user = Some(AuthedUser {
            user_id: grant.user_id,
            username: grant.username.clone(),
        });
        self.send(Envelope::with_token(grant.token, welcome).encode())
            .await?;
        Ok(Flow::Next(match grant.resume_room {
            Some(room_id) => SessionState::InRoom(room_id),
            None => SessionState::InHub,
        }))
    }

    fn authed(&self) -> Result<AuthedUser, AppError> {
        // hub/room states are only reachable after a grant
        self.user.clone().ok_or(AppError::NotAuthenticated)
    }

    // ----- NOT_IN_ROOM (hub) -----

    async fn hub(&mut self) -> Result<SessionState, AppError> {
        let user = self.authed()?;
        let mut pusher = Some(Pusher::spawn_hub(
            self.cmd_tx.clone(),
            self.out_tx.clone(),
            self.push_interval,
        ));

        let result = self.hub_loop(&user, &mut pusher).await;

        // the hub pusher must not outlive the hub state, error or not
        if let Some(p) = pusher.take() {
            p.stop().await;
        }
        result
    }

    async fn hub_loop(
        &mut self,
        user: &AuthedUser,
        pusher: &mut Option<Pusher>,
    ) -> Result<SessionState, AppError> {
        loop {
            let Some(input) = self.next_input().await? else {
                return Ok(SessionState::Closed);
            };
            let body = input.body.trim().to_string();
            match body.as_str() {
                "" => continue,
                "/help" => self.send(view::HELP).await?,
                "/logout" => {
                    let (reply, rx) = oneshot::channel();
                    self.cmd_tx
                        .send(Command::Logout {
                            user_id: user.user_id,
                            reply,
                        })
                        .await
                        .map_err(|_| AppError::ChannelSend)?;
                    rx.await.map_err(|_| AppError::ChannelSend)??;
                    self.user = None;
                    self.send("Logged out.").await?;
                    return Ok(SessionState::Unauthenticated);
                }
                "/quit" | "/exit" | "/disconnect" => {
                    self.send("Goodbye.").await?;
                    return Ok(SessionState::Closed);
                }
                "/create" => {
                    // suspend the pusher so dialog prompts are not
                    // interleaved with unsolicited hub refreshes
                    if let Some(p) = pusher.take() {
                        p.stop().await;
                    }
                    self.create_room_dialog(user).await?;
                    *pusher = Some(Pusher::spawn_hub(
                        self.cmd_tx.clone(),
                        self.out_tx.clone(),
                        self.push_interval,
                    ));
                }
                cmd if cmd.starts_with("/join") => {
                    let Some(number) = cmd
                        .strip_prefix("/join")
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                    else {
                        self.send("Missing room number. Usage: /join <room number>")
                            .await?;
                        continue;
                    };
                    let Ok(number) = number.parse::<usize>() else {
                        self.send("Invalid room number. Please enter a valid number after /join.")
                            .await?;
                        continue;
                    };
                    match self.join_room(user, number).await? {
                        Some(summary) => {
                            self.send(format!("Joined room: {}", summary.name)).await?;
                            return Ok(SessionState::InRoom(summary.id));
                        }
                        None => continue,
                    }
                }
                _ => {
                    self.send("Invalid command. Use: /join <room number> or /create to create a room")
                        .await?;
                }
            }
        }
    }

    async fn join_room(
        &mut self,
        user: &AuthedUser,
        number: usize,
    ) -> Result<Option<RoomSummary>, AppError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::JoinRoom {
                user_id: user.user_id,
                number,
                reply,
            })
            .await
            .map_err(|_| AppError::ChannelSend)?;
        match rx.await.map_err(|_| AppError::ChannelSend)? {
            Ok(summary) => Ok(Some(summary)),
            Err(e) if e.is_recoverable() => {
                self.send(e.to_string()).await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Guided room creation: name, AI flag, member cap. `q` cancels at
    /// any step.
    async fn create_room_dialog(&mut self, user: &AuthedUser) -> Result<(), AppError> {
        self.send(format!(
            "{}=== Create a New Room ===\nPress 'q' at any time to cancel.",
            view::CLEAR_SCREEN
        ))
        .await?;

        let name = match self
            .prompt("Enter the room name:", "Room name cannot be empty.")
            .await?
        {
            PromptInput::Value(v) => v,
            PromptInput::Cancelled => {
                self.send("Room creation cancelled.").await?;
                return Ok(());
            }
            PromptInput::Closed => return Ok(()),
        };

        let is_ai = loop {
            match self
                .prompt("Is this an AI room? (y/n):", "Please enter 'y' or 'n'.")
                .await?
            {
                PromptInput::Value(v) if v.eq_ignore_ascii_case("y") => break true,
                PromptInput::Value(v) if v.eq_ignore_ascii_case("n") => break false,
                PromptInput::Value(_) => self.send("Please enter 'y' or 'n'.").await?,
                PromptInput::Cancelled => {
                    self.send("Room creation cancelled.").await?;
                    return Ok(());
                }
                PromptInput::Closed => return Ok(()),
            }
        };

        let max_members = loop {
            match self
                .prompt(
                    "Max number of members (-1 for unlimited):",
                    "Please enter a valid number.",
                )
                .await?
            {
                PromptInput::Value(v) => match v.parse::<i32>() {
                    Ok(n) if n == -1 || n > 0 => break n,
                    Ok(_) => self.send("Please enter -1 or a positive number.").await?,
                    Err(_) => self.send("Please enter a valid number.").await?,
                },
                PromptInput::Cancelled => {
                    self.send("Room creation cancelled.").await?;
                    return Ok(());
                }
                PromptInput::Closed => return Ok(()),
            }
        };

        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::CreateRoom {
                user_id: user.user_id,
                name,
                max_members,
                is_ai,
                reply,
            })
            .await
            .map_err(|_| AppError::ChannelSend)?;
        match rx.await.map_err(|_| AppError::ChannelSend)? {
            Ok(summary) => {
                self.send(format!("Room '{}' created successfully!", summary.name))
                    .await?
            }
            Err(e) if e.is_recoverable() => self.send(e.to_string()).await?,
            Err(e) => return Err(e),
        }
        Ok(())
    }

    // ----- IN_ROOM -----

    async fn room(&mut self, room_id: RoomId) -> Result<SessionState, AppError> {
        let user = self.authed()?;
        let pusher = Pusher::spawn_room(
            self.cmd_tx.clone(),
            self.out_tx.clone(),
            self.push_interval,
            room_id,
        );

        let result = self.room_loop(&user, room_id).await;

        // a stale pusher rendering a room the session has left would be a
        // correctness bug, not just wasted work
        pusher.stop().await;
        result
    }

    async fn room_loop(
        &mut self,
        user: &AuthedUser,
        room_id: RoomId,
    ) -> Result<SessionState, AppError> {
        loop {
            let Some(input) = self.next_input().await? else {
                return Ok(SessionState::Closed);
            };
            let body = input.body.trim().to_string();
            match body.as_str() {
                "" => continue,
                "/help" => self.send(view::HELP).await?,
                "/quit" | "/exit" => {
                    let (reply, rx) = oneshot::channel();
                    self.cmd_tx
                        .send(Command::LeaveRoom {
                            user_id: user.user_id,
                            room_id,
                            reply,
                        })
                        .await
                        .map_err(|_| AppError::ChannelSend)?;
                    rx.await.map_err(|_| AppError::ChannelSend)?;
                    self.send("You have left the room.").await?;
                    return Ok(SessionState::InHub);
                }
                "/disconnect" => {
                    self.send("Goodbye.").await?;
                    return Ok(SessionState::Closed);
                }
                text => {
                    let (reply, rx) = oneshot::channel();
                    self.cmd_tx
                        .send(Command::PostMessage {
                            user_id: user.user_id,
                            room_id,
                            content: text.to_string(),
                            reply,
                        })
                        .await
                        .map_err(|_| AppError::ChannelSend)?;
                    match rx.await.map_err(|_| AppError::ChannelSend)? {
                        Ok(()) => {}
                        Err(e) if e.is_recoverable() => self.send(e.to_string()).await?,
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::EchoBackend;
    use crate::store::credentials::CredentialStore;
    use crate::store::tokens::TokenStore;
    use crate::store::MemoryStore;
    use crate::server::Coordinator;
    use std::sync::Arc;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, DuplexStream};

    fn spawn_coordinator() -> mpsc::Sender<Command> {
        let (tx, rx) = mpsc::channel(64);
        let credentials = CredentialStore::new(Arc::new(MemoryStore::new()));
        let tokens = TokenStore::new(Arc::new(MemoryStore::new()), Duration::from_secs(3600));
        let mut coordinator = Coordinator::new(
            rx,
            tx.clone(),
            credentials,
            tokens,
            Arc::new(EchoBackend),
            Duration::from_secs(5),
        );
        coordinator.bootstrap_room("Lobby", 5, false);
        tokio::spawn(coordinator.run());
        tx
    }

    struct TestClient {
        reader: tokio::io::BufReader<tokio::io::ReadHalf<DuplexStream>>,
        writer: tokio::io::WriteHalf<DuplexStream>,
    }

    impl TestClient {
        fn connect(
            cmd_tx: mpsc::Sender<Command>,
            shutdown: watch::Receiver<bool>,
        ) -> (Self, JoinHandle<Result<(), AppError>>) {
            let (client, server) = tokio::io::duplex(16 * 1024);
            let handle = tokio::spawn(handle_connection(
                server,
                "test-peer".to_string(),
                cmd_tx,
                Duration::from_millis(20),
                shutdown,
            ));
            let (read_half, writer) = tokio::io::split(client);
            (
                Self {
                    reader: tokio::io::BufReader::new(read_half),
                    writer,
                },
                handle,
            )
        }

        async fn send_line(&mut self, line: &str) {
            self.writer
                .write_all(format!("{line}\n").as_bytes())
                .await
                .unwrap();
        }

        /// Read server lines until one contains `needle`, with a bounded
        /// number of attempts so a broken flow fails fast.
        async fn expect_line(&mut self, needle: &str) -> String {
            for _ in 0..200 {
                let mut line = String::new();
                let n = tokio::time::timeout(
                    Duration::from_secs(5),
                    self.reader.read_line(&mut line),
                )
                .await
                .expect("timed out waiting for server output")
                .unwrap();
                assert!(n > 0, "connection closed while waiting for '{needle}'");
                if line.contains(needle) {
                    return line.trim_end().to_string();
                }
            }
            panic!("never saw '{needle}' in server output");
        }
    }

    #[tokio::test]
    async fn test_register_flow_issues_token() {
        let cmd_tx = spawn_coordinator();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (mut client, _handle) = TestClient::connect(cmd_tx, shutdown_rx);

        client.send_line("1").await;
        client.send_line("alice").await;
        client.send_line("pw123").await;

        let line = client.expect_line("Registration successful").await;
        let env = Envelope::decode(&line);
        assert!(env.token.is_some(), "welcome line must carry the token");
        assert!(env.body.contains("Welcome alice"));

        // hub view arrives without any further input
        client.expect_line("Rooms Available").await;
    }

    #[tokio::test]
    async fn test_invalid_menu_choice_reprompts() {
        let cmd_tx = spawn_coordinator();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (mut client, handle) = TestClient::connect(cmd_tx, shutdown_rx);

        client.send_line("7").await;
        client.expect_line("Invalid choice").await;

        client.send_line("q").await;
        client.expect_line("Goodbye").await;
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_menu_quit_closes_only_that_session() {
        let cmd_tx = spawn_coordinator();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let (mut quitter, quitter_handle) =
            TestClient::connect(cmd_tx.clone(), shutdown_rx.clone());
        let (mut stayer, _stayer_handle) = TestClient::connect(cmd_tx, shutdown_rx);

        quitter.send_line("q").await;
        quitter.expect_line("Goodbye").await;
        quitter_handle.await.unwrap().unwrap();

        // the other connection is untouched and can still authenticate
        stayer.send_line("1").await;
        stayer.send_line("bob").await;
        stayer.send_line("pw123").await;
        stayer.expect_line("Registration successful").await;
    }

    #[tokio::test]
    async fn test_token_reconnect_after_drop() {
        let cmd_tx = spawn_coordinator();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        // first connection registers, then drops without logout
        let (mut client, handle) = TestClient::connect(cmd_tx.clone(), shutdown_rx.clone());
        client.send_line("1").await;
        client.send_line("alice").await;
        client.send_line("pw123").await;
        let line = client.expect_line("Registration successful").await;
        let token = Envelope::decode(&line).token.unwrap();

        drop(client);
        handle.await.unwrap().unwrap();

        // second connection presents the token with the login choice
        let (mut client, _handle) = TestClient::connect(cmd_tx, shutdown_rx);
        client
            .send_line(&Envelope::with_token(&token, "2").encode())
            .await;
        let line = client.expect_line("Login successful with token").await;
        let env = Envelope::decode(&line);
        assert!(env.body.contains("Welcome back alice"));
        // refreshed token differs from the redeemed one
        assert_ne!(env.token.unwrap(), token);
    }

    #[tokio::test]
    async fn test_join_and_post_roundtrip() {
        let cmd_tx = spawn_coordinator();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (mut client, _handle) = TestClient::connect(cmd_tx, shutdown_rx);

        client.send_line("1").await;
        client.send_line("alice").await;
        client.send_line("pw123").await;
        client.expect_line("Registration successful").await;

        client.send_line("/join 1").await;
        client.expect_line("Joined room: Lobby").await;

        client.send_line("hello everyone").await;
        // the periodic room push renders the posted message
        client.expect_line("alice: hello everyone").await;

        client.send_line("/quit").await;
        client.expect_line("You have left the room").await;
    }

    #[tokio::test]
    async fn test_expired_token_falls_back_to_menu() {
        let cmd_tx = spawn_coordinator();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (mut client, _handle) = TestClient::connect(cmd_tx, shutdown_rx);

        client
            .send_line(&Envelope::with_token("bogus-token", "2").encode())
            .await;
        client.expect_line("Invalid token").await;
        // the interactive login prompt follows, connection stays up
        client.expect_line("Enter your username").await;
    }
}
