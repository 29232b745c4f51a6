//! Connection manager: the live session table and broadcast helpers.
//!
//! Every accepted main-port session registers its outbound queue here and
//! is removed on disconnect. Broadcasts iterate the table and push frames
//! into each matching session's queue; a dead queue just drops the frame,
//! the reader loop handles the actual teardown.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use kaza_proto::{Frame, ObjectEntry};
use parking_lot::RwLock;
use tokio::sync::mpsc;

/// One registered session: identity plus its outbound frame queue.
#[derive(Debug)]
struct SessionHandle {
    user: String,
    outbound: mpsc::UnboundedSender<Frame>,
}

/// Live session table.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    sessions: RwLock<HashMap<u64, SessionHandle>>,
    next_id: AtomicU64,
}

impl ConnectionManager {
    /// New empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a process-unique session id.
    pub fn next_session_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Track an accepted session and its outbound queue. The username is
    /// filled in by [`ConnectionManager::set_user`] once version
    /// negotiation stashes the peer identity.
    pub fn register(&self, session: u64, outbound: mpsc::UnboundedSender<Frame>) {
        self.sessions.write().insert(
            session,
            SessionHandle {
                user: String::new(),
                outbound,
            },
        );
    }

    /// Record the authenticated username of a session.
    pub fn set_user(&self, session: u64, user: &str) {
        if let Some(handle) = self.sessions.write().get_mut(&session) {
            handle.user = user.to_string();
        }
    }

    /// Remove a closed session from the table.
    pub fn unregister(&self, session: u64) {
        self.sessions.write().remove(&session);
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Broadcast a NOTIFY command.
    ///
    /// `text` may start with one or more `/user` tokens selecting target
    /// usernames (matched lowercase); the remainder is the message. With
    /// no targets, every session is notified.
    pub fn notify(&self, text: &str) {
        let (targets, message) = parse_targets(text);
        tracing::info!("notification: {message}");
        self.send_filtered(&targets, || Frame::Command(format!("NOTIFY:{message}")));
    }

    /// Ask selected clients to report their GPS position. `args` takes the
    /// same `/user` filter syntax as [`ConnectionManager::notify`].
    pub fn ask_position(&self, args: &str) {
        let (targets, _) = parse_targets(args);
        self.send_filtered(&targets, || Frame::Command("POSITION?".to_string()));
    }

    /// Push a fresh registry snapshot to every session.
    pub fn broadcast_object_list(&self, snapshot: Vec<ObjectEntry>) {
        self.send_filtered(&[], || Frame::ObjectList(snapshot.clone()));
    }

    fn send_filtered(&self, targets: &[String], frame: impl Fn() -> Frame) {
        let sessions = self.sessions.read();
        for handle in sessions.values() {
            if targets.is_empty() || targets.contains(&handle.user.to_lowercase()) {
                let _ = handle.outbound.send(frame());
            }
        }
    }
}

/// Split leading `/user` tokens from a broadcast argument.
///
/// Returns the lowercase target list and the remaining message text. The
/// message starts at the first token that does not begin with `/`.
pub(crate) fn parse_targets(text: &str) -> (Vec<String>, String) {
    if !text.starts_with('/') {
        return (Vec::new(), text.to_string());
    }

    let mut targets = Vec::new();
    let mut rest = text;
    loop {
        let trimmed = rest.trim_start();
        let Some(token) = trimmed.split_whitespace().next() else {
            return (targets, String::new());
        };
        if let Some(user) = token.strip_prefix('/') {
            if !user.is_empty() {
                targets.push(user.to_lowercase());
            }
            rest = &trimmed[token.len()..];
        } else {
            return (targets, trimmed.to_string());
        }
    }
}
