//! Process-local session and room state for real-time fan-out.
//!
//! `SessionRegistry` tracks which connected session belongs to which user and
//! which conversation rooms each session has joined; `PresenceHub` delivers
//! events to those sessions. Both are in-memory only: in a multi-instance
//! deployment rooms would need a shared pub/sub backplane.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use shared::domain::{ConversationId, UserId};
use shared::protocol::ServerEvent;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

struct SessionEntry {
    user_id: UserId,
    tx: UnboundedSender<ServerEvent>,
    rooms: HashSet<ConversationId>,
}

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<SessionId, SessionEntry>,
    rooms: HashMap<ConversationId, HashSet<SessionId>>,
    users: HashMap<UserId, HashSet<SessionId>>,
}

/// Room membership bookkeeping. All operations are idempotent; destroying a
/// session releases its room memberships without explicit leave calls.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection and hands back the receiving end of its event
    /// queue. The queue is unbounded so fan-out never blocks on a slow
    /// consumer; the socket writer drains it at its own pace.
    pub fn connect(&self, user_id: UserId) -> (SessionId, UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session_id = SessionId(Uuid::new_v4());
        let mut state = self.state.write().expect("registry lock");
        state.sessions.insert(
            session_id,
            SessionEntry {
                user_id,
                tx,
                rooms: HashSet::new(),
            },
        );
        state.users.entry(user_id).or_default().insert(session_id);
        (session_id, rx)
    }

    pub fn disconnect(&self, session_id: SessionId) {
        let mut state = self.state.write().expect("registry lock");
        let Some(entry) = state.sessions.remove(&session_id) else {
            return;
        };
        for room in &entry.rooms {
            if let Some(members) = state.rooms.get_mut(room) {
                members.remove(&session_id);
                if members.is_empty() {
                    state.rooms.remove(room);
                }
            }
        }
        if let Some(sessions) = state.users.get_mut(&entry.user_id) {
            sessions.remove(&session_id);
            if sessions.is_empty() {
                state.users.remove(&entry.user_id);
            }
        }
    }

    pub fn join(&self, session_id: SessionId, conversation_id: ConversationId) {
        let mut state = self.state.write().expect("registry lock");
        let Some(entry) = state.sessions.get_mut(&session_id) else {
            return;
        };
        entry.rooms.insert(conversation_id);
        state.rooms.entry(conversation_id).or_default().insert(session_id);
    }

    pub fn leave(&self, session_id: SessionId, conversation_id: ConversationId) {
        let mut state = self.state.write().expect("registry lock");
        if let Some(entry) = state.sessions.get_mut(&session_id) {
            entry.rooms.remove(&conversation_id);
        }
        if let Some(members) = state.rooms.get_mut(&conversation_id) {
            members.remove(&session_id);
            if members.is_empty() {
                state.rooms.remove(&conversation_id);
            }
        }
    }

    pub fn is_member(&self, session_id: SessionId, conversation_id: ConversationId) -> bool {
        let state = self.state.read().expect("registry lock");
        state
            .rooms
            .get(&conversation_id)
            .is_some_and(|members| members.contains(&session_id))
    }

    pub fn room_sessions(&self, conversation_id: ConversationId) -> Vec<SessionId> {
        let state = self.state.read().expect("registry lock");
        state
            .rooms
            .get(&conversation_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn session_user(&self, session_id: SessionId) -> Option<UserId> {
        let state = self.state.read().expect("registry lock");
        state.sessions.get(&session_id).map(|entry| entry.user_id)
    }
}

/// Fire-and-forget delivery over the registry. A failed send means the
/// session's receiver is gone; the session is evicted instead of retried and
/// the failure never reaches the caller.
#[derive(Clone, Default)]
pub struct PresenceHub {
    registry: SessionRegistry,
}

impl PresenceHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn broadcast(
        &self,
        conversation_id: ConversationId,
        event: &ServerEvent,
        exclude: Option<SessionId>,
    ) {
        let dead = {
            let state = self.registry.state.read().expect("registry lock");
            let Some(members) = state.rooms.get(&conversation_id) else {
                return;
            };
            let mut dead = Vec::new();
            for session_id in members {
                if Some(*session_id) == exclude {
                    continue;
                }
                let Some(entry) = state.sessions.get(session_id) else {
                    continue;
                };
                if entry.tx.send(event.clone()).is_err() {
                    dead.push(*session_id);
                }
            }
            dead
        };
        self.evict(dead);
    }

    /// Targeted delivery to every session of one user, wherever they are
    /// connected. Used for events only the acting user's own clients apply
    /// (scope-"me" deletion, undo, read reset).
    pub fn send_to_user(&self, user_id: UserId, event: &ServerEvent) {
        let dead = {
            let state = self.registry.state.read().expect("registry lock");
            let Some(sessions) = state.users.get(&user_id) else {
                return;
            };
            let mut dead = Vec::new();
            for session_id in sessions {
                let Some(entry) = state.sessions.get(session_id) else {
                    continue;
                };
                if entry.tx.send(event.clone()).is_err() {
                    dead.push(*session_id);
                }
            }
            dead
        };
        self.evict(dead);
    }

    /// Acks and per-connection errors travel the same queue as room events so
    /// a client observes them in issue order.
    pub fn send_to_session(&self, session_id: SessionId, event: ServerEvent) {
        let failed = {
            let state = self.registry.state.read().expect("registry lock");
            match state.sessions.get(&session_id) {
                Some(entry) => entry.tx.send(event).is_err(),
                None => false,
            }
        };
        if failed {
            self.evict(vec![session_id]);
        }
    }

    fn evict(&self, dead: Vec<SessionId>) {
        for session_id in dead {
            debug!(%session_id, "evicting session with closed event queue");
            self.registry.disconnect(session_id);
        }
    }
}
