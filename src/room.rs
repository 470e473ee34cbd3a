use crate::document::{DocumentId, Presence, UserId};
use crate::protocol::ServerMessage;
use crate::session::{SessionId, SharedSession};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// The set of sessions currently joined to one document, plus their
/// presence. Created on first join, destroyed when the last session
/// leaves.
pub struct Room {
    pub document_id: DocumentId,
    sessions: Mutex<HashMap<SessionId, SharedSession>>,
    pub(crate) presence: Mutex<HashMap<UserId, Presence>>,
}

impl Room {
    fn new(document_id: DocumentId) -> Self {
        Self {
            document_id,
            sessions: Mutex::new(HashMap::new()),
            presence: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, session: SharedSession) {
        self.sessions.lock().insert(session.id, session);
    }

    pub fn remove(&self, session_id: SessionId) {
        self.sessions.lock().remove(&session_id);
        // presence entries are removed explicitly via remove_editor, which
        // needs the user id the caller already has on hand.
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn active_editors(&self) -> HashMap<String, Presence> {
        self.presence.lock().iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    /// Best-effort fan-out: a slow sink never blocks the caller. Sessions
    /// whose outbound queue is full are reported back so the caller can
    /// disconnect them (`SyncError::SlowPeer`); a bad peer never takes
    /// down the broadcast to the rest of the room.
    pub fn broadcast(&self, message: &ServerMessage, exclude: Option<SessionId>) -> Vec<SessionId> {
        let sessions = self.sessions.lock();
        let mut slow = Vec::new();
        for (id, session) in sessions.iter() {
            if Some(*id) == exclude {
                continue;
            }
            if session.try_send(message.clone()).is_err() {
                slow.push(*id);
            }
        }
        slow
    }
}

/// Process-wide map from document id to `Room`. Lifecycle: create on
/// first join, destroy on last leave.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<DocumentId, Arc<Room>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self { rooms: DashMap::new() }
    }

    pub fn join(&self, document_id: &DocumentId, session: SharedSession) -> Arc<Room> {
        let room = self
            .rooms
            .entry(document_id.clone())
            .or_insert_with(|| Arc::new(Room::new(document_id.clone())))
            .clone();
        room.insert(session);
        room
    }

    /// Removes the session and the room itself if it is now empty.
    pub fn leave(&self, document_id: &DocumentId, session_id: SessionId) {
        if let Some(room) = self.rooms.get(document_id) {
            room.remove(session_id);
            let empty = room.is_empty();
            drop(room);
            if empty {
                self.rooms.remove(document_id);
            }
        }
    }

    pub fn get(&self, document_id: &DocumentId) -> Option<Arc<Room>> {
        self.rooms.get(document_id).map(|r| r.clone())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
