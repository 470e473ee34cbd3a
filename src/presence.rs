use crate::document::{Presence, Selection, UserId};
use crate::room::Room;
use chrono::Utc;

/// Presence-tracking operations on a room's roster. Split out from
/// `room.rs` because the roster lock it uses belongs to `Room`, but the
/// cursor/join/leave semantics are a distinct responsibility from
/// membership bookkeeping.
impl Room {
    /// Upsert a joining user's presence at cursor 0, selection {0,0}.
    /// Returns the presence snapshot taken immediately after insertion so
    /// callers can include it in the `editor-joined` broadcast without a
    /// second lock acquisition.
    pub fn upsert_joined_presence(&self, user_id: UserId, username: String) -> Presence {
        let presence = Presence::joined(user_id.clone(), username);
        self.presence.lock().insert(user_id, presence.clone());
        presence
    }

    pub fn update_cursor(&self, user_id: &UserId, username: &str, cursor: usize, selection: Selection) {
        let mut roster = self.presence.lock();
        let entry = roster.entry(user_id.clone()).or_insert_with(|| Presence::joined(user_id.clone(), username.to_string()));
        entry.cursor_position = cursor;
        entry.selection = selection;
        entry.last_active = Utc::now();
    }

    pub fn remove_editor(&self, user_id: &UserId) -> bool {
        self.presence.lock().remove(user_id).is_some()
    }

    pub fn has_presence(&self, user_id: &UserId) -> bool {
        self.presence.lock().contains_key(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentId;
    use crate::room::RoomRegistry;
    use crate::session::Session;
    use crate::protocol::AuthenticatedUser;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn joined_room() -> Arc<Room> {
        let registry = RoomRegistry::new();
        let doc = DocumentId::from("doc1");
        let (tx, _rx) = mpsc::channel(8);
        let user = AuthenticatedUser { id: "alice".to_string(), username: "alice".to_string(), email: "a@example.com".to_string() };
        let session = Arc::new(Session::new(user, tx));
        registry.join(&doc, session)
    }

    #[test]
    fn update_cursor_upserts_presence() {
        let room = joined_room();
        let user_id = UserId::from("alice");
        room.update_cursor(&user_id, "alice", 5, Selection { start: 5, end: 7 });

        let roster = room.active_editors();
        let presence = roster.get("alice").unwrap();
        assert_eq!(presence.cursor_position, 5);
        assert_eq!(presence.selection, Selection { start: 5, end: 7 });
    }

    #[test]
    fn remove_editor_clears_presence() {
        let room = joined_room();
        let user_id = UserId::from("alice");
        room.upsert_joined_presence(user_id.clone(), "alice".to_string());
        assert!(room.has_presence(&user_id));

        assert!(room.remove_editor(&user_id));
        assert!(!room.has_presence(&user_id));
    }
}
