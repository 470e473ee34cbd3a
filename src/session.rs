use crate::document::{DocumentId, UserId};
use crate::protocol::{AuthenticatedUser, ServerMessage};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A connected, authenticated client. Destroyed on disconnect; the
/// writer-task side owns the matching `mpsc::Receiver<ServerMessage>`.
pub struct Session {
    pub id: SessionId,
    pub user: AuthenticatedUser,
    joined: Mutex<HashSet<DocumentId>>,
    outbound: mpsc::Sender<ServerMessage>,
    last_active_millis: AtomicI64,
}

impl Session {
    pub fn new(user: AuthenticatedUser, outbound: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            id: SessionId::new(),
            user,
            joined: Mutex::new(HashSet::new()),
            outbound,
            last_active_millis: AtomicI64::new(chrono::Utc::now().timestamp_millis()),
        }
    }

    pub fn user_id(&self) -> UserId {
        UserId::from(self.user.id.clone())
    }

    pub fn touch(&self) {
        self.last_active_millis.store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_active_millis(&self) -> i64 {
        self.last_active_millis.load(Ordering::Relaxed)
    }

    pub fn mark_joined(&self, document_id: DocumentId) {
        self.joined.lock().insert(document_id);
    }

    pub fn mark_left(&self, document_id: &DocumentId) {
        self.joined.lock().remove(document_id);
    }

    pub fn joined_documents(&self) -> Vec<DocumentId> {
        self.joined.lock().iter().cloned().collect()
    }

    pub fn is_joined(&self, document_id: &DocumentId) -> bool {
        self.joined.lock().contains(document_id)
    }

    /// Never blocks. A full outbound queue means the peer is slow; the
    /// caller (the room broadcaster) is responsible for disconnecting the
    /// session on `Err`, not for waiting.
    pub fn try_send(&self, message: ServerMessage) -> Result<(), mpsc::error::TrySendError<ServerMessage>> {
        self.outbound.try_send(message)
    }
}

pub type SharedSession = Arc<Session>;

#[cfg(test)]
mod tests {
    use super::*;

    fn test_user() -> AuthenticatedUser {
        AuthenticatedUser { id: "u1".to_string(), username: "alice".to_string(), email: "a@example.com".to_string() }
    }

    #[test]
    fn join_and_leave_track_membership() {
        let (tx, _rx) = mpsc::channel(8);
        let session = Session::new(test_user(), tx);
        let doc = DocumentId::from("doc1");

        assert!(!session.is_joined(&doc));
        session.mark_joined(doc.clone());
        assert!(session.is_joined(&doc));
        session.mark_left(&doc);
        assert!(!session.is_joined(&doc));
    }

    #[tokio::test]
    async fn try_send_delivers_without_blocking() {
        let (tx, mut rx) = mpsc::channel(8);
        let session = Session::new(test_user(), tx);
        session.try_send(ServerMessage::Error { message: "hi".to_string() }).unwrap();
        let received = rx.recv().await.unwrap();
        assert!(matches!(received, ServerMessage::Error { .. }));
    }

    #[test]
    fn full_outbound_queue_reports_slow_peer() {
        let (tx, _rx) = mpsc::channel(1);
        let session = Session::new(test_user(), tx);
        session.try_send(ServerMessage::Error { message: "first".to_string() }).unwrap();
        let result = session.try_send(ServerMessage::Error { message: "second".to_string() });
        assert!(result.is_err());
    }
}
