use crate::diff::PatchBundle;
use crate::document::{DocumentId, UserId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// One patch bundle accumulated while its author was disconnected.
#[derive(Debug, Clone)]
pub struct OfflineEdit {
    pub patch_bundle: PatchBundle,
    pub client_timestamp: DateTime<Utc>,
    pub user_id: UserId,
    pub username: String,
}

/// Server-side per-(user, document) FIFO of offline edits, drained and
/// replayed in client-timestamp order on reconnect.
#[derive(Default)]
pub struct OfflineBuffer {
    queues: DashMap<(UserId, DocumentId), Mutex<VecDeque<OfflineEdit>>>,
}

impl OfflineBuffer {
    pub fn new() -> Self {
        Self { queues: DashMap::new() }
    }

    pub fn push(&self, user_id: UserId, document_id: DocumentId, edit: OfflineEdit) {
        self.queues
            .entry((user_id, document_id))
            .or_insert_with(|| Mutex::new(VecDeque::new()))
            .lock()
            .push_back(edit);
    }

    /// Returns bundles sorted ascending by `client_timestamp`, clearing
    /// the queue. The offline client produced them sequentially against
    /// successively updated local shadows, so replaying in that order
    /// maximizes clean fuzzy application.
    pub fn drain(&self, user_id: &UserId, document_id: &DocumentId) -> Vec<OfflineEdit> {
        let key = (user_id.clone(), document_id.clone());
        match self.queues.get(&key) {
            Some(queue) => {
                let mut queue = queue.lock();
                let mut edits: Vec<OfflineEdit> = queue.drain(..).collect();
                edits.sort_by_key(|e| e.client_timestamp);
                edits
            }
            None => Vec::new(),
        }
    }

    pub fn pending_count(&self, user_id: &UserId, document_id: &DocumentId) -> usize {
        let key = (user_id.clone(), document_id.clone());
        self.queues.get(&key).map(|q| q.lock().len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::make_patch;

    fn edit_at(seconds: i64, user: &str) -> OfflineEdit {
        OfflineEdit {
            patch_bundle: make_patch("a", "ab"),
            client_timestamp: DateTime::from_timestamp(seconds, 0).unwrap(),
            user_id: UserId::from(user),
            username: user.to_string(),
        }
    }

    #[test]
    fn drain_returns_edits_sorted_by_client_timestamp() {
        let buffer = OfflineBuffer::new();
        let user = UserId::from("alice");
        let doc = DocumentId::from("doc1");

        buffer.push(user.clone(), doc.clone(), edit_at(300, "alice"));
        buffer.push(user.clone(), doc.clone(), edit_at(100, "alice"));
        buffer.push(user.clone(), doc.clone(), edit_at(200, "alice"));

        let drained = buffer.drain(&user, &doc);
        let timestamps: Vec<i64> = drained.iter().map(|e| e.client_timestamp.timestamp()).collect();
        assert_eq!(timestamps, vec![100, 200, 300]);
    }

    #[test]
    fn drain_clears_the_queue() {
        let buffer = OfflineBuffer::new();
        let user = UserId::from("alice");
        let doc = DocumentId::from("doc1");
        buffer.push(user.clone(), doc.clone(), edit_at(100, "alice"));

        assert_eq!(buffer.drain(&user, &doc).len(), 1);
        assert_eq!(buffer.drain(&user, &doc).len(), 0);
    }

    #[test]
    fn pending_count_reflects_unpushed_queue() {
        let buffer = OfflineBuffer::new();
        let user = UserId::from("alice");
        let doc = DocumentId::from("doc1");
        assert_eq!(buffer.pending_count(&user, &doc), 0);
        buffer.push(user.clone(), doc.clone(), edit_at(100, "alice"));
        assert_eq!(buffer.pending_count(&user, &doc), 1);
    }
}
