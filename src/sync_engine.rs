use crate::diff::{self, PatchBundle};
use crate::document::{DocumentId, Selection, UserId};
use crate::error::{SyncError, SyncResult};
use crate::offline::{OfflineBuffer, OfflineEdit};
use crate::persistence::PersistenceStore;
use crate::protocol::ServerMessage;
use crate::room::RoomRegistry;
use crate::session::{SessionId, SharedSession};
use crate::shadow::ShadowStore;
use crate::versioning::{auto_snapshot, revert_to, should_snapshot};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// The central algorithm: one critical section per `document-change`,
/// serialized per document by the shadow store's mutex. Everything else
/// on this type (join/leave, presence, offline replay, revert) shares
/// that same per-document lock so no handler observes a half-applied
/// mutation from another.
pub struct SyncEngine {
    pub rooms: Arc<RoomRegistry>,
    pub shadow: Arc<ShadowStore>,
    pub persistence: Arc<dyn PersistenceStore>,
    pub offline: Arc<OfflineBuffer>,
    pub snapshot_interval_secs: i64,
}

impl SyncEngine {
    pub fn new(
        rooms: Arc<RoomRegistry>,
        shadow: Arc<ShadowStore>,
        persistence: Arc<dyn PersistenceStore>,
        offline: Arc<OfflineBuffer>,
        snapshot_interval_secs: i64,
    ) -> Self {
        Self { rooms, shadow, persistence, offline, snapshot_interval_secs }
    }

    fn send_error(&self, session: &SharedSession, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(session_id = %session.id, %message, "sending error to session");
        let _ = session.try_send(ServerMessage::Error { message });
    }

    /// Disconnects slow peers reported by a broadcast: removes them from
    /// every room and lets the caller drop the session's outbound sender.
    fn evict_slow_peers(&self, document_id: &DocumentId, slow: Vec<SessionId>) {
        for session_id in slow {
            tracing::warn!(document_id = %document_id, session_id = %session_id, "peer outbound queue full, disconnecting");
            self.rooms.leave(document_id, session_id);
        }
    }

    pub async fn join_document(&self, session: &SharedSession, document_id: DocumentId) -> SyncResult<()> {
        let document = self
            .persistence
            .get_document(&document_id)?
            .ok_or_else(|| SyncError::NotFound(document_id.to_string()))?;

        let user_id = session.user_id();
        let room = self.rooms.join(&document_id, Arc::clone(session));
        session.mark_joined(document_id.clone());
        room.upsert_joined_presence(user_id.clone(), session.user.username.clone());

        let active_editors = room.active_editors();
        session.try_send(ServerMessage::DocumentData { document, active_editors: active_editors.clone() }).ok();

        let slow = room.broadcast(
            &ServerMessage::EditorJoined { user_id: user_id.to_string(), username: session.user.username.clone(), active_editors },
            Some(session.id),
        );
        self.evict_slow_peers(&document_id, slow);

        let pending = self.offline.pending_count(&user_id, &document_id);
        if pending > 0 {
            session.try_send(ServerMessage::OfflineEditsAvailable { count: pending }).ok();
        }
        Ok(())
    }

    pub fn leave_document(&self, session: &SharedSession, document_id: DocumentId) {
        let user_id = session.user_id();
        if let Some(room) = self.rooms.get(&document_id) {
            room.remove_editor(&user_id);
            session.mark_left(&document_id);
            self.rooms.leave(&document_id, session.id);

            let active_editors = room.active_editors();
            let slow = room.broadcast(
                &ServerMessage::EditorLeft { user_id: user_id.to_string(), username: session.user.username.clone(), active_editors },
                None,
            );
            self.evict_slow_peers(&document_id, slow);

            if room.is_empty() {
                self.shadow.drop_shadow(&document_id);
            }
        } else {
            session.mark_left(&document_id);
        }
    }

    /// Called when a session's connection drops: leaves every room it had
    /// joined, same as an explicit `leave-document` per joined document.
    pub fn disconnect(&self, session: &SharedSession) {
        for document_id in session.joined_documents() {
            self.leave_document(session, document_id);
        }
    }

    pub async fn document_change(
        &self,
        session: &SharedSession,
        document_id: DocumentId,
        patches: PatchBundle,
        client_shadow_version: Option<u64>,
    ) -> SyncResult<()> {
        let document = match self.persistence.get_document(&document_id)? {
            Some(doc) => doc,
            None => {
                self.send_error(session, format!("document not found: {document_id}"));
                return Ok(());
            }
        };

        let user_id = session.user_id();
        if !document.can_edit(&user_id) {
            self.send_error(session, "you do not have permission to edit this document");
            return Ok(());
        }

        if let Some(client_version) = client_shadow_version {
            tracing::debug!(document_id = %document_id, client_version, "client-reported shadow version (observability only, not enforced)");
        }

        let owned_guard = self.shadow.lock(&document_id, self.persistence.as_ref()).await?;
        let mut slot = owned_guard.guard().await;

        let (new_text, results) = diff::apply(&patches, &slot.text);
        if !PatchBundle::fully_applied(&results) {
            let current = slot.text.clone();
            drop(slot);
            session
                .try_send(ServerMessage::SyncRequired { content: current, server_shadow_version: document.current_version as u64 })
                .ok();
            return Ok(());
        }

        slot.text = new_text.clone();
        if let Err(e) = self.persistence.save_document_head(&document_id, &new_text, Utc::now()) {
            // roll back the in-memory shadow; the broadcast never happens.
            slot.text = document.content.clone();
            drop(slot);
            self.send_error(session, format!("failed to persist document: {e}"));
            return Ok(());
        }

        if let Some(room) = self.rooms.get(&document_id) {
            let slow = room.broadcast(
                &ServerMessage::DocumentChange { patches, user_id: user_id.to_string(), username: session.user.username.clone() },
                Some(session.id),
            );
            self.evict_slow_peers(&document_id, slow);
        }

        self.maybe_snapshot(&document_id, &new_text, &user_id, &session.user.username, Utc::now())?;
        Ok(())
    }

    fn maybe_snapshot(&self, document_id: &DocumentId, new_text: &str, author_id: &UserId, author_username: &str, now: DateTime<Utc>) -> SyncResult<()> {
        let mut document = self
            .persistence
            .get_document(document_id)?
            .ok_or_else(|| SyncError::NotFound(document_id.to_string()))?;
        document.content = new_text.to_string();

        if should_snapshot(&document, now, self.snapshot_interval_secs) {
            let index = auto_snapshot(&mut document, author_id.clone());
            let version = document.versions[index].clone();
            self.persistence.append_version(document_id, &version)?;

            if let Some(room) = self.rooms.get(document_id) {
                room.broadcast(
                    &ServerMessage::VersionCreated {
                        version_index: index,
                        user_id: author_id.to_string(),
                        username: author_username.to_string(),
                        timestamp: version.timestamp,
                    },
                    None,
                );
            }
        }
        Ok(())
    }

    pub fn cursor_position(&self, session: &SharedSession, document_id: DocumentId, cursor_position: usize, selection: Selection) {
        let user_id = session.user_id();
        if let Some(room) = self.rooms.get(&document_id) {
            room.update_cursor(&user_id, &session.user.username, cursor_position, selection);
            let slow = room.broadcast(
                &ServerMessage::CursorPosition { user_id: user_id.to_string(), username: session.user.username.clone(), cursor_position, selection },
                Some(session.id),
            );
            self.evict_slow_peers(&document_id, slow);
        }
    }

    pub fn save_offline_edit(&self, session: &SharedSession, document_id: DocumentId, patches: PatchBundle, timestamp: DateTime<Utc>) {
        let user_id = session.user_id();
        self.offline.push(
            user_id.clone(),
            document_id,
            OfflineEdit { patch_bundle: patches, client_timestamp: timestamp, user_id, username: session.user.username.clone() },
        );
        session.try_send(ServerMessage::OfflineEditSaved).ok();
    }

    pub async fn sync_offline_edits(&self, session: &SharedSession, document_id: DocumentId) -> SyncResult<()> {
        let document = match self.persistence.get_document(&document_id)? {
            Some(doc) => doc,
            None => {
                self.send_error(session, format!("document not found: {document_id}"));
                return Ok(());
            }
        };
        let user_id = session.user_id();
        if !document.can_edit(&user_id) {
            self.send_error(session, "you do not have permission to sync this document");
            return Ok(());
        }

        let owned_guard = self.shadow.lock(&document_id, self.persistence.as_ref()).await?;
        let mut slot = owned_guard.guard().await;

        let bundles = self.offline.drain(&user_id, &document_id);
        let mut applied_count = 0;
        let mut current = slot.text.clone();
        for edit in &bundles {
            let (new_text, results) = diff::apply(&edit.patch_bundle, &current);
            if PatchBundle::fully_applied(&results) {
                current = new_text;
                applied_count += 1;
            }
        }

        if applied_count > 0 {
            slot.text = current.clone();
            self.persistence.save_document_head(&document_id, &current, Utc::now())?;

            let mut document = document;
            document.content = current.clone();
            let version = crate::document::Version::new(current.clone(), user_id.clone(), format!("Synced {applied_count} offline edits"));
            let index = document.push_version(version.clone());
            self.persistence.append_version(&document_id, &version)?;

            if let Some(room) = self.rooms.get(&document_id) {
                room.broadcast(
                    &ServerMessage::DocumentUpdated { content: current.clone(), user_id: user_id.to_string(), username: session.user.username.clone() },
                    None,
                );
                room.broadcast(
                    &ServerMessage::VersionCreated { version_index: index, user_id: user_id.to_string(), username: session.user.username.clone(), timestamp: version.timestamp },
                    None,
                );
            }
        }

        session.try_send(ServerMessage::OfflineEditsSynced { success: applied_count > 0, count: applied_count }).ok();
        Ok(())
    }

    pub async fn revert(&self, session: &SharedSession, document_id: DocumentId, version_index: usize) -> SyncResult<()> {
        let mut document = self
            .persistence
            .get_document(&document_id)?
            .ok_or_else(|| SyncError::NotFound(document_id.to_string()))?;

        let user_id = session.user_id();
        if !document.can_edit(&user_id) {
            return Err(SyncError::Forbidden(format!("{user_id} may not revert {document_id}")));
        }

        let owned_guard = self.shadow.lock(&document_id, self.persistence.as_ref()).await?;
        let mut slot = owned_guard.guard().await;

        let new_index = revert_to(&mut document, version_index, user_id.clone())?;
        slot.text = document.content.clone();
        self.persistence.save_document_head(&document_id, &document.content, document.last_modified)?;
        self.persistence.append_version(&document_id, &document.versions[new_index])?;

        if let Some(room) = self.rooms.get(&document_id) {
            room.broadcast(
                &ServerMessage::DocumentUpdated { content: document.content.clone(), user_id: user_id.to_string(), username: session.user.username.clone() },
                None,
            );
            room.broadcast(
                &ServerMessage::VersionCreated {
                    version_index: new_index,
                    user_id: user_id.to_string(),
                    username: session.user.username.clone(),
                    timestamp: document.versions[new_index].timestamp,
                },
                None,
            );
        }
        Ok(())
    }
}
