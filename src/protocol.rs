use crate::diff::PatchBundle;
use crate::document::{Document, Presence, Selection};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Everything a session may send once connected. The handshake
/// `Authenticate` variant is special: it is the only message accepted
/// before a session has a validated identity, and the only one that is
/// ever accepted twice (re-authenticating mid-connection is rejected by
/// the dispatcher, not by this type).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum ClientMessage {
    Authenticate {
        token: String,
    },
    JoinDocument {
        document_id: String,
    },
    LeaveDocument {
        document_id: String,
    },
    DocumentChange {
        document_id: String,
        patches: PatchBundle,
        client_shadow_version: Option<u64>,
    },
    CursorPosition {
        document_id: String,
        cursor_position: usize,
        selection: Selection,
    },
    SaveOfflineEdit {
        document_id: String,
        patches: PatchBundle,
        timestamp: DateTime<Utc>,
    },
    SyncOfflineEdits {
        document_id: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub id: String,
    pub username: String,
    pub email: String,
}

/// Everything the server may push to a session. Mirrors `ClientMessage`'s
/// tagging so both directions share one framing convention over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum ServerMessage {
    Authenticated {
        user: AuthenticatedUser,
    },
    DocumentData {
        document: Document,
        active_editors: HashMap<String, Presence>,
    },
    DocumentChange {
        patches: PatchBundle,
        user_id: String,
        username: String,
    },
    CursorPosition {
        user_id: String,
        username: String,
        cursor_position: usize,
        selection: Selection,
    },
    EditorJoined {
        user_id: String,
        username: String,
        active_editors: HashMap<String, Presence>,
    },
    EditorLeft {
        user_id: String,
        username: String,
        active_editors: HashMap<String, Presence>,
    },
    VersionCreated {
        version_index: usize,
        user_id: String,
        username: String,
        timestamp: DateTime<Utc>,
    },
    SyncRequired {
        content: String,
        server_shadow_version: u64,
    },
    DocumentUpdated {
        content: String,
        user_id: String,
        username: String,
    },
    OfflineEditsAvailable {
        count: usize,
    },
    OfflineEditSaved,
    OfflineEditsSynced {
        success: bool,
        count: usize,
    },
    Error {
        message: String,
    },
}

/// Frame a message as a newline-delimited JSON line: one `\n`-terminated
/// line per message, written with a single `AsyncWriteExt::write_all`.
pub fn encode(msg: &ServerMessage) -> Result<Vec<u8>, serde_json::Error> {
    let json = serde_json::to_string(msg)?;
    let mut bytes = json.into_bytes();
    bytes.push(b'\n');
    Ok(bytes)
}

pub fn decode_client_message(line: &str) -> Result<ClientMessage, serde_json::Error> {
    serde_json::from_str(line.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_round_trips_through_json() {
        let msg = ClientMessage::JoinDocument { document_id: "doc1".to_string() };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"event\":\"join-document\""));
        let decoded = decode_client_message(&json).unwrap();
        match decoded {
            ClientMessage::JoinDocument { document_id } => assert_eq!(document_id, "doc1"),
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn server_message_tag_matches_wire_shape() {
        let msg = ServerMessage::Error { message: "nope".to_string() };
        let encoded = encode(&msg).unwrap();
        let text = String::from_utf8(encoded).unwrap();
        assert!(text.ends_with('\n'));
        assert!(text.contains("\"event\":\"error\""));
        assert!(text.contains("\"payload\""));
    }
}
