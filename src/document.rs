use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Opaque, stable document identifier (assigned by the document directory
/// service; this crate never generates one on its own behalf except in
/// demos/tests).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(pub String);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identity extracted from a validated bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// An immutable historical snapshot of document content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub content: String,
    pub author_id: UserId,
    pub change_description: String,
    pub timestamp: DateTime<Utc>,
}

impl Version {
    pub fn new(content: String, author_id: UserId, change_description: impl Into<String>) -> Self {
        Self {
            content,
            author_id,
            change_description: change_description.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A character-offset selection range, advisory only: not rebased by the
/// server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub start: usize,
    pub end: usize,
}

/// Ephemeral per-user cursor/selection within a room. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Presence {
    pub user_id: UserId,
    pub username: String,
    pub cursor_position: usize,
    pub selection: Selection,
    pub last_active: DateTime<Utc>,
}

impl Presence {
    pub fn joined(user_id: UserId, username: String) -> Self {
        Self {
            user_id,
            username,
            cursor_position: 0,
            selection: Selection { start: 0, end: 0 },
            last_active: Utc::now(),
        }
    }
}

/// The authoritative document record. `active_editors` is transient:
/// callers reading it get a snapshot, it is never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub title: String,
    pub content: String,
    pub owner_id: UserId,
    pub collaborator_ids: HashSet<UserId>,
    pub versions: Vec<Version>,
    pub current_version: usize,
    pub last_modified: DateTime<Utc>,
    #[serde(skip)]
    pub active_editors: HashMap<UserId, Presence>,
}

impl Document {
    pub fn new(id: DocumentId, title: impl Into<String>, owner_id: UserId, content: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            title: title.into(),
            content,
            owner_id,
            collaborator_ids: HashSet::new(),
            versions: Vec::new(),
            current_version: 0,
            last_modified: now,
            active_editors: HashMap::new(),
        }
    }

    /// Owner or collaborator may mutate the document.
    pub fn can_edit(&self, user_id: &UserId) -> bool {
        *user_id == self.owner_id || self.collaborator_ids.contains(user_id)
    }

    /// Append a new immutable snapshot; `versions` is append-only and
    /// `current_version` always points at the latest entry.
    pub fn push_version(&mut self, version: Version) -> usize {
        self.versions.push(version);
        self.current_version = self.versions.len() - 1;
        self.current_version
    }

    pub fn latest_version(&self) -> Option<&Version> {
        self.versions.last()
    }
}
