use crate::document::{Document, DocumentId, UserId, Version};
use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

/// The read/write contract the sync engine needs from durable storage.
/// Document directory CRUD and ACL management live outside the core per
/// the system's scope, but a runnable server still needs one concrete
/// implementation to exercise the core end to end.
pub trait PersistenceStore: Send + Sync {
    fn get_document(&self, id: &DocumentId) -> SyncResult<Option<Document>>;
    fn create_document(&self, id: &DocumentId, title: &str, owner_id: &UserId, content: &str) -> SyncResult<()>;
    fn delete_document(&self, id: &DocumentId) -> SyncResult<()>;
    fn save_document_head(&self, id: &DocumentId, content: &str, last_modified: DateTime<Utc>) -> SyncResult<()>;
    fn append_version(&self, id: &DocumentId, version: &Version) -> SyncResult<usize>;
    fn get_versions(&self, id: &DocumentId) -> SyncResult<Vec<Version>>;
    fn list_documents_for_user(&self, user_id: &UserId) -> SyncResult<Vec<Document>>;
    fn add_collaborator(&self, id: &DocumentId, user_id: &UserId) -> SyncResult<()>;
    fn remove_collaborator(&self, id: &DocumentId, user_id: &UserId) -> SyncResult<()>;
}

/// SQLite-backed implementation. A single `Connection` behind a
/// `std::sync::Mutex`. `rusqlite::Connection` is `!Sync`, so engine code
/// that needs to call in from multiple tasks serializes here rather than
/// opening one connection per task.
pub struct SqlitePersistence {
    conn: Mutex<Connection>,
}

impl SqlitePersistence {
    pub fn new<P: AsRef<Path>>(db_path: P) -> SyncResult<Self> {
        let conn = Connection::open(db_path).map_err(|e| SyncError::Persistence(e.to_string()))?;
        let store = Self { conn: Mutex::new(conn) };
        store.create_tables()?;
        Ok(store)
    }

    pub fn new_in_memory() -> SyncResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| SyncError::Persistence(e.to_string()))?;
        let store = Self { conn: Mutex::new(conn) };
        store.create_tables()?;
        Ok(store)
    }

    fn create_tables(&self) -> SyncResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                current_version INTEGER NOT NULL DEFAULT 0,
                last_modified TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS collaborators (
                document_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                PRIMARY KEY (document_id, user_id)
            );
            CREATE TABLE IF NOT EXISTS versions (
                document_id TEXT NOT NULL,
                idx INTEGER NOT NULL,
                content TEXT NOT NULL,
                author_id TEXT NOT NULL,
                change_description TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                PRIMARY KEY (document_id, idx)
            );",
        )
        .map_err(|e| SyncError::Persistence(e.to_string()))?;
        Ok(())
    }

    fn load_versions(conn: &Connection, id: &DocumentId) -> SyncResult<Vec<Version>> {
        let mut stmt = conn
            .prepare("SELECT content, author_id, change_description, timestamp FROM versions WHERE document_id = ?1 ORDER BY idx ASC")
            .map_err(|e| SyncError::Persistence(e.to_string()))?;

        let rows = stmt
            .query_map(params![id.0], |row| {
                let content: String = row.get(0)?;
                let author_id: String = row.get(1)?;
                let change_description: String = row.get(2)?;
                let timestamp: String = row.get(3)?;
                Ok((content, author_id, change_description, timestamp))
            })
            .map_err(|e| SyncError::Persistence(e.to_string()))?;

        let mut versions = Vec::new();
        for row in rows {
            let (content, author_id, change_description, timestamp) =
                row.map_err(|e| SyncError::Persistence(e.to_string()))?;
            let timestamp = DateTime::parse_from_rfc3339(&timestamp)
                .map_err(|e| SyncError::Persistence(e.to_string()))?
                .with_timezone(&Utc);
            versions.push(Version {
                content,
                author_id: UserId::from(author_id),
                change_description,
                timestamp,
            });
        }
        Ok(versions)
    }

    fn load_collaborators(conn: &Connection, id: &DocumentId) -> SyncResult<std::collections::HashSet<UserId>> {
        let mut stmt = conn
            .prepare("SELECT user_id FROM collaborators WHERE document_id = ?1")
            .map_err(|e| SyncError::Persistence(e.to_string()))?;
        let rows = stmt
            .query_map(params![id.0], |row| row.get::<_, String>(0))
            .map_err(|e| SyncError::Persistence(e.to_string()))?;
        let mut out = std::collections::HashSet::new();
        for row in rows {
            out.insert(UserId::from(row.map_err(|e| SyncError::Persistence(e.to_string()))?));
        }
        Ok(out)
    }
}

impl PersistenceStore for SqlitePersistence {
    fn get_document(&self, id: &DocumentId) -> SyncResult<Option<Document>> {
        let conn = self.conn.lock().unwrap();
        let row = conn.query_row(
            "SELECT title, content, owner_id, current_version, last_modified FROM documents WHERE id = ?1",
            params![id.0],
            |row| {
                let title: String = row.get(0)?;
                let content: String = row.get(1)?;
                let owner_id: String = row.get(2)?;
                let current_version: i64 = row.get(3)?;
                let last_modified: String = row.get(4)?;
                Ok((title, content, owner_id, current_version, last_modified))
            },
        );

        let (title, content, owner_id, current_version, last_modified) = match row {
            Ok(row) => row,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(SyncError::Persistence(e.to_string())),
        };

        let versions = Self::load_versions(&conn, id)?;
        let collaborator_ids = Self::load_collaborators(&conn, id)?;
        let last_modified = DateTime::parse_from_rfc3339(&last_modified)
            .map_err(|e| SyncError::Persistence(e.to_string()))?
            .with_timezone(&Utc);

        let mut document = Document::new(id.clone(), title, UserId::from(owner_id), content);
        document.collaborator_ids = collaborator_ids;
        document.versions = versions;
        document.current_version = current_version.max(0) as usize;
        document.last_modified = last_modified;
        Ok(Some(document))
    }

    fn create_document(&self, id: &DocumentId, title: &str, owner_id: &UserId, content: &str) -> SyncResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO documents (id, title, content, owner_id, current_version, last_modified)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)",
            params![id.0, title, content, owner_id.0, Utc::now().to_rfc3339()],
        )
        .map_err(|e| SyncError::Persistence(e.to_string()))?;
        Ok(())
    }

    fn delete_document(&self, id: &DocumentId) -> SyncResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM documents WHERE id = ?1", params![id.0])
            .map_err(|e| SyncError::Persistence(e.to_string()))?;
        conn.execute("DELETE FROM collaborators WHERE document_id = ?1", params![id.0])
            .map_err(|e| SyncError::Persistence(e.to_string()))?;
        conn.execute("DELETE FROM versions WHERE document_id = ?1", params![id.0])
            .map_err(|e| SyncError::Persistence(e.to_string()))?;
        Ok(())
    }

    fn save_document_head(&self, id: &DocumentId, content: &str, last_modified: DateTime<Utc>) -> SyncResult<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute(
                "UPDATE documents SET content = ?1, last_modified = ?2 WHERE id = ?3",
                params![content, last_modified.to_rfc3339(), id.0],
            )
            .map_err(|e| SyncError::Persistence(e.to_string()))?;
        if changed == 0 {
            return Err(SyncError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn append_version(&self, id: &DocumentId, version: &Version) -> SyncResult<usize> {
        let conn = self.conn.lock().unwrap();
        let next_idx: i64 = conn
            .query_row(
                "SELECT COALESCE(MAX(idx), -1) + 1 FROM versions WHERE document_id = ?1",
                params![id.0],
                |row| row.get(0),
            )
            .map_err(|e| SyncError::Persistence(e.to_string()))?;

        conn.execute(
            "INSERT INTO versions (document_id, idx, content, author_id, change_description, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id.0,
                next_idx,
                version.content,
                version.author_id.0,
                version.change_description,
                version.timestamp.to_rfc3339(),
            ],
        )
        .map_err(|e| SyncError::Persistence(e.to_string()))?;

        conn.execute(
            "UPDATE documents SET current_version = ?1 WHERE id = ?2",
            params![next_idx, id.0],
        )
        .map_err(|e| SyncError::Persistence(e.to_string()))?;

        Ok(next_idx as usize)
    }

    fn get_versions(&self, id: &DocumentId) -> SyncResult<Vec<Version>> {
        let conn = self.conn.lock().unwrap();
        Self::load_versions(&conn, id)
    }

    fn list_documents_for_user(&self, user_id: &UserId) -> SyncResult<Vec<Document>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT d.id FROM documents d
                 LEFT JOIN collaborators c ON c.document_id = d.id
                 WHERE d.owner_id = ?1 OR c.user_id = ?1",
            )
            .map_err(|e| SyncError::Persistence(e.to_string()))?;
        let ids: Vec<String> = stmt
            .query_map(params![user_id.0], |row| row.get(0))
            .map_err(|e| SyncError::Persistence(e.to_string()))?
            .collect::<Result<_, _>>()
            .map_err(|e| SyncError::Persistence(e.to_string()))?;
        drop(stmt);
        drop(conn);

        let mut documents = Vec::new();
        for id in ids {
            if let Some(doc) = self.get_document(&DocumentId::from(id))? {
                documents.push(doc);
            }
        }
        Ok(documents)
    }

    fn add_collaborator(&self, id: &DocumentId, user_id: &UserId) -> SyncResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO collaborators (document_id, user_id) VALUES (?1, ?2)",
            params![id.0, user_id.0],
        )
        .map_err(|e| SyncError::Persistence(e.to_string()))?;
        Ok(())
    }

    fn remove_collaborator(&self, id: &DocumentId, user_id: &UserId) -> SyncResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM collaborators WHERE document_id = ?1 AND user_id = ?2",
            params![id.0, user_id.0],
        )
        .map_err(|e| SyncError::Persistence(e.to_string()))?;
        Ok(())
    }
}
