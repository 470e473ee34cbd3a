pub mod auth;
pub mod config;
pub mod diff;
pub mod document;
pub mod error;
pub mod offline;
pub mod persistence;
pub mod presence;
pub mod protocol;
pub mod room;
pub mod session;
pub mod shadow;
pub mod sync_engine;
pub mod versioning;

pub use auth::{AuthGate, JwtAuthGate};
pub use config::Config;
pub use diff::{apply, apply_or_reject, diff as diff_text, make_patch, Edit, Hunk, PatchBundle};
pub use document::{Document, DocumentId, Presence, Selection, UserId, Version};
pub use error::{SyncError, SyncResult};
pub use offline::{OfflineBuffer, OfflineEdit};
pub use persistence::{PersistenceStore, SqlitePersistence};
pub use protocol::{AuthenticatedUser, ClientMessage, ServerMessage};
pub use room::{Room, RoomRegistry};
pub use session::{Session, SessionId, SharedSession};
pub use shadow::ShadowStore;
pub use sync_engine::SyncEngine;
