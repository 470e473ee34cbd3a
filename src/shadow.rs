use crate::document::DocumentId;
use crate::error::{SyncError, SyncResult};
use crate::persistence::PersistenceStore;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Per-document server shadow: the text peers were last told about, used
/// as the base against which incoming patches are applied.
pub struct ShadowSlot {
    pub text: String,
}

/// Keyed by document, lazily hydrated from persistence. The map itself
/// needs no outer lock (`dashmap` shards internally), so concurrent
/// `load`s for different documents never contend.
#[derive(Default)]
pub struct ShadowStore {
    slots: DashMap<DocumentId, Arc<Mutex<ShadowSlot>>>,
}

impl ShadowStore {
    pub fn new() -> Self {
        Self { slots: DashMap::new() }
    }

    /// Returns the per-document mutex, creating and hydrating it from
    /// persistence on first touch. Callers hold the returned `Arc` across
    /// their whole critical section, then lock it themselves. The slot
    /// handed out here is not yet locked, so callers that need the guard
    /// immediately should use `lock` instead.
    ///
    /// Two concurrent first-touches of the same document may both read
    /// from persistence, but only one hydrated slot ever becomes canonical:
    /// `entry`/`or_insert_with` holds the shard lock across the check and
    /// the insert, so every caller converges on the same `Arc` and, with
    /// it, the same per-document mutex.
    pub async fn handle(&self, id: &DocumentId, persistence: &dyn PersistenceStore) -> SyncResult<Arc<Mutex<ShadowSlot>>> {
        if let Some(slot) = self.slots.get(id) {
            return Ok(Arc::clone(slot.value()));
        }

        let document = persistence
            .get_document(id)?
            .ok_or_else(|| SyncError::NotFound(id.to_string()))?;
        let slot = Arc::new(Mutex::new(ShadowSlot { text: document.content }));
        Ok(self.slots.entry(id.clone()).or_insert_with(|| slot).clone())
    }

    /// Convenience for the common case: hydrate (if needed) and lock in
    /// one step.
    pub async fn lock(&self, id: &DocumentId, persistence: &dyn PersistenceStore) -> SyncResult<OwnedShadowGuard> {
        let handle = self.handle(id, persistence).await?;
        Ok(OwnedShadowGuard { handle })
    }

    /// Evict a document's shadow, e.g. when its room empties. The next
    /// `handle`/`lock` call rehydrates from `content`, so this is a pure
    /// memory optimization, never a correctness requirement.
    pub fn drop_shadow(&self, id: &DocumentId) {
        self.slots.remove(id);
    }
}

/// Owns a clone of the slot's `Arc` so the guard returned by `.guard()`
/// can outlive the call that produced it without borrowing from `self`.
pub struct OwnedShadowGuard {
    handle: Arc<Mutex<ShadowSlot>>,
}

impl OwnedShadowGuard {
    pub async fn guard(&self) -> MutexGuard<'_, ShadowSlot> {
        self.handle.lock().await
    }
}
