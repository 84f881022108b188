use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use lru::LruCache;
use tokio::sync::broadcast;
use tracing::{info, warn};
use turnengine_core::{EngineError, Result};

use crate::loader::{FsAssistantSource, RawAssistant};
use crate::model::Assistant;
use crate::store::AssistantStore;

/// Bounded LRU registry of loaded assistants (C3).
///
/// `Get` coalesces concurrent misses on the same id into a single load: the
/// first caller performs the load and broadcasts the result; any caller
/// that arrives while a load for the same id is in flight awaits that
/// broadcast instead of starting its own.
pub struct AssistantRegistry {
    cache: Mutex<LruCache<String, Arc<Assistant>>>,
    inflight: DashMap<String, broadcast::Sender<Result<Arc<Assistant>, String>>>,
    store: Arc<dyn AssistantStore>,
    fs: Option<FsAssistantSource>,
}

impl AssistantRegistry {
    pub fn new(capacity: usize, store: Arc<dyn AssistantStore>, fs: Option<FsAssistantSource>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            inflight: DashMap::new(),
            store,
            fs,
        }
    }

    /// Replace the cache atomically with a fresh, empty one of `capacity`
    /// (§4.3 `SetCache`).
    pub fn set_cache(&self, capacity: usize) {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        *self.cache.lock().unwrap() = LruCache::new(capacity);
    }

    /// Invalidate one cache entry (§4.3 `Remove`).
    pub fn remove(&self, id: &str) {
        self.cache.lock().unwrap().pop(id);
    }

    /// Resolve an assistant id to a live, validated assistant, hitting the
    /// cache first, then the filesystem (if a `path` is recorded in the
    /// store), then the store's raw record (§4.3 `Get`).
    pub async fn get(&self, id: &str) -> Result<Arc<Assistant>> {
        if let Some(hit) = self.cache.lock().unwrap().get(id).cloned() {
            return Ok(hit);
        }

        // Singleflight: the first caller to reach an empty slot becomes the
        // leader and performs the load; anyone arriving while a load is in
        // flight for the same id subscribes to its result instead.
        let (mut rx, is_leader) = match self.inflight.entry(id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(e) => (e.get().subscribe(), false),
            dashmap::mapref::entry::Entry::Vacant(e) => {
                let (tx, rx) = broadcast::channel(1);
                e.insert(tx);
                (rx, true)
            }
        };

        if is_leader {
            let result = self.load(id).await;
            if let Some((_, tx)) = self.inflight.remove(id) {
                let broadcastable = result.as_ref().map(Arc::clone).map_err(|e| e.to_string());
                let _ = tx.send(broadcastable);
            }
            return result;
        }

        match rx.recv().await {
            Ok(Ok(assistant)) => Ok(assistant),
            Ok(Err(message)) => Err(EngineError::NotFound(message)),
            Err(_) => self.load(id).await,
        }
    }

    async fn load(&self, id: &str) -> Result<Arc<Assistant>> {
        let raw = if let Some(fs) = &self.fs {
            match fs.load_raw(id) {
                Ok(raw) => Some(raw),
                Err(_) => self.store.get(id).await?,
            }
        } else {
            self.store.get(id).await?
        };

        let raw = raw.ok_or_else(|| EngineError::NotFound(format!("assistant {id} not found")))?;
        let assets_dir = self.fs.as_ref().map(|fs| fs.assets_dir(id));
        let assistant = crate::loader::load_map(raw, assets_dir.as_deref())?;
        let assistant = Arc::new(assistant);
        self.cache.lock().unwrap().put(id.to_string(), Arc::clone(&assistant));
        Ok(assistant)
    }

    /// Purge built-in records and reload every `<root>/assistants/<id>`
    /// directory, stamping `built_in=true`, `readonly=true`, and ascending
    /// `sort` order (§4.3 `LoadBuiltIn`).
    pub async fn load_built_in(&self) -> Result<usize> {
        let Some(fs) = &self.fs else { return Ok(0) };
        self.store.delete_built_in().await?;

        let ids = fs.discover()?;
        let mut loaded = 0;
        for (sort, id) in ids.iter().enumerate() {
            let mut raw: RawAssistant = fs.load_raw(id)?;
            raw.sort = sort as i64;
            match crate::loader::load_map(raw.clone(), Some(&fs.assets_dir(id))) {
                Ok(_) => {
                    self.store.upsert(raw).await?;
                    self.cache.lock().unwrap().pop(id);
                    loaded += 1;
                }
                Err(e) => warn!(assistant_id = %id, error = %e, "skipping invalid built-in assistant"),
            }
        }
        info!(count = loaded, "loaded built-in assistants");
        Ok(loaded)
    }

    /// Persist an assistant and force a reload on next `Get` (§4.3 `Save`).
    pub async fn save(&self, raw: RawAssistant) -> Result<String> {
        let id = raw.assistant_id.clone();
        self.store.upsert(raw).await?;
        self.remove(&id);
        Ok(id)
    }

    /// Delete an assistant record and evict it from the cache.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.store.delete(id).await?;
        self.remove(id);
        Ok(())
    }

    /// Load every stored assistant, for `GET /assistants` and its
    /// tag/mentionable-filtering siblings. Bypasses the single-item cache;
    /// callers that need a fully validated `Assistant` should `get()` it.
    pub async fn list_raw(&self) -> Result<Vec<RawAssistant>> {
        self.store.list().await
    }
}

/// Snapshot of per-id metadata served to `/mentions` and `/assistants/tags`
/// from the already-loaded registry cache, without a separate index.
pub fn tag_index(assistants: &[Arc<Assistant>]) -> HashMap<String, Vec<String>> {
    assistants
        .iter()
        .map(|a| (a.id.clone(), a.tags.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryAssistantStore;

    fn raw(id: &str) -> RawAssistant {
        RawAssistant {
            assistant_id: id.to_string(),
            name: "Bot".to_string(),
            connector: "openai".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn get_loads_from_store_and_caches() {
        let store = Arc::new(MemoryAssistantStore::new());
        store.upsert(raw("a1")).await.unwrap();
        let registry = AssistantRegistry::new(4, store, None);

        let a = registry.get("a1").await.unwrap();
        assert_eq!(a.id, "a1");
        let b = registry.get("a1").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b), "second Get should hit cache, same Arc");
    }

    #[tokio::test]
    async fn get_missing_id_errors() {
        let store = Arc::new(MemoryAssistantStore::new());
        let registry = AssistantRegistry::new(4, store, None);
        assert!(registry.get("nope").await.is_err());
    }

    #[tokio::test]
    async fn save_forces_reload() {
        let store = Arc::new(MemoryAssistantStore::new());
        let registry = AssistantRegistry::new(4, store, None);
        registry.save(raw("a1")).await.unwrap();
        let a1 = registry.get("a1").await.unwrap();
        assert_eq!(a1.connector, "openai");

        let mut updated = raw("a1");
        updated.connector = "anthropic".to_string();
        registry.save(updated).await.unwrap();
        let a1_reloaded = registry.get("a1").await.unwrap();
        assert_eq!(a1_reloaded.connector, "anthropic");
        assert!(!Arc::ptr_eq(&a1, &a1_reloaded));
    }

    #[tokio::test]
    async fn eviction_follows_lru_order() {
        let store = Arc::new(MemoryAssistantStore::new());
        for id in ["a1", "a2", "a3"] {
            store.upsert(raw(id)).await.unwrap();
        }
        let registry = AssistantRegistry::new(2, store, None);

        registry.get("a1").await.unwrap();
        registry.get("a2").await.unwrap();
        registry.get("a1").await.unwrap(); // a1 now most-recent
        registry.get("a3").await.unwrap(); // evicts a2 (least-recently-used)

        assert!(registry.cache.lock().unwrap().contains("a1"));
        assert!(registry.cache.lock().unwrap().contains("a3"));
        assert!(!registry.cache.lock().unwrap().contains("a2"));
    }
}
