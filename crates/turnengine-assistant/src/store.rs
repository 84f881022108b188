use async_trait::async_trait;
use turnengine_core::Result;

use crate::loader::RawAssistant;

/// The user-defined-assistant persistence boundary (out of scope per §1;
/// the registry depends only on this interface). A SQL/KV-backed
/// implementation lives in the storage crate; tests use an in-memory one.
#[async_trait]
pub trait AssistantStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<RawAssistant>>;
    async fn upsert(&self, raw: RawAssistant) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<()>;
    /// All records with `built_in=true`, for `LoadBuiltIn`'s purge step.
    async fn delete_built_in(&self) -> Result<()>;
    /// Every record, for `GET /assistants` and `/assistants/tags` listing.
    async fn list(&self) -> Result<Vec<RawAssistant>>;
}

/// In-memory `AssistantStore`, grounded on the same `Mutex`-guarded map
/// shape the teacher uses for its lighter-weight stores.
#[derive(Default)]
pub struct MemoryAssistantStore {
    records: std::sync::Mutex<std::collections::HashMap<String, RawAssistant>>,
}

impl MemoryAssistantStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AssistantStore for MemoryAssistantStore {
    async fn get(&self, id: &str) -> Result<Option<RawAssistant>> {
        Ok(self.records.lock().unwrap().get(id).cloned())
    }

    async fn upsert(&self, raw: RawAssistant) -> Result<()> {
        self.records.lock().unwrap().insert(raw.assistant_id.clone(), raw);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.records.lock().unwrap().remove(id);
        Ok(())
    }

    async fn delete_built_in(&self) -> Result<()> {
        self.records.lock().unwrap().retain(|_, v| !v.built_in);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<RawAssistant>> {
        Ok(self.records.lock().unwrap().values().cloned().collect())
    }
}
