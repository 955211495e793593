//! Storage adapters for strategies, patterns and execution states
//!
//! The core never talks to a database directly. Everything goes through
//! [`Repository`], with an in-memory adapter for tests and embedding and a
//! JSON-directory adapter (one pretty-printed file per entity) for local use.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{ExecutionState, MarshalError, Result, Strategy};

/// An entity that can be persisted by id
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Short name used in logs and directory names
    const KIND: &'static str;

    fn entity_id(&self) -> &str;
}

impl Entity for Strategy {
    const KIND: &'static str = "strategy";

    fn entity_id(&self) -> &str {
        &self.id
    }
}

impl Entity for ExecutionState {
    const KIND: &'static str = "execution";

    fn entity_id(&self) -> &str {
        &self.strategy_id
    }
}

/// save/get/list/delete over one entity type
#[async_trait]
pub trait Repository<T: Entity>: Send + Sync {
    /// Insert or replace by id
    async fn save(&self, entity: T) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<T>>;

    /// All entities, ordered by id
    async fn list(&self) -> Result<Vec<T>>;

    /// Returns whether something was removed
    async fn delete(&self, id: &str) -> Result<bool>;
}

/// Shared handle to a repository
pub type SharedRepository<T> = Arc<dyn Repository<T>>;

/// In-memory adapter
pub struct InMemoryRepository<T> {
    items: RwLock<BTreeMap<String, T>>,
}

impl<T: Entity> InMemoryRepository<T> {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(BTreeMap::new()),
        }
    }

    /// Convenience constructor returning a shared handle
    pub fn shared() -> SharedRepository<T> {
        Arc::new(Self::new())
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

impl<T: Entity> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Entity> Repository<T> for InMemoryRepository<T> {
    async fn save(&self, entity: T) -> Result<()> {
        let mut items = self.items.write().await;
        items.insert(entity.entity_id().to_string(), entity);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<T>> {
        Ok(self.items.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<T>> {
        Ok(self.items.read().await.values().cloned().collect())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.items.write().await.remove(id).is_some())
    }
}

/// JSON-directory adapter: `{dir}/{id}.json`
pub struct JsonDirRepository<T> {
    dir: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> JsonDirRepository<T> {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            _marker: PhantomData,
        }
    }

    /// Repository under `{root}/{KIND}s`
    pub fn under(root: &Path) -> Self {
        Self::new(root.join(format!("{}s", T::KIND)))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Ids name a single file inside the directory
    fn path_for(&self, id: &str) -> Result<PathBuf> {
        let escapes = id.is_empty()
            || id == "."
            || id.contains("..")
            || id.contains(|c| matches!(c, '/' | '\\' | '\0'))
            || Path::new(id).is_absolute();
        if escapes {
            return Err(MarshalError::InvalidId(id.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }

    async fn load_file(path: &Path) -> Result<T> {
        let content = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[async_trait]
impl<T: Entity> Repository<T> for JsonDirRepository<T> {
    async fn save(&self, entity: T) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(entity.entity_id())?;
        let content = serde_json::to_string_pretty(&entity)?;
        tokio::fs::write(&path, content).await?;

        debug!("Saved {} {} to {:?}", T::KIND, entity.entity_id(), path);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<T>> {
        let path = self.path_for(id)?;
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(Self::load_file(&path).await?))
    }

    async fn list(&self) -> Result<Vec<T>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut loaded = BTreeMap::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let entry_path = entry.path();

            if entry_path.extension().is_some_and(|e| e == "json") {
                match Self::load_file(&entry_path).await {
                    Ok(entity) => {
                        loaded.insert(entity.entity_id().to_string(), entity);
                    }
                    Err(e) => {
                        debug!("Failed to load {} from {:?}: {}", T::KIND, entry_path, e);
                    }
                }
            }
        }

        info!("Loaded {} {} entities from {:?}", loaded.len(), T::KIND, self.dir);
        Ok(loaded.into_values().collect())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let path = self.path_for(id)?;
        if !path.exists() {
            return Ok(false);
        }
        tokio::fs::remove_file(&path).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn state(id: &str) -> ExecutionState {
        ExecutionState::new(id, ["research-trend", "content-content"])
    }

    #[tokio::test]
    async fn test_in_memory_roundtrip() {
        let repo = InMemoryRepository::<ExecutionState>::new();
        repo.save(state("s-2")).await.unwrap();
        repo.save(state("s-1")).await.unwrap();

        assert_eq!(repo.len().await, 2);
        assert!(repo.get("s-1").await.unwrap().is_some());
        assert!(repo.get("missing").await.unwrap().is_none());

        let ids: Vec<String> = repo
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.strategy_id)
            .collect();
        assert_eq!(ids, vec!["s-1", "s-2"]);

        assert!(repo.delete("s-1").await.unwrap());
        assert!(!repo.delete("s-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_json_dir_roundtrip() {
        let dir = tempdir().unwrap();
        let repo = JsonDirRepository::<ExecutionState>::under(dir.path());

        repo.save(state("s-1")).await.unwrap();
        assert!(dir.path().join("executions/s-1.json").exists());

        // Fresh handle on the same directory sees the entity
        let reopened = JsonDirRepository::<ExecutionState>::under(dir.path());
        let loaded = reopened.get("s-1").await.unwrap().unwrap();
        assert_eq!(loaded.node_status.len(), 2);
        assert_eq!(reopened.list().await.unwrap().len(), 1);

        assert!(reopened.delete("s-1").await.unwrap());
        assert!(reopened.get("s-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_json_dir_rejects_escaping_ids() {
        let dir = tempdir().unwrap();
        let root = dir.path().join(".marshal");
        std::fs::create_dir_all(root.join("executions")).unwrap();
        std::fs::write(dir.path().join("outside.json"), "{}").unwrap();
        let repo = JsonDirRepository::<ExecutionState>::under(&root);

        for id in ["../../outside", "../outside", "a/b", "a\\b", "..", ""] {
            assert!(
                matches!(repo.get(id).await, Err(MarshalError::InvalidId(_))),
                "accepted {id:?}"
            );
            assert!(matches!(repo.delete(id).await, Err(MarshalError::InvalidId(_))));
        }
        assert!(matches!(
            repo.save(state("../escape")).await,
            Err(MarshalError::InvalidId(_))
        ));
        assert!(dir.path().join("outside.json").exists());

        // Ordinary ids with dots and dashes still work
        repo.save(state("launch-v1.2")).await.unwrap();
        assert!(repo.get("launch-v1.2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_json_dir_skips_corrupt_files() {
        let dir = tempdir().unwrap();
        let repo = JsonDirRepository::<ExecutionState>::new(dir.path());
        repo.save(state("good")).await.unwrap();
        std::fs::write(dir.path().join("bad.json"), "{ not json").unwrap();

        let all = repo.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].strategy_id, "good");
    }

    #[tokio::test]
    async fn test_json_dir_missing_dir_is_empty() {
        let dir = tempdir().unwrap();
        let repo = JsonDirRepository::<ExecutionState>::new(dir.path().join("nope"));
        assert!(repo.list().await.unwrap().is_empty());
    }
}
