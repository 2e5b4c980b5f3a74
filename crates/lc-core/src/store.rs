//! Filesystem-backed object store.
//!
//! Records are pretty-printed JSON files named `{type}-{name}.json` under one
//! subdirectory per entity type. Writes go to a temp file in the same
//! directory and are renamed over the target, so readers never observe a
//! partially written record.
//!
//! The store itself exposes no cross-record transactions, but it owns a
//! per-entity lock registry: [`ObjectStore::update`] performs a locked
//! read-modify-write, which is what the reservation manager and the legacy
//! update path use so that concurrent mutations of one entity cannot lose
//! updates.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;

use crate::error::{LcError, LcResult};
use crate::model::EntityType;

/// Filesystem-backed record store keyed by (entity type, name).
pub struct ObjectStore {
    data_dir: PathBuf,
    locks: Mutex<HashMap<(EntityType, String), Arc<tokio::sync::Mutex<()>>>>,
}

impl ObjectStore {
    /// Open a store rooted at `data_dir`, creating the per-type
    /// subdirectories if needed.
    pub fn open(data_dir: &Path) -> LcResult<Self> {
        for entity in [
            EntityType::Board,
            EntityType::Resource,
            EntityType::Request,
            EntityType::User,
        ] {
            let dir = data_dir.join(entity.dir_name());
            std::fs::create_dir_all(&dir)
                .map_err(|e| LcError::storage(&format!("create {}", dir.display()), e))?;
        }
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            locks: Mutex::new(HashMap::new()),
        })
    }

    fn type_dir(&self, entity: EntityType) -> PathBuf {
        self.data_dir.join(entity.dir_name())
    }

    /// Full path of a record file.
    pub fn record_path(&self, entity: EntityType, name: &str) -> PathBuf {
        self.type_dir(entity)
            .join(format!("{}-{}.json", entity.singular(), name))
    }

    /// Sorted names of all records of one type.
    pub async fn list(&self, entity: EntityType) -> LcResult<Vec<String>> {
        let dir = self.type_dir(entity);
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| LcError::storage(&format!("read {}", dir.display()), e))?;

        let prefix = format!("{}-", entity.singular());
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| LcError::storage(&format!("read {}", dir.display()), e))?
        {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some(stem) = file_name
                .strip_prefix(&prefix)
                .and_then(|s| s.strip_suffix(".json"))
            {
                if !stem.is_empty() {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Load a record, or `NotFound` if no file exists for the name.
    pub async fn load<T: DeserializeOwned>(&self, entity: EntityType, name: &str) -> LcResult<T> {
        let path = self.record_path(entity, name);
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LcError::NotFound(format!("{} '{}'", entity, name)));
            }
            Err(e) => return Err(LcError::storage(&format!("read {}", path.display()), e)),
        };
        Ok(serde_json::from_str(&text)?)
    }

    /// Load a record as a generic JSON value (used by attribute queries and
    /// the legacy update path, which operate on arbitrary fields).
    pub async fn load_value(
        &self,
        entity: EntityType,
        name: &str,
    ) -> LcResult<serde_json::Value> {
        self.load(entity, name).await
    }

    /// Save a record as pretty-printed JSON, overwriting atomically.
    pub async fn save<T: Serialize>(
        &self,
        entity: EntityType,
        name: &str,
        record: &T,
    ) -> LcResult<()> {
        let path = self.record_path(entity, name);
        let mut json = serde_json::to_string_pretty(record)?;
        json.push('\n');

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &json)
            .await
            .map_err(|e| LcError::storage(&format!("write {}", tmp.display()), e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| LcError::storage(&format!("rename to {}", path.display()), e))?;
        Ok(())
    }

    /// Remove a record, or `NotFound` if no file exists for the name.
    pub async fn remove(&self, entity: EntityType, name: &str) -> LcResult<()> {
        let path = self.record_path(entity, name);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(LcError::NotFound(format!("{} '{}'", entity, name)))
            }
            Err(e) => Err(LcError::storage(&format!("remove {}", path.display()), e)),
        }
    }

    /// Whether a record exists.
    pub async fn exists(&self, entity: EntityType, name: &str) -> bool {
        fs::try_exists(self.record_path(entity, name))
            .await
            .unwrap_or(false)
    }

    fn entity_lock(&self, entity: EntityType, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry((entity, name.to_string()))
            .or_default()
            .clone()
    }

    /// Locked read-modify-write of one record.
    ///
    /// The per-entity lock serializes concurrent updates of the same record;
    /// updates of different records proceed independently.
    pub async fn update<T, F>(&self, entity: EntityType, name: &str, mutate: F) -> LcResult<T>
    where
        T: DeserializeOwned + Serialize,
        F: FnOnce(&mut T) -> LcResult<()>,
    {
        let lock = self.entity_lock(entity, name);
        let _guard = lock.lock().await;

        let mut record: T = self.load(entity, name).await?;
        mutate(&mut record)?;
        self.save(entity, name, &record).await?;
        Ok(record)
    }
}
