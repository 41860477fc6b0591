//! Typed façade over the metadata store: `data_sources`, `models`,
//! `endpoints` and `result_sets` keyed tables (spec.md §3.3, §4.4).
//!
//! Entries live in memory behind an `RwLock` and are optionally mirrored
//! to JSON files under `metadata_base_dir` so a restart can rehydrate
//! registered endpoints and models. Keys are lowercased on both read and
//! write, matching the case-insensitive data-source naming in spec.md
//! §4.2.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceMeta {
    pub data_source: String,
    pub type_name: String,
    pub version: Option<i64>,
}

/// A saved named query: a SQL text plus substitutable parameter slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub name: String,
    pub sql: String,
}

/// An HTTP-exposed alias for a [`Model`], reachable via
/// `POST /endpoint/:name` (spec.md §6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: String,
    pub model_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultStatus {
    InProgress,
    Completed,
    Failed,
}

/// A submitted request's tracked state (spec.md §3.4). `status` moves
/// monotonically `InProgress -> Completed|Failed`; `end_time` is set iff
/// `status != InProgress`; `spill_path` exists iff `status == Completed
/// && !expired`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSetRecord {
    pub id: String,
    pub status: ResultStatus,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
    pub model: Option<String>,
    pub endpoint: Option<String>,
    pub query: String,
    pub username: String,
    pub error: Option<String>,
    pub expired: bool,
    pub spill_path: Option<PathBuf>,
    pub plan: Option<serde_json::Value>,
}

#[derive(Default)]
struct Store {
    data_sources: HashMap<String, DataSourceMeta>,
    models: HashMap<String, Model>,
    endpoints: HashMap<String, Endpoint>,
    result_sets: HashMap<String, ResultSetRecord>,
}

pub struct MetadataStore {
    base_dir: Option<PathBuf>,
    inner: RwLock<Store>,
}

fn key(s: &str) -> String {
    s.to_lowercase()
}

impl MetadataStore {
    pub fn new() -> Self {
        Self { base_dir: None, inner: RwLock::new(Store::default()) }
    }

    /// Construct a store backed by JSON persistence under `base_dir`,
    /// rehydrating `models.json` and `endpoints.json` if present.
    pub fn with_base_dir(base_dir: impl AsRef<Path>) -> EngineResult<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)?;
        let mut store = Store::default();

        if let Some(models) = Self::load_json::<Vec<Model>>(&base_dir.join("models.json"))? {
            for m in models {
                store.models.insert(key(&m.name), m);
            }
        }
        if let Some(endpoints) = Self::load_json::<Vec<Endpoint>>(&base_dir.join("endpoints.json"))? {
            for e in endpoints {
                store.endpoints.insert(key(&e.name), e);
            }
        }
        if let Some(sources) =
            Self::load_json::<Vec<DataSourceMeta>>(&base_dir.join("data_sources.json"))?
        {
            for s in sources {
                store.data_sources.insert(key(&s.data_source), s);
            }
        }

        Ok(Self { base_dir: Some(base_dir), inner: RwLock::new(store) })
    }

    fn load_json<T: for<'de> Deserialize<'de>>(path: &Path) -> EngineResult<Option<T>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn persist<T: Serialize>(&self, filename: &str, items: &[T]) -> EngineResult<()> {
        if let Some(dir) = &self.base_dir {
            let path = dir.join(filename);
            std::fs::write(path, serde_json::to_vec_pretty(items)?)?;
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::RwLockReadGuard<'_, Store> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_mut(&self) -> std::sync::RwLockWriteGuard<'_, Store> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register_data_source(&self, meta: DataSourceMeta) -> EngineResult<()> {
        let mut store = self.lock_mut();
        store.data_sources.insert(key(&meta.data_source), meta);
        let all: Vec<_> = store.data_sources.values().cloned().collect();
        drop(store);
        self.persist("data_sources.json", &all)
    }

    pub fn get_data_source(&self, name: &str) -> Option<DataSourceMeta> {
        self.lock().data_sources.get(&key(name)).cloned()
    }

    pub fn put_model(&self, model: Model) -> EngineResult<()> {
        let mut store = self.lock_mut();
        store.models.insert(key(&model.name), model);
        let all: Vec<_> = store.models.values().cloned().collect();
        drop(store);
        self.persist("models.json", &all)
    }

    pub fn get_model(&self, name: &str) -> EngineResult<Model> {
        self.lock()
            .models
            .get(&key(name))
            .cloned()
            .ok_or_else(|| EngineError::not_found(format!("model '{name}'")))
    }

    pub fn put_endpoint(&self, endpoint: Endpoint) -> EngineResult<()> {
        let mut store = self.lock_mut();
        store.endpoints.insert(key(&endpoint.name), endpoint);
        let all: Vec<_> = store.endpoints.values().cloned().collect();
        drop(store);
        self.persist("endpoints.json", &all)
    }

    pub fn get_endpoint(&self, name: &str) -> EngineResult<Endpoint> {
        self.lock()
            .endpoints
            .get(&key(name))
            .cloned()
            .ok_or_else(|| EngineError::not_found(format!("endpoint '{name}'")))
    }

    pub fn put_result_set(&self, record: ResultSetRecord) {
        self.lock_mut().result_sets.insert(record.id.clone(), record);
    }

    pub fn get_result_set(&self, request_id: &str) -> EngineResult<ResultSetRecord> {
        self.lock()
            .result_sets
            .get(request_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(format!("request '{request_id}'")))
    }

    pub fn remove_result_set(&self, request_id: &str) -> Option<ResultSetRecord> {
        self.lock_mut().result_sets.remove(request_id)
    }

    /// All result-set records, used by the expiry sweep.
    pub fn all_result_sets(&self) -> Vec<ResultSetRecord> {
        self.lock().result_sets.values().cloned().collect()
    }
}

impl Default for MetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_source_lookup_is_case_insensitive() {
        let store = MetadataStore::new();
        store
            .register_data_source(DataSourceMeta { data_source: "CRM".into(), type_name: "PostgreSQL".into(), version: None })
            .unwrap();
        assert!(store.get_data_source("crm").is_some());
    }

    #[test]
    fn unknown_model_is_not_found() {
        let store = MetadataStore::new();
        assert!(matches!(store.get_model("missing"), Err(EngineError::NotFound { .. })));
    }

    #[test]
    fn models_persist_across_store_instances() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::with_base_dir(dir.path()).unwrap();
        store.put_model(Model { name: "top_users".into(), sql: "SELECT * FROM ds.t a".into() }).unwrap();
        drop(store);

        let reloaded = MetadataStore::with_base_dir(dir.path()).unwrap();
        assert_eq!(reloaded.get_model("TOP_USERS").unwrap().sql, "SELECT * FROM ds.t a");
    }
}
