//! Persistence contract for server records
//!
//! The supervisor and download orchestrator only need to read a record, write
//! back a partial update and ask whether a port is already taken. Hosts plug
//! in their own database by implementing [`ServerStore`]; two simple
//! implementations ship here.

use crate::error::{HearthError, Result};
use crate::model::{ServerRecord, ServerUpdate};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

/// Storage backend for server records
#[async_trait]
pub trait ServerStore: Send + Sync {
    /// Fetch one record
    async fn get_server(&self, id: &str) -> Result<ServerRecord>;

    /// Apply a partial update and return the new record
    async fn update_server(&self, id: &str, update: ServerUpdate) -> Result<ServerRecord>;

    /// Whether any record other than `exclude_id` uses `port`
    async fn is_port_reserved(&self, port: u16, exclude_id: Option<&str>) -> Result<bool>;

    /// All records, ordered by id
    async fn list_servers(&self) -> Result<Vec<ServerRecord>>;

    /// Insert or replace a record
    async fn insert_server(&self, record: ServerRecord) -> Result<()>;
}

fn port_taken(records: &BTreeMap<String, ServerRecord>, port: u16, exclude_id: Option<&str>) -> bool {
    records
        .values()
        .any(|r| r.port == port && Some(r.id.as_str()) != exclude_id)
}

/// In-memory store, used in tests and for ephemeral setups
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: RwLock<BTreeMap<String, ServerRecord>>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with records
    pub fn with_records(records: impl IntoIterator<Item = ServerRecord>) -> Self {
        Self {
            records: RwLock::new(records.into_iter().map(|r| (r.id.clone(), r)).collect()),
        }
    }
}

#[async_trait]
impl ServerStore for InMemoryStore {
    async fn get_server(&self, id: &str) -> Result<ServerRecord> {
        self.records
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| HearthError::ServerNotFound(id.to_string()))
    }

    async fn update_server(&self, id: &str, update: ServerUpdate) -> Result<ServerRecord> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| HearthError::ServerNotFound(id.to_string()))?;
        record.apply(update);
        Ok(record.clone())
    }

    async fn is_port_reserved(&self, port: u16, exclude_id: Option<&str>) -> Result<bool> {
        Ok(port_taken(&*self.records.read().await, port, exclude_id))
    }

    async fn list_servers(&self) -> Result<Vec<ServerRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn insert_server(&self, record: ServerRecord) -> Result<()> {
        self.records.write().await.insert(record.id.clone(), record);
        Ok(())
    }
}

/// Store backed by a single JSON file, rewritten on every mutation
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    records: RwLock<BTreeMap<String, ServerRecord>>,
}

impl JsonFileStore {
    /// Open the store, creating an empty one if the file does not exist
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let list: Vec<ServerRecord> = serde_json::from_slice(&bytes)?;
                list.into_iter().map(|r| (r.id.clone(), r)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), records = records.len(), "Opened server store");

        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, records: &BTreeMap<String, ServerRecord>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let list: Vec<&ServerRecord> = records.values().collect();
        let json = serde_json::to_vec_pretty(&list)?;

        // Write then rename so a crash never leaves a truncated file
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl ServerStore for JsonFileStore {
    async fn get_server(&self, id: &str) -> Result<ServerRecord> {
        self.records
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| HearthError::ServerNotFound(id.to_string()))
    }

    async fn update_server(&self, id: &str, update: ServerUpdate) -> Result<ServerRecord> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| HearthError::ServerNotFound(id.to_string()))?;
        record.apply(update);
        let updated = record.clone();
        self.persist(&records).await?;
        Ok(updated)
    }

    async fn is_port_reserved(&self, port: u16, exclude_id: Option<&str>) -> Result<bool> {
        Ok(port_taken(&*self.records.read().await, port, exclude_id))
    }

    async fn list_servers(&self) -> Result<Vec<ServerRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn insert_server(&self, record: ServerRecord) -> Result<()> {
        let mut records = self.records.write().await;
        records.insert(record.id.clone(), record);
        self.persist(&records).await
    }
}
