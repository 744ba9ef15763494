//! Persistence of pending schedules.
//!
//! The timed scheduler treats storage as a collaborator behind
//! [`ScheduleStore`]; the encoding of the action payload is opaque to
//! the store and round-trips through [`ActionDecoder`] on reload.
//! Entries are scoped by a group name so independent schedulers can
//! share one store.

use crate::action::{Action, StaticAction};
use crate::lights::LightSet;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// One persisted schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSchedule {
    pub group: String,
    pub schedule_id: String,
    pub program_id: u32,
    pub description: String,
    pub lights: LightSet,
    pub fire_time: DateTime<Utc>,
    /// The action payload as produced by [`Action::encode`].
    pub action: Value,
}

/// Persistent storage of pending schedules.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn add_entry(&self, entry: &StoredSchedule) -> Result<()>;

    async fn remove_entry(&self, group: &str, schedule_id: &str) -> Result<()>;

    async fn list_entries(&self, group: &str) -> Result<Vec<StoredSchedule>>;
}

/// Rebuilds actions from stored payloads.
pub trait ActionDecoder: Send + Sync {
    fn decode(&self, program_id: u32, payload: &Value) -> Result<Arc<dyn Action>>;
}

/// Decodes the payloads produced by [`StaticAction`].
pub struct StaticActionDecoder;

impl ActionDecoder for StaticActionDecoder {
    fn decode(&self, _program_id: u32, payload: &Value) -> Result<Arc<dyn Action>> {
        Ok(Arc::new(StaticAction::decode(payload)?))
    }
}

/// A store that remembers nothing.
pub struct NullStore;

#[async_trait]
impl ScheduleStore for NullStore {
    async fn add_entry(&self, _entry: &StoredSchedule) -> Result<()> {
        Ok(())
    }

    async fn remove_entry(&self, _group: &str, _schedule_id: &str) -> Result<()> {
        Ok(())
    }

    async fn list_entries(&self, _group: &str) -> Result<Vec<StoredSchedule>> {
        Ok(Vec::new())
    }
}

/// An in-memory store; schedules survive as long as the process.
pub struct MemoryStore {
    entries: Mutex<Vec<StoredSchedule>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    async fn add_entry(&self, entry: &StoredSchedule) -> Result<()> {
        self.entries.lock().await.push(entry.clone());
        Ok(())
    }

    async fn remove_entry(&self, group: &str, schedule_id: &str) -> Result<()> {
        self.entries
            .lock()
            .await
            .retain(|entry| !(entry.group == group && entry.schedule_id == schedule_id));
        Ok(())
    }

    async fn list_entries(&self, group: &str) -> Result<Vec<StoredSchedule>> {
        Ok(self
            .entries
            .lock()
            .await
            .iter()
            .filter(|entry| entry.group == group)
            .cloned()
            .collect())
    }
}

/// A store backed by a single JSON document on disk. Every mutation
/// rewrites the file; fine for the handful of pending schedules an
/// installation carries.
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<Vec<StoredSchedule>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    async fn save(&self, entries: &[StoredSchedule]) -> Result<()> {
        let contents = serde_json::to_string_pretty(entries)?;
        tokio::fs::write(&self.path, contents).await?;
        Ok(())
    }
}

#[async_trait]
impl ScheduleStore for JsonFileStore {
    async fn add_entry(&self, entry: &StoredSchedule) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        entries.push(entry.clone());
        self.save(&entries).await
    }

    async fn remove_entry(&self, group: &str, schedule_id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        entries.retain(|entry| !(entry.group == group && entry.schedule_id == schedule_id));
        self.save(&entries).await
    }

    async fn list_entries(&self, group: &str) -> Result<Vec<StoredSchedule>> {
        let _guard = self.lock.lock().await;
        Ok(self
            .load()
            .await?
            .into_iter()
            .filter(|entry| entry.group == group)
            .collect())
    }
}
