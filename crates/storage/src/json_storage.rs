//! JSON file storage implementation.
//!
//! Stores one JSON file per activity under `activities/` and the completion
//! state in `completion_state.json`, with a small meta marker (version +
//! updated_at) next to the state.

use std::path::{Path, PathBuf};

use actq_core::{ActivityId, ActivityRecord, CompletionState, ResumePoint};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use super::{ActivityStore, Result};

/// File-based JSON storage backend.
pub struct JsonStore {
    root: PathBuf,
    // Serializes writers so the persist check-then-write stays idempotent.
    write_lock: Mutex<()>,
}

impl JsonStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(root.join("activities")).await?;
        fs::create_dir_all(root.join("meta")).await?;

        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn activity_path(&self, id: ActivityId) -> PathBuf {
        self.root
            .join("activities")
            .join(format!("{:020}.json", id.get()))
    }

    fn state_path(&self) -> PathBuf {
        self.root.join("completion_state.json")
    }

    fn meta_path(&self, name: &str) -> PathBuf {
        self.root.join("meta").join(format!("{}.meta.json", name))
    }

    /// Read and increment the version marker of `name`, return the new version.
    async fn bump_version(&self, name: &str) -> Result<u64> {
        let path = self.meta_path(name);
        let mut version = 0u64;
        if let Ok(s) = fs::read_to_string(&path).await {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(&s) {
                if let Some(v) = json.get("version").and_then(|v| v.as_u64()) {
                    version = v;
                }
            }
        }
        version += 1;
        let meta = serde_json::json!({"version": version, "updated_at": chrono::Utc::now()});
        write_atomic(&path, serde_json::to_string_pretty(&meta)?.as_bytes()).await?;
        Ok(version)
    }

    async fn all_activities(&self) -> Result<Vec<ActivityRecord>> {
        let mut records: Vec<ActivityRecord> = list_dir(&self.root.join("activities")).await?;
        records.sort_by_key(|r| r.id);
        Ok(records)
    }
}

#[async_trait::async_trait]
impl ActivityStore for JsonStore {
    async fn persist_activity(&self, record: &ActivityRecord) -> Result<()> {
        let path = self.activity_path(record.id);
        let _guard = self.write_lock.lock().await;
        if fs::metadata(&path).await.is_ok() {
            debug!(activity = %record.id, "activity already persisted");
            return Ok(());
        }
        let json = serde_json::to_string_pretty(record)?;
        write_atomic(&path, json.as_bytes()).await?;
        debug!(activity = %record.id, path = %path.display(), "activity persisted");
        Ok(())
    }

    async fn load_activities_from(&self, from: ActivityId, limit: usize) -> Result<Vec<ActivityRecord>> {
        Ok(self
            .all_activities()
            .await?
            .into_iter()
            .filter(|r| r.id >= from)
            .take(limit)
            .collect())
    }

    async fn load_activities(&self, ids: &[ActivityId]) -> Result<Vec<ActivityRecord>> {
        let mut wanted = ids.to_vec();
        wanted.sort();
        wanted.dedup();

        let mut loaded = Vec::with_capacity(wanted.len());
        for id in wanted {
            if let Some(record) = read_json(&self.activity_path(id)).await? {
                loaded.push(record);
            }
        }
        Ok(loaded)
    }

    async fn max_activity_id(&self) -> Result<ActivityId> {
        let mut max = ActivityId::ZERO;
        let mut rd = fs::read_dir(self.root.join("activities")).await?;
        while let Some(entry) = rd.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let parsed = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok());
            if let Some(raw) = parsed {
                max = max.max(ActivityId::new(raw));
            }
        }
        Ok(max)
    }

    async fn save_completion_state(&self, state: &CompletionState) -> Result<()> {
        let json = serde_json::to_string_pretty(state)?;
        let _guard = self.write_lock.lock().await;
        write_atomic(&self.state_path(), json.as_bytes()).await?;
        let version = self.bump_version("completion_state").await?;
        debug!(state = %state, version, "completion state saved");
        Ok(())
    }

    async fn load_completion_state(&self) -> Result<ResumePoint> {
        let state = read_json(&self.state_path()).await?.unwrap_or_default();
        let store_max_id = self.max_activity_id().await?;
        Ok(ResumePoint { state, store_max_id })
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn list_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut rd = fs::read_dir(dir).await?;
    while let Some(entry) = rd.next_entry().await? {
        if entry.path().extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        if let Ok(Some(item)) = read_json(&entry.path()).await {
            items.push(item);
        }
    }
    Ok(items)
}
