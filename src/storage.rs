use crate::models::{ActiveTimerSnapshot, StorageSnapshot};
use crate::notify::NotificationConfig;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

pub const SNAPSHOT_KEY: &str = "productivity-tracker-data";
pub const ACTIVE_TIMER_KEY: &str = "active-timer";
pub const NOTIFICATION_CONFIG_KEY: &str = "notification-config";

/// Raw string values under fixed keys. Serialization lives in [`Storage`].
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// One `<key>.json` file per key inside a directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: PathBuf) -> Self {
        if !dir.exists() {
            let _ = fs::create_dir_all(&dir);
        }
        Self { dir }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Some(data))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key);
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)?;
        }
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, value)?;
        fs::rename(&tmp_path, &path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }
}

/// Typed handle over a [`KeyValueStore`]. Clones share the same backend.
#[derive(Clone)]
pub struct Storage {
    backend: Arc<dyn KeyValueStore>,
}

impl Storage {
    pub fn get_base_dir() -> Result<PathBuf> {
        let path = match std::env::var_os("TIBLO_HOME") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir()
                .ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?
                .join(".tiblo"),
        };
        if !path.exists() {
            fs::create_dir_all(&path)?;
        }
        Ok(path)
    }

    pub fn new() -> Result<Self> {
        let path = Self::get_base_dir()?;
        Ok(Self::from_path(path.join("state")))
    }

    pub fn from_path(dir: impl AsRef<Path>) -> Self {
        Self::with_backend(FileStore::new(dir.as_ref().to_path_buf()))
    }

    pub fn in_memory() -> Self {
        Self::with_backend(MemoryStore::default())
    }

    pub fn with_backend(backend: impl KeyValueStore + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    pub fn load_snapshot(&self) -> Result<Option<StorageSnapshot>> {
        self.load_json(SNAPSHOT_KEY)
    }

    pub fn save_snapshot(&self, snapshot: &StorageSnapshot) -> Result<()> {
        self.save_json(SNAPSHOT_KEY, snapshot)
    }

    pub fn load_active_timer(&self) -> Result<Option<ActiveTimerSnapshot>> {
        self.load_json(ACTIVE_TIMER_KEY)
    }

    pub fn save_active_timer(&self, timer: &ActiveTimerSnapshot) -> Result<()> {
        self.save_json(ACTIVE_TIMER_KEY, timer)
    }

    pub fn clear_active_timer(&self) -> Result<()> {
        self.backend.remove(ACTIVE_TIMER_KEY)
    }

    pub fn load_notification_config(&self) -> Result<NotificationConfig> {
        Ok(self
            .load_json(NOTIFICATION_CONFIG_KEY)?
            .unwrap_or_default())
    }

    pub fn save_notification_config(&self, config: &NotificationConfig) -> Result<()> {
        self.save_json(NOTIFICATION_CONFIG_KEY, config)
    }

    /// Removes block state and the active timer. Notification settings survive.
    pub fn clear_data(&self) -> Result<()> {
        self.backend.remove(SNAPSHOT_KEY)?;
        self.backend.remove(ACTIVE_TIMER_KEY)?;
        Ok(())
    }

    fn load_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(data) = self.backend.get(key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&data) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!("Ignoring malformed record under '{}': {}", key, e);
                Ok(None)
            }
        }
    }

    fn save_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let data = serde_json::to_string_pretty(value)?;
        self.backend.set(key, &data)?;
        debug!("Saved '{}'", key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BlockStatus, TimeBlock};
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    #[test]
    fn test_snapshot_save_load() -> Result<()> {
        let dir = tempdir()?;
        let storage = Storage::from_path(dir.path().join("state"));

        let mut snapshot = StorageSnapshot::with_defaults(1, 600);
        let mut block = snapshot.waiting_blocks.remove(0);
        block.status = BlockStatus::Completed;
        block.description = Some("wrote the parser".to_string());
        block.image_path = Some("uploads/1-shot.png".to_string());
        snapshot.completed_blocks.push(block);
        snapshot.in_progress_blocks.push(TimeBlock {
            status: BlockStatus::InProgress,
            ..snapshot.waiting_blocks.remove(0)
        });
        snapshot.break_time_minutes = 25;

        storage.save_snapshot(&snapshot)?;

        let loaded = storage.load_snapshot()?;
        assert_eq!(loaded, Some(snapshot));

        Ok(())
    }

    #[test]
    fn test_load_nonexistent() -> Result<()> {
        let dir = tempdir()?;
        let storage = Storage::from_path(dir.path().join("nonexistent"));

        assert!(storage.load_snapshot()?.is_none());
        assert!(storage.load_active_timer()?.is_none());
        assert!(storage.load_notification_config()?.enabled);

        Ok(())
    }

    #[test]
    fn test_malformed_record_is_absent() -> Result<()> {
        let dir = tempdir()?;
        let state_dir = dir.path().join("state");
        let storage = Storage::from_path(&state_dir);

        fs::write(state_dir.join("productivity-tracker-data.json"), "{not json")?;
        fs::write(state_dir.join("active-timer.json"), "[1, 2")?;

        assert!(storage.load_snapshot()?.is_none());
        assert!(storage.load_active_timer()?.is_none());

        Ok(())
    }

    #[test]
    fn test_active_timer_records_are_independent() -> Result<()> {
        let storage = Storage::in_memory();
        let timer = ActiveTimerSnapshot {
            block_id: Some("block-3".to_string()),
            end_time: Utc.with_ymd_and_hms(2024, 3, 1, 9, 10, 0).unwrap(),
            description: "draft".to_string(),
            paused_remaining: None,
        };

        storage.save_snapshot(&StorageSnapshot::with_defaults(1, 600))?;
        storage.save_active_timer(&timer)?;
        assert_eq!(storage.load_active_timer()?, Some(timer));

        storage.clear_active_timer()?;
        assert!(storage.load_active_timer()?.is_none());
        assert!(storage.load_snapshot()?.is_some());

        // clearing twice is fine
        storage.clear_active_timer()?;

        Ok(())
    }

    #[test]
    fn test_clear_data_keeps_notification_config() -> Result<()> {
        let storage = Storage::in_memory();
        let config = NotificationConfig {
            enabled: false,
            ..NotificationConfig::default()
        };
        storage.save_notification_config(&config)?;
        storage.save_snapshot(&StorageSnapshot::default())?;

        storage.clear_data()?;

        assert!(storage.load_snapshot()?.is_none());
        assert!(!storage.load_notification_config()?.enabled);

        Ok(())
    }

    #[test]
    fn test_active_timer_accepts_record_without_block_id() -> Result<()> {
        let storage = Storage::in_memory();
        storage.backend.set(
            ACTIVE_TIMER_KEY,
            r#"{"end_time":"2024-03-01T09:10:00Z","description":"x"}"#,
        )?;

        let timer = storage.load_active_timer()?.expect("record present");
        assert_eq!(timer.block_id, None);
        assert_eq!(timer.paused_remaining, None);

        Ok(())
    }
}
