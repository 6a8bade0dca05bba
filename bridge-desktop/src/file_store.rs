//! JSON file backed key-value storage.
//!
//! All entries live in one JSON object on disk. Every mutation rewrites the
//! file through a temp file + rename so a crash mid-write never leaves a
//! truncated document behind. A tokio `Mutex` serializes writers within the
//! process; separate processes sharing one file are last-write-wins.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::KeyValueStore,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

const DEFAULT_FILE_NAME: &str = "credentials.json";

pub struct FileKeyValueStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileKeyValueStore {
    /// Open (or lazily create) the store at `path`.
    ///
    /// A missing file starts empty. A file that does not parse is treated as
    /// empty and overwritten on the next write.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Discarding unreadable store file");
                BTreeMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(BridgeError::Io(e)),
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Open the store in the platform data directory
    /// (`~/.local/share/<app_name>/credentials.json` on Linux).
    pub async fn open_default(app_name: &str) -> Result<Self> {
        let dir = dirs::data_dir()
            .ok_or_else(|| BridgeError::NotAvailable("platform data directory".to_string()))?
            .join(app_name);

        tokio::fs::create_dir_all(&dir).await?;
        Self::open(dir.join(DEFAULT_FILE_NAME)).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Write the store atomically with owner-only permissions.
async fn write_atomic(path: &Path, data: &BTreeMap<String, String>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| BridgeError::Storage(format!("serializing store: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| BridgeError::Storage("store path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes()).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms).await?;
    }

    tokio::fs::rename(&tmp_path, path).await?;

    debug!(path = %path.display(), entries = data.len(), "Persisted store");
    Ok(())
}

#[async_trait]
impl KeyValueStore for FileKeyValueStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), value.to_string());
        write_atomic(&self.path, &entries).await
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if entries.remove(key).is_some() {
            write_atomic(&self.path, &entries).await?;
        }
        Ok(())
    }
}
