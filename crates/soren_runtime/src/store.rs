//! Settings Persistence
//!
//! Where the last accepted settings value survives a restart. The runtime only
//! needs `load` and `save`; three backends are provided.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::error::{PluginError, PluginResult};
use crate::subjects::Subjects;
use crate::transport::{Headers, SharedTransport};

/// Storage collaborator for the settings value
#[async_trait]
pub trait SettingsStore: Send + Sync + 'static {
    /// Last saved value, `None` when nothing was saved yet
    async fn load(&self) -> PluginResult<Option<Value>>;

    async fn save(&self, value: &Value) -> PluginResult<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// JSON File Store
// ─────────────────────────────────────────────────────────────────────────────

/// Stores the value as a pretty-printed JSON file
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SettingsStore for JsonFileStore {
    async fn load(&self) -> PluginResult<Option<Value>> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(PluginError::Persistence(format!(
                    "cannot read {}: {e}",
                    self.path.display()
                )));
            }
        };

        let value = serde_json::from_slice(&contents).map_err(|e| {
            PluginError::Persistence(format!("{} is not valid JSON: {e}", self.path.display()))
        })?;
        Ok(Some(value))
    }

    async fn save(&self, value: &Value) -> PluginResult<()> {
        let contents = serde_json::to_vec_pretty(value)?;

        // Write next to the target and rename so a crash never leaves half a file
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents)
            .await
            .map_err(|e| PluginError::Persistence(format!("cannot write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            PluginError::Persistence(format!("cannot replace {}: {e}", self.path.display()))
        })?;

        debug!(path = %self.path.display(), "Settings saved");
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory Store
// ─────────────────────────────────────────────────────────────────────────────

/// Keeps the value in memory; lost on restart
#[derive(Debug, Default)]
pub struct MemoryStore {
    value: RwLock<Option<Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(value: Value) -> Self {
        Self {
            value: RwLock::new(Some(value)),
        }
    }

    pub fn current(&self) -> Option<Value> {
        self.value.read().clone()
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn load(&self) -> PluginResult<Option<Value>> {
        Ok(self.value.read().clone())
    }

    async fn save(&self, value: &Value) -> PluginResult<()> {
        *self.value.write() = Some(value.clone());
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bus Store
// ─────────────────────────────────────────────────────────────────────────────

/// Stores the value through the platform's persistent-store channel
///
/// `load` requests `<channel>.<plugin>.get` and expects the stored value (or
/// `null`); `save` requests `<channel>.<plugin>.set` with the value as body.
pub struct BusStore {
    transport: SharedTransport,
    get_subject: String,
    set_subject: String,
    auth_key: Option<String>,
    timeout: Duration,
}

impl BusStore {
    pub fn new(
        transport: SharedTransport,
        subjects: &Subjects,
        store_channel: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            get_subject: subjects.store(store_channel, "get"),
            set_subject: subjects.store(store_channel, "set"),
            auth_key: None,
            timeout,
        }
    }

    pub fn with_auth_key(mut self, auth_key: Option<String>) -> Self {
        self.auth_key = auth_key;
        self
    }

    fn headers(&self) -> Headers {
        let mut headers = Headers::new();
        if let Some(key) = &self.auth_key {
            headers.insert("Authorization".to_string(), key.clone());
        }
        headers
    }
}

#[async_trait]
impl SettingsStore for BusStore {
    async fn load(&self) -> PluginResult<Option<Value>> {
        let reply = self
            .transport
            .request(&self.get_subject, self.headers(), Bytes::new(), self.timeout)
            .await
            .map_err(|e| PluginError::Persistence(e.to_string()))?;

        if reply.payload.is_empty() {
            return Ok(None);
        }
        let value: Value = reply
            .json()
            .map_err(|e| PluginError::Persistence(format!("store reply is not JSON: {e}")))?;
        Ok(if value.is_null() { None } else { Some(value) })
    }

    async fn save(&self, value: &Value) -> PluginResult<()> {
        let payload = Bytes::from(serde_json::to_vec(value)?);
        let reply = self
            .transport
            .request(&self.set_subject, self.headers(), payload, self.timeout)
            .await
            .map_err(|e| PluginError::Persistence(e.to_string()))?;

        // The store answers `{"error": ..}` when it refuses the write
        match reply.json::<Value>() {
            Ok(Value::Object(body)) if body.contains_key("error") => Err(PluginError::Persistence(
                format!("store refused value: {}", body["error"]),
            )),
            _ => Ok(()),
        }
    }
}
