//! Configuration Synchronizer
//!
//! Holds the remotely editable settings value. Updates arrive on
//! `soren.v2.<plugin>.<replyTo>`, run through the plugin's update hook and the
//! optional store, and only then replace the in-memory value.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use soren_types::{DEFAULT_SETTINGS_REPLY_TO, SettingsDeclaration, SettingsReply};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::PluginError;
use crate::handler::panic_message;
use crate::store::SettingsStore;

/// Validation and side-effect hook run before an update is accepted
pub type UpdateHook = Arc<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

// ─────────────────────────────────────────────────────────────────────────────
// Settings Spec
// ─────────────────────────────────────────────────────────────────────────────

/// Settings form, initial value and update hook declared by a plugin
#[derive(Clone)]
pub struct SettingsSpec {
    pub(crate) jsonui: Value,
    pub(crate) jsonschema: Value,
    pub(crate) reply_to: String,
    pub(crate) data: Option<Value>,
    pub(crate) on_update: Option<UpdateHook>,
}

impl SettingsSpec {
    pub fn new(jsonui: Value, jsonschema: Value) -> Self {
        Self {
            jsonui,
            jsonschema,
            reply_to: DEFAULT_SETTINGS_REPLY_TO.to_string(),
            data: None,
            on_update: None,
        }
    }

    /// Subject suffix updates are pushed to
    pub fn reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = reply_to.into();
        self
    }

    /// Value used until an update is accepted or a persisted value is loaded
    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Hook deciding whether an update is accepted; an `Err` rejects it
    pub fn on_update<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let hook: UpdateHook =
            Arc::new(move |value| -> BoxFuture<'static, anyhow::Result<()>> { Box::pin(hook(value)) });
        self.on_update = Some(hook);
        self
    }
}

impl std::fmt::Debug for SettingsSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsSpec")
            .field("reply_to", &self.reply_to)
            .field("data", &self.data)
            .field("on_update", &self.on_update.is_some())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Config Sync
// ─────────────────────────────────────────────────────────────────────────────

/// Current settings value plus the machinery to update it
pub struct ConfigSync {
    value: RwLock<Option<Value>>,
    /// Serializes updates; the value lock is only held for the swap
    update_lock: Mutex<()>,
    update_wait: Duration,
    jsonui: Value,
    jsonschema: Value,
    reply_to: String,
    on_update: Option<UpdateHook>,
    store: Option<Arc<dyn SettingsStore>>,
    declared: bool,
}

impl ConfigSync {
    pub fn new(
        spec: Option<SettingsSpec>,
        store: Option<Arc<dyn SettingsStore>>,
        update_wait: Duration,
    ) -> Self {
        let declared = spec.is_some();
        let spec = spec.unwrap_or_else(|| SettingsSpec::new(Value::Null, Value::Null));

        Self {
            value: RwLock::new(spec.data),
            update_lock: Mutex::new(()),
            update_wait,
            jsonui: spec.jsonui,
            jsonschema: spec.jsonschema,
            reply_to: spec.reply_to,
            on_update: spec.on_update,
            store,
            declared,
        }
    }

    /// Whether the plugin declared a settings form at all
    pub fn is_declared(&self) -> bool {
        self.declared
    }

    pub fn reply_to(&self) -> &str {
        &self.reply_to
    }

    /// Current value, `None` when nothing has been set yet
    pub fn get(&self) -> Option<Value> {
        self.value.read().clone()
    }

    /// Current value deserialized into a typed struct
    pub fn get_as<T: DeserializeOwned>(&self) -> Option<T> {
        let value = self.value.read();
        value
            .as_ref()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// The document served on `@settings`, `None` when nothing is declared
    pub fn declaration(&self) -> Option<SettingsDeclaration> {
        if !self.declared {
            return None;
        }
        Some(SettingsDeclaration {
            reply_to: self.reply_to.clone(),
            jsonui: self.jsonui.clone(),
            jsonschema: self.jsonschema.clone(),
            data: self.get(),
        })
    }

    /// Replace the initial value with the stored one, if any
    ///
    /// A load failure keeps the initial value.
    pub async fn load_persisted(&self) {
        let Some(store) = &self.store else {
            return;
        };

        match store.load().await {
            Ok(Some(value)) => {
                *self.value.write() = Some(value);
                info!("Loaded persisted settings");
            }
            Ok(None) => debug!("No persisted settings"),
            Err(e) => warn!(error = %e, "Cannot load persisted settings, keeping initial value"),
        }
    }

    /// Apply one update message
    pub async fn apply_update(&self, raw: &[u8]) -> SettingsReply {
        let _guard = match tokio::time::timeout(self.update_wait, self.update_lock.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                warn!("Settings update rejected, previous update still running");
                return SettingsReply::busy();
            }
        };

        let value: Value = match serde_json::from_slice(raw) {
            Ok(value) => value,
            Err(e) => return SettingsReply::rejected(format!("settings are not valid JSON: {e}")),
        };

        if let Some(hook) = &self.on_update {
            let outcome = AssertUnwindSafe(async { hook(value.clone()).await })
                .catch_unwind()
                .await;
            let reason = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(payload) => Some(format!("update hook panicked: {}", panic_message(payload))),
            };
            if let Some(reason) = reason {
                let err = PluginError::Validation(reason.clone());
                info!(error = %err, "Settings update rejected");
                return SettingsReply::rejected(reason);
            }
        }

        if let Some(store) = &self.store {
            if let Err(e) = store.save(&value).await {
                warn!(error = %e, "Settings update could not be persisted");
                return SettingsReply::rejected(e.to_string());
            }
        }

        *self.value.write() = Some(value);
        info!("Settings update accepted");
        SettingsReply::accepted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PluginResult;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;
    use soren_types::SettingsStatus;

    fn api_key_spec() -> SettingsSpec {
        SettingsSpec::new(json!({"type": "VerticalLayout"}), json!({"type": "object"}))
            .data(json!({"api_key": "initial"}))
            .on_update(|value: Value| async move {
                match value.get("api_key").and_then(Value::as_str) {
                    Some(key) if !key.is_empty() => Ok(()),
                    _ => anyhow::bail!("api_key is required"),
                }
            })
    }

    struct FailingStore;

    #[async_trait]
    impl SettingsStore for FailingStore {
        async fn load(&self) -> PluginResult<Option<Value>> {
            Err(PluginError::Persistence("disk gone".into()))
        }

        async fn save(&self, _value: &Value) -> PluginResult<()> {
            Err(PluginError::Persistence("disk gone".into()))
        }
    }

    #[tokio::test]
    async fn test_accepted_update_is_visible() {
        let sync = ConfigSync::new(Some(api_key_spec()), None, Duration::from_secs(1));

        let reply = sync.apply_update(br#"{"api_key":"k1"}"#).await;

        assert!(reply.is_accepted());
        assert_eq!(sync.get(), Some(json!({"api_key": "k1"})));
    }

    #[tokio::test]
    async fn test_rejected_update_keeps_value() {
        let sync = ConfigSync::new(Some(api_key_spec()), None, Duration::from_secs(1));

        let reply = sync.apply_update(br#"{"other":"x"}"#).await;

        assert_eq!(reply.status, SettingsStatus::NotAccepted);
        assert_eq!(reply.error.as_deref(), Some("api_key is required"));
        assert_eq!(sync.get(), Some(json!({"api_key": "initial"})));
    }

    #[tokio::test]
    async fn test_undecodable_update_is_rejected() {
        let sync = ConfigSync::new(Some(api_key_spec()), None, Duration::from_secs(1));

        let reply = sync.apply_update(b"{oops").await;

        assert_eq!(reply.status, SettingsStatus::NotAccepted);
        assert_eq!(sync.get(), Some(json!({"api_key": "initial"})));
    }

    #[tokio::test]
    async fn test_panicking_hook_is_rejected() {
        let spec = SettingsSpec::new(json!({}), json!({})).on_update(|value: Value| async move {
            if value.get("boom").is_some() {
                panic!("hook exploded");
            }
            Ok(())
        });
        let sync = ConfigSync::new(Some(spec), None, Duration::from_millis(50));

        let reply = sync.apply_update(br#"{"boom":1}"#).await;
        assert_eq!(reply.status, SettingsStatus::NotAccepted);
        assert!(reply.error.as_deref().unwrap().contains("hook exploded"));
        assert_eq!(sync.get(), None);

        // The update lock was released
        assert!(sync.apply_update(br#"{"ok":1}"#).await.is_accepted());
    }

    #[tokio::test]
    async fn test_store_failure_rejects_update() {
        let store: Arc<dyn SettingsStore> = Arc::new(FailingStore);
        let sync = ConfigSync::new(Some(api_key_spec()), Some(store), Duration::from_secs(1));

        let reply = sync.apply_update(br#"{"api_key":"k1"}"#).await;

        assert!(!reply.is_accepted());
        assert_eq!(sync.get(), Some(json!({"api_key": "initial"})));
    }

    #[tokio::test]
    async fn test_accepted_update_is_persisted_and_reloaded() {
        let store = Arc::new(MemoryStore::new());
        let sync = ConfigSync::new(
            Some(api_key_spec()),
            Some(store.clone() as Arc<dyn SettingsStore>),
            Duration::from_secs(1),
        );
        sync.apply_update(br#"{"api_key":"k9"}"#).await;
        assert_eq!(store.current(), Some(json!({"api_key": "k9"})));

        let restarted = ConfigSync::new(
            Some(api_key_spec()),
            Some(store as Arc<dyn SettingsStore>),
            Duration::from_secs(1),
        );
        restarted.load_persisted().await;
        assert_eq!(restarted.get(), Some(json!({"api_key": "k9"})));
    }

    #[tokio::test]
    async fn test_load_failure_keeps_initial_value() {
        let store: Arc<dyn SettingsStore> = Arc::new(FailingStore);
        let sync = ConfigSync::new(Some(api_key_spec()), Some(store), Duration::from_secs(1));

        sync.load_persisted().await;
        assert_eq!(sync.get(), Some(json!({"api_key": "initial"})));
    }

    #[tokio::test]
    async fn test_slow_update_makes_next_one_busy() {
        let spec = SettingsSpec::new(json!({}), json!({})).on_update(|_| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        });
        let sync = Arc::new(ConfigSync::new(Some(spec), None, Duration::from_millis(20)));

        let first = {
            let sync = Arc::clone(&sync);
            tokio::spawn(async move { sync.apply_update(b"{\"n\":1}").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = sync.apply_update(b"{\"n\":2}").await;
        assert_eq!(second.status, SettingsStatus::Busy);
        assert!(first.await.unwrap().is_accepted());
        assert_eq!(sync.get(), Some(json!({"n": 1})));
    }

    #[test]
    fn test_declaration() {
        let sync = ConfigSync::new(Some(api_key_spec()), None, Duration::from_secs(1));
        let declaration = sync.declaration().unwrap();

        assert_eq!(declaration.reply_to, DEFAULT_SETTINGS_REPLY_TO);
        assert_eq!(declaration.data, Some(json!({"api_key": "initial"})));

        let undeclared = ConfigSync::new(None, None, Duration::from_secs(1));
        assert!(undeclared.declaration().is_none());
        assert!(undeclared.get().is_none());
    }

    #[test]
    fn test_typed_access() {
        #[derive(serde::Deserialize)]
        struct Settings {
            api_key: String,
        }

        let sync = ConfigSync::new(Some(api_key_spec()), None, Duration::from_secs(1));
        let settings: Settings = sync.get_as().unwrap();
        assert_eq!(settings.api_key, "initial");
    }
}
