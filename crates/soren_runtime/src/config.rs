//! Process Configuration
//!
//! Everything a plugin process needs to know before it can connect: where the
//! agent is, who it is, and which channels carry events and stored settings.
//! Values come from an optional TOML file, overridden by environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PluginError, PluginResult};
use crate::retry::RetryPolicy;

pub const ENV_AGENT_URI: &str = "AGENT_URI";
pub const ENV_PLUGIN_ID: &str = "PLUGIN_ID";
pub const ENV_AUTH_KEY: &str = "SOREN_AUTH_KEY";
pub const ENV_EVENT_CHANNEL: &str = "SOREN_EVENT_CHANNEL";
pub const ENV_STORE_CHANNEL: &str = "SOREN_STORE";

// ─────────────────────────────────────────────────────────────────────────────
// SDK Config
// ─────────────────────────────────────────────────────────────────────────────

/// Connection and identity settings of a plugin process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdkConfig {
    /// Bus endpoint of the agent
    pub agent_uri: String,

    /// Identifier embedded in every subject the plugin uses
    pub plugin_id: String,

    /// Sent as the `Authorization` header on platform requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_key: Option<String>,

    /// Event channel prefix; events are dropped when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_channel: Option<String>,

    /// Persistent-store channel prefix used by [`crate::BusStore`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_channel: Option<String>,
}

/// Same fields as [`SdkConfig`], all optional, for layering sources
#[derive(Debug, Clone, Default, Deserialize)]
struct PartialConfig {
    agent_uri: Option<String>,
    plugin_id: Option<String>,
    auth_key: Option<String>,
    event_channel: Option<String>,
    store_channel: Option<String>,
}

impl PartialConfig {
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        // Empty variables count as unset
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        Self {
            agent_uri: get(ENV_AGENT_URI),
            plugin_id: get(ENV_PLUGIN_ID),
            auth_key: get(ENV_AUTH_KEY),
            event_channel: get(ENV_EVENT_CHANNEL),
            store_channel: get(ENV_STORE_CHANNEL),
        }
    }

    /// Fields set in `other` win
    fn merge(self, other: PartialConfig) -> Self {
        Self {
            agent_uri: other.agent_uri.or(self.agent_uri),
            plugin_id: other.plugin_id.or(self.plugin_id),
            auth_key: other.auth_key.or(self.auth_key),
            event_channel: other.event_channel.or(self.event_channel),
            store_channel: other.store_channel.or(self.store_channel),
        }
    }

    fn finish(self) -> PluginResult<SdkConfig> {
        let agent_uri = self
            .agent_uri
            .ok_or_else(|| PluginError::Config("agent URI is required".into()))?;
        let plugin_id = self
            .plugin_id
            .ok_or_else(|| PluginError::Config("plugin ID is required".into()))?;

        let config = SdkConfig {
            agent_uri,
            plugin_id,
            auth_key: self.auth_key,
            event_channel: self.event_channel,
            store_channel: self.store_channel,
        };
        config.validate()?;
        Ok(config)
    }
}

impl SdkConfig {
    pub fn new(agent_uri: impl Into<String>, plugin_id: impl Into<String>) -> Self {
        Self {
            agent_uri: agent_uri.into(),
            plugin_id: plugin_id.into(),
            auth_key: None,
            event_channel: None,
            store_channel: None,
        }
    }

    pub fn with_auth_key(mut self, auth_key: impl Into<String>) -> Self {
        self.auth_key = Some(auth_key.into());
        self
    }

    pub fn with_event_channel(mut self, channel: impl Into<String>) -> Self {
        self.event_channel = Some(channel.into());
        self
    }

    pub fn with_store_channel(mut self, channel: impl Into<String>) -> Self {
        self.store_channel = Some(channel.into());
        self
    }

    /// Read the configuration from the process environment
    pub fn from_env() -> PluginResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> PluginResult<Self> {
        PartialConfig::from_lookup(lookup).finish()
    }

    /// Parse a TOML document; every field must be present
    pub fn from_toml_str(source: &str) -> PluginResult<Self> {
        let partial: PartialConfig = toml::from_str(source)
            .map_err(|e| PluginError::Config(format!("invalid config file: {e}")))?;
        partial.finish()
    }

    /// Layer an optional TOML file under the process environment
    pub fn load(path: Option<&Path>) -> PluginResult<Self> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    pub fn load_with(
        path: Option<&Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> PluginResult<Self> {
        let file = match path {
            Some(path) => {
                let source = std::fs::read_to_string(path).map_err(|e| {
                    PluginError::Config(format!("cannot read {}: {e}", path.display()))
                })?;
                toml::from_str::<PartialConfig>(&source).map_err(|e| {
                    PluginError::Config(format!("invalid config file {}: {e}", path.display()))
                })?
            }
            None => PartialConfig::default(),
        };

        file.merge(PartialConfig::from_lookup(lookup)).finish()
    }

    /// Reject identifiers that would break subject construction
    pub fn validate(&self) -> PluginResult<()> {
        if self.agent_uri.trim().is_empty() {
            return Err(PluginError::Config("agent URI is required".into()));
        }
        if self.plugin_id.trim().is_empty() {
            return Err(PluginError::Config("plugin ID is required".into()));
        }
        if self
            .plugin_id
            .chars()
            .any(|c| c == '.' || c == '*' || c == '>' || c.is_whitespace())
        {
            return Err(PluginError::Config(format!(
                "plugin ID '{}' must be a single subject token",
                self.plugin_id
            )));
        }
        Ok(())
    }

    pub fn normalized_uri(&self) -> String {
        normalize_agent_uri(&self.agent_uri)
    }
}

/// Prefix bare `host:port` URIs with `nats://`
pub fn normalize_agent_uri(uri: &str) -> String {
    const SCHEMES: [&str; 4] = ["nats://", "tls://", "ws://", "wss://"];
    if SCHEMES.iter().any(|scheme| uri.starts_with(scheme)) {
        uri.to_string()
    } else {
        format!("nats://{uri}")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Runtime Options
// ─────────────────────────────────────────────────────────────────────────────

/// Timeouts and retry behaviour of the runtime
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Bound on publish, subscribe and reply calls
    pub transport_timeout: Duration,

    /// Timeout of request/reply round trips to the platform (events, store)
    pub request_timeout: Duration,

    /// When set, the intro announcement waits for an acknowledgment
    pub handshake_timeout: Option<Duration>,

    /// When set, job notifications wait for an acknowledgment
    pub job_ack_timeout: Option<Duration>,

    /// How long a settings update waits for the previous one to finish
    pub settings_update_wait: Duration,

    /// Retry policy for job notifications and events
    pub retry: RetryPolicy,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            transport_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(3),
            handshake_timeout: None,
            job_ack_timeout: None,
            settings_update_wait: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

impl RuntimeOptions {
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }

    pub fn with_job_ack_timeout(mut self, timeout: Duration) -> Self {
        self.job_ack_timeout = Some(timeout);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_settings_update_wait(mut self, wait: Duration) -> Self {
        self.settings_update_wait = wait;
        self
    }
}
