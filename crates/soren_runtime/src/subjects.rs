//! Subject Naming
//!
//! Every subject a plugin touches is derived from its plugin ID, so a restarted
//! process resubscribes to exactly the same subjects without coordination.

use soren_types::JobCommand;

use crate::error::{PluginError, PluginResult};

/// Subject builder for one plugin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subjects {
    plugin_id: String,
}

impl Subjects {
    pub fn new(plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// `soren.v2.<plugin>.<action>`
    pub fn control(&self, action: &str) -> String {
        format!("soren.v2.{}.{}", self.plugin_id, action)
    }

    pub fn intro(&self) -> String {
        self.control("@intro")
    }

    pub fn settings(&self) -> String {
        self.control("@settings")
    }

    pub fn actions(&self) -> String {
        self.control("@actions")
    }

    /// Form of one operation
    pub fn form(&self, method: &str) -> String {
        format!("soren.v2.{}.{}.@form", self.plugin_id, method)
    }

    /// Where intro/settings/catalog are announced at startup
    pub fn announce(&self, document: &str) -> String {
        format!("soren.v2.announce.{}.{}", self.plugin_id, document)
    }

    /// Dispatch subject of one operation
    pub fn operation(&self, method: &str) -> String {
        format!("soren.cpu.{}.{}", self.plugin_id, method)
    }

    /// Notification subject of one job command
    pub fn job(&self, job_id: &str, command: JobCommand) -> String {
        format!("soren.cpu.{}.{}.{}", self.plugin_id, job_id, command.as_str())
    }

    /// All notifications of one job
    pub fn job_events(&self, job_id: &str) -> String {
        format!("soren.cpu.{}.{}.*", self.plugin_id, job_id)
    }

    /// Event channel subject
    pub fn events(&self, event_channel: &str) -> String {
        format!("{}.{}.log", event_channel, self.plugin_id)
    }

    /// Persistent-store subject for a store verb (`get`, `set`)
    pub fn store(&self, store_channel: &str, verb: &str) -> String {
        format!("{}.{}.{}", store_channel, self.plugin_id, verb)
    }
}

/// Reject names that would not land on exactly one concrete subject
///
/// Dotted names are allowed, but every token must be non-empty and free of
/// wildcards and whitespace.
pub fn validate_subject_name(kind: &str, name: &str) -> PluginResult<()> {
    let valid = !name.is_empty()
        && name.split('.').all(|token| {
            !token.is_empty()
                && !token
                    .chars()
                    .any(|c| c == '*' || c == '>' || c.is_whitespace())
        });
    if valid {
        Ok(())
    } else {
        Err(PluginError::Config(format!(
            "{kind} '{name}' is not a valid subject name"
        )))
    }
}
