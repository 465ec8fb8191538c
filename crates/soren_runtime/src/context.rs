//! Plugin Context
//!
//! The capability handle every handler receives: read settings, start jobs,
//! publish job notifications and events. Cheap to clone.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use soren_types::{EventRecord, LogLevel};

use crate::error::PluginResult;
use crate::events::EventEmitter;
use crate::jobs::{Job, JobTracker};
use crate::settings::ConfigSync;

#[derive(Clone)]
pub struct PluginContext {
    plugin_id: Arc<str>,
    settings: Arc<ConfigSync>,
    jobs: Arc<JobTracker>,
    events: Arc<EventEmitter>,
}

impl PluginContext {
    pub fn new(
        plugin_id: impl Into<Arc<str>>,
        settings: Arc<ConfigSync>,
        jobs: Arc<JobTracker>,
        events: Arc<EventEmitter>,
    ) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            settings,
            jobs,
            events,
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Settings
    // ─────────────────────────────────────────────────────────────────────────

    /// Current settings value
    pub fn get_configuration(&self) -> Option<Value> {
        self.settings.get()
    }

    pub fn configuration_as<T: DeserializeOwned>(&self) -> Option<T> {
        self.settings.get_as()
    }

    pub fn settings(&self) -> &Arc<ConfigSync> {
        &self.settings
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Jobs
    // ─────────────────────────────────────────────────────────────────────────

    pub fn new_job_id(&self) -> String {
        self.jobs.new_job_id()
    }

    /// Start a job for `method`; reply with [`Job::accepted`]
    pub fn begin_job(&self, method: impl Into<String>) -> Job {
        Job::new(Arc::clone(&self.jobs), method)
    }

    pub async fn progress(&self, job_id: &str, payload: Value) -> PluginResult<()> {
        self.jobs.progress(job_id, payload).await
    }

    pub async fn done(&self, job_id: &str, result: Value) -> PluginResult<()> {
        self.jobs.done(job_id, result).await
    }

    pub async fn error(&self, job_id: &str, info: Value) -> PluginResult<()> {
        self.jobs.error(job_id, info).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Events
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn log(
        &self,
        source: &str,
        level: LogLevel,
        message: impl Into<String>,
        details: Option<Value>,
    ) {
        self.events.log(source, level, message, details).await
    }

    pub async fn emit_event(
        &self,
        event_type: &str,
        level: LogLevel,
        message: impl Into<String>,
        data: Option<Value>,
    ) {
        self.events.emit_event(event_type, level, message, data).await
    }

    pub async fn send_events(&self, records: Vec<EventRecord>) {
        self.events.send_events(records).await
    }
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("plugin_id", &self.plugin_id)
            .finish()
    }
}
