//! Plugin
//!
//! Composition root of the runtime. A [`PluginBuilder`] collects the intro,
//! settings, operations and options; [`Plugin::start`] runs the startup
//! sequence on the shared transport and hands back a [`RunningPlugin`].
//!
//! Startup order:
//! 1. load persisted settings
//! 2. announce intro, settings declaration and catalog
//! 3. serve the pull subjects
//! 4. subscribe the settings update subject
//! 5. subscribe the requirements subject and every operation

use std::future::Future;
use std::sync::Arc;

use serde_json::json;
use soren_types::{LogLevel, OperationInfo, PluginIntro};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::announce::Announcer;
use crate::config::{RuntimeOptions, SdkConfig};
use crate::context::PluginContext;
use crate::error::{PluginError, PluginResult};
use crate::events::EventEmitter;
use crate::handler::{HandlerResult, Operation, OperationHandler, Request};
use crate::jobs::JobTracker;
use crate::responder;
use crate::router::{DispatchRouter, Route};
use crate::settings::{ConfigSync, SettingsSpec};
use crate::store::SettingsStore;
use crate::subjects::{Subjects, validate_subject_name};
use crate::transport::SharedTransport;

/// Method name passed to the requirements handler
pub const REQUIREMENTS_METHOD: &str = "requirements";

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

pub struct PluginBuilder {
    config: SdkConfig,
    transport: SharedTransport,
    intro: Option<PluginIntro>,
    settings: Option<SettingsSpec>,
    store: Option<Arc<dyn SettingsStore>>,
    operations: Vec<Operation>,
    requirements_handler: Option<Arc<dyn OperationHandler>>,
    options: RuntimeOptions,
}

impl PluginBuilder {
    pub fn intro(mut self, intro: PluginIntro) -> Self {
        self.intro = Some(intro);
        self
    }

    pub fn settings(mut self, settings: SettingsSpec) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Where accepted settings are persisted
    ///
    /// Nothing is persisted without one. A [`BusStore`](crate::BusStore)
    /// only fits agents that answer the store channel's `get`/`set` requests.
    pub fn store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Register an operation; catalog order follows registration order
    pub fn operation(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }

    /// Handler of the requirements form submitted by the platform
    pub fn requirements_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(PluginContext, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: Arc<dyn OperationHandler> = Arc::new(handler);
        self.requirements_handler = Some(handler);
        self
    }

    pub fn options(mut self, options: RuntimeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> PluginResult<Plugin> {
        self.config.validate()?;
        let intro = self
            .intro
            .ok_or_else(|| PluginError::Config("plugin intro is required".into()))?;

        let subjects = Subjects::new(self.config.plugin_id.clone());
        let options = self.options;

        for op in &self.operations {
            validate_subject_name("operation method", op.method())?;
        }
        if let Some(requirements) = &intro.requirements {
            validate_subject_name("requirements reply subject", &requirements.reply_to)?;
        }
        if let Some(settings) = &self.settings {
            validate_subject_name("settings reply subject", &settings.reply_to)?;
        }

        // Operations and the requirements subject share one routing table
        let mut routes: Vec<Route> = self
            .operations
            .iter()
            .map(|op| Route::new(subjects.operation(op.method()), op.method(), op.handler()))
            .collect();

        if let Some(requirements) = &intro.requirements {
            let handler: Arc<dyn OperationHandler> = match self.requirements_handler {
                Some(handler) => handler,
                None => Arc::new(not_implemented),
            };
            routes.push(Route::new(
                subjects.control(&requirements.reply_to),
                REQUIREMENTS_METHOD,
                handler,
            ));
        }

        let settings_reply_to = self.settings.as_ref().map(|spec| spec.reply_to.clone());
        if let (Some(settings), Some(requirements)) = (&settings_reply_to, &intro.requirements) {
            if *settings == requirements.reply_to {
                return Err(PluginError::Config(format!(
                    "settings and requirements both use '{settings}'"
                )));
            }
        }

        let settings = Arc::new(ConfigSync::new(
            self.settings,
            self.store,
            options.settings_update_wait,
        ));
        let jobs = Arc::new(JobTracker::new(
            Arc::clone(&self.transport),
            subjects.clone(),
            options.transport_timeout,
            options.job_ack_timeout,
            options.retry,
        ));
        let events = Arc::new(EventEmitter::new(
            Arc::clone(&self.transport),
            &subjects,
            self.config.event_channel.as_deref(),
            self.config.auth_key.clone(),
            options.request_timeout,
            options.retry,
        ));
        let context = PluginContext::new(
            self.config.plugin_id.clone(),
            Arc::clone(&settings),
            jobs,
            events,
        );

        let router = DispatchRouter::new(
            routes,
            context.clone(),
            Arc::clone(&self.transport),
            options.transport_timeout,
        )?;

        let catalog: Vec<OperationInfo> = self.operations.iter().map(|op| op.info.clone()).collect();
        let announcer = Announcer::new(
            Arc::clone(&self.transport),
            subjects.clone(),
            intro,
            catalog,
            Arc::clone(&settings),
            options.transport_timeout,
            options.handshake_timeout,
        );

        Ok(Plugin {
            transport: self.transport,
            subjects,
            settings,
            announcer: Arc::new(announcer),
            router: Arc::new(router),
            context,
            options,
        })
    }
}

async fn not_implemented(_ctx: PluginContext, _request: Request) -> HandlerResult {
    Ok(json!({ "status": "not implemented" }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Plugin
// ─────────────────────────────────────────────────────────────────────────────

/// A fully described plugin, ready to start
pub struct Plugin {
    transport: SharedTransport,
    subjects: Subjects,
    settings: Arc<ConfigSync>,
    announcer: Arc<Announcer>,
    router: Arc<DispatchRouter>,
    context: PluginContext,
    options: RuntimeOptions,
}

impl Plugin {
    pub fn builder(config: SdkConfig, transport: SharedTransport) -> PluginBuilder {
        PluginBuilder {
            config,
            transport,
            intro: None,
            settings: None,
            store: None,
            operations: Vec::new(),
            requirements_handler: None,
            options: RuntimeOptions::default(),
        }
    }

    pub fn context(&self) -> PluginContext {
        self.context.clone()
    }

    pub fn subjects(&self) -> &Subjects {
        &self.subjects
    }

    /// Run the startup sequence
    ///
    /// Registration and subscription failures are returned; the caller is
    /// expected to treat them as fatal.
    pub async fn start(self) -> PluginResult<RunningPlugin> {
        self.settings.load_persisted().await;
        self.announcer.announce().await?;

        let mut tasks = self.announcer.serve().await?;

        if self.settings.is_declared() {
            let subject = self.subjects.control(self.settings.reply_to());
            let subscription =
                responder::subscribe(&self.transport, &subject, self.options.transport_timeout)
                    .await?;

            let settings = Arc::clone(&self.settings);
            let transport = Arc::clone(&self.transport);
            let timeout = self.options.transport_timeout;
            tasks.push(responder::serve(subscription, move |message| {
                let settings = Arc::clone(&settings);
                let transport = Arc::clone(&transport);
                async move {
                    let reply = settings.apply_update(&message.payload).await;
                    if !responder::reply(&transport, timeout, &message, &reply).await {
                        debug!(subject = %message.subject, status = ?reply.status, "Settings reply not sent");
                    }
                }
            }));
        }

        tasks.extend(self.router.subscribe_all().await?);

        info!(plugin_id = self.subjects.plugin_id(), "Plugin started");
        self.context
            .log("runtime", LogLevel::Info, "plugin started", None)
            .await;

        Ok(RunningPlugin {
            transport: self.transport,
            context: self.context,
            tasks,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Running Plugin
// ─────────────────────────────────────────────────────────────────────────────

/// Handle to a started plugin
pub struct RunningPlugin {
    transport: SharedTransport,
    context: PluginContext,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningPlugin {
    pub fn context(&self) -> PluginContext {
        self.context.clone()
    }

    /// Stop serving and close the transport
    pub async fn shutdown(self) -> PluginResult<()> {
        for task in &self.tasks {
            task.abort();
        }
        self.transport.close().await?;
        info!(plugin_id = self.context.plugin_id(), "Plugin stopped");
        Ok(())
    }
}
