//! Code analysis demo plugin
//!
//! Clones a repository and scans it into a graph. The work itself is
//! simulated; what matters is the shape of the plugin: settings persisted to a
//! JSON file, a synchronous operation and two job-based ones.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use soren_runtime::soren_types::{Frame, Icon, JobProgress, LogLevel, PluginIntro};
use soren_runtime::{
    JsonFileStore, Operation, Plugin, PluginContext, PluginResult, Request, SdkConfig,
    SettingsSpec, SettingsStore, SharedTransport,
};
use tracing::warn;

const REQUIRED_SETTINGS: [&str; 3] = ["project", "repository_name", "access_token"];

#[derive(Debug, Deserialize)]
struct RepoSettings {
    project: String,
    repository_name: String,
}

#[derive(Debug, Deserialize)]
struct ScanRequest {
    #[serde(default)]
    reponame: Option<String>,
}

/// Assemble the demo plugin on `transport`
pub async fn build(
    config: SdkConfig,
    transport: SharedTransport,
    settings_file: &Path,
) -> PluginResult<Plugin> {
    let store = Arc::new(JsonFileStore::new(settings_file));

    // The project picker of `prepare` lists the project saved last time
    let saved = store.load().await.unwrap_or_else(|e| {
        warn!(error = %e, "Ignoring unreadable settings file");
        None
    });
    let projects: Vec<Value> = saved
        .as_ref()
        .and_then(|value| value.get("project").cloned())
        .into_iter()
        .collect();

    Plugin::builder(config, transport)
        .intro(PluginIntro::new("Code Analysis Plugin", "Soren Team", "1.1.1"))
        .settings(settings_spec())
        .store(store)
        .operation(
            Operation::new("echo", "Echo", |_, req: Request| async move { Ok(req.payload) })
                .description("Replies with the request payload"),
        )
        .operation(
            Operation::new("prepare", "Clone/Pull Repo", prepare)
                .icon(Icon::new("lucide", "git-pull-request"))
                .form(
                    json!({"type": "Control", "scope": "#/properties/project"}),
                    json!({"properties": {"project": {"enum": projects}}}),
                ),
        )
        .operation(
            Operation::new("scan.gen.graph", "Scan Code And Create Graph", scan_gen_graph)
                .icon(Icon::new("lucide", "network"))
                .form(
                    json!({"type": "Control", "scope": "#/properties/reponame"}),
                    json!({"properties": {"reponame": {"type": "string"}}}),
                ),
        )
        .build()
}

fn settings_spec() -> SettingsSpec {
    SettingsSpec::new(
        json!({
            "type": "VerticalLayout",
            "elements": [
                {"type": "Control", "scope": "#/properties/project"},
                {"type": "Control", "scope": "#/properties/repository_name"},
                {"type": "Control", "scope": "#/properties/access_token"}
            ]
        }),
        json!({
            "type": "object",
            "properties": {
                "project": {"type": "string", "title": "Your Project Name"},
                "repository_name": {"type": "string", "title": "Your Repository Name"},
                "access_token": {"type": "string", "title": "Fine Grained Access Token"}
            },
            "required": REQUIRED_SETTINGS
        }),
    )
    .on_update(|value: Value| async move { validate_settings(&value) })
}

fn validate_settings(value: &Value) -> anyhow::Result<()> {
    let missing: Vec<&str> = REQUIRED_SETTINGS
        .into_iter()
        .filter(|key| {
            value
                .get(*key)
                .and_then(Value::as_str)
                .is_none_or(|s| s.trim().is_empty())
        })
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("missing settings: {}", missing.join(", "))
    }
}

async fn prepare(ctx: PluginContext, _req: Request) -> anyhow::Result<Value> {
    let Some(settings) = ctx.configuration_as::<RepoSettings>() else {
        anyhow::bail!("plugin is not configured");
    };

    let job = ctx.begin_job("prepare");
    let accepted = job.accepted();

    tokio::spawn(async move {
        let frame = Frame::new("Cloning", format!("Fetching {}", settings.repository_name));
        let result = async {
            job.report(JobProgress::new(30, frame)).await?;
            tokio::time::sleep(Duration::from_millis(200)).await;
            job.done(json!({"project": settings.project, "status": "ready"}))
                .await
        }
        .await;

        if let Err(e) = result {
            warn!(error = %e, "prepare job notification failed");
        }
    });

    Ok(accepted)
}

async fn scan_gen_graph(ctx: PluginContext, req: Request) -> anyhow::Result<Value> {
    let scan: ScanRequest = req.parse()?;
    let repo = scan
        .reponame
        .or_else(|| {
            ctx.configuration_as::<RepoSettings>()
                .map(|settings| settings.repository_name)
        })
        .ok_or_else(|| anyhow::anyhow!("no repository to scan"))?;

    let job = ctx.begin_job("scan.gen.graph");
    let accepted = job.accepted();

    tokio::spawn(async move {
        for (pct, step) in [(25, "Parsing sources"), (60, "Building graph"), (90, "Indexing")] {
            let frame = Frame::new("Scanning", format!("{step} of {repo}"));
            if let Err(e) = job.report(JobProgress::new(pct, frame)).await {
                warn!(error = %e, "scan progress notification failed");
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let completed = JobProgress::completed(Some(json!({"repository": repo})));
        let result = match serde_json::to_value(completed) {
            Ok(value) => job.done(value).await,
            Err(e) => job.error(json!({"reason": e.to_string()})).await,
        };
        if let Err(e) = result {
            ctx.log("scan.gen.graph", LogLevel::Error, e.to_string(), None)
                .await;
        }
    });

    Ok(accepted)
}
