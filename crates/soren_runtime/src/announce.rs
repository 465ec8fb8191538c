//! Registration Announcer
//!
//! Tells the platform who the plugin is: the intro, the settings declaration
//! and the operation catalog are pushed once at startup and then served on
//! request for as long as the plugin runs.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use soren_types::{OperationInfo, PluginIntro};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{PluginError, PluginResult};
use crate::responder;
use crate::settings::ConfigSync;
use crate::subjects::Subjects;
use crate::transport::{Headers, Message, SharedTransport, with_deadline};

pub struct Announcer {
    transport: SharedTransport,
    subjects: Subjects,
    intro: PluginIntro,
    catalog: Vec<OperationInfo>,
    settings: Arc<ConfigSync>,
    transport_timeout: Duration,
    /// When set, the intro is a request that must be acknowledged
    handshake_timeout: Option<Duration>,
}

impl Announcer {
    pub fn new(
        transport: SharedTransport,
        subjects: Subjects,
        intro: PluginIntro,
        catalog: Vec<OperationInfo>,
        settings: Arc<ConfigSync>,
        transport_timeout: Duration,
        handshake_timeout: Option<Duration>,
    ) -> Self {
        Self {
            transport,
            subjects,
            intro,
            catalog,
            settings,
            transport_timeout,
            handshake_timeout,
        }
    }

    pub fn intro(&self) -> &PluginIntro {
        &self.intro
    }

    pub fn catalog(&self) -> &[OperationInfo] {
        &self.catalog
    }

    /// Settings declaration with the current value, `null` when undeclared
    pub fn settings_document(&self) -> Value {
        self.settings
            .declaration()
            .and_then(|declaration| serde_json::to_value(declaration).ok())
            .unwrap_or(Value::Null)
    }

    /// `{jsonui, jsonschema}` of one operation, `{}` when it has no form
    pub fn form_document(&self, method: &str) -> Value {
        self.catalog
            .iter()
            .find(|info| info.method == method)
            .map(OperationInfo::form_document)
            .unwrap_or_else(|| Value::Object(Default::default()))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Push
    // ─────────────────────────────────────────────────────────────────────────

    /// Publish intro, settings declaration and catalog, in that order
    pub async fn announce(&self) -> PluginResult<()> {
        let intro_subject = self.subjects.announce("@intro");
        let intro = encode(&self.intro)?;

        match self.handshake_timeout {
            Some(timeout) => self.handshake(&intro_subject, intro, timeout).await?,
            None => self.push(&intro_subject, intro).await?,
        }

        self.push(
            &self.subjects.announce("@settings"),
            encode(&self.settings_document())?,
        )
        .await?;
        self.push(&self.subjects.announce("@actions"), encode(&self.catalog)?)
            .await?;

        info!(
            plugin = %self.intro.name,
            version = %self.intro.version,
            operations = self.catalog.len(),
            "Plugin announced"
        );
        Ok(())
    }

    async fn push(&self, subject: &str, payload: Bytes) -> PluginResult<()> {
        with_deadline(
            subject,
            self.transport_timeout,
            self.transport.publish(subject, payload),
        )
        .await
        .map_err(|e| PluginError::Registration(e.to_string()))
    }

    async fn handshake(&self, subject: &str, payload: Bytes, timeout: Duration) -> PluginResult<()> {
        let reply = self
            .transport
            .request(subject, Headers::new(), payload, timeout)
            .await
            .map_err(|e| PluginError::Registration(format!("intro not acknowledged: {e}")))?;

        // Any reply counts as an acknowledgment unless it carries an error
        if let Ok(Value::Object(body)) = reply.json::<Value>() {
            if let Some(error) = body.get("error") {
                return Err(PluginError::Registration(format!(
                    "intro rejected by platform: {error}"
                )));
            }
        }
        debug!(subject, "Intro acknowledged");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pull
    // ─────────────────────────────────────────────────────────────────────────

    /// Serve the intro, settings, catalog and form subjects
    pub async fn serve(self: &Arc<Self>) -> PluginResult<Vec<JoinHandle<()>>> {
        let mut documents = vec![
            (self.subjects.intro(), Document::Intro),
            (self.subjects.settings(), Document::Settings),
            (self.subjects.actions(), Document::Catalog),
        ];
        for info in &self.catalog {
            documents.push((
                self.subjects.form(&info.method),
                Document::Form(info.method.clone()),
            ));
        }

        let mut tasks = Vec::with_capacity(documents.len());
        for (subject, document) in documents {
            let subscription =
                responder::subscribe(&self.transport, &subject, self.transport_timeout).await?;

            let announcer = Arc::clone(self);
            tasks.push(responder::serve(subscription, move |message| {
                let announcer = Arc::clone(&announcer);
                let document = document.clone();
                async move { announcer.answer(&message, &document).await }
            }));
        }
        Ok(tasks)
    }

    async fn answer(&self, message: &Message, document: &Document) {
        if message.reply.is_none() {
            debug!(subject = %message.subject, "Ignoring document request without reply subject");
            return;
        }

        let body = match document {
            Document::Intro => serde_json::to_value(&self.intro).unwrap_or(Value::Null),
            Document::Settings => self.settings_document(),
            Document::Catalog => serde_json::to_value(&self.catalog).unwrap_or(Value::Null),
            Document::Form(method) => self.form_document(method),
        };
        responder::reply(&self.transport, self.transport_timeout, message, &body).await;
    }
}

#[derive(Debug, Clone)]
enum Document {
    Intro,
    Settings,
    Catalog,
    Form(String),
}

fn encode<T: Serialize + ?Sized>(value: &T) -> PluginResult<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SettingsSpec;
    use crate::transport::{MemoryBus, Transport};
    use serde_json::json;
    use soren_types::FormDescriptor;

    fn announcer(bus: &MemoryBus, handshake: Option<Duration>) -> Arc<Announcer> {
        let mut scan = OperationInfo::new("scan", "Scan");
        scan.form = Some(FormDescriptor::new(json!({"type": "Group"}), json!({"type": "object"})));

        let settings = SettingsSpec::new(json!({}), json!({"required": ["api_key"]}))
            .data(json!({"api_key": "k0"}));

        Arc::new(Announcer::new(
            Arc::new(bus.clone()),
            Subjects::new("demo"),
            PluginIntro::new("Demo", "Acme", "1.0.0"),
            vec![OperationInfo::new("echo", "Echo"), scan],
            Arc::new(ConfigSync::new(Some(settings), None, Duration::from_secs(1))),
            Duration::from_secs(1),
            handshake,
        ))
    }

    #[tokio::test]
    async fn test_announce_publishes_in_order() {
        let bus = MemoryBus::new();
        let mut announcements = bus.subscribe("soren.v2.announce.demo.*").await.unwrap();

        announcer(&bus, None).announce().await.unwrap();

        let intro = announcements.next().await.unwrap();
        assert_eq!(intro.subject, "soren.v2.announce.demo.@intro");
        assert_eq!(intro.json::<Value>().unwrap()["name"], "Demo");

        let settings = announcements.next().await.unwrap();
        assert_eq!(settings.subject, "soren.v2.announce.demo.@settings");
        let settings = settings.json::<Value>().unwrap();
        assert_eq!(settings["replyTo"], "_settings.config.submit");
        assert_eq!(settings["data"]["api_key"], "k0");

        let catalog = announcements.next().await.unwrap();
        assert_eq!(catalog.subject, "soren.v2.announce.demo.@actions");
        let catalog = catalog.json::<Value>().unwrap();
        assert_eq!(catalog[0]["method"], "echo");
        assert_eq!(catalog[1]["jsonschema"]["type"], "object");
    }

    #[tokio::test]
    async fn test_handshake_timeout_is_registration_error() {
        let bus = MemoryBus::new();
        let _silent = bus.subscribe("soren.v2.announce.demo.@intro").await.unwrap();

        let err = announcer(&bus, Some(Duration::from_millis(20)))
            .announce()
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Registration(_)));
        assert!(err.is_fatal_at_startup());
    }

    #[tokio::test]
    async fn test_handshake_rejection() {
        let bus = MemoryBus::new();
        let mut platform = bus.subscribe("soren.v2.announce.demo.@intro").await.unwrap();
        let responder = bus.clone();
        tokio::spawn(async move {
            let msg = platform.next().await.unwrap();
            responder
                .publish(
                    msg.reply.as_deref().unwrap(),
                    Bytes::from_static(b"{\"error\":\"duplicate plugin\"}"),
                )
                .await
                .unwrap();
        });

        let err = announcer(&bus, Some(Duration::from_secs(1)))
            .announce()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("duplicate plugin"));
    }

    #[tokio::test]
    async fn test_handshake_acknowledged() {
        let bus = MemoryBus::new();
        let mut platform = bus.subscribe("soren.v2.announce.demo.@intro").await.unwrap();
        let responder = bus.clone();
        tokio::spawn(async move {
            let msg = platform.next().await.unwrap();
            responder
                .publish(msg.reply.as_deref().unwrap(), Bytes::from_static(b"{\"ok\":true}"))
                .await
                .unwrap();
        });

        announcer(&bus, Some(Duration::from_secs(1)))
            .announce()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_pull_subjects() {
        let bus = MemoryBus::new();
        let _tasks = announcer(&bus, None).serve().await.unwrap();

        let ask = |subject: &'static str| {
            let bus = bus.clone();
            async move {
                bus.request(subject, Headers::new(), Bytes::new(), Duration::from_secs(1))
                    .await
                    .unwrap()
                    .json::<Value>()
                    .unwrap()
            }
        };

        assert_eq!(ask("soren.v2.demo.@intro").await["author"], "Acme");
        assert_eq!(ask("soren.v2.demo.@settings").await["data"]["api_key"], "k0");
        assert_eq!(ask("soren.v2.demo.@actions").await.as_array().unwrap().len(), 2);
        assert_eq!(ask("soren.v2.demo.scan.@form").await["jsonui"]["type"], "Group");
        assert_eq!(ask("soren.v2.demo.echo.@form").await, json!({}));
    }

    #[tokio::test]
    async fn test_settings_document_null_when_undeclared() {
        let bus = MemoryBus::new();
        let announcer = Announcer::new(
            Arc::new(bus.clone()),
            Subjects::new("demo"),
            PluginIntro::new("Demo", "Acme", "1.0.0"),
            vec![],
            Arc::new(ConfigSync::new(None, None, Duration::from_secs(1))),
            Duration::from_secs(1),
            None,
        );

        assert_eq!(announcer.settings_document(), Value::Null);
    }
}
