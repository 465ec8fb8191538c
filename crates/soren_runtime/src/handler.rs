//! Operation Handlers
//!
//! An [`Operation`] is the catalog entry plus the code that serves it. Handlers
//! are async and receive a [`PluginContext`] and the decoded [`Request`]; any
//! `Fn(PluginContext, Request) -> impl Future<Output = HandlerResult>` closure
//! is a handler.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use soren_types::{FormDescriptor, Icon, OperationInfo};

use crate::context::PluginContext;

/// Result returned by a handler; errors become `dispatch_failed` replies
pub type HandlerResult = anyhow::Result<Value>;

// ─────────────────────────────────────────────────────────────────────────────
// Request
// ─────────────────────────────────────────────────────────────────────────────

/// A decoded inbound request
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: String,
    pub payload: Value,
    pub correlation_id: Option<String>,
    /// Subject the request arrived on
    pub subject: String,
}

impl Request {
    /// Deserialize the payload into a typed struct
    pub fn parse<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            anyhow::anyhow!("invalid payload for '{}': {e}", self.method)
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handler Trait
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait OperationHandler: Send + Sync + 'static {
    async fn handle(&self, ctx: PluginContext, request: Request) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> OperationHandler for F
where
    F: Fn(PluginContext, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, ctx: PluginContext, request: Request) -> HandlerResult {
        (self)(ctx, request).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Operation
// ─────────────────────────────────────────────────────────────────────────────

/// Catalog entry and handler of one operation
#[derive(Clone)]
pub struct Operation {
    pub(crate) info: OperationInfo,
    pub(crate) handler: Arc<dyn OperationHandler>,
}

impl Operation {
    /// Operation served by an async closure
    pub fn new<F, Fut>(method: impl Into<String>, title: impl Into<String>, handler: F) -> Self
    where
        F: Fn(PluginContext, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self::with_handler(method, title, Arc::new(handler))
    }

    /// Operation served by an [`OperationHandler`] implementation
    pub fn with_handler(
        method: impl Into<String>,
        title: impl Into<String>,
        handler: Arc<dyn OperationHandler>,
    ) -> Self {
        Self {
            info: OperationInfo::new(method, title),
            handler,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.info.description = description.into();
        self
    }

    pub fn icon(mut self, icon: Icon) -> Self {
        self.info.icon = icon;
        self
    }

    /// Input form shown by the platform before invoking the operation
    pub fn form(mut self, jsonui: Value, jsonschema: Value) -> Self {
        self.info.form = Some(FormDescriptor::new(jsonui, jsonschema));
        self
    }

    pub fn method(&self) -> &str {
        &self.info.method
    }

    pub fn info(&self) -> &OperationInfo {
        &self.info
    }

    pub fn handler(&self) -> Arc<dyn OperationHandler> {
        Arc::clone(&self.handler)
    }
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation").field("info", &self.info).finish()
    }
}

/// Extract a readable message from a panic payload
pub fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        return (*msg).to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_builder() {
        let op = Operation::new("prepare", "Prepare", |_ctx, req: Request| async move {
            Ok(req.payload)
        })
        .description("Prepares a scan")
        .icon(Icon::new("fa", "play"))
        .form(json!({"type": "VerticalLayout"}), json!({"type": "object"}));

        assert_eq!(op.method(), "prepare");
        assert_eq!(op.info().description, "Prepares a scan");
        assert_eq!(op.info().icon.icon, "play");
        assert_eq!(op.info().form_document()["jsonschema"], json!({"type": "object"}));
    }

    #[test]
    fn test_request_parse() {
        #[derive(Debug, serde::Deserialize)]
        struct Echo {
            x: i64,
        }

        let request = Request {
            method: "echo".into(),
            payload: json!({"x": 1}),
            correlation_id: None,
            subject: "soren.cpu.demo.echo".into(),
        };
        assert_eq!(request.parse::<Echo>().unwrap().x, 1);

        let bad = Request {
            payload: json!("nope"),
            ..request
        };
        let err = bad.parse::<Echo>().unwrap_err();
        assert!(err.to_string().contains("invalid payload for 'echo'"));
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(7_u8)), "non-string panic payload");
    }
}
