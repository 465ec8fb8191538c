//! Dispatch Router
//!
//! One subscription per route, one task per request. The subject to handler
//! table is built once and never changes afterwards. Handler errors and panics
//! are turned into `dispatch_failed` replies and reported through the event
//! emitter once the caller has its answer.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::{Value, json};
use soren_types::{DecodedRequest, ErrorBody, ErrorCode, LogLevel};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::context::PluginContext;
use crate::error::{PluginError, PluginResult};
use crate::handler::{OperationHandler, Request, panic_message};
use crate::responder;
use crate::transport::{Message, SharedTransport};

/// A subject served by a handler
#[derive(Clone)]
pub struct Route {
    pub subject: String,
    /// Method expected in envelope requests and passed to the handler
    pub method: String,
    pub handler: Arc<dyn OperationHandler>,
}

impl Route {
    pub fn new(
        subject: impl Into<String>,
        method: impl Into<String>,
        handler: Arc<dyn OperationHandler>,
    ) -> Self {
        Self {
            subject: subject.into(),
            method: method.into(),
            handler,
        }
    }
}

/// Reply to one request plus the failure to report, if the handler failed
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub reply: Value,
    /// Always [`PluginError::Dispatch`]
    pub failure: Option<PluginError>,
}

pub struct DispatchRouter {
    routes: HashMap<String, Route>,
    /// Subjects in registration order
    order: Vec<String>,
    context: PluginContext,
    transport: SharedTransport,
    transport_timeout: Duration,
}

impl DispatchRouter {
    /// Build the routing table; two routes on one subject are rejected
    pub fn new(
        routes: Vec<Route>,
        context: PluginContext,
        transport: SharedTransport,
        transport_timeout: Duration,
    ) -> PluginResult<Self> {
        let mut table = HashMap::with_capacity(routes.len());
        let mut order = Vec::with_capacity(routes.len());

        for route in routes {
            if table.contains_key(&route.subject) {
                return Err(PluginError::Config(format!(
                    "method '{}' is registered twice",
                    route.method
                )));
            }
            order.push(route.subject.clone());
            table.insert(route.subject.clone(), route);
        }

        Ok(Self {
            routes: table,
            order,
            context,
            transport,
            transport_timeout,
        })
    }

    /// Subjects served, in registration order
    pub fn subjects(&self) -> &[String] {
        &self.order
    }

    /// Subscribe every route and start serving
    pub async fn subscribe_all(self: &Arc<Self>) -> PluginResult<Vec<JoinHandle<()>>> {
        let mut tasks = Vec::with_capacity(self.order.len());

        for subject in &self.order {
            let subscription =
                responder::subscribe(&self.transport, subject, self.transport_timeout).await?;

            let router = Arc::clone(self);
            tasks.push(responder::serve(subscription, move |message| {
                let router = Arc::clone(&router);
                async move { router.handle_message(message).await }
            }));
        }

        debug!(routes = self.order.len(), "Dispatch router subscribed");
        Ok(tasks)
    }

    /// Serve one request: dispatch, reply, then report a failure
    pub async fn handle_message(&self, message: Message) {
        let dispatched = self.dispatch(&message).await;

        if message.reply.is_some() {
            responder::reply(
                &self.transport,
                self.transport_timeout,
                &message,
                &dispatched.reply,
            )
            .await;
        } else {
            warn!(subject = %message.subject, "Request has no reply subject, result dropped");
        }

        if let Some(failure) = dispatched.failure {
            let method = match &failure {
                PluginError::Dispatch { method, .. } => method.as_str(),
                _ => last_token(&message.subject),
            };
            self.context
                .log(
                    method,
                    LogLevel::Error,
                    failure.to_string(),
                    Some(json!({ "subject": message.subject })),
                )
                .await;
        }
    }

    /// Decode the request and run its handler, containing errors and panics
    pub async fn dispatch(&self, message: &Message) -> Dispatched {
        let Some(route) = self.routes.get(&message.subject) else {
            let error = ErrorBody::new(
                ErrorCode::ServiceUnavailable,
                format!("no handler for '{}'", message.subject),
            );
            let reply = match DecodedRequest::decode(last_token(&message.subject), &message.payload)
            {
                Ok(request) => request.error_reply(error),
                Err(_) => error.to_document(),
            };
            return Dispatched {
                reply,
                failure: None,
            };
        };

        let decoded = match DecodedRequest::decode(&route.method, &message.payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                debug!(subject = %message.subject, error = %e, "Bad request");
                return Dispatched {
                    reply: ErrorBody::new(ErrorCode::BadRequest, e.to_string()).to_document(),
                    failure: None,
                };
            }
        };

        let request = Request {
            method: decoded.method.clone(),
            payload: decoded.payload.clone(),
            correlation_id: decoded.correlation_id.clone(),
            subject: message.subject.clone(),
        };

        let outcome = AssertUnwindSafe(route.handler.handle(self.context.clone(), request))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(result)) => Dispatched {
                reply: decoded.reply(result),
                failure: None,
            },
            Ok(Err(e)) => {
                let reason = format!("{e:#}");
                Dispatched {
                    reply: decoded.error_reply(ErrorBody::new(ErrorCode::DispatchFailed, &reason)),
                    failure: Some(PluginError::Dispatch {
                        method: route.method.clone(),
                        reason,
                    }),
                }
            }
            Err(payload) => {
                let reason = format!("handler panicked: {}", panic_message(payload));
                Dispatched {
                    reply: decoded.error_reply(ErrorBody::new(ErrorCode::DispatchFailed, &reason)),
                    failure: Some(PluginError::Dispatch {
                        method: route.method.clone(),
                        reason,
                    }),
                }
            }
        }
    }
}

fn last_token(subject: &str) -> &str {
    subject.rsplit('.').next().unwrap_or(subject)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventEmitter;
    use crate::handler::HandlerResult;
    use crate::jobs::JobTracker;
    use crate::retry::RetryPolicy;
    use crate::settings::ConfigSync;
    use crate::subjects::Subjects;
    use crate::transport::MemoryBus;
    use bytes::Bytes;

    fn context(bus: &MemoryBus) -> PluginContext {
        let transport: SharedTransport = Arc::new(bus.clone());
        let subjects = Subjects::new("demo");
        PluginContext::new(
            "demo",
            Arc::new(ConfigSync::new(None, None, Duration::from_secs(1))),
            Arc::new(JobTracker::new(
                Arc::clone(&transport),
                subjects.clone(),
                Duration::from_secs(1),
                None,
                RetryPolicy::none(),
            )),
            Arc::new(EventEmitter::new(
                transport,
                &subjects,
                None,
                None,
                Duration::from_secs(1),
                RetryPolicy::none(),
            )),
        )
    }

    fn route<F, Fut>(method: &str, handler: F) -> Route
    where
        F: Fn(PluginContext, Request) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = HandlerResult> + Send + 'static,
    {
        Route::new(format!("soren.cpu.demo.{method}"), method, Arc::new(handler))
    }

    fn router(bus: &MemoryBus, routes: Vec<Route>) -> DispatchRouter {
        DispatchRouter::new(routes, context(bus), Arc::new(bus.clone()), Duration::from_secs(1))
            .unwrap()
    }

    fn request(subject: &str, body: &'static [u8]) -> Message {
        Message::new(subject, Bytes::from_static(body))
    }

    #[tokio::test]
    async fn test_duplicate_method_is_rejected() {
        let bus = MemoryBus::new();
        let result = DispatchRouter::new(
            vec![
                route("echo", |_, req| async move { Ok(req.payload) }),
                route("echo", |_, _| async { Ok(Value::Null) }),
            ],
            context(&bus),
            Arc::new(bus.clone()),
            Duration::from_secs(1),
        );

        assert!(matches!(result, Err(PluginError::Config(_))));
    }

    #[tokio::test]
    async fn test_raw_request_gets_raw_reply() {
        let bus = MemoryBus::new();
        let router = router(&bus, vec![route("echo", |_, req| async move { Ok(req.payload) })]);

        let dispatched = router.dispatch(&request("soren.cpu.demo.echo", br#"{"x":1}"#)).await;
        assert_eq!(dispatched.reply, json!({"x": 1}));
        assert!(dispatched.failure.is_none());
    }

    #[tokio::test]
    async fn test_handler_error_is_contained() {
        let bus = MemoryBus::new();
        let router = router(
            &bus,
            vec![route("boom", |_, _| async { anyhow::bail!("exploded") })],
        );

        let dispatched = router
            .dispatch(&request(
                "soren.cpu.demo.boom",
                br#"{"method":"boom","payload":{},"correlationId":"c9"}"#,
            ))
            .await;

        assert_eq!(dispatched.reply["correlationId"], "c9");
        assert_eq!(dispatched.reply["error"]["code"], "dispatch_failed");
        assert_eq!(dispatched.reply["error"]["message"], "exploded");
        assert!(matches!(
            dispatched.failure,
            Some(PluginError::Dispatch { ref method, ref reason }) if method == "boom" && reason == "exploded"
        ));
    }

    #[tokio::test]
    async fn test_handler_panic_is_contained() {
        let bus = MemoryBus::new();
        let router = router(
            &bus,
            vec![route("panics", |_, _| async {
                if true {
                    panic!("kaboom");
                }
                Ok(Value::Null)
            })],
        );

        let dispatched = router.dispatch(&request("soren.cpu.demo.panics", b"{}")).await;
        assert_eq!(dispatched.reply["error"]["code"], "dispatch_failed");
        assert!(
            dispatched.reply["error"]["message"]
                .as_str()
                .unwrap()
                .contains("kaboom")
        );
        assert!(matches!(dispatched.failure, Some(PluginError::Dispatch { .. })));
    }

    #[tokio::test]
    async fn test_unknown_subject_is_service_unavailable() {
        let bus = MemoryBus::new();
        let router = router(&bus, vec![]);

        let dispatched = router.dispatch(&request("soren.cpu.demo.nope", b"")).await;
        assert_eq!(dispatched.reply["error"]["code"], "service_unavailable");
    }

    #[tokio::test]
    async fn test_bad_request() {
        let bus = MemoryBus::new();
        let router = router(&bus, vec![route("echo", |_, req| async move { Ok(req.payload) })]);

        let dispatched = router.dispatch(&request("soren.cpu.demo.echo", b"{nope")).await;
        assert_eq!(dispatched.reply["error"]["code"], "bad_request");

        let dispatched = router
            .dispatch(&request(
                "soren.cpu.demo.echo",
                br#"{"method":"other","payload":1}"#,
            ))
            .await;
        assert_eq!(dispatched.reply["error"]["code"], "bad_request");
    }

    #[tokio::test]
    async fn test_request_carries_correlation_and_subject() {
        let bus = MemoryBus::new();
        let router = router(
            &bus,
            vec![route("whoami", |_, req| async move {
                Ok(json!({"subject": req.subject, "correlation": req.correlation_id}))
            })],
        );

        let dispatched = router
            .dispatch(&request(
                "soren.cpu.demo.whoami",
                br#"{"method":"whoami","payload":null,"correlationId":"r1"}"#,
            ))
            .await;
        assert_eq!(dispatched.reply["payload"]["subject"], "soren.cpu.demo.whoami");
        assert_eq!(dispatched.reply["payload"]["correlation"], "r1");
    }

    #[tokio::test]
    async fn test_one_subscription_per_route() {
        let bus = MemoryBus::new();
        let router = Arc::new(router(
            &bus,
            vec![
                route("echo", |_, req| async move { Ok(req.payload) }),
                route("prepare", |_, _| async { Ok(json!({"ready": true})) }),
            ],
        ));

        let _tasks = router.subscribe_all().await.unwrap();

        assert_eq!(router.subjects(), ["soren.cpu.demo.echo", "soren.cpu.demo.prepare"]);
        assert_eq!(bus.subscriber_count("soren.cpu.demo.echo"), 1);
        assert_eq!(bus.subscriber_count("soren.cpu.demo.prepare"), 1);
    }
}
