//! Event Emitter
//!
//! Publishes leveled log and event records to `<event_channel>.<plugin>.log`.
//! Every record is mirrored to the local tracing log first, so nothing is lost
//! when the channel is not configured or the platform does not answer.

use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use soren_types::{EventRecord, LogLevel};
use tracing::{debug, error, info, warn};

use crate::retry::{RetryPolicy, retry_async};
use crate::subjects::Subjects;
use crate::transport::{Headers, SharedTransport};

/// Fire-and-forget publisher for [`EventRecord`]s
pub struct EventEmitter {
    transport: SharedTransport,
    plugin_id: String,
    /// `None` when no event channel is configured
    subject: Option<String>,
    auth_key: Option<String>,
    request_timeout: Duration,
    retry: RetryPolicy,
}

impl EventEmitter {
    pub fn new(
        transport: SharedTransport,
        subjects: &Subjects,
        event_channel: Option<&str>,
        auth_key: Option<String>,
        request_timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            plugin_id: subjects.plugin_id().to_string(),
            subject: event_channel.map(|channel| subjects.events(channel)),
            auth_key,
            request_timeout,
            retry,
        }
    }

    /// Subject records are sent to, if any
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// Publish one `log` record; `source` is prefixed with the plugin ID
    pub async fn log(
        &self,
        source: &str,
        level: LogLevel,
        message: impl Into<String>,
        details: Option<Value>,
    ) {
        let record = EventRecord::log(level, self.qualified_source(source), message, details);
        self.send_events(vec![record]).await;
    }

    /// Publish one custom event
    pub async fn emit_event(
        &self,
        event_type: &str,
        level: LogLevel,
        message: impl Into<String>,
        data: Option<Value>,
    ) {
        let record = EventRecord::new(event_type, level, self.plugin_id.clone(), message, data);
        self.send_events(vec![record]).await;
    }

    /// Publish a batch of records in one message
    ///
    /// Failures are retried per the retry policy, then dropped with a warning.
    pub async fn send_events(&self, records: Vec<EventRecord>) {
        if records.is_empty() {
            return;
        }
        for record in &records {
            mirror(record);
        }

        let Some(subject) = self.subject.as_deref() else {
            return;
        };

        let payload = match serde_json::to_vec(&records) {
            Ok(payload) => Bytes::from(payload),
            Err(e) => {
                warn!(error = %e, "Cannot encode event records");
                return;
            }
        };

        let mut headers = Headers::new();
        if let Some(key) = &self.auth_key {
            headers.insert("Authorization".to_string(), key.clone());
        }

        let sent = retry_async("send_events", self.retry, || {
            self.transport
                .request(subject, headers.clone(), payload.clone(), self.request_timeout)
        })
        .await;

        match sent {
            Ok(reply) => match reply.json::<Value>() {
                Ok(body) => match body.get("result").and_then(Value::as_str) {
                    Some("OK") | None => {
                        debug!(subject, count = records.len(), "Events delivered");
                    }
                    Some(other) => {
                        warn!(subject, result = other, "Event channel did not accept records");
                    }
                },
                Err(_) => debug!(subject, "Event channel replied with a non-JSON body"),
            },
            Err(e) => {
                warn!(subject, error = %e, count = records.len(), "Dropping events");
            }
        }
    }

    fn qualified_source(&self, source: &str) -> String {
        if source.is_empty() {
            self.plugin_id.clone()
        } else {
            format!("{} - {}", self.plugin_id, source)
        }
    }
}

fn mirror(record: &EventRecord) {
    let (event, source, details) = (&record.event, &record.source, &record.details);
    match record.level {
        LogLevel::Debug => debug!(%event, %source, ?details, "{}", record.message),
        LogLevel::Info => info!(%event, %source, ?details, "{}", record.message),
        LogLevel::Warn => warn!(%event, %source, ?details, "{}", record.message),
        LogLevel::Error => error!(%event, %source, ?details, "{}", record.message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryBus, Transport};
    use serde_json::json;
    use std::sync::Arc;

    fn emitter(bus: &MemoryBus, channel: Option<&str>) -> EventEmitter {
        EventEmitter::new(
            Arc::new(bus.clone()),
            &Subjects::new("scanner"),
            channel,
            Some("secret".into()),
            Duration::from_millis(200),
            RetryPolicy::new(2, Duration::from_millis(5)),
        )
    }

    #[tokio::test]
    async fn test_log_record_shape_and_auth_header() {
        let bus = MemoryBus::new();
        let mut channel = bus.subscribe("soren.events.scanner.log").await.unwrap();

        let collector = bus.clone();
        let received = tokio::spawn(async move {
            let msg = channel.next().await.unwrap();
            collector
                .publish(msg.reply.as_deref().unwrap(), Bytes::from_static(b"{\"result\":\"OK\"}"))
                .await
                .unwrap();
            msg
        });

        emitter(&bus, Some("soren.events"))
            .log("prepare", LogLevel::Warn, "slow", Some(json!({"ms": 900})))
            .await;

        let msg = received.await.unwrap();
        assert_eq!(msg.headers.get("Authorization").map(String::as_str), Some("secret"));

        let records: Vec<EventRecord> = msg.json().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event, "log");
        assert_eq!(records[0].level, LogLevel::Warn);
        assert_eq!(records[0].source, "scanner - prepare");
        assert_eq!(records[0].details, Some(json!({"ms": 900})));
    }

    #[tokio::test]
    async fn test_no_channel_skips_emission() {
        let bus = MemoryBus::new();
        let mut any = bus.subscribe(">").await.unwrap();

        let emitter = emitter(&bus, None);
        assert!(emitter.subject().is_none());
        emitter.log("x", LogLevel::Info, "hello", None).await;

        let nothing = tokio::time::timeout(Duration::from_millis(20), any.next()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn test_failures_are_swallowed_after_one_retry() {
        let bus = MemoryBus::new();
        let mut channel = bus.subscribe("soren.events.scanner.log").await.unwrap();

        // Never answers, so each attempt times out
        emitter(&bus, Some("soren.events"))
            .emit_event("scan_finished", LogLevel::Info, "done", None)
            .await;

        assert!(channel.next().await.is_some());
        assert!(channel.next().await.is_some());
        let third = tokio::time::timeout(Duration::from_millis(20), channel.next()).await;
        assert!(third.is_err());
    }

    #[tokio::test]
    async fn test_batch_is_one_message() {
        let bus = MemoryBus::new();
        let mut channel = bus.subscribe("soren.events.scanner.log").await.unwrap();
        let collector = bus.clone();
        let received = tokio::spawn(async move {
            let msg = channel.next().await.unwrap();
            collector
                .publish(msg.reply.as_deref().unwrap(), Bytes::from_static(b"{\"result\":\"OK\"}"))
                .await
                .unwrap();
            msg.json::<Vec<EventRecord>>().unwrap()
        });

        let records = vec![
            EventRecord::log(LogLevel::Info, "scanner", "one", None),
            EventRecord::log(LogLevel::Error, "scanner", "two", None),
        ];
        emitter(&bus, Some("soren.events")).send_events(records).await;

        let batch = received.await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1].message, "two");
    }
}
