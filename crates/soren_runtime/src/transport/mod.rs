//! Transport
//!
//! The message-bus contract the runtime is written against. Subjects follow the
//! NATS token syntax (`a.b.c`); replies to a request are published on the
//! request's `reply` subject.

mod memory;
#[cfg(feature = "nats")]
mod nats;

pub use memory::*;
#[cfg(feature = "nats")]
pub use nats::*;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{TransportError, TransportResult};

/// Message headers
pub type Headers = BTreeMap<String, String>;

/// Shared handle to the single transport connection of a plugin
pub type SharedTransport = Arc<dyn Transport>;

// ─────────────────────────────────────────────────────────────────────────────
// Message
// ─────────────────────────────────────────────────────────────────────────────

/// A message delivered by the transport
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub subject: String,
    /// Subject to publish the reply on, present for requests
    pub reply: Option<String>,
    pub headers: Headers,
    pub payload: Bytes,
}

impl Message {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            reply: None,
            headers: Headers::new(),
            payload: payload.into(),
        }
    }

    /// Parse payload as JSON
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Subscription
// ─────────────────────────────────────────────────────────────────────────────

/// Stream of messages delivered on one subject
///
/// Dropping the subscription unsubscribes.
pub struct Subscription {
    subject: String,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Subscription {
    pub fn new(subject: impl Into<String>, rx: mpsc::UnboundedReceiver<Message>) -> Self {
        Self {
            subject: subject.into(),
            rx,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Wait for the next message, `None` once the transport side is gone
    pub async fn next(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("subject", &self.subject)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport Trait
// ─────────────────────────────────────────────────────────────────────────────

/// An established bus connection
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Publish a message without waiting for a reply
    async fn publish(&self, subject: &str, payload: Bytes) -> TransportResult<()>;

    /// Subscribe to a subject (or wildcard pattern)
    async fn subscribe(&self, subject: &str) -> TransportResult<Subscription>;

    /// Publish a request and wait for the first reply
    async fn request(
        &self,
        subject: &str,
        headers: Headers,
        payload: Bytes,
        timeout: Duration,
    ) -> TransportResult<Message>;

    /// Flush pending messages and close the connection
    async fn close(&self) -> TransportResult<()>;
}

/// Bound a transport call so a reconnect window surfaces as an error
pub async fn with_deadline<T, F>(subject: &str, timeout: Duration, call: F) -> TransportResult<T>
where
    F: Future<Output = TransportResult<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout {
            subject: subject.to_string(),
            timeout,
        }),
    }
}

/// Check a subject against a pattern with NATS wildcards
///
/// `*` matches exactly one token, `>` matches one or more trailing tokens.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
