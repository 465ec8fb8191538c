//! In-process message bus
//!
//! Implements the [`Transport`] contract inside a single process. Used by the
//! test suite and for running a plugin without a broker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{Headers, Message, Subscription, Transport, subject_matches};
use crate::error::{TransportError, TransportResult};

struct SubscriberEntry {
    pattern: String,
    tx: mpsc::UnboundedSender<Message>,
}

struct BusInner {
    /// Subscription id -> subject pattern and delivery channel
    subscriptions: DashMap<u64, SubscriberEntry>,
    next_id: AtomicU64,
    total_messages_published: AtomicU64,
    closed: AtomicBool,
}

/// Central in-process bus; clones share the same subscriptions
#[derive(Clone)]
pub struct MemoryBus {
    inner: Arc<BusInner>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscriptions: DashMap::new(),
                next_id: AtomicU64::new(1),
                total_messages_published: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Number of live subscriptions whose pattern is exactly `subject`
    pub fn subscriber_count(&self, subject: &str) -> usize {
        self.prune();
        self.inner
            .subscriptions
            .iter()
            .filter(|entry| entry.value().pattern == subject)
            .count()
    }

    pub fn get_stats(&self) -> BusStats {
        self.prune();
        BusStats {
            total_messages: self.inner.total_messages_published.load(Ordering::Relaxed),
            total_subscriptions: self.inner.subscriptions.len(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> TransportResult<()> {
        if self.is_closed() {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    /// Drop subscriptions whose receiving side has gone away
    fn prune(&self) {
        self.inner.subscriptions.retain(|_, entry| !entry.tx.is_closed());
    }

    /// Send a message to every matching subscription, returning how many got it
    fn deliver(&self, message: Message) -> usize {
        self.prune();

        let mut notified = 0;
        for entry in self.inner.subscriptions.iter() {
            let subscriber = entry.value();
            if subject_matches(&subscriber.pattern, &message.subject)
                && subscriber.tx.send(message.clone()).is_ok()
            {
                notified += 1;
            }
        }

        self.inner
            .total_messages_published
            .fetch_add(1, Ordering::Relaxed);

        trace!(
            subject = %message.subject,
            notified,
            "Delivered message"
        );

        notified
    }
}

#[async_trait]
impl Transport for MemoryBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> TransportResult<()> {
        self.ensure_open()?;
        self.deliver(Message::new(subject, payload));
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> TransportResult<Subscription> {
        self.ensure_open()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscriptions.insert(
            id,
            SubscriberEntry {
                pattern: subject.to_string(),
                tx,
            },
        );

        debug!(subject, "New subscription");
        Ok(Subscription::new(subject, rx))
    }

    async fn request(
        &self,
        subject: &str,
        headers: Headers,
        payload: Bytes,
        timeout: Duration,
    ) -> TransportResult<Message> {
        self.ensure_open()?;

        let inbox = format!("_INBOX.{}", uuid::Uuid::new_v4().simple());
        let mut replies = self.subscribe(&inbox).await?;

        let message = Message {
            subject: subject.to_string(),
            reply: Some(inbox),
            headers,
            payload,
        };

        if self.deliver(message) == 0 {
            return Err(TransportError::NoResponders {
                subject: subject.to_string(),
            });
        }

        match tokio::time::timeout(timeout, replies.next()).await {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(TransportError::Closed),
            Err(_) => Err(TransportError::Timeout {
                subject: subject.to_string(),
                timeout,
            }),
        }
    }

    async fn close(&self) -> TransportResult<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.subscriptions.clear();
        debug!("Memory bus closed");
        Ok(())
    }
}

/// Counters exposed for diagnostics and tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusStats {
    pub total_messages: u64,
    pub total_subscriptions: usize,
}
