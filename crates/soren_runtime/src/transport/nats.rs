//! NATS transport adapter

use std::time::Duration;

use async_nats::{Client, ConnectOptions, HeaderMap};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{Headers, Message, Subscription, Transport};
use crate::config::normalize_agent_uri;
use crate::error::{TransportError, TransportResult};

/// Transport backed by a NATS connection
#[derive(Clone)]
pub struct NatsTransport {
    client: Client,
}

impl NatsTransport {
    /// Connect to the agent, adding the `nats://` scheme when the URI has none
    pub async fn connect(
        uri: &str,
        client_name: &str,
        connect_timeout: Duration,
    ) -> TransportResult<Self> {
        let uri = normalize_agent_uri(uri);
        info!(uri = %uri, "Connecting to NATS");

        let connecting = ConnectOptions::new()
            .name(client_name)
            .connection_timeout(connect_timeout)
            .connect(uri.as_str());

        // The client's own timeout covers the TCP handshake; this one covers
        // the whole connect including the INFO/CONNECT exchange.
        let client = match tokio::time::timeout(connect_timeout * 2, connecting).await {
            Ok(Ok(client)) => client,
            Ok(Err(e)) => {
                return Err(TransportError::Connection(format!(
                    "failed to connect to NATS at {uri}: {e}"
                )));
            }
            Err(_) => {
                return Err(TransportError::Connection(format!(
                    "timed out connecting to NATS at {uri}"
                )));
            }
        };

        info!(uri = %uri, "Connected to NATS");
        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Transport for NatsTransport {
    async fn publish(&self, subject: &str, payload: Bytes) -> TransportResult<()> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| TransportError::Publish {
                subject: subject.to_string(),
                reason: e.to_string(),
            })
    }

    async fn subscribe(&self, subject: &str) -> TransportResult<Subscription> {
        let mut subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| TransportError::Subscribe {
                subject: subject.to_string(),
                reason: e.to_string(),
            })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let pattern = subject.to_string();
        tokio::spawn(async move {
            while let Some(msg) = subscriber.next().await {
                let message = Message {
                    subject: msg.subject.to_string(),
                    reply: msg.reply.map(|reply| reply.to_string()),
                    headers: Headers::new(),
                    payload: msg.payload,
                };
                if tx.send(message).is_err() {
                    break;
                }
            }
            if let Err(e) = subscriber.unsubscribe().await {
                warn!(subject = %pattern, error = %e, "Unsubscribe failed");
            }
            debug!(subject = %pattern, "Subscription forwarder finished");
        });

        Ok(Subscription::new(subject, rx))
    }

    async fn request(
        &self,
        subject: &str,
        headers: Headers,
        payload: Bytes,
        timeout: Duration,
    ) -> TransportResult<Message> {
        let mut header_map = HeaderMap::new();
        for (name, value) in &headers {
            header_map.insert(name.as_str(), value.as_str());
        }

        let call = self
            .client
            .request_with_headers(subject.to_string(), header_map, payload);

        let reply = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                return Err(match e.kind() {
                    async_nats::RequestErrorKind::NoResponders => TransportError::NoResponders {
                        subject: subject.to_string(),
                    },
                    async_nats::RequestErrorKind::TimedOut => TransportError::Timeout {
                        subject: subject.to_string(),
                        timeout,
                    },
                    _ => TransportError::Publish {
                        subject: subject.to_string(),
                        reason: e.to_string(),
                    },
                });
            }
            Err(_) => {
                return Err(TransportError::Timeout {
                    subject: subject.to_string(),
                    timeout,
                });
            }
        };

        Ok(Message {
            subject: reply.subject.to_string(),
            reply: reply.reply.map(|r| r.to_string()),
            headers: Headers::new(),
            payload: reply.payload,
        })
    }

    /// Flush pending publishes, then drain the client so the connection closes
    async fn close(&self) -> TransportResult<()> {
        self.client
            .flush()
            .await
            .map_err(|e| TransportError::Publish {
                subject: "<flush>".to_string(),
                reason: e.to_string(),
            })?;
        self.client
            .drain()
            .await
            .map_err(|e| TransportError::Connection(format!("drain failed: {e}")))?;
        debug!("NATS connection drained");
        Ok(())
    }
}
