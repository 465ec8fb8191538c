//! Subscription loops shared by the router, the announcer and the settings
//! update subject.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::PluginResult;
use crate::transport::{Message, SharedTransport, Subscription, with_deadline};

/// Subscribe with the transport timeout applied
pub(crate) async fn subscribe(
    transport: &SharedTransport,
    subject: &str,
    timeout: Duration,
) -> PluginResult<Subscription> {
    let subscription = with_deadline(subject, timeout, transport.subscribe(subject)).await?;
    debug!(subject, "Subscribed");
    Ok(subscription)
}

/// Drain `subscription`, running `on_message` in its own task per message
pub(crate) fn serve<F, Fut>(mut subscription: Subscription, on_message: F) -> JoinHandle<()>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(message) = subscription.next().await {
            tokio::spawn(on_message(message));
        }
        debug!(subject = subscription.subject(), "Subscription ended");
    })
}

/// Publish `body` on the message's reply subject, if it has one
///
/// Replies are not retried; a failure is logged and the request is dropped.
pub(crate) async fn reply<T: Serialize + ?Sized>(
    transport: &SharedTransport,
    timeout: Duration,
    message: &Message,
    body: &T,
) -> bool {
    let Some(reply_to) = message.reply.as_deref() else {
        return false;
    };

    let payload = match serde_json::to_vec(body) {
        Ok(payload) => Bytes::from(payload),
        Err(e) => {
            warn!(subject = %message.subject, error = %e, "Cannot encode reply");
            return false;
        }
    };

    match with_deadline(reply_to, timeout, transport.publish(reply_to, payload)).await {
        Ok(()) => true,
        Err(e) => {
            warn!(subject = %message.subject, error = %e, "Reply failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Headers, MemoryBus, Transport};
    use serde_json::{Value, json};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_serve_replies_to_each_request() {
        let bus = MemoryBus::new();
        let transport: SharedTransport = Arc::new(bus.clone());
        let subscription = subscribe(&transport, "svc.ping", Duration::from_secs(1))
            .await
            .unwrap();

        let responder = Arc::clone(&transport);
        let _task = serve(subscription, move |msg| {
            let transport = Arc::clone(&responder);
            async move {
                reply(&transport, Duration::from_secs(1), &msg, &json!("pong")).await;
            }
        });

        for _ in 0..3 {
            let answer = bus
                .request("svc.ping", Headers::new(), Bytes::new(), Duration::from_secs(1))
                .await
                .unwrap();
            assert_eq!(answer.json::<Value>().unwrap(), json!("pong"));
        }
    }

    #[tokio::test]
    async fn test_reply_without_reply_subject() {
        let transport: SharedTransport = Arc::new(MemoryBus::new());
        let message = Message::new("svc.ping", Bytes::new());

        assert!(!reply(&transport, Duration::from_secs(1), &message, &json!(null)).await);
    }
}
