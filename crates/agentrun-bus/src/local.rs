//! In-process bus backed by per-address tokio channels.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, warn};

use agentrun_core::MessageId;

use crate::{BusError, BusReceiver, Envelope, Message, MessageBus};

const CHANNEL_CAPACITY: usize = 64;

/// In-process [`MessageBus`].
///
/// Each address owns one mpsc channel, so delivery between a fixed pair
/// of participants keeps send order. Request/reply is correlated through
/// envelope ids; replies bypass the address queue and complete the
/// waiting request directly.
#[derive(Clone, Default)]
pub struct LocalBus {
    inner: Arc<BusInner>,
}

#[derive(Default)]
struct BusInner {
    addresses: RwLock<HashMap<String, mpsc::Sender<Envelope>>>,
    pending: RwLock<HashMap<MessageId, oneshot::Sender<Message>>>,
}

impl LocalBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of subscribed addresses.
    pub async fn address_count(&self) -> usize {
        self.inner.addresses.read().await.len()
    }

    async fn deliver(&self, envelope: Envelope) -> Result<(), BusError> {
        // Replies to an in-flight request complete the waiter directly.
        if let Some(correlation_id) = &envelope.correlation_id {
            let waiter = self.inner.pending.write().await.remove(correlation_id);
            if let Some(tx) = waiter {
                if tx.send(envelope.message).is_err() {
                    debug!(correlation_id = %correlation_id, "Requester gave up before the reply arrived");
                }
                return Ok(());
            }
        }

        let tx = {
            let addresses = self.inner.addresses.read().await;
            addresses
                .get(&envelope.to)
                .cloned()
                .ok_or_else(|| BusError::UnknownTarget(envelope.to.clone()))?
        };

        let to = envelope.to.clone();
        tx.send(envelope)
            .await
            .map_err(|_| BusError::ChannelClosed(to))
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn subscribe(&self, address: &str) -> Result<BusReceiver, BusError> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let previous = self
            .inner
            .addresses
            .write()
            .await
            .insert(address.to_owned(), tx);
        if previous.is_some() {
            warn!(address = %address, "Replacing existing bus subscription");
        }
        Ok(rx)
    }

    async fn unsubscribe(&self, address: &str) {
        self.inner.addresses.write().await.remove(address);
    }

    async fn send(&self, to: &str, message: Message) -> Result<(), BusError> {
        self.deliver(Envelope::new("", to, message)).await
    }

    async fn broadcast(&self, from: &str, message: Message) -> Result<(), BusError> {
        let targets: Vec<String> = {
            let addresses = self.inner.addresses.read().await;
            addresses.keys().filter(|a| *a != from).cloned().collect()
        };

        for to in targets {
            // A dropped receiver must not stop the rest of the fan-out.
            if let Err(err) = self.deliver(Envelope::new(from, &to, message.clone())).await {
                warn!(to = %to, error = %err, "Broadcast delivery failed");
            }
        }
        Ok(())
    }

    async fn request(
        &self,
        to: &str,
        message: Message,
        timeout: Duration,
    ) -> Result<Message, BusError> {
        let envelope = Envelope::new("", to, message);
        let id = envelope.id.clone();

        let (tx, rx) = oneshot::channel();
        self.inner.pending.write().await.insert(id.clone(), tx);

        if let Err(err) = self.deliver(envelope).await {
            self.inner.pending.write().await.remove(&id);
            return Err(err);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => {
                self.inner.pending.write().await.remove(&id);
                Err(BusError::ChannelClosed(to.to_owned()))
            }
            Err(_) => {
                self.inner.pending.write().await.remove(&id);
                Err(BusError::Timeout(to.to_owned()))
            }
        }
    }

    async fn respond(&self, to: &Envelope, message: Message) -> Result<(), BusError> {
        self.deliver(to.reply(message)).await
    }
}
