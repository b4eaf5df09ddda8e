//! Pub/sub transport abstraction for the messenger.
//!
//! The messenger consumes an abstract subscription/topic pair; concrete
//! brokers plug in through [`Transport`]. The built-in `mem://` scheme backs
//! both ends with process-local channels, which is enough for single-process
//! deployments and for exercising the messenger in tests. Cloud providers
//! are wired up by embedders through their own [`Transport`] implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;

/// Settlement handle carried by a received [`Message`].
pub trait Acker: Send + std::fmt::Debug {
    /// Whether the broker supports negative acknowledgement.
    fn can_nack(&self) -> bool;
    fn ack(self: Box<Self>);
    /// Request redelivery. Only meaningful when [`Acker::can_nack`] is true.
    fn nack(self: Box<Self>);
}

/// One received message. Dropping it without calling [`Message::ack`] leaves
/// settlement to the broker's redelivery policy.
#[derive(Debug)]
pub struct Message {
    /// Loggable identifier assigned by the broker.
    pub id: String,
    pub body: Bytes,
    pub metadata: HashMap<String, String>,
    acker: Box<dyn Acker>,
}

impl Message {
    pub fn new(
        id: String,
        body: Bytes,
        metadata: HashMap<String, String>,
        acker: Box<dyn Acker>,
    ) -> Self {
        Self {
            id,
            body,
            metadata,
            acker,
        }
    }

    pub fn can_nack(&self) -> bool {
        self.acker.can_nack()
    }

    pub fn ack(self) {
        self.acker.ack();
    }

    pub fn nack(self) {
        self.acker.nack();
    }
}

#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next message. An error means the subscription is broken
    /// and should be shut down and reopened.
    async fn receive(&mut self) -> anyhow::Result<Message>;
    async fn shutdown(&mut self) -> anyhow::Result<()>;
}

#[async_trait]
pub trait Topic: Send + Sync {
    async fn send(&self, body: Bytes, metadata: HashMap<String, String>) -> anyhow::Result<()>;
}

/// Opens subscriptions and topics from URLs such as `mem://requests`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn subscription(&self, url: &str) -> anyhow::Result<Box<dyn Subscription>>;
    async fn topic(&self, url: &str) -> anyhow::Result<Box<dyn Topic>>;
}

pub mod memory {
    //! Process-local transport backed by unbounded channels. Messages are
    //! redelivered on nack; acks are terminal.

    use super::*;
    use anyhow::Context;
    use dashmap::DashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    pub const SCHEME: &str = "mem://";

    #[derive(Debug, Clone)]
    struct Delivery {
        id: String,
        body: Bytes,
        metadata: HashMap<String, String>,
    }

    #[derive(Debug)]
    struct Channel {
        tx: mpsc::UnboundedSender<Delivery>,
        rx: Mutex<Option<mpsc::UnboundedReceiver<Delivery>>>,
    }

    #[derive(Debug, Default)]
    pub struct MemoryTransport {
        channels: DashMap<String, Arc<Channel>>,
        next_id: Arc<AtomicU64>,
    }

    impl MemoryTransport {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn channel(&self, name: &str) -> Arc<Channel> {
            self.channels
                .entry(name.to_string())
                .or_insert_with(|| {
                    let (tx, rx) = mpsc::unbounded_channel();
                    Arc::new(Channel {
                        tx,
                        rx: Mutex::new(Some(rx)),
                    })
                })
                .clone()
        }

        fn name_of(url: &str) -> anyhow::Result<&str> {
            url.strip_prefix(SCHEME)
                .with_context(|| format!("unsupported transport URL {url:?}, expected {SCHEME}<name>"))
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn subscription(&self, url: &str) -> anyhow::Result<Box<dyn Subscription>> {
            let name = Self::name_of(url)?;
            let channel = self.channel(name);
            let rx = channel
                .rx
                .lock()
                .unwrap()
                .take()
                .with_context(|| format!("subscription already open for {url}"))?;
            Ok(Box::new(MemorySubscription {
                channel,
                rx: Some(rx),
            }))
        }

        async fn topic(&self, url: &str) -> anyhow::Result<Box<dyn Topic>> {
            let name = Self::name_of(url)?;
            let channel = self.channel(name);
            Ok(Box::new(MemoryTopic {
                name: name.to_string(),
                tx: channel.tx.clone(),
                next_id: Arc::clone(&self.next_id),
            }))
        }
    }

    #[derive(Debug)]
    struct MemorySubscription {
        channel: Arc<Channel>,
        rx: Option<mpsc::UnboundedReceiver<Delivery>>,
    }

    #[async_trait]
    impl Subscription for MemorySubscription {
        async fn receive(&mut self) -> anyhow::Result<Message> {
            let rx = self
                .rx
                .as_mut()
                .context("subscription has been shut down")?;
            let delivery = rx.recv().await.context("subscription channel closed")?;
            let acker = MemoryAcker {
                tx: self.channel.tx.clone(),
                redelivery: delivery.clone(),
            };
            Ok(Message::new(
                delivery.id,
                delivery.body,
                delivery.metadata,
                Box::new(acker),
            ))
        }

        async fn shutdown(&mut self) -> anyhow::Result<()> {
            // Hand the receiver back so a later subscription() picks up
            // where this one left off.
            if let Some(rx) = self.rx.take() {
                *self.channel.rx.lock().unwrap() = Some(rx);
            }
            Ok(())
        }
    }

    #[derive(Debug)]
    struct MemoryTopic {
        name: String,
        tx: mpsc::UnboundedSender<Delivery>,
        next_id: Arc<AtomicU64>,
    }

    #[async_trait]
    impl Topic for MemoryTopic {
        async fn send(&self, body: Bytes, metadata: HashMap<String, String>) -> anyhow::Result<()> {
            let id = format!("{}-{}", self.name, self.next_id.fetch_add(1, Ordering::SeqCst));
            self.tx
                .send(Delivery { id, body, metadata })
                .map_err(|_| anyhow::anyhow!("topic {} has no live subscription channel", self.name))
        }
    }

    #[derive(Debug)]
    struct MemoryAcker {
        tx: mpsc::UnboundedSender<Delivery>,
        redelivery: Delivery,
    }

    impl Acker for MemoryAcker {
        fn can_nack(&self) -> bool {
            true
        }

        fn ack(self: Box<Self>) {}

        fn nack(self: Box<Self>) {
            let _ = self.tx.send(self.redelivery);
        }
    }
}
