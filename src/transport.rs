//! Publishing seam between the node and the middleware

use futures::{Stream, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, trace};

use crate::messages::{Message, Topic};
use crate::stream::ThrottleExt;

/// Sink for converted messages.
///
/// The node gates the transport on when entering `Active` and off when leaving
/// it. Publishing must not block.
pub trait Transport: Send + Sync + 'static {
    /// Publish one message on its topic.
    fn publish(&self, message: Message);

    /// Start delivering published messages.
    fn activate(&self) {}

    /// Stop delivering published messages.
    fn deactivate(&self) {}
}

/// In-process transport backed by a tokio broadcast channel.
///
/// Messages published while the transport is inactive are dropped, as a
/// lifecycle publisher would. Slow subscribers lose the oldest messages.
pub struct ChannelTransport {
    sender: broadcast::Sender<Arc<Message>>,
    active: AtomicBool,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl ChannelTransport {
    /// Create a transport keeping up to `capacity` messages per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            active: AtomicBool::new(false),
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Messages delivered to the channel while active.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }

    /// Messages discarded because the transport was inactive.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }

    /// Raw receiver for every message.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Message>> {
        self.sender.subscribe()
    }

    /// Stream of the messages on `topic`. Lagged messages are skipped.
    pub fn subscribe_topic(&self, topic: Topic) -> impl Stream<Item = Arc<Message>> + 'static {
        BroadcastStream::new(self.sender.subscribe()).filter_map(move |item| async move {
            match item {
                Ok(message) if message.topic() == topic => Some(message),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    debug!(%topic, skipped, "Subscriber lagged");
                    None
                }
            }
        })
    }

    /// Stream of the latest message on `topic` at most once per `period`.
    pub fn subscribe_throttled(
        &self,
        topic: Topic,
        period: Duration,
    ) -> impl Stream<Item = Arc<Message>> + 'static {
        self.subscribe_topic(topic).boxed().throttle(period)
    }
}

impl Default for ChannelTransport {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Transport for ChannelTransport {
    fn publish(&self, message: Message) {
        if !self.is_active() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!(topic = %message.topic(), "Transport inactive, message dropped");
            return;
        }
        self.published.fetch_add(1, Ordering::Relaxed);
        // No subscribers is not an error
        let _ = self.sender.send(Arc::new(message));
    }

    fn activate(&self) {
        self.active.store(true, Ordering::SeqCst);
        debug!("Transport activated");
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
        debug!("Transport deactivated");
    }
}
