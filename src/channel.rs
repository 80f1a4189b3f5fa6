//! Realtime pub/sub facade for race channels.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::error::Result;

pub type PlayerId = String;

/// Named events on a per-game race channel. Delivery is at-least-once with
/// no ordering guarantee; consumers must tolerate duplicates and reordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RaceEvent {
    /// A player's progress changed.
    #[serde(rename = "current_progress")]
    Progress {
        sender: PlayerId,
        progress: f64,
        timestamp_ms: i64,
    },
    /// Echo of a received progress event, carrying the original send
    /// timestamp so the sender can measure its round trip.
    #[serde(rename = "echo_latency")]
    Echo {
        original_timestamp_ms: i64,
        echo_timestamp_ms: i64,
    },
    /// A player crossed the finish line.
    #[serde(rename = "finished")]
    Finished { sender: PlayerId },
}

/// Publish/subscribe channel scoped to one game.
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    async fn publish(&self, event: RaceEvent) -> Result<()>;
    fn subscribe(&self) -> BoxStream<'static, RaceEvent>;
}

#[async_trait]
impl<C: RealtimeChannel + ?Sized> RealtimeChannel for Arc<C> {
    async fn publish(&self, event: RaceEvent) -> Result<()> {
        self.as_ref().publish(event).await
    }

    fn subscribe(&self) -> BoxStream<'static, RaceEvent> {
        self.as_ref().subscribe()
    }
}

/// In-process channel backed by a broadcast queue. Stands in for the remote
/// realtime service; every subscriber sees every event, including the
/// sender's own.
#[derive(Clone)]
pub struct LocalBus {
    tx: broadcast::Sender<RaceEvent>,
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }
}

#[async_trait]
impl RealtimeChannel for LocalBus {
    async fn publish(&self, event: RaceEvent) -> Result<()> {
        // No subscribers is not an error; the event just goes nowhere.
        let _ = self.tx.send(event);
        Ok(())
    }

    fn subscribe(&self) -> BoxStream<'static, RaceEvent> {
        BroadcastStream::new(self.tx.subscribe())
            .filter_map(|event| async move { event.ok() })
            .boxed()
    }
}

/// Decorator that delays and optionally duplicates every publish, for
/// exercising the protocol under at-least-once delivery and network lag.
pub struct LossyChannel {
    inner: Arc<dyn RealtimeChannel>,
    delay: Duration,
    duplicate: bool,
}

impl LossyChannel {
    pub fn new(inner: Arc<dyn RealtimeChannel>, delay: Duration, duplicate: bool) -> Self {
        Self {
            inner,
            delay,
            duplicate,
        }
    }
}

#[async_trait]
impl RealtimeChannel for LossyChannel {
    async fn publish(&self, event: RaceEvent) -> Result<()> {
        let inner = self.inner.clone();
        let delay = self.delay;
        let copies = if self.duplicate { 2 } else { 1 };
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            for _ in 0..copies {
                let _ = inner.publish(event.clone()).await;
            }
        });
        Ok(())
    }

    fn subscribe(&self) -> BoxStream<'static, RaceEvent> {
        self.inner.subscribe()
    }
}
