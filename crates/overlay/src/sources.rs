use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use feed_model::{ChannelId, ItemId, ItemSeq, ReactionEvent, ReactionValue, ScrapValue};

use crate::error::{OverlayError, Result};

const PUSH_EVENT_BUFFER: usize = 16;

/// Batched reaction lookup boundary. Any conforming implementation (real
/// backend, test double) may stand in for the simulated one.
#[async_trait]
pub trait ReactionPullSource: Send + Sync {
    /// Partial mapping: `None` marks ids that have no reaction.
    async fn pull(&self, ids: &[ItemId]) -> Result<HashMap<ItemId, Option<ReactionValue>>>;
}

/// Single-shot scrap lookup boundary; no push channel.
#[async_trait]
pub trait ScrapSource: Send + Sync {
    async fn get(&self, id: ItemId) -> Result<Option<ScrapValue>>;
}

/// Simulated reaction backend: fixed latency, roughly half the ids resolve
/// to a random reaction.
pub struct SimulatedReactionPull {
    latency: Duration,
    rng: Mutex<StdRng>,
}

impl SimulatedReactionPull {
    #[must_use]
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    #[must_use]
    pub fn with_seed(latency: Duration, seed: u64) -> Self {
        Self {
            latency,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

#[async_trait]
impl ReactionPullSource for SimulatedReactionPull {
    async fn pull(&self, ids: &[ItemId]) -> Result<HashMap<ItemId, Option<ReactionValue>>> {
        tokio::time::sleep(self.latency).await;
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(ids
            .iter()
            .map(|&id| {
                let value = if rng.gen_bool(0.5) {
                    Some(ReactionValue::random(&mut *rng))
                } else {
                    None
                };
                (id, value)
            })
            .collect())
    }
}

/// Simulated scrap backend: fixed latency, deterministic value per id.
pub struct SimulatedScrapSource {
    latency: Duration,
}

impl SimulatedScrapSource {
    #[must_use]
    pub const fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl ScrapSource for SimulatedScrapSource {
    async fn get(&self, id: ItemId) -> Result<Option<ScrapValue>> {
        tokio::time::sleep(self.latency).await;
        Ok(Some(ScrapValue::new(format!("scrap:{id}"))))
    }
}

/// Tuning for the random reaction push task.
#[derive(Debug, Clone)]
pub struct RandomReactionPushConfig {
    pub push_interval: Duration,
    pub channels: RangeInclusive<ChannelId>,
    /// Sequence-number range the generated targets are drawn from.
    pub targets: RangeInclusive<ItemSeq>,
    pub seed: Option<u64>,
}

impl Default for RandomReactionPushConfig {
    fn default() -> Self {
        Self {
            push_interval: Duration::from_secs(2),
            channels: 0..=3,
            targets: 0..=100,
            seed: None,
        }
    }
}

/// Owned task emitting random reaction events at a fixed interval.
pub struct RandomReactionPush {
    handle: JoinHandle<()>,
}

impl RandomReactionPush {
    /// Starts the task; the returned receiver is the push stream consumed
    /// by [`ReactionOverlay::attach_push`](crate::ReactionOverlay::attach_push).
    #[must_use]
    pub fn spawn(config: RandomReactionPushConfig) -> (Self, mpsc::Receiver<ReactionEvent>) {
        let (tx, rx) = mpsc::channel(PUSH_EVENT_BUFFER);
        let handle = tokio::spawn(async move {
            let mut rng = match config.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            loop {
                tokio::time::sleep(config.push_interval).await;
                let target = ItemId::new(
                    rng.gen_range(config.channels.clone()),
                    rng.gen_range(config.targets.clone()),
                );
                let event = ReactionEvent::random(target, &mut rng);
                debug!("random reaction push: {event:?}");
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        (Self { handle }, rx)
    }

    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

impl Drop for RandomReactionPush {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Clonable sink for externally-triggered reaction events.
#[derive(Clone)]
pub struct ManualReactionPush {
    tx: mpsc::Sender<ReactionEvent>,
}

impl ManualReactionPush {
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ReactionEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub async fn send(&self, event: ReactionEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| OverlayError::Closed)
    }
}
