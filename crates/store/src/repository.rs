use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{broadcast, Mutex};

use feed_model::{now_millis, ChannelId, FetchType, ItemId, ItemSeq, NormalItem, Page, RawItem};

use crate::error::{Result, StoreError};

const PUSH_CHANNEL_CAPACITY: usize = 32;

/// Owner of the canonical raw-item set.
///
/// One mutual-exclusion lock guards all reads and writes: a fetch composes a
/// channel filter with an index lookup and must observe a consistent
/// snapshot. The lock is never held across an await. Mutations broadcast
/// onto a multicast, replayless push stream while the lock is still held, so
/// subscribers see events in mutation order; late subscribers see only
/// future events.
#[derive(Clone)]
pub struct RawItemRepository {
    inner: Arc<RepoInner>,
}

struct RepoInner {
    items: Mutex<BTreeMap<ItemId, NormalItem>>,
    pushes: broadcast::Sender<RawItem>,
    next_seq: AtomicI64,
    fetch_latency_ms: AtomicU64,
}

impl Default for RawItemRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl RawItemRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::with_items([])
    }

    /// Seeds the canonical set from an explicit item list.
    #[must_use]
    pub fn with_items(items: impl IntoIterator<Item = NormalItem>) -> Self {
        let mut seeded = BTreeMap::new();
        let mut max_seq = -1;
        for item in items {
            max_seq = max_seq.max(item.id.item_id);
            seeded.insert(item.id, item);
        }
        let (pushes, _) = broadcast::channel(PUSH_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(RepoInner {
                items: Mutex::new(seeded),
                pushes,
                next_seq: AtomicI64::new(max_seq + 1),
                fetch_latency_ms: AtomicU64::new(0),
            }),
        }
    }

    /// Seeds `count` items with sequence numbers `0..count`, each assigned a
    /// random channel from `channels`. Deterministic for a given seed.
    #[must_use]
    pub fn seeded(
        count: usize,
        channels: std::ops::RangeInclusive<ChannelId>,
        seed: u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let now = now_millis();
        Self::with_items((0..count).map(|seq| {
            let channel_id = rng.gen_range(channels.clone());
            NormalItem::new(ItemId::new(channel_id, seq as ItemSeq), now)
        }))
    }

    /// Adds simulated latency ahead of the lock acquisition in both fetch
    /// operations. Zero by default.
    #[must_use]
    pub fn with_fetch_latency(self, latency: Duration) -> Self {
        self.inner
            .fetch_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
        self
    }

    async fn simulate_latency(&self) {
        let millis = self.inner.fetch_latency_ms.load(Ordering::Relaxed);
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }

    /// Next unused sequence number, shared across channels.
    #[must_use]
    pub fn next_sequence(&self) -> ItemSeq {
        self.inner.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Last `count` items of the channel plus the pagination cursor.
    ///
    /// A channel with no items is a hard failure, not an empty page.
    pub async fn fetch_latest(&self, channel_id: ChannelId, count: usize) -> Result<Page> {
        self.simulate_latency().await;
        let items = self.inner.items.lock().await;
        debug!("fetch_latest: channel={channel_id} count={count}");

        let filtered: Vec<&NormalItem> = items
            .values()
            .filter(|item| item.id.channel_id == channel_id)
            .collect();
        let last = filtered
            .last()
            .ok_or(StoreError::EmptyChannel(channel_id))?;
        let last_id = last.id.item_id;
        let start = filtered.len().saturating_sub(count);
        Ok(Page {
            items: filtered[start..].iter().map(|item| (*item).clone()).collect(),
            last_id,
        })
    }

    /// Window of `count` items positioned by `fetch_type` relative to the
    /// pivot's index in the channel-filtered ordered sequence.
    ///
    /// A missing pivot yields an empty page that still carries the cursor.
    /// Window bounds are clamped into `[0, last_index]`, silently returning
    /// a shorter page at dataset edges.
    pub async fn fetch(
        &self,
        channel_id: ChannelId,
        pivot: ItemSeq,
        count: usize,
        fetch_type: FetchType,
    ) -> Result<Page> {
        self.simulate_latency().await;
        let items = self.inner.items.lock().await;
        debug!("fetch: channel={channel_id} pivot={pivot} count={count} type={fetch_type:?}");

        let filtered: Vec<&NormalItem> = items
            .values()
            .filter(|item| item.id.channel_id == channel_id)
            .collect();
        let last = filtered
            .last()
            .ok_or(StoreError::EmptyChannel(channel_id))?;
        let last_id = last.id.item_id;

        let window = match filtered.iter().position(|item| item.id.item_id == pivot) {
            None => Vec::new(),
            Some(pivot_index) => {
                let last_index = (filtered.len() - 1) as i64;
                let pivot_index = pivot_index as i64;
                let count = count as i64;
                let (from, to) = match fetch_type {
                    FetchType::Older => (pivot_index - count, pivot_index),
                    FetchType::Around => {
                        (pivot_index - count / 2, pivot_index + count / 2 + 1)
                    }
                    FetchType::Newer => (pivot_index + 1, pivot_index + 1 + count),
                };
                let from = from.clamp(0, last_index) as usize;
                let to = to.clamp(0, last_index) as usize;
                filtered[from..to].iter().map(|item| (*item).clone()).collect()
            }
        };

        Ok(Page {
            items: window,
            last_id,
        })
    }

    /// Inserts into the canonical set and broadcasts the `Normal` event.
    pub async fn insert(&self, item: NormalItem) {
        let mut items = self.inner.items.lock().await;
        items.insert(item.id, item.clone());
        self.broadcast(RawItem::Normal(item));
    }

    /// Removes from the canonical set; broadcasts `Deleted` when the item
    /// existed.
    pub async fn remove(&self, id: ItemId) -> bool {
        let mut items = self.inner.items.lock().await;
        if items.remove(&id).is_some() {
            self.broadcast(RawItem::Deleted {
                id,
                updated_at: now_millis(),
            });
            true
        } else {
            false
        }
    }

    /// Broadcasts a `Deleted` event without touching the canonical set.
    /// Used by the generator's lag simulation, where a delete overtakes the
    /// insert it refers to.
    pub async fn emit_deleted(&self, id: ItemId) {
        let _items = self.inner.items.lock().await;
        self.broadcast(RawItem::Deleted {
            id,
            updated_at: now_millis(),
        });
    }

    /// Ids of the channel's `limit` most recent items, oldest first.
    pub async fn recent_ids(&self, channel_id: ChannelId, limit: usize) -> Vec<ItemId> {
        let items = self.inner.items.lock().await;
        let mut recent: Vec<ItemId> = items
            .values()
            .rev()
            .filter(|item| item.id.channel_id == channel_id)
            .take(limit)
            .map(|item| item.id)
            .collect();
        recent.reverse();
        recent
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RawItem> {
        self.inner.pushes.subscribe()
    }

    fn broadcast(&self, item: RawItem) {
        debug!("push: {item:?}");
        // A receiver-less send just drops the event; late subscribers never
        // see past events anyway.
        let _ = self.inner.pushes.send(item);
    }
}
