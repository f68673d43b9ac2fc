use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use log::warn;
use tokio::task::{AbortHandle, JoinHandle};

use feed_model::{ItemId, RawItem, ReactionValue, ScrapValue};
use feed_overlay::{ReactionOverlay, ScrapOverlay};
use feed_store::KeyWatch;

const DELETED_TEXT: &str = "(deleted)";

/// A raw item paired with live handles into the reaction and scrap
/// overlays. The handles are projections, not eagerly-resolved values.
#[derive(Debug, Clone)]
pub struct DerivedItem {
    pub id: ItemId,
    pub text: String,
    pub reaction: KeyWatch<ItemId, ReactionValue>,
    pub scrap: KeyWatch<ItemId, ScrapValue>,
}

/// Shared, id-keyed cache of derived items.
///
/// An entry stores the raw item it was derived from; equality is structural
/// (id + payload), so any payload change re-derives, including a `Deleted`
/// variant replacing a `Normal`. Entries are replaced, never merged.
#[derive(Clone)]
pub struct DerivedItemCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    entries: Mutex<HashMap<ItemId, CacheEntry>>,
    reactions: ReactionOverlay,
    scraps: ScrapOverlay,
    /// In-flight overlay pulls, owned here so teardown is deterministic.
    pulls: Mutex<Vec<AbortHandle>>,
}

struct CacheEntry {
    raw: RawItem,
    derived: DerivedItem,
}

impl DerivedItemCache {
    #[must_use]
    pub fn new(reactions: ReactionOverlay, scraps: ScrapOverlay) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: Mutex::new(HashMap::new()),
                reactions,
                scraps,
                pulls: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Maps an ordered raw-item collection to derived items.
    ///
    /// Cached entries whose raw item is unchanged are returned as-is, with
    /// no overlay traffic. The missing-or-changed subset triggers exactly
    /// one batched overlay pull (ids deduplicated across the whole subset)
    /// before the items are rebuilt and stored.
    pub async fn to_derived(&self, raws: &[RawItem]) -> Vec<DerivedItem> {
        let stale = self.stale_ids(raws);
        if !stale.is_empty() {
            // The pull runs as a task owned by the cache: a caller that is
            // cancelled mid-await (a detaching session) leaves the shared
            // pull running to completion.
            let pull = self.spawn_pull(stale);
            if let Err(err) = pull.await {
                if err.is_panic() {
                    warn!("overlay pull task panicked: {err}");
                }
            }
        }

        let mut entries = self.entries();
        raws.iter()
            .map(|raw| {
                let id = raw.id();
                match entries.get(&id) {
                    Some(entry) if entry.raw == *raw => entry.derived.clone(),
                    _ => {
                        let derived = self.build(raw);
                        entries.insert(
                            id,
                            CacheEntry {
                                raw: raw.clone(),
                                derived: derived.clone(),
                            },
                        );
                        derived
                    }
                }
            })
            .collect()
    }

    /// Aborts any in-flight overlay pulls.
    pub fn shutdown(&self) {
        let mut pulls = self.pulls();
        for pull in pulls.drain(..) {
            pull.abort();
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    fn stale_ids(&self, raws: &[RawItem]) -> Vec<ItemId> {
        let entries = self.entries();
        let mut seen = HashSet::new();
        raws.iter()
            .filter(|raw| {
                entries
                    .get(&raw.id())
                    .map_or(true, |entry| entry.raw != **raw)
            })
            .map(RawItem::id)
            .filter(|id| seen.insert(*id))
            .collect()
    }

    fn build(&self, raw: &RawItem) -> DerivedItem {
        let id = raw.id();
        let text = match raw {
            RawItem::Normal(item) => item.text.clone(),
            RawItem::Deleted { .. } => DELETED_TEXT.to_string(),
        };
        DerivedItem {
            id,
            text,
            reaction: self.inner.reactions.get(id),
            scrap: self.inner.scraps.get(id),
        }
    }

    fn spawn_pull(&self, ids: Vec<ItemId>) -> JoinHandle<()> {
        let reactions = self.inner.reactions.clone();
        let scraps = self.inner.scraps.clone();
        let handle = tokio::spawn(async move {
            if let Err(err) = reactions.fetch(&ids).await {
                warn!("reaction pull for {} ids failed: {err}", ids.len());
            }
            if let Err(err) = scraps.fetch(&ids).await {
                warn!("scrap pull for {} ids failed: {err}", ids.len());
            }
        });

        let mut pulls = self.pulls();
        pulls.retain(|pull| !pull.is_finished());
        pulls.push(handle.abort_handle());
        handle
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<ItemId, CacheEntry>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn pulls(&self) -> std::sync::MutexGuard<'_, Vec<AbortHandle>> {
        self.inner
            .pulls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for CacheInner {
    fn drop(&mut self) {
        let mut pulls = self.pulls.lock().unwrap_or_else(PoisonError::into_inner);
        for pull in pulls.drain(..) {
            pull.abort();
        }
    }
}
