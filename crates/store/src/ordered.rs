use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

/// Immutable full-map snapshot in key order.
pub type Snapshot<K, V> = Arc<Vec<(K, V)>>;

/// Sorted, unique-key container with a change-notification stream of full
/// snapshots.
///
/// Every mutation publishes the updated snapshot while still holding the map
/// lock, so the notification sequence matches the mutation sequence exactly.
/// Delivery uses a watch channel: subscribers always observe a monotonically
/// advancing sequence of snapshots, rapid mutations may coalesce, and the
/// final snapshot delivered is the latest.
///
/// Handles are cheap to clone and safe to mutate from multiple producers.
pub struct OrderedMap<K, V> {
    inner: Arc<MapInner<K, V>>,
}

struct MapInner<K, V> {
    entries: Mutex<BTreeMap<K, V>>,
    snapshot_tx: watch::Sender<Snapshot<K, V>>,
}

impl<K, V> Clone for OrderedMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Default for OrderedMap<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> OrderedMap<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    #[must_use]
    pub fn new() -> Self {
        let (snapshot_tx, _) = watch::channel(Snapshot::default());
        Self {
            inner: Arc::new(MapInner {
                entries: Mutex::new(BTreeMap::new()),
                snapshot_tx,
            }),
        }
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<K, V>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, entries: &BTreeMap<K, V>) {
        let snapshot: Snapshot<K, V> = Arc::new(
            entries
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        );
        self.inner.snapshot_tx.send_replace(snapshot);
    }

    pub fn put(&self, key: K, value: V) {
        let mut entries = self.entries();
        entries.insert(key, value);
        self.publish(&entries);
    }

    pub fn put_all(&self, pairs: impl IntoIterator<Item = (K, V)>) {
        let mut entries = self.entries();
        let mut changed = false;
        for (key, value) in pairs {
            entries.insert(key, value);
            changed = true;
        }
        if changed {
            self.publish(&entries);
        }
    }

    /// Removes the key. Deleting an absent key is a no-op and publishes
    /// nothing.
    pub fn delete(&self, key: &K) -> Option<V> {
        let mut entries = self.entries();
        let removed = entries.remove(key);
        if removed.is_some() {
            self.publish(&entries);
        }
        removed
    }

    pub fn clear(&self) {
        let mut entries = self.entries();
        if entries.is_empty() {
            return;
        }
        entries.clear();
        self.publish(&entries);
    }

    /// Current ordered sequence of entries.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot<K, V> {
        self.inner.snapshot_tx.borrow().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        self.entries().get(key).cloned()
    }

    /// Snapshot stream. Late subscribers start from the current snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Snapshot<K, V>> {
        self.inner.snapshot_tx.subscribe()
    }

    /// Reactive projection of a single key. The handle reflects every
    /// subsequent `put`/`delete` for that key over one underlying
    /// subscription.
    #[must_use]
    pub fn watch_key(&self, key: K) -> KeyWatch<K, V> {
        KeyWatch {
            key,
            rx: self.inner.snapshot_tx.subscribe(),
        }
    }
}

/// Live single-key view over an [`OrderedMap`] snapshot stream.
#[derive(Debug, Clone)]
pub struct KeyWatch<K, V> {
    key: K,
    rx: watch::Receiver<Snapshot<K, V>>,
}

impl<K, V> KeyWatch<K, V>
where
    K: Ord,
    V: Clone,
{
    #[must_use]
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Current value for the key, if present.
    #[must_use]
    pub fn get(&self) -> Option<V> {
        project(&self.rx.borrow(), &self.key)
    }

    /// Waits for the next snapshot. Returns `false` once the map side is
    /// gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Waits for the next snapshot and projects it. `None` once the map
    /// side is gone.
    pub async fn next_value(&mut self) -> Option<Option<V>> {
        if self.rx.changed().await.is_err() {
            return None;
        }
        let snapshot = self.rx.borrow_and_update().clone();
        Some(project(&snapshot, &self.key))
    }

    /// Resolves the projection of the latest snapshot, marking it seen. The
    /// map always carries a current snapshot, so this never blocks.
    pub async fn first_value(&mut self) -> Option<V> {
        let snapshot = self.rx.borrow_and_update().clone();
        project(&snapshot, &self.key)
    }
}

fn project<K: Ord, V: Clone>(snapshot: &Snapshot<K, V>, key: &K) -> Option<V> {
    snapshot
        .binary_search_by(|(candidate, _)| candidate.cmp(key))
        .ok()
        .map(|index| snapshot[index].1.clone())
}
