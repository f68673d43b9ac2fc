use log::debug;
use tokio::sync::watch;

use feed_model::{ItemId, Page, RawItem};
use feed_store::{OrderedMap, Snapshot};

/// One session's windowed copy of raw items, seeded by fetches and grown by
/// live pushes.
///
/// Pushes apply unconditionally: the window is never re-fitted to the
/// bounds of the fetch that seeded it, so it grows monotonically as pushes
/// accumulate. For long-lived sessions that is a latent memory-growth
/// concern.
#[derive(Clone, Default)]
pub struct PageManager {
    window: OrderedMap<ItemId, RawItem>,
}

impl PageManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            window: OrderedMap::new(),
        }
    }

    /// Seeds or replaces entries from a fetch result.
    pub fn put(&self, page: &Page) {
        self.window.put_all(
            page.items
                .iter()
                .map(|item| (item.id, RawItem::Normal(item.clone()))),
        );
    }

    /// Applies one live mutation. A delete for an id the window does not
    /// hold is a stale write and is absorbed silently.
    pub fn push(&self, item: RawItem) {
        match item {
            RawItem::Normal(_) => self.window.put(item.id(), item),
            RawItem::Deleted { id, .. } => {
                if self.window.delete(&id).is_none() {
                    debug!("stale delete for {id} absorbed");
                }
            }
        }
    }

    /// Empties the window. The canonical store is unaffected.
    pub fn clear(&self) {
        self.window.clear();
    }

    #[must_use]
    pub fn snapshot(&self) -> Snapshot<ItemId, RawItem> {
        self.window.snapshot()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Snapshot<ItemId, RawItem>> {
        self.window.subscribe()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.window.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feed_model::NormalItem;

    fn page(channel_id: i64, seqs: std::ops::Range<i64>) -> Page {
        let items: Vec<NormalItem> = seqs
            .map(|seq| NormalItem::new(ItemId::new(channel_id, seq), 0))
            .collect();
        let last_id = items.last().map_or(0, |item| item.id.item_id);
        Page { items, last_id }
    }

    fn window_seqs(manager: &PageManager) -> Vec<i64> {
        manager
            .snapshot()
            .iter()
            .map(|(id, _)| id.item_id)
            .collect()
    }

    #[test]
    fn put_seeds_the_window_in_order() {
        let manager = PageManager::new();
        manager.put(&page(1, 2..5));
        manager.put(&page(1, 0..3));
        assert_eq!(window_seqs(&manager), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn pushes_apply_unconditionally_beyond_fetch_bounds() {
        let manager = PageManager::new();
        manager.put(&page(1, 0..2));

        manager.push(RawItem::Normal(NormalItem::new(ItemId::new(1, 50), 0)));
        assert_eq!(window_seqs(&manager), vec![0, 1, 50]);
    }

    #[test]
    fn delete_before_insert_is_absorbed_by_last_write_wins() {
        let manager = PageManager::new();
        manager.put(&page(1, 0..2));

        let id = ItemId::new(1, 2);
        manager.push(RawItem::Deleted { id, updated_at: 0 });
        manager.push(RawItem::Normal(NormalItem::new(id, 1)));

        assert_eq!(window_seqs(&manager), vec![0, 1, 2]);
    }

    #[test]
    fn delete_removes_from_the_window() {
        let manager = PageManager::new();
        manager.put(&page(1, 0..3));
        manager.push(RawItem::Deleted {
            id: ItemId::new(1, 1),
            updated_at: 0,
        });
        assert_eq!(window_seqs(&manager), vec![0, 2]);
    }

    #[test]
    fn clear_empties_only_the_window() {
        let manager = PageManager::new();
        manager.put(&page(1, 0..3));
        manager.clear();
        assert!(manager.is_empty());
    }
}
