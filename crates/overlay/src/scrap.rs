use std::sync::Arc;

use log::debug;

use feed_model::{ItemId, ScrapValue};
use feed_store::{KeyWatch, OrderedMap};

use crate::error::Result;
use crate::sources::ScrapSource;

/// Reactive map of per-item scraps. Pull-only: same shape as the reaction
/// overlay minus the push merge.
#[derive(Clone)]
pub struct ScrapOverlay {
    inner: Arc<ScrapInner>,
}

struct ScrapInner {
    map: OrderedMap<ItemId, ScrapValue>,
    source: Arc<dyn ScrapSource>,
}

impl ScrapOverlay {
    #[must_use]
    pub fn new(source: Arc<dyn ScrapSource>) -> Self {
        Self {
            inner: Arc::new(ScrapInner {
                map: OrderedMap::new(),
                source,
            }),
        }
    }

    /// Resolves each id through the single-shot source and merges the
    /// present values in one snapshot update.
    pub async fn fetch(&self, ids: &[ItemId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        debug!("scrap pull for {} ids", ids.len());
        let mut resolved = Vec::with_capacity(ids.len());
        for &id in ids {
            if let Some(value) = self.inner.source.get(id).await? {
                resolved.push((id, value));
            }
        }
        self.inner.map.put_all(resolved);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: ItemId) -> KeyWatch<ItemId, ScrapValue> {
        self.inner.map.watch_key(id)
    }
}
