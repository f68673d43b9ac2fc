use std::sync::{Arc, Mutex, PoisonError};

use log::debug;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use feed_model::{ItemId, ReactionEvent, ReactionValue};
use feed_store::{KeyWatch, OrderedMap};

use crate::error::Result;
use crate::sources::ReactionPullSource;

/// Reactive map of per-item reactions, fed by batched pulls and a live push
/// stream.
///
/// Both paths resolve to ordered `put`/`delete` calls on one shared map, so
/// a push arriving between a pull request and its response is never lost:
/// whichever write lands later wins, regardless of origin.
#[derive(Clone)]
pub struct ReactionOverlay {
    inner: Arc<ReactionInner>,
}

struct ReactionInner {
    map: OrderedMap<ItemId, ReactionValue>,
    pull: Arc<dyn ReactionPullSource>,
    router: Mutex<Option<JoinHandle<()>>>,
}

impl ReactionOverlay {
    #[must_use]
    pub fn new(pull: Arc<dyn ReactionPullSource>) -> Self {
        Self {
            inner: Arc::new(ReactionInner {
                map: OrderedMap::new(),
                pull,
                router: Mutex::new(None),
            }),
        }
    }

    /// Starts routing a push stream into the shared map. The overlay owns
    /// the router task; attaching a new stream stops the previous router.
    pub fn attach_push(&self, mut events: mpsc::Receiver<ReactionEvent>) {
        let map = self.inner.map.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                apply_event(&map, event);
            }
            debug!("reaction push stream ended");
        });

        let mut router = self
            .inner
            .router
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = router.replace(handle) {
            previous.abort();
        }
    }

    /// Applies a single push event. Delivery order defines the final state
    /// for a given id: the last event wins.
    pub fn apply(&self, event: ReactionEvent) {
        apply_event(&self.inner.map, event);
    }

    /// Issues one batched pull for `ids` and merges only the present
    /// results. Callers are responsible for requesting only ids they do not
    /// already hold.
    pub async fn fetch(&self, ids: &[ItemId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        debug!("reaction pull for {} ids", ids.len());
        let fetched = self.inner.pull.pull(ids).await?;
        self.inner.map.put_all(
            fetched
                .into_iter()
                .filter_map(|(id, value)| value.map(|value| (id, value))),
        );
        Ok(())
    }

    /// Live projection of the shared map to a single id; reflects every
    /// subsequent put/delete for that id without a new subscription per
    /// call.
    #[must_use]
    pub fn get(&self, id: ItemId) -> KeyWatch<ItemId, ReactionValue> {
        self.inner.map.watch_key(id)
    }

    /// Stops the push router, if one is attached.
    pub fn shutdown(&self) {
        let mut router = self
            .inner
            .router
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = router.take() {
            handle.abort();
        }
    }
}

impl Drop for ReactionInner {
    fn drop(&mut self) {
        if let Some(handle) = self
            .router
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

fn apply_event(map: &OrderedMap<ItemId, ReactionValue>, event: ReactionEvent) {
    match event {
        ReactionEvent::Insert { target, value } | ReactionEvent::Update { target, value } => {
            map.put(target, value);
        }
        ReactionEvent::Delete { target } => {
            map.delete(&target);
        }
    }
}
