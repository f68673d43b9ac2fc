use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, warn};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use feed_model::{FetchType, ItemSeq, RawItem, SessionKey};
use feed_store::RawItemRepository;

use crate::derived::{DerivedItem, DerivedItemCache};
use crate::error::{Result, SessionError};
use crate::page::PageManager;

/// One emission of a session's derived stream: the full window, in id order.
pub type DerivedSnapshot = Arc<Vec<DerivedItem>>;

/// Session lifecycle facade.
///
/// Owns one window, one push-routing task, and one derive task per attached
/// key, and is the only writer/remover of sessions. The derived-item cache
/// and the repository are shared across all sessions.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    repository: RawItemRepository,
    cache: DerivedItemCache,
    sessions: Mutex<HashMap<SessionKey, Session>>,
}

struct Session {
    page: PageManager,
    output: watch::Receiver<DerivedSnapshot>,
    route_task: JoinHandle<()>,
    derive_task: JoinHandle<()>,
    fetch_in_flight: Arc<AtomicBool>,
    await_initial_sync: Arc<AtomicBool>,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.route_task.abort();
        self.derive_task.abort();
    }
}

impl SessionRegistry {
    #[must_use]
    pub fn new(repository: RawItemRepository, cache: DerivedItemCache) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                repository,
                cache,
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    #[must_use]
    pub fn repository(&self) -> &RawItemRepository {
        &self.inner.repository
    }

    /// Creates the session for `key` if absent and returns its derived
    /// stream. Re-attaching an existing key returns another receiver of the
    /// same stream.
    pub fn attach(&self, key: SessionKey) -> watch::Receiver<DerivedSnapshot> {
        let mut sessions = self.sessions();
        if let Some(session) = sessions.get(&key) {
            return session.output.clone();
        }
        debug!("attach: creating session {key}");

        let page = PageManager::new();
        let await_initial_sync = Arc::new(AtomicBool::new(false));
        let (output_tx, output_rx) = watch::channel(DerivedSnapshot::default());

        let route_task = spawn_route_task(self.inner.repository.subscribe(), page.clone(), key);
        let derive_task = spawn_derive_task(
            self.inner.cache.clone(),
            page.clone(),
            output_tx,
            await_initial_sync.clone(),
        );

        sessions.insert(
            key,
            Session {
                page,
                output: output_rx.clone(),
                route_task,
                derive_task,
                fetch_in_flight: Arc::new(AtomicBool::new(false)),
                await_initial_sync,
            },
        );
        output_rx
    }

    /// Initial fetch for the session window: latest items when `pivot` is
    /// `None`, otherwise the window around the pivot.
    pub async fn initialize(
        &self,
        key: SessionKey,
        count: usize,
        pivot: Option<ItemSeq>,
    ) -> Result<()> {
        let page = self.session_page(key)?;
        let fetched = match pivot {
            None => {
                self.inner
                    .repository
                    .fetch_latest(key.channel_id, count)
                    .await?
            }
            Some(pivot) => {
                self.inner
                    .repository
                    .fetch(key.channel_id, pivot, count, FetchType::Around)
                    .await?
            }
        };
        page.put(&fetched);
        Ok(())
    }

    /// Windowed fetch merged into the session window. Single-flight: a call
    /// that finds another fetch in progress for the same session is dropped,
    /// not queued.
    pub async fn fetch(
        &self,
        key: SessionKey,
        pivot: ItemSeq,
        count: usize,
        fetch_type: FetchType,
    ) -> Result<()> {
        let (page, in_flight) = {
            let sessions = self.sessions();
            let session = sessions.get(&key).ok_or(SessionError::NotFound(key))?;
            (session.page.clone(), session.fetch_in_flight.clone())
        };

        if in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("fetch dropped: one already in flight for session {key}");
            return Ok(());
        }

        let outcome = self
            .inner
            .repository
            .fetch(key.channel_id, pivot, count, fetch_type)
            .await;
        match outcome {
            Ok(fetched) => {
                page.put(&fetched);
                in_flight.store(false, Ordering::SeqCst);
                Ok(())
            }
            Err(err) => {
                in_flight.store(false, Ordering::SeqCst);
                Err(err.into())
            }
        }
    }

    /// Empties the session window. Best-effort cleanup: once the session is
    /// found, the clearing runs to completion even if the caller is torn
    /// down concurrently, and internal failure is logged, not propagated.
    pub async fn clear(&self, key: SessionKey) -> Result<()> {
        let page = self.session_page(key)?;
        let cleanup = tokio::spawn(async move { page.clear() });
        if cleanup.await.is_err() {
            warn!("clear for session {key} did not run to completion");
        }
        Ok(())
    }

    /// When set, every emission of the session's derived stream first
    /// resolves the first value of each item's reaction and scrap handle,
    /// so the stream never delivers items with unresolved overlay handles.
    /// There is no timeout on that join.
    pub fn set_await_initial_sync(&self, key: SessionKey, enabled: bool) -> Result<()> {
        let sessions = self.sessions();
        let session = sessions.get(&key).ok_or(SessionError::NotFound(key))?;
        session.await_initial_sync.store(enabled, Ordering::Relaxed);
        Ok(())
    }

    /// Cancels the session's own tasks and removes it. In-flight overlay
    /// pulls are owned by the shared cache and keep running. A later
    /// `attach` of the same key starts a fresh, empty session.
    pub fn detach(&self, key: SessionKey) -> Result<()> {
        let session = self
            .sessions()
            .remove(&key)
            .ok_or(SessionError::NotFound(key))?;
        drop(session);
        debug!("detached session {key}");
        Ok(())
    }

    #[must_use]
    pub fn is_attached(&self, key: SessionKey) -> bool {
        self.sessions().contains_key(&key)
    }

    fn session_page(&self, key: SessionKey) -> Result<PageManager> {
        let sessions = self.sessions();
        let session = sessions.get(&key).ok_or(SessionError::NotFound(key))?;
        Ok(session.page.clone())
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionKey, Session>> {
        self.inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Routes the repository push stream, filtered to the session's channel,
/// into the window, in emission order, single consumer per session.
fn spawn_route_task(
    mut pushes: broadcast::Receiver<RawItem>,
    page: PageManager,
    key: SessionKey,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match pushes.recv().await {
                Ok(item) => {
                    if item.id().channel_id == key.channel_id {
                        page.push(item);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("session {key}: push stream lagged, {missed} events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Maps window snapshots through the derived-item cache and publishes them.
fn spawn_derive_task(
    cache: DerivedItemCache,
    page: PageManager,
    output: watch::Sender<DerivedSnapshot>,
    await_initial_sync: Arc<AtomicBool>,
) -> JoinHandle<()> {
    let mut window = page.subscribe();
    tokio::spawn(async move {
        loop {
            let raws: Vec<RawItem> = {
                let snapshot = window.borrow_and_update().clone();
                snapshot.iter().map(|(_, item)| item.clone()).collect()
            };
            let items = cache.to_derived(&raws).await;
            if await_initial_sync.load(Ordering::Relaxed) {
                resolve_first_values(&items).await;
            }
            output.send_replace(Arc::new(items));

            if window.changed().await.is_err() {
                break;
            }
        }
    })
}

/// Per-emission join over every item's overlay handles; no timeout.
async fn resolve_first_values(items: &[DerivedItem]) {
    for item in items {
        let mut reaction = item.reaction.clone();
        reaction.first_value().await;
        let mut scrap = item.scrap.clone();
        scrap.first_value().await;
    }
}
