//! Scenario tests over the full pipeline: repository → page window →
//! derived cache → session registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio::sync::watch;
use tokio::time::timeout;

use feed_model::{
    now_millis, FetchType, ItemId, NormalItem, ReactionValue, ScrapValue, SessionKey,
};
use feed_overlay::{ReactionOverlay, ReactionPullSource, ScrapOverlay, SimulatedScrapSource};
use feed_session::{DerivedItemCache, DerivedSnapshot, SessionError, SessionRegistry};
use feed_store::{RawItemRepository, StoreError};

/// Deterministic pull source: every id resolves to the same value, batches
/// are recorded.
struct FixedPull {
    value: ReactionValue,
    batches: Mutex<Vec<Vec<ItemId>>>,
}

impl FixedPull {
    fn new(value: u8) -> Arc<Self> {
        Arc::new(Self {
            value: ReactionValue::new(value).expect("test value in domain"),
            batches: Mutex::new(Vec::new()),
        })
    }

    fn batch_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }
}

#[async_trait]
impl ReactionPullSource for FixedPull {
    async fn pull(
        &self,
        ids: &[ItemId],
    ) -> feed_overlay::Result<HashMap<ItemId, Option<ReactionValue>>> {
        self.batches.lock().unwrap().push(ids.to_vec());
        Ok(ids.iter().map(|&id| (id, Some(self.value))).collect())
    }
}

struct Stack {
    repository: RawItemRepository,
    registry: SessionRegistry,
    pull: Arc<FixedPull>,
}

fn stack_with_items(items: impl IntoIterator<Item = NormalItem>) -> Stack {
    let repository = RawItemRepository::with_items(items);
    let pull = FixedPull::new(4);
    let reactions = ReactionOverlay::new(pull.clone());
    let scraps = ScrapOverlay::new(Arc::new(SimulatedScrapSource::new(Duration::ZERO)));
    let cache = DerivedItemCache::new(reactions, scraps);
    let registry = SessionRegistry::new(repository.clone(), cache);
    Stack {
        repository,
        registry,
        pull,
    }
}

fn channel_items(channel_id: i64, seqs: std::ops::Range<i64>) -> Vec<NormalItem> {
    seqs.map(|seq| NormalItem::new(ItemId::new(channel_id, seq), 0))
        .collect()
}

async fn next_matching(
    stream: &mut watch::Receiver<DerivedSnapshot>,
    pred: impl Fn(&DerivedSnapshot) -> bool,
) -> DerivedSnapshot {
    timeout(Duration::from_secs(5), async {
        loop {
            let current = stream.borrow_and_update().clone();
            if pred(&current) {
                return current;
            }
            stream.changed().await.expect("derived stream alive");
        }
    })
    .await
    .expect("expected emission within deadline")
}

fn item_seqs(snapshot: &DerivedSnapshot) -> Vec<i64> {
    snapshot.iter().map(|item| item.id.item_id).collect()
}

#[tokio::test]
async fn latest_window_grows_with_live_pushes() {
    let stack = stack_with_items(channel_items(1, 0..5));
    let key = SessionKey::new(1, 0);

    let mut stream = stack.registry.attach(key);
    stack
        .registry
        .initialize(key, 20, None)
        .await
        .expect("initial fetch");

    let initial = next_matching(&mut stream, |items| items.len() == 5).await;
    assert_eq!(item_seqs(&initial), vec![0, 1, 2, 3, 4]);

    stack
        .repository
        .insert(NormalItem::new(ItemId::new(1, 5), now_millis()))
        .await;

    let grown = next_matching(&mut stream, |items| items.len() == 6).await;
    assert_eq!(item_seqs(&grown), vec![0, 1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn pushes_for_other_channels_are_filtered_out() {
    let mut items = channel_items(1, 0..3);
    items.extend(channel_items(2, 10..12));
    let stack = stack_with_items(items);
    let key = SessionKey::new(1, 0);

    let mut stream = stack.registry.attach(key);
    stack
        .registry
        .initialize(key, 20, None)
        .await
        .expect("initial fetch");
    next_matching(&mut stream, |items| items.len() == 3).await;

    stack
        .repository
        .insert(NormalItem::new(ItemId::new(2, 12), now_millis()))
        .await;
    stack
        .repository
        .insert(NormalItem::new(ItemId::new(1, 13), now_millis()))
        .await;

    let grown = next_matching(&mut stream, |items| items.len() == 4).await;
    assert_eq!(item_seqs(&grown), vec![0, 1, 2, 13]);
}

#[tokio::test]
async fn delete_before_insert_lag_pair_converges_to_present() {
    let stack = stack_with_items(channel_items(1, 0..3));
    let key = SessionKey::new(1, 0);

    let mut stream = stack.registry.attach(key);
    stack
        .registry
        .initialize(key, 20, None)
        .await
        .expect("initial fetch");
    next_matching(&mut stream, |items| items.len() == 3).await;

    let id = ItemId::new(1, 3);
    stack.repository.emit_deleted(id).await;
    stack
        .repository
        .insert(NormalItem::new(id, now_millis()))
        .await;

    let converged = next_matching(&mut stream, |items| items.len() == 4).await;
    assert_eq!(item_seqs(&converged), vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn initialize_around_pivot_seeds_a_centered_window() {
    let stack = stack_with_items(channel_items(1, 0..9));
    let key = SessionKey::new(1, 0);

    let mut stream = stack.registry.attach(key);
    stack
        .registry
        .initialize(key, 4, Some(4))
        .await
        .expect("initial fetch");

    let window = next_matching(&mut stream, |items| !items.is_empty()).await;
    assert_eq!(item_seqs(&window), vec![2, 3, 4, 5, 6]);
}

#[tokio::test]
async fn initialize_on_empty_channel_propagates_the_store_error() {
    let stack = stack_with_items(channel_items(1, 0..3));
    let key = SessionKey::new(9, 0);

    stack.registry.attach(key);
    let err = stack.registry.initialize(key, 20, None).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Store(StoreError::EmptyChannel(9))
    ));
}

#[tokio::test]
async fn operations_before_attach_fail_with_not_found() {
    let stack = stack_with_items(channel_items(1, 0..3));
    let key = SessionKey::new(1, 7);

    let err = stack.registry.initialize(key, 20, None).await.unwrap_err();
    assert!(matches!(err, SessionError::NotFound(found) if found == key));

    let err = stack
        .registry
        .fetch(key, 1, 2, FetchType::Older)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::NotFound(found) if found == key));

    let err = stack.registry.clear(key).await.unwrap_err();
    assert!(matches!(err, SessionError::NotFound(found) if found == key));
}

#[tokio::test]
async fn detach_forgets_the_session_and_reattach_starts_fresh() {
    let stack = stack_with_items(channel_items(1, 0..5));
    let key = SessionKey::new(1, 0);

    let mut stream = stack.registry.attach(key);
    stack
        .registry
        .initialize(key, 20, None)
        .await
        .expect("initial fetch");
    next_matching(&mut stream, |items| items.len() == 5).await;

    stack.registry.detach(key).expect("attached");
    assert!(!stack.registry.is_attached(key));

    let err = stack
        .registry
        .fetch(key, 2, 2, FetchType::Older)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::NotFound(found) if found == key));

    // Fresh session: no reuse of the prior window.
    let fresh = stack.registry.attach(key);
    assert!(fresh.borrow().is_empty());
}

#[tokio::test]
async fn reattach_shares_the_existing_stream() {
    let stack = stack_with_items(channel_items(1, 0..5));
    let key = SessionKey::new(1, 0);

    let mut first = stack.registry.attach(key);
    stack
        .registry
        .initialize(key, 20, None)
        .await
        .expect("initial fetch");
    next_matching(&mut first, |items| items.len() == 5).await;

    let mut second = stack.registry.attach(key);
    let seen = next_matching(&mut second, |items| items.len() == 5).await;
    assert_eq!(item_seqs(&seen), vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn clear_empties_the_window_but_not_the_store() {
    let stack = stack_with_items(channel_items(1, 0..5));
    let key = SessionKey::new(1, 0);

    let mut stream = stack.registry.attach(key);
    stack
        .registry
        .initialize(key, 20, None)
        .await
        .expect("initial fetch");
    next_matching(&mut stream, |items| items.len() == 5).await;

    stack.registry.clear(key).await.expect("attached");
    next_matching(&mut stream, |items| items.is_empty()).await;

    let page = stack
        .repository
        .fetch_latest(1, 20)
        .await
        .expect("store untouched");
    assert_eq!(page.items.len(), 5);
}

#[tokio::test]
async fn concurrent_fetch_is_dropped_not_queued() {
    let repository = RawItemRepository::with_items(channel_items(1, 0..5))
        .with_fetch_latency(Duration::from_millis(50));
    let reactions = ReactionOverlay::new(FixedPull::new(4));
    let scraps = ScrapOverlay::new(Arc::new(SimulatedScrapSource::new(Duration::ZERO)));
    let registry = SessionRegistry::new(
        repository.clone(),
        DerivedItemCache::new(reactions, scraps),
    );
    let key = SessionKey::new(1, 0);

    let mut stream = registry.attach(key);

    // The first fetch holds the single-flight guard through its simulated
    // latency; the second is dropped.
    let older = registry.fetch(key, 4, 2, FetchType::Older);
    let newer = registry.fetch(key, 0, 2, FetchType::Newer);
    let (older_outcome, newer_outcome) = tokio::join!(older, newer);
    older_outcome.expect("first fetch runs");
    newer_outcome.expect("second fetch is dropped silently");

    let window = next_matching(&mut stream, |items| !items.is_empty()).await;
    assert_eq!(item_seqs(&window), vec![2, 3]);
}

#[tokio::test]
async fn await_initial_sync_delivers_resolved_overlay_handles() {
    let stack = stack_with_items(channel_items(1, 0..4));
    let key = SessionKey::new(1, 0);

    let mut stream = stack.registry.attach(key);
    stack
        .registry
        .set_await_initial_sync(key, true)
        .expect("attached");
    stack
        .registry
        .initialize(key, 20, None)
        .await
        .expect("initial fetch");

    let items = next_matching(&mut stream, |items| items.len() == 4).await;
    for item in items.iter() {
        assert_eq!(item.reaction.get(), ReactionValue::new(4));
        assert_eq!(
            item.scrap.get(),
            Some(ScrapValue::new(format!("scrap:{}", item.id)))
        );
    }
}

#[tokio::test]
async fn unchanged_emissions_do_not_re_pull() {
    let stack = stack_with_items(channel_items(1, 0..4));
    let key = SessionKey::new(1, 0);

    let mut stream = stack.registry.attach(key);
    stack
        .registry
        .initialize(key, 20, None)
        .await
        .expect("initial fetch");
    next_matching(&mut stream, |items| items.len() == 4).await;
    let after_seed = stack.pull.batch_count();

    // A push for a brand-new item must pull that id only; the cached four
    // stay untouched.
    stack
        .repository
        .insert(NormalItem::new(ItemId::new(1, 4), now_millis()))
        .await;
    next_matching(&mut stream, |items| items.len() == 5).await;

    let batches = stack.pull.batches.lock().unwrap().clone();
    assert!(after_seed >= 1);
    let last = batches.last().expect("at least one batch");
    assert_eq!(last, &vec![ItemId::new(1, 4)]);
}
