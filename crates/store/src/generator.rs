use std::ops::RangeInclusive;
use std::time::Duration;

use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tokio::task::JoinHandle;

use feed_model::{now_millis, ChannelId, ItemId, NormalItem};

use crate::repository::RawItemRepository;

/// Tuning for the simulated upstream feed.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Total number of ticks before the generator stops on its own.
    pub push_count: u64,
    pub push_interval: Duration,
    /// Channels the generated events are spread over.
    pub channels: RangeInclusive<ChannelId>,
    /// Fixed seed for deterministic event sequences; entropy when `None`.
    pub seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            push_count: 200,
            push_interval: Duration::from_secs(1),
            channels: 0..=3,
            seed: None,
        }
    }
}

/// Owned handle to a repository's simulated live feed.
///
/// The generating task belongs to whoever holds this handle: `shutdown`
/// stops it, and dropping the handle stops it as a backstop. It is never a
/// process-wide singleton, so a deterministic event source can stand in for
/// it by driving [`RawItemRepository::insert`] and
/// [`RawItemRepository::remove`] directly.
pub struct PushGenerator {
    handle: JoinHandle<()>,
}

impl PushGenerator {
    pub fn shutdown(&self) {
        self.handle.abort();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the generator to run through its configured tick count.
    pub async fn join(mut self) {
        let _ = (&mut self.handle).await;
    }
}

impl Drop for PushGenerator {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl RawItemRepository {
    /// Starts the simulated upstream feed for this repository instance.
    #[must_use]
    pub fn spawn_generator(&self, config: GeneratorConfig) -> PushGenerator {
        let repo = self.clone();
        let handle = tokio::spawn(run(repo, config));
        PushGenerator { handle }
    }
}

async fn run(repo: RawItemRepository, config: GeneratorConfig) {
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    info!(
        "push generator started: {} ticks every {:?} over channels {:?}",
        config.push_count, config.push_interval, config.channels
    );

    for _ in 0..config.push_count {
        tokio::time::sleep(config.push_interval).await;
        let channel_id = rng.gen_range(config.channels.clone());

        match rng.gen_range(0..3u8) {
            0 => {
                let id = ItemId::new(channel_id, repo.next_sequence());
                repo.insert(NormalItem::new(id, now_millis())).await;
            }
            1 => {
                let recent = repo.recent_ids(channel_id, 10).await;
                match recent.choose(&mut rng) {
                    Some(&target) => {
                        repo.remove(target).await;
                    }
                    None => debug!("no items to delete on channel {channel_id}"),
                }
            }
            _ => {
                // Lag: the delete for a brand-new item overtakes its insert.
                let id = ItemId::new(channel_id, repo.next_sequence());
                repo.emit_deleted(id).await;
                repo.insert(NormalItem::new(id, now_millis())).await;
            }
        }
    }

    info!("push generator finished after {} ticks", config.push_count);
}
