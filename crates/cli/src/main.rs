//! Demo driver for the channel feed pipeline: seeds a repository, starts
//! the simulated push sources, attaches one session, and streams derived
//! emissions to stdout.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use log::info;

use feed_model::{ItemId, ReactionEvent, SessionKey};
use feed_overlay::{
    ManualReactionPush, RandomReactionPush, RandomReactionPushConfig, ReactionOverlay,
    ScrapOverlay, SimulatedReactionPull, SimulatedScrapSource,
};
use feed_session::{DerivedItem, DerivedItemCache, SessionRegistry};
use feed_store::{GeneratorConfig, RawItemRepository};

#[derive(Parser)]
#[command(name = "feed")]
#[command(about = "Live channel feed: windowed fetch merged with live pushes and overlays")]
#[command(version)]
struct Cli {
    /// Channel to attach to
    #[arg(long, default_value_t = 0)]
    channel: i64,

    /// Initial window size
    #[arg(long, default_value_t = 20)]
    count: usize,

    /// Center the initial window around this item instead of fetching latest
    #[arg(long)]
    around: Option<i64>,

    /// Number of pre-seeded items across channels 0..=3
    #[arg(long, default_value_t = 1000)]
    seed_items: usize,

    /// Raw push interval in milliseconds
    #[arg(long, default_value_t = 1000)]
    push_interval_ms: u64,

    /// Reaction push interval in milliseconds
    #[arg(long, default_value_t = 2000)]
    reaction_interval_ms: u64,

    /// How long to stream before detaching, in seconds
    #[arg(long, default_value_t = 30)]
    run_secs: u64,

    /// Deterministic seed for every simulated source
    #[arg(long)]
    seed: Option<u64>,

    /// Hold each emission until every overlay handle has resolved
    #[arg(long)]
    await_initial_sync: bool,

    /// Print emissions as JSON lines
    #[arg(long)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let seed = cli.seed.unwrap_or_else(rand::random);
    info!("simulated sources seeded with {seed}");

    let repository = RawItemRepository::seeded(cli.seed_items, 0..=3, seed);
    let push_interval = Duration::from_millis(cli.push_interval_ms.max(1));
    let _generator = repository.spawn_generator(GeneratorConfig {
        push_count: cli.run_secs * 1000 / cli.push_interval_ms.max(1) + 1,
        push_interval,
        channels: 0..=3,
        seed: Some(seed),
    });

    let reactions = ReactionOverlay::new(Arc::new(SimulatedReactionPull::with_seed(
        Duration::from_millis(1000),
        seed,
    )));
    let scraps = ScrapOverlay::new(Arc::new(SimulatedScrapSource::new(Duration::from_millis(
        200,
    ))));

    // One routed stream; the random source and the manual sink both feed it.
    let (manual, events) = ManualReactionPush::channel(16);
    reactions.attach_push(events);
    let (_reaction_push, mut random_events) =
        RandomReactionPush::spawn(RandomReactionPushConfig {
            push_interval: Duration::from_millis(cli.reaction_interval_ms.max(1)),
            channels: 0..=3,
            targets: 0..=cli.seed_items as i64,
            seed: Some(seed),
        });
    let forward = manual.clone();
    tokio::spawn(async move {
        while let Some(event) = random_events.recv().await {
            if forward.send(event).await.is_err() {
                break;
            }
        }
    });

    let cache = DerivedItemCache::new(reactions, scraps);
    let registry = SessionRegistry::new(repository, cache.clone());

    let key = SessionKey::new(cli.channel, 0);
    let mut stream = registry.attach(key);
    if cli.await_initial_sync {
        registry.set_await_initial_sync(key, true)?;
    }
    registry.initialize(key, cli.count, cli.around).await?;

    // Externally-triggered event through the manual sink, a few seconds in.
    let injector = manual.clone();
    let inject_target = ItemId::new(cli.channel, cli.around.unwrap_or(0));
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        let event = {
            let mut rng = rand::thread_rng();
            ReactionEvent::random(inject_target, &mut rng)
        };
        info!("injecting manual reaction event: {event:?}");
        let _ = injector.send(event).await;
    });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(cli.run_secs);
    loop {
        tokio::select! {
            changed = stream.changed() => {
                if changed.is_err() {
                    break;
                }
                let items = stream.borrow_and_update().clone();
                render(&items, cli.json)?;
            }
            () = tokio::time::sleep_until(deadline) => break,
        }
    }

    info!("detaching session {key}");
    registry.clear(key).await?;
    registry.detach(key)?;
    cache.shutdown();
    Ok(())
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
}

fn render(items: &[DerivedItem], json: bool) -> Result<()> {
    if json {
        let rows: Vec<serde_json::Value> = items
            .iter()
            .map(|item| {
                serde_json::json!({
                    "id": item.id.to_string(),
                    "text": item.text,
                    "reaction": item.reaction.get().map(feed_model::ReactionValue::value),
                    "scrap": item.scrap.get().map(|scrap| scrap.as_str().to_string()),
                })
            })
            .collect();
        println!("{}", serde_json::to_string(&rows)?);
        return Ok(());
    }

    println!("-- {} items --", items.len());
    for item in items.iter().skip(items.len().saturating_sub(10)) {
        let reaction = item
            .reaction
            .get()
            .map_or_else(|| "-".to_string(), |value| value.value().to_string());
        let scrap = item
            .scrap
            .get()
            .map_or_else(|| "-".to_string(), |value| value.as_str().to_string());
        println!(
            "  {:>8}  {:<12} reaction={reaction:<3} scrap={scrap}",
            item.id.to_string(),
            item.text
        );
    }
    Ok(())
}
