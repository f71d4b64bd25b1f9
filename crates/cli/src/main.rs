//! actq CLI - drive the activity queue against a JSON store.

mod demo;
mod generator;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use actq_core::ActivityId;
use actq_queue::{Activity, ActivityQueue, QueueConfig, Resolution};
use actq_storage::{ActivityStore, JsonStore};
use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use rand::Rng;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use demo::{DemoBody, DemoFactory, DemoSettings};
use generator::IdGenerator;

#[derive(Parser)]
#[command(name = "actq")]
#[command(about = "Ordered, deduplicating activity queue", long_about = None)]
struct Cli {
    /// Store directory
    #[arg(long, default_value = ".actq")]
    store: PathBuf,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit generated activities concurrently and wait for all of them
    Simulate(SimulateArgs),
    /// Show the persisted completion state
    State,
}

#[derive(Args)]
struct SimulateArgs {
    /// Number of distinct activities
    #[arg(long, default_value = "100")]
    count: usize,

    /// Maximum displacement of an id in the submission order
    #[arg(long, default_value = "5")]
    randomness: usize,

    /// Draw ids with repetition instead of shuffling
    #[arg(long)]
    duplicates: bool,

    /// Make every n-th activity fail (0 = never)
    #[arg(long, default_value = "0")]
    fail_every: u64,

    /// Work time of each activity
    #[arg(long, default_value = "10")]
    exec_delay_ms: u64,

    /// Make every n-th activity wait for its predecessor (0 = never)
    #[arg(long, default_value = "0")]
    chain_every: u64,

    /// Concurrent producers
    #[arg(long, default_value = "4")]
    producers: usize,

    /// Random seed (0 picks a random seed)
    #[arg(long, default_value = "0")]
    seed: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Simulate(args) => simulate(&cli.store, args).await?,
        Commands::State => {
            let store = JsonStore::new(&cli.store).await?;
            let resume = store.load_completion_state().await?;
            println!("Completion state: {}", resume.state);
            println!("  Watermark: {}", resume.state.last_activity_id);
            println!("  Gaps: {}", resume.state.gaps.len());
            println!("  Store max id: {}", resume.store_max_id);
        }
    }

    Ok(())
}

#[derive(Debug, Default)]
struct Tally {
    executed: usize,
    failed: usize,
    attached: usize,
    ignored: usize,
    stopped: usize,
}

impl Tally {
    fn add(&mut self, other: &Tally) {
        self.executed += other.executed;
        self.failed += other.failed;
        self.attached += other.attached;
        self.ignored += other.ignored;
        self.stopped += other.stopped;
    }
}

async fn simulate(store_path: &Path, args: SimulateArgs) -> Result<()> {
    anyhow::ensure!(args.count > 0, "--count must be positive");
    anyhow::ensure!(args.producers > 0, "--producers must be positive");

    let store = Arc::new(JsonStore::new(store_path).await?);
    // Continue numbering after whatever earlier runs stored.
    let base = store.max_activity_id().await?.get();

    let queue = Arc::new(
        ActivityQueue::start(
            Arc::clone(&store) as Arc<dyn ActivityStore>,
            Arc::new(DemoFactory),
            QueueConfig::default(),
        )
        .await?,
    );

    let seed = if args.seed == 0 {
        rand::thread_rng().gen()
    } else {
        args.seed
    };
    let mut generator = IdGenerator::from_seed(seed);
    let ids = if args.duplicates {
        generator.with_duplicates(args.count)
    } else {
        generator.shuffled(args.count, args.randomness)
    };
    info!(
        seed,
        submissions = ids.len(),
        first_id = base + 1,
        "simulation started"
    );

    let mut lanes: Vec<Vec<(usize, u64)>> = vec![Vec::new(); args.producers];
    for (n, id) in ids.into_iter().enumerate() {
        lanes[n % args.producers].push((n, base + id));
    }

    let mut producers = Vec::with_capacity(args.producers);
    for lane in lanes {
        let queue = Arc::clone(&queue);
        let settings = |id: u64| DemoSettings {
            delay_ms: args.exec_delay_ms,
            fail: args.fail_every > 0 && (id - base) % args.fail_every == 0,
            chained: args.chain_every > 0 && (id - base) % args.chain_every == 0,
        };
        let lane: Vec<_> = lane
            .into_iter()
            .map(|(n, id)| (n, settings(id).record(id)))
            .collect();

        producers.push(tokio::spawn(async move {
            let mut handles = Vec::with_capacity(lane.len());
            for (n, record) in lane {
                let activity = Activity::new(record, Arc::new(DemoBody));
                let activity = if n % 2 == 1 {
                    activity.from_receiver()
                } else {
                    activity
                };
                handles.push(queue.submit(activity).await?);
            }

            let mut tally = Tally::default();
            for handle in handles {
                match handle.await {
                    Ok(completion) => match completion.resolution {
                        Resolution::Executed(Ok(())) => tally.executed += 1,
                        Resolution::Executed(Err(_)) => tally.failed += 1,
                        Resolution::Attached { .. } => tally.attached += 1,
                        Resolution::Ignored => tally.ignored += 1,
                    },
                    Err(e) => {
                        warn!(error = %e, "submission did not complete");
                        tally.stopped += 1;
                    }
                }
            }
            Ok::<_, anyhow::Error>(tally)
        }));
    }

    let mut tally = Tally::default();
    for producer in producers {
        tally.add(&producer.await??);
    }

    let state = queue.completion_state();
    store.save_completion_state(&state).await?;
    match Arc::try_unwrap(queue) {
        Ok(queue) => queue.shutdown().await?,
        Err(_) => warn!("activity queue still shared, dropping it"),
    }

    println!("Simulation finished (seed {})", seed);
    println!("  Executed: {}", tally.executed);
    println!("  Failed: {}", tally.failed);
    println!("  Attached: {}", tally.attached);
    println!("  Ignored: {}", tally.ignored);
    if tally.stopped > 0 {
        println!("  Stopped: {}", tally.stopped);
    }
    println!("  Completion state: {}", state);
    println!(
        "  Store max id: {}",
        store.max_activity_id().await.unwrap_or(ActivityId::ZERO)
    );
    Ok(())
}
