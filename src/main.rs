//! `boardsync-sim`: two clients on one in-memory board, one dragging a
//! selection while the other watches. Reports persisted write counts,
//! convergence, and write round-trip latency.

use std::sync::Arc;
use std::time::Duration;

use boardsync::client::{BoardClient, Stores};
use boardsync::config::SyncConfig;
use boardsync::error::StoreError;
use boardsync::geometry::Geometry;
use boardsync::model::{CanvasObject, ObjectId};
use boardsync::store::memory::MemoryHub;
use boardsync::sync::Identity;
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;
use uuid::Uuid;


const SETTLE_ROUNDS: usize = 5;
const SETTLE_STEP_MS: u64 = 10;

#[derive(Debug, thiserror::Error)]
enum SimError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

#[derive(Parser, Debug)]
#[command(name = "boardsync-sim", about = "Simulate a collaborative drag against an in-memory board")]
struct Cli {
    /// Number of objects in the dragged selection.
    #[arg(long, env = "SIM_OBJECTS", default_value_t = 3)]
    objects: u32,

    /// Drag duration in milliseconds.
    #[arg(long, env = "SIM_DURATION_MS", default_value_t = 500)]
    duration_ms: u64,

    /// Pointer events per second.
    #[arg(long, env = "SIM_RATE_HZ", default_value_t = 60)]
    rate_hz: u64,

    /// Mean horizontal movement per pointer event.
    #[arg(long, env = "SIM_STEP", default_value_t = 2.0)]
    step: f64,

    /// Random jitter added to each pointer event, in scene units.
    #[arg(long, env = "SIM_JITTER", default_value_t = 0.5)]
    jitter: f64,

    #[arg(long, env = "SIM_SEED", default_value_t = 7)]
    seed: u64,
}

/// Highest pointer rate with a non-zero tick interval.
const MAX_RATE_HZ: u64 = 1_000_000;

impl Cli {
    /// Number of pointer events and the interval between them.
    fn drag_plan(&self) -> Result<(u64, Duration), SimError> {
        if self.rate_hz == 0 {
            return Err(SimError::InvalidArgument("rate-hz must be positive"));
        }
        if self.rate_hz > MAX_RATE_HZ {
            return Err(SimError::InvalidArgument("rate-hz must be at most 1000000"));
        }
        if !(self.jitter >= 0.0 && self.jitter.is_finite()) {
            return Err(SimError::InvalidArgument("jitter must be a non-negative number"));
        }
        let steps = self
            .duration_ms
            .checked_mul(self.rate_hz)
            .ok_or(SimError::InvalidArgument("duration-ms * rate-hz overflows"))?
            / 1000;
        Ok((steps, Duration::from_micros(1_000_000 / self.rate_hz)))
    }
}

#[tokio::main]
async fn main() -> Result<(), SimError> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let (steps, interval) = cli.drag_plan()?;

    let config = SyncConfig::from_env();
    let hub = MemoryHub::new();
    let board_id = Uuid::new_v4();
    hub.create_board(board_id).await;
    let stores = Stores::shared(&Arc::new(hub.clone()));

    let mut alice = BoardClient::connect(Identity::new(board_id, Uuid::new_v4(), "alice"), &config, stores.clone()).await?;
    let mut bob = BoardClient::connect(Identity::new(board_id, Uuid::new_v4(), "bob"), &config, stores).await?;
    let mut latency = alice.subscribe_latency();
    let mut failures = alice.subscribe_failures();

    let ids: Vec<ObjectId> = (0..cli.objects)
        .map(|i| {
            let obj = CanvasObject::shape(Geometry::rect(f64::from(i) * 120.0, 0.0, 100.0, 80.0));
            let id = obj.id;
            alice.add(obj);
            id
        })
        .collect();
    settle(&mut alice, &mut bob).await;

    alice.select(&ids);
    settle(&mut alice, &mut bob).await;
    if alice.core().selection().len() != ids.len() {
        return Err(SimError::InvalidArgument("selection was not granted"));
    }

    // PHASE: DRAG
    let writes_before = total_writes(&hub, board_id, &ids).await;
    let mut rng = StdRng::seed_from_u64(cli.seed);
    let mut ticker = tokio::time::interval(interval);
    alice.begin_transform(&ids);
    for _ in 0..steps {
        ticker.tick().await;
        let dx = cli.step + rng.random_range(-cli.jitter..=cli.jitter);
        let dy = rng.random_range(-cli.jitter..=cli.jitter);
        alice.translate(&ids, dx, dy);
        alice.poll_ready();
        bob.poll_ready();
    }
    alice.end_transform();
    alice.deselect(&ids);
    settle(&mut alice, &mut bob).await;

    // PHASE: REPORT
    let drag_writes = total_writes(&hub, board_id, &ids).await - writes_before;
    let converged = ids
        .iter()
        .all(|id| alice.get(id).map(|obj| obj.geometry) == bob.get(id).map(|obj| obj.geometry));
    let mut samples = 0_usize;
    while latency.try_recv().is_ok() {
        samples += 1;
    }
    let mut failed = 0_usize;
    while failures.try_recv().is_ok() {
        failed += 1;
    }
    let average_ms = u64::try_from(alice.core().average_latency().as_millis()).unwrap_or(u64::MAX);
    info!(steps, drag_writes, converged, samples, failed, average_ms, "simulation finished");

    println!("pointer events : {steps}");
    println!("objects        : {}", ids.len());
    println!("drag writes    : {drag_writes}");
    println!("converged      : {converged}");
    println!("latency        : {samples} samples, {average_ms} ms average");
    println!("failed writes  : {failed}");

    alice.disconnect().await?;
    bob.disconnect().await?;
    Ok(())
}

async fn settle(alice: &mut BoardClient, bob: &mut BoardClient) {
    for _ in 0..SETTLE_ROUNDS {
        tokio::time::sleep(Duration::from_millis(SETTLE_STEP_MS)).await;
        alice.poll_ready();
        bob.poll_ready();
    }
}

async fn total_writes(hub: &MemoryHub, board_id: Uuid, ids: &[ObjectId]) -> usize {
    let mut total = 0;
    for id in ids {
        total += hub.write_count(board_id, *id).await;
    }
    total
}
