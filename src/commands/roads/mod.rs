use anyhow::{Context, Result};
use clap::{Args, Subcommand, ValueEnum};
use log::info;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub mod cancel;
pub mod config;
pub mod db;
pub mod graph_builder;
pub mod height_cache;
pub mod logging;
pub mod models;
pub mod neighbor_policy;
pub mod pathfinder;
pub mod pending;
pub mod realize;
pub mod recovery;
pub mod scheduler;
pub mod session;
pub mod snapshot;
pub mod state_store;
pub mod style;
pub mod terrain;

use models::{Coordinate, EdgeStatus};
use session::WorldSession;
use snapshot::BoundingBox;
use state_store::ConnectionStateStore;
use terrain::{GridLocator, StructureLocator, SyntheticTerrain, TerrainOracle};

/// Ticks between actor moves in `run`.
const PROPOSE_EVERY: u64 = 25;

#[derive(Args, Debug, Clone)]
pub struct CommonOpts {
    /// SQLite DB holding world state (default: repo_root/roads.db or ROADS_DB)
    #[arg(long = "db")]
    pub db: Option<PathBuf>,
    /// World id; each world keeps its own structures, edges and roads
    #[arg(long = "world")]
    pub world: Option<String>,
    /// Structure tag (#village) or id to connect
    #[arg(long = "structure")]
    pub structure: Option<String>,
    /// Locator search radius in blocks
    #[arg(long = "search-radius")]
    pub search_radius: Option<i32>,
    /// Structures to discover when a session starts
    #[arg(long = "initial-structures")]
    pub initial_structures: Option<usize>,
    /// Ceiling on concurrently running generation jobs
    #[arg(long = "max-concurrent")]
    pub max_concurrent: Option<usize>,
    /// A* expansion budget per job
    #[arg(long = "max-steps")]
    pub max_steps: Option<usize>,
    /// Number of worker threads (rayon)
    #[arg(long = "threads")]
    pub threads: Option<usize>,
    /// Seed for road styles, terrain and the structure locator
    #[arg(long = "seed")]
    pub seed: Option<u64>,
    /// Log level (trace|debug|info|warn|error)
    #[arg(long = "log-level")]
    pub log_level: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerrainKind {
    Flat,
    Rolling,
}

#[derive(Subcommand, Debug, Clone)]
pub enum RoadCommand {
    /// Load the world, recover, discover structures and generate roads
    #[command(name = "run")]
    Run {
        /// Tick budget before the session is shut down
        #[arg(long, default_value_t = 2000)]
        ticks: u64,
        /// Milliseconds between ticks
        #[arg(long = "tick-ms", default_value_t = 20)]
        tick_ms: u64,
        #[arg(long, value_enum, default_value_t = TerrainKind::Rolling)]
        terrain: TerrainKind,
    },
    /// Run load-time recovery only and report what was requeued
    #[command(name = "recover")]
    Recover,
    /// Print structure, edge and road counts
    #[command(name = "status")]
    Status,
    /// Write a JSON snapshot of structures, edges and road polylines
    #[command(name = "snapshot")]
    Snapshot {
        /// Horizontal filter: x_min:x_max,z_min:z_max
        #[arg(long)]
        bbox: Option<String>,
        /// Output file (default: stdout)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

pub fn cmd_roads(common: CommonOpts, sub: RoadCommand) -> Result<()> {
    // Start with CLI, then overlay env (env > CLI precedence)
    let mut cfg = config::Config::default();
    cfg.db = common.db.clone();
    if let Some(w) = common.world.clone() { cfg.world = w; }
    if let Some(s) = common.structure.clone() { cfg.structure_target = s; }
    if let Some(r) = common.search_radius { cfg.search_radius = r; }
    if let Some(n) = common.initial_structures { cfg.initial_structure_count = n; }
    if let Some(n) = common.max_concurrent { cfg.max_concurrent_jobs = n; }
    if let Some(n) = common.max_steps { cfg.max_steps = n; }
    cfg.threads = common.threads;
    cfg.seed = common.seed;
    cfg.log_level = common.log_level.clone();
    cfg.apply_env();
    cfg.validate()?;

    logging::init(cfg.log_level.as_deref());

    let db_path = cfg.db.clone().unwrap_or_else(crate::util::default_db_path);

    match sub {
        RoadCommand::Run { ticks, tick_ms, terrain } => run(&cfg, &db_path, ticks, tick_ms, terrain),
        RoadCommand::Recover => {
            let store = ConnectionStateStore::open(&db_path, &cfg.world)?;
            let report = recovery::recover(&store, &pending::PendingQueue::new())?;
            println!(
                "recover: world '{}': {} GENERATING -> PLANNED, {} PLANNED queued, {} terminal",
                cfg.world, report.requeued_generating, report.requeued_planned, report.untouched
            );
            Ok(())
        }
        RoadCommand::Status => status(&cfg, &db_path),
        RoadCommand::Snapshot { bbox, out } => {
            let bbox = match bbox.as_deref() {
                Some(s) => BoundingBox::parse(s)?,
                None => BoundingBox::EVERYTHING,
            };
            let store = ConnectionStateStore::open_read_only(&db_path, &cfg.world)?;
            let bytes = snapshot::build_snapshot(&store, &bbox)?.encode()?;
            match out {
                Some(path) => {
                    std::fs::write(&path, &bytes).with_context(|| format!("writing {}", path.display()))?;
                    info!("snapshot: wrote {} bytes to {}", bytes.len(), path.display());
                }
                None => println!("{}", String::from_utf8_lossy(&bytes)),
            }
            Ok(())
        }
    }
}

fn run(cfg: &config::Config, db_path: &Path, ticks: u64, tick_ms: u64, kind: TerrainKind) -> Result<()> {
    let store = Arc::new(ConnectionStateStore::open(db_path, &cfg.world)?);
    let seed = cfg.seed.unwrap_or(0);
    let terrain = Arc::new(match kind {
        TerrainKind::Flat => SyntheticTerrain::flat(64),
        TerrainKind::Rolling => SyntheticTerrain::rolling(seed),
    });
    let tag = cfg.structure_target.trim_start_matches('#').to_string();
    let locator: Arc<dyn StructureLocator> =
        Arc::new(GridLocator::new(tag, seed, cfg.search_radius, terrain.clone()));

    let mut session = WorldSession::load(store, terrain.clone(), Some(locator), cfg)?;
    let origin = Coordinate::new(0, terrain.height_at(0, 0)?, 0);
    session.discover_initial(origin)?;

    // A wandering actor keeps proposing connections while jobs run.
    let mut rng = ChaCha8Rng::seed_from_u64(seed ^ 0x5EED);
    let mut actor = origin;
    let interval = Duration::from_millis(tick_ms);
    for t in 1..=ticks {
        if t % PROPOSE_EVERY == 0 {
            let r = cfg.search_radius;
            let x = actor.x + rng.gen_range(-r..=r);
            let z = actor.z + rng.gen_range(-r..=r);
            actor = Coordinate::new(x, terrain.height_at(x, z)?, z);
            session.propose(Some(actor))?;
        }
        session.tick();
        if session.scheduler().is_idle() {
            info!("run: idle after {} ticks", t);
            break;
        }
        std::thread::sleep(interval);
    }

    let stats = session.shutdown();
    println!(
        "run: {} ticks, {} proposals ({} new edges); jobs started={} completed={} failed={} faulted={} canceled={} peak_running={}",
        stats.ticks,
        stats.proposals,
        stats.edges_created,
        stats.scheduler.started,
        stats.scheduler.completed,
        stats.scheduler.failed,
        stats.scheduler.faulted,
        stats.scheduler.canceled,
        stats.scheduler.peak_running
    );
    Ok(())
}

fn status(cfg: &config::Config, db_path: &Path) -> Result<()> {
    let store = ConnectionStateStore::open_read_only(db_path, &cfg.world)?;
    let edges = store.edges()?;
    let count = |s: EdgeStatus| edges.iter().filter(|e| e.status == s).count();
    println!("world '{}'", cfg.world);
    println!("  structures: {}", store.structures()?.len());
    println!(
        "  edges: {} (planned={} generating={} completed={} failed={})",
        edges.len(),
        count(EdgeStatus::Planned),
        count(EdgeStatus::Generating),
        count(EdgeStatus::Completed),
        count(EdgeStatus::Failed)
    );
    println!("  roads: {}", store.roads()?.len());
    Ok(())
}
