use anyhow::Result;
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;

use super::config::Config;
use super::graph_builder::{ConnectionGraphBuilder, Proposal};
use super::height_cache::HeightCache;
use super::models::Coordinate;
use super::pending::PendingQueue;
use super::recovery::{recover, RecoveryReport};
use super::scheduler::{GenerationScheduler, SchedulerSettings, SchedulerStats, TickOutcome};
use super::snapshot::{build_snapshot, BoundingBox, Snapshot};
use super::state_store::ConnectionStateStore;
use super::style::StylePicker;
use super::terrain::{StructureLocator, TerrainOracle};

#[derive(Clone, Debug, Default)]
pub struct SessionStats {
    pub ticks: u64,
    pub proposals: usize,
    pub edges_created: usize,
    pub recovery: RecoveryReport,
    pub scheduler: SchedulerStats,
}

/// Everything the road engine holds for one loaded world.
///
/// Recovery runs inside `load`, before the session can propose anything.
/// Dropping a session that was not shut down shuts it down.
pub struct WorldSession {
    cfg: Config,
    store: Arc<ConnectionStateStore>,
    cache: Arc<HeightCache>,
    queue: PendingQueue,
    builder: ConnectionGraphBuilder,
    scheduler: GenerationScheduler,
    recovery: RecoveryReport,
    ticks: u64,
    proposals: usize,
    edges_created: usize,
    closed: bool,
}

impl WorldSession {
    pub fn load(
        store: Arc<ConnectionStateStore>,
        oracle: Arc<dyn TerrainOracle>,
        locator: Option<Arc<dyn StructureLocator>>,
        cfg: &Config,
    ) -> Result<Self> {
        cfg.validate()?;
        let queue = PendingQueue::new();
        let recovery = recover(&store, &queue)?;

        let mut builder = ConnectionGraphBuilder::new(store.clone(), queue.clone());
        if let Some(locator) = locator {
            builder = builder.with_locator(locator, &cfg.structure_target, cfg.search_radius);
        }
        let cache = Arc::new(HeightCache::new());
        let scheduler = GenerationScheduler::new(
            store.clone(),
            oracle,
            cache.clone(),
            queue.clone(),
            SchedulerSettings::from_config(cfg),
            StylePicker::from_config(cfg)?,
        );
        info!("session: world '{}' loaded, {} edges pending", store.world(), queue.len());

        Ok(Self {
            cfg: cfg.clone(),
            store,
            cache,
            queue,
            builder,
            scheduler,
            recovery,
            ticks: 0,
            proposals: 0,
            edges_created: 0,
            closed: false,
        })
    }

    pub fn store(&self) -> &Arc<ConnectionStateStore> {
        &self.store
    }

    pub fn queue(&self) -> &PendingQueue {
        &self.queue
    }

    pub fn cache(&self) -> &HeightCache {
        &self.cache
    }

    pub fn scheduler(&self) -> &GenerationScheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut GenerationScheduler {
        &mut self.scheduler
    }

    pub fn recovery(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Probes ring by ring around `origin`, one probe per `search_radius`
    /// step, until `initial_structure_count` structures are known. A
    /// connection is proposed after every newly registered structure.
    pub fn discover_initial(&mut self, origin: Coordinate) -> Result<usize> {
        let want = self.cfg.initial_structure_count;
        let step = self.cfg.search_radius.max(1);
        let mut known = self.store.structures()?.len();
        let mut found = 0;
        let max_ring = want.max(1) as i32;

        'rings: for ring in 0..=max_ring {
            for (i, j) in ring_cells(ring) {
                if known >= want {
                    break 'rings;
                }
                let probe = Coordinate::new(origin.x + i * step, origin.y, origin.z + j * step);
                if self.builder.discover_at(probe)?.is_some() {
                    known += 1;
                    found += 1;
                    let p = self.builder.propose()?;
                    self.record(p);
                }
            }
        }
        info!("session: initial discovery found {} structures ({} known)", found, known);
        Ok(found)
    }

    /// Proposes a connection for an actor standing at `actor`, locating a
    /// structure there first.
    pub fn propose(&mut self, actor: Option<Coordinate>) -> Result<Proposal> {
        let p = self.builder.propose_connection(actor, true)?;
        self.record(p.clone());
        Ok(p)
    }

    fn record(&mut self, p: Proposal) {
        self.proposals += 1;
        if let Proposal::Created(_) = p {
            self.edges_created += 1;
        }
    }

    pub fn tick(&mut self) -> TickOutcome {
        self.ticks += 1;
        self.scheduler.tick()
    }

    /// Ticks every `interval` until the scheduler is idle. Returns false if
    /// `max_ticks` ran out first.
    pub fn run_until_idle(&mut self, max_ticks: u64, interval: Duration) -> bool {
        for _ in 0..max_ticks {
            if self.scheduler.is_idle() {
                return true;
            }
            let outcome = self.tick();
            debug!("session: tick {} -> {:?}", self.ticks, outcome);
            std::thread::sleep(interval);
        }
        self.scheduler.is_idle()
    }

    pub fn snapshot(&self, bbox: &BoundingBox) -> Result<Snapshot> {
        build_snapshot(&self.store, bbox)
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            ticks: self.ticks,
            proposals: self.proposals,
            edges_created: self.edges_created,
            recovery: self.recovery.clone(),
            scheduler: self.scheduler.stats(),
        }
    }

    /// Cancels and drains in-flight jobs, then drops the pending queue, the
    /// worker pool and the height cache.
    pub fn shutdown(&mut self) -> SessionStats {
        if !self.closed {
            self.scheduler.shutdown();
            self.cache.clear();
            self.closed = true;
            info!("session: world '{}' shut down", self.store.world());
        }
        self.stats()
    }
}

impl Drop for WorldSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn ring_cells(ring: i32) -> Vec<(i32, i32)> {
    if ring == 0 {
        return vec![(0, 0)];
    }
    let mut cells = Vec::with_capacity(8 * ring as usize);
    for i in -ring..=ring {
        for j in -ring..=ring {
            if i.abs() == ring || j.abs() == ring {
                cells.push((i, j));
            }
        }
    }
    cells
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::roads::models::{ConnectionEdge, EdgeStatus, StructurePoint};
    use crate::commands::roads::terrain::{GridLocator, SyntheticTerrain};

    fn cfg() -> Config {
        Config {
            seed: Some(11),
            search_radius: 48,
            initial_structure_count: 4,
            max_concurrent_jobs: 1,
            threads: Some(2),
            ..Config::default()
        }
    }

    #[test]
    fn rings_cover_each_square_once() {
        assert_eq!(ring_cells(0), vec![(0, 0)]);
        assert_eq!(ring_cells(1).len(), 8);
        assert_eq!(ring_cells(2).len(), 16);
        assert!(ring_cells(2).iter().all(|&(i, j)| i.abs().max(j.abs()) == 2));
    }

    #[test]
    fn load_recovers_before_anything_else() -> Result<()> {
        let store = Arc::new(ConnectionStateStore::in_memory("w")?);
        let a = Coordinate::new(0, 64, 0);
        let b = Coordinate::new(12, 64, 0);
        store.add_structure(StructurePoint::new(a, None))?;
        store.add_structure(StructurePoint::new(b, None))?;
        store.append_edge(ConnectionEdge { from: a, to: b, status: EdgeStatus::Generating })?;

        let terrain: Arc<dyn TerrainOracle> = Arc::new(SyntheticTerrain::flat(64));
        let mut session = WorldSession::load(store.clone(), terrain, None, &cfg())?;
        assert_eq!(session.recovery().requeued_generating, 1);
        assert_eq!(session.queue().contents(), vec![(a, b)]);

        assert!(session.run_until_idle(2_000, Duration::from_millis(2)));
        assert_eq!(store.edges()?[0].status, EdgeStatus::Completed);
        assert_eq!(store.roads()?.len(), 1);
        Ok(())
    }

    #[test]
    fn discovery_proposes_and_generates() -> Result<()> {
        let store = Arc::new(ConnectionStateStore::in_memory("w")?);
        let terrain = Arc::new(SyntheticTerrain::flat(64));
        let locator: Arc<dyn StructureLocator> = Arc::new(GridLocator::new("village", 5, 48, terrain.clone()));
        let mut session = WorldSession::load(store.clone(), terrain, Some(locator), &cfg())?;

        let found = session.discover_initial(Coordinate::new(0, 64, 0))?;
        assert_eq!(found, 4);
        assert_eq!(store.structures()?.len(), 4);
        // Every structure after the first links to something.
        assert_eq!(store.edges()?.len(), session.stats().edges_created);
        assert!(session.stats().edges_created >= 1);

        assert!(session.run_until_idle(5_000, Duration::from_millis(2)));
        let edges = store.edges()?;
        assert!(edges.iter().all(|e| e.status == EdgeStatus::Completed));
        assert_eq!(store.roads()?.len(), edges.len());

        let snap = session.snapshot(&BoundingBox::EVERYTHING)?;
        assert_eq!(snap.structures.len(), 4);
        assert_eq!(snap.roads.len(), edges.len());

        let stats = session.shutdown();
        assert_eq!(stats.scheduler.completed, edges.len());
        assert!(session.cache().is_empty());
        Ok(())
    }

    #[test]
    fn reloaded_world_skips_discovery() -> Result<()> {
        let store = Arc::new(ConnectionStateStore::in_memory("w")?);
        for i in 0..4 {
            store.add_structure(StructurePoint::new(Coordinate::new(i * 100, 64, 0), None))?;
        }
        let terrain = Arc::new(SyntheticTerrain::flat(64));
        let locator: Arc<dyn StructureLocator> = Arc::new(GridLocator::new("village", 5, 48, terrain.clone()));
        let mut session = WorldSession::load(store.clone(), terrain, Some(locator), &cfg())?;
        assert_eq!(session.discover_initial(Coordinate::new(0, 64, 0))?, 0);
        assert_eq!(store.structures()?.len(), 4);
        Ok(())
    }
}
