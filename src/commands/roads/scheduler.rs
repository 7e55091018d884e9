use anyhow::Result;
use dashmap::DashMap;
use log::{debug, error, info, warn};
use parking_lot::{Condvar, Mutex};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::cancel::{CancelToken, Canceled};
use super::config::Config;
use super::height_cache::HeightCache;
use super::models::{Coordinate, EdgeStatus, RoadRecord};
use super::pathfinder::{PathSettings, Pathfinder};
use super::pending::PendingQueue;
use super::realize::realize_road;
use super::state_store::ConnectionStateStore;
use super::style::{RoadStyle, StylePicker};
use super::terrain::TerrainOracle;

#[derive(Clone, Debug)]
pub struct SchedulerSettings {
    /// Ceiling on jobs submitted and not yet finished.
    pub max_concurrent: usize,
    pub threads: usize,
    pub max_steps: usize,
    pub clear_height: u32,
    pub path: PathSettings,
}

impl SchedulerSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            max_concurrent: cfg.max_concurrent_jobs.max(1),
            threads: cfg.pool_threads(),
            max_steps: cfg.max_steps,
            clear_height: cfg.clear_height,
            path: cfg.path_settings(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub started: usize,
    pub completed: usize,
    pub failed: usize,
    pub faulted: usize,
    pub canceled: usize,
    pub peak_running: usize,
}

#[derive(Debug, Default)]
struct Counters {
    started: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    faulted: AtomicUsize,
    canceled: AtomicUsize,
    running: AtomicUsize,
    peak_running: AtomicUsize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Started(u64),
    /// In-flight jobs are at the ceiling, or the worker pool could not be
    /// started; work waits for a later tick.
    Saturated,
    Idle,
    /// The dequeued edge could not be moved to GENERATING.
    Skipped,
}

#[derive(Clone, Debug, Default)]
struct Completion(Arc<(Mutex<bool>, Condvar)>);

impl Completion {
    fn finish(&self) {
        let (done, cv) = &*self.0;
        *done.lock() = true;
        cv.notify_all();
    }

    fn is_finished(&self) -> bool {
        *self.0 .0.lock()
    }

    fn wait(&self) {
        let (done, cv) = &*self.0;
        let mut guard = done.lock();
        while !*guard {
            cv.wait(&mut guard);
        }
    }
}

/// Driver-side handle of one submitted generation job.
#[derive(Debug)]
pub struct JobHandle {
    pub id: u64,
    pub from: Coordinate,
    pub to: Coordinate,
    cancel: CancelToken,
    completion: Completion,
}

impl JobHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.completion.is_finished()
    }

    pub fn wait(&self) {
        self.completion.wait();
    }
}

struct Job {
    id: u64,
    from: Coordinate,
    to: Coordinate,
    style: RoadStyle,
    settings: SchedulerSettings,
    store: Arc<ConnectionStateStore>,
    oracle: Arc<dyn TerrainOracle>,
    cache: Arc<HeightCache>,
    cancel: CancelToken,
    completion: Completion,
    counters: Arc<Counters>,
}

enum JobOutcome {
    Completed { segments: usize, placed: usize },
    Failed { expanded: usize },
}

// Marks the job finished even if the body unwinds.
struct FinishGuard {
    completion: Completion,
    counters: Arc<Counters>,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.counters.running.fetch_sub(1, Ordering::AcqRel);
        self.completion.finish();
    }
}

pub struct GenerationScheduler {
    store: Arc<ConnectionStateStore>,
    oracle: Arc<dyn TerrainOracle>,
    cache: Arc<HeightCache>,
    queue: PendingQueue,
    in_flight: DashMap<u64, JobHandle>,
    pool: Option<ThreadPool>,
    pool_builder: fn(usize) -> Result<ThreadPool>,
    settings: SchedulerSettings,
    picker: StylePicker,
    next_id: u64,
    counters: Arc<Counters>,
}

impl GenerationScheduler {
    pub fn new(
        store: Arc<ConnectionStateStore>,
        oracle: Arc<dyn TerrainOracle>,
        cache: Arc<HeightCache>,
        queue: PendingQueue,
        settings: SchedulerSettings,
        picker: StylePicker,
    ) -> Self {
        Self {
            store,
            oracle,
            cache,
            queue,
            in_flight: DashMap::new(),
            pool: None,
            pool_builder: build_pool,
            settings,
            picker,
            next_id: 1,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn ceiling(&self) -> usize {
        self.settings.max_concurrent
    }

    pub fn has_pool(&self) -> bool {
        self.pool.is_some()
    }

    /// Jobs submitted and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.in_flight.iter().filter(|h| !h.is_finished()).count()
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.in_flight() == 0
    }

    pub fn stats(&self) -> SchedulerStats {
        let c = &self.counters;
        SchedulerStats {
            started: c.started.load(Ordering::Acquire),
            completed: c.completed.load(Ordering::Acquire),
            failed: c.failed.load(Ordering::Acquire),
            faulted: c.faulted.load(Ordering::Acquire),
            canceled: c.canceled.load(Ordering::Acquire),
            peak_running: c.peak_running.load(Ordering::Acquire),
        }
    }

    /// One driver step: reap finished jobs, then start at most one job if
    /// below the ceiling. Never waits on a job.
    pub fn tick(&mut self) -> TickOutcome {
        self.in_flight.retain(|_, h| !h.is_finished());
        if self.in_flight.len() >= self.settings.max_concurrent {
            return TickOutcome::Saturated;
        }
        if self.queue.is_empty() {
            return TickOutcome::Idle;
        }

        // The pool must exist before an edge leaves the queue.
        if self.pool.is_none() {
            match (self.pool_builder)(self.settings.threads) {
                Ok(pool) => self.pool = Some(pool),
                Err(e) => {
                    error!("scheduler: cannot start worker pool, retrying next tick: {:#}", e);
                    return TickOutcome::Saturated;
                }
            }
        }
        let Some((from, to)) = self.queue.pop() else {
            return TickOutcome::Idle;
        };

        let style = self.picker.pick();
        if let Err(e) = self.store.transition_edge(from, to, EdgeStatus::Generating) {
            warn!("scheduler: skipping {} -> {}: {:#}", from, to, e);
            return TickOutcome::Skipped;
        }

        let id = self.next_id;
        self.next_id += 1;
        let cancel = CancelToken::new();
        let completion = Completion::default();
        self.in_flight.insert(
            id,
            JobHandle { id, from, to, cancel: cancel.clone(), completion: completion.clone() },
        );

        let running = self.counters.running.fetch_add(1, Ordering::AcqRel) + 1;
        self.counters.peak_running.fetch_max(running, Ordering::AcqRel);
        self.counters.started.fetch_add(1, Ordering::AcqRel);

        info!(
            "scheduler: job {} {} -> {} ({:?}, width {})",
            id, from, to, style.road_type, style.width
        );
        let job = Job {
            id,
            from,
            to,
            style,
            settings: self.settings.clone(),
            store: self.store.clone(),
            oracle: self.oracle.clone(),
            cache: self.cache.clone(),
            cancel,
            completion,
            counters: self.counters.clone(),
        };
        if let Some(pool) = &self.pool {
            pool.spawn(move || run_job(job));
        }
        TickOutcome::Started(id)
    }

    /// Drops the worker pool; the next tick that has work builds a new one.
    pub fn teardown_pool(&mut self) {
        if self.pool.take().is_some() {
            debug!("scheduler: worker pool torn down");
        }
    }

    /// Cancels every in-flight job, waits for them, clears the pending
    /// queue and drops the pool. Canceled jobs persist nothing.
    pub fn shutdown(&mut self) {
        let n = self.in_flight.len();
        for h in self.in_flight.iter() {
            h.cancel();
        }
        for h in self.in_flight.iter() {
            h.wait();
        }
        self.in_flight.clear();
        self.queue.clear();
        self.teardown_pool();
        info!("scheduler: shut down ({} in-flight jobs canceled or drained)", n);
    }
}

fn build_pool(threads: usize) -> Result<ThreadPool> {
    let pool = ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .thread_name(|i| format!("road-gen-{}", i))
        .panic_handler(|_| error!("scheduler: generation job panicked; edge left GENERATING"))
        .build()?;
    info!("scheduler: worker pool started with {} threads", pool.current_num_threads());
    Ok(pool)
}

fn execute(job: &Job) -> Result<JobOutcome> {
    let pathfinder = Pathfinder::new(job.oracle.as_ref(), &job.cache, &job.cancel, &job.settings.path)
        .with_palette(&job.style.palette);
    let plan = pathfinder.plan(job.from, job.to, job.style.width, job.settings.max_steps)?;
    if plan.placements.is_empty() {
        job.store.transition_edge(job.from, job.to, EdgeStatus::Failed)?;
        return Ok(JobOutcome::Failed { expanded: plan.expanded });
    }

    let realized = realize_road(job.oracle.as_ref(), &plan.placements, &job.cancel, job.settings.clear_height)?;
    job.cancel.check()?;

    let segments = plan.placements.len();
    job.store.append_road(RoadRecord {
        from: job.from,
        to: job.to,
        width: job.style.width,
        palette: job.style.palette.clone(),
        road_type: job.style.road_type,
        segments: plan.placements,
    })?;
    job.store.transition_edge(job.from, job.to, EdgeStatus::Completed)?;
    Ok(JobOutcome::Completed { segments, placed: realized.placed })
}

fn run_job(job: Job) {
    let _guard = FinishGuard { completion: job.completion.clone(), counters: job.counters.clone() };
    match execute(&job) {
        Ok(JobOutcome::Completed { segments, placed }) => {
            job.counters.completed.fetch_add(1, Ordering::AcqRel);
            info!(
                "scheduler: job {} completed {} -> {} ({} segments, {} blocks)",
                job.id, job.from, job.to, segments, placed
            );
        }
        Ok(JobOutcome::Failed { expanded }) => {
            job.counters.failed.fetch_add(1, Ordering::AcqRel);
            warn!(
                "scheduler: job {} found no path {} -> {} after {} expansions; edge FAILED",
                job.id, job.from, job.to, expanded
            );
        }
        Err(e) if e.is::<Canceled>() => {
            job.counters.canceled.fetch_add(1, Ordering::AcqRel);
            info!("scheduler: job {} canceled", job.id);
        }
        Err(e) => {
            // The edge stays GENERATING; only load-time recovery requeues it.
            job.counters.faulted.fetch_add(1, Ordering::AcqRel);
            error!("scheduler: job {} {} -> {} faulted: {:#}", job.id, job.from, job.to, e);
        }
    }
}
