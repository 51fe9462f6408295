//! Environment lifecycle: seeding, the tick loop, and shutdown.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, ScopedJoinHandle};
use std::time::{Duration, Instant};

use crossfire::{MTx, Rx, detect_backoff_cfg, mpmc, mpsc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

use crate::cell::{Cell, Delta, Organism};
use crate::grid::{Direction, Topology};
use crate::ids::IdSequence;
use crate::registry::{Config, Registry, RngHandle};
use crate::store::CellStore;
use crate::vm::Vm;
use crate::worker::{Event, Outcome, Request, run_worker};
use crate::EnvError;

/// Construction parameters fixed for the environment's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EnvSettings {
    /// Grid width in cells.
    pub width: u32,
    /// Grid height in cells.
    pub height: u32,
    /// Genome length handed to the VM when building vacant organisms.
    pub genome_size: usize,
    /// Organisms introduced before the tick loop starts.
    pub initial_population: usize,
    /// Optional RNG seed for reproducible runs; entropy when absent.
    pub rng_seed: Option<u64>,
}

impl Default for EnvSettings {
    fn default() -> Self {
        Self {
            width: 64,
            height: 64,
            genome_size: 32,
            initial_population: 16,
            rng_seed: None,
        }
    }
}

impl EnvSettings {
    /// Validates the settings, returning the grid topology.
    pub fn topology(&self) -> Result<Topology, EnvError> {
        let topology = Topology::new(self.width, self.height)?;
        if self.genome_size == 0 {
            return Err(EnvError::InvalidSettings("genome_size must be positive"));
        }
        Ok(topology)
    }
}

/// Receiver of every committed delta, in application order.
pub trait DeltaSink<O> {
    fn on_delta(&mut self, delta: Delta<O>);

    /// Called once after the last delta of a run.
    fn close(&mut self) {}
}

/// Sink discarding every delta.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl<O> DeltaSink<O> for NullSink {
    fn on_delta(&mut self, _delta: Delta<O>) {}
}

impl<O, S: DeltaSink<O> + ?Sized> DeltaSink<O> for &mut S {
    fn on_delta(&mut self, delta: Delta<O>) {
        (**self).on_delta(delta);
    }

    fn close(&mut self) {
        (**self).close();
    }
}

impl<O> DeltaSink<O> for Vec<Delta<O>> {
    fn on_delta(&mut self, delta: Delta<O>) {
        self.push(delta);
    }
}

/// Sink forwarding deltas over a channel; closing drops the sender so the
/// receiver observes disconnection once it has drained everything.
pub struct ChannelSink<O: Organism> {
    tx: Option<MTx<Delta<O>>>,
}

impl<O: Organism> ChannelSink<O> {
    pub fn new(tx: MTx<Delta<O>>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Unbounded channel pair; the receiver may live on any thread.
    #[must_use]
    pub fn channel() -> (Self, Rx<Delta<O>>) {
        let (tx, rx) = mpsc::unbounded_blocking();
        (Self::new(tx), rx)
    }
}

impl<O: Organism> DeltaSink<O> for ChannelSink<O> {
    fn on_delta(&mut self, delta: Delta<O>) {
        if let Some(tx) = &self.tx
            && tx.send(delta).is_err()
        {
            warn!("delta receiver disconnected; further deltas are discarded");
            self.tx = None;
        }
    }

    fn close(&mut self) {
        self.tx = None;
    }
}

/// Counters reported when a run finishes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    /// Introduce requests sent, including seeding and starvation re-enqueues.
    pub introduce_requests: u64,
    pub advance_requests: u64,
    /// Deltas committed and forwarded to the sink.
    pub deltas: u64,
    pub introductions: u64,
    pub advances: u64,
    /// Introductions dropped because no dead cell was available.
    pub dropped: u64,
    /// Advances that found no living cell.
    pub starved: u64,
}

/// Counts ticks down to the next forced introduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct InflowCountdown {
    remaining: u64,
}

impl InflowCountdown {
    pub(crate) const fn new(frequency: u64) -> Self {
        Self {
            remaining: frequency,
        }
    }

    /// Advance one tick; returns `true` when an introduction is due.
    ///
    /// Resets from the frequency passed in, so config swaps apply on the
    /// next cycle. A frequency of 0 disables inflow until a later config
    /// enables it again.
    pub(crate) fn tick(&mut self, frequency: u64) -> bool {
        if self.remaining == 0 {
            self.remaining = frequency;
            return false;
        }
        self.remaining -= 1;
        if self.remaining == 0 {
            self.remaining = frequency;
            true
        } else {
            false
        }
    }
}

/// A grid of organisms plus the machinery that evolves it concurrently.
///
/// Share it behind an `Arc` to call [`Environment::stop`] or
/// [`Environment::get`] from other threads while [`Environment::run`] blocks.
pub struct Environment<V: Vm> {
    settings: EnvSettings,
    vm: V,
    store: CellStore<V::Organism>,
    registry: Registry,
    ids: IdSequence,
    inbox_tx: MTx<Event<V::Organism>>,
    inbox_rx: Mutex<Option<Rx<Event<V::Organism>>>>,
    stop_requested: AtomicBool,
}

impl<V: Vm> fmt::Debug for Environment<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("settings", &self.settings)
            .field("config", &self.config())
            .field("alive", &self.alive_count())
            .field("stop_requested", &self.is_stop_requested())
            .finish_non_exhaustive()
    }
}

impl<V: Vm> Environment<V> {
    /// Build the grid and fill every cell with the VM's vacant organism.
    pub fn new(settings: EnvSettings, vm: V) -> Result<Self, EnvError> {
        let topology = settings.topology()?;
        let vacant = vm.vacant(settings.genome_size);
        let store = CellStore::new(topology, &vacant);
        let registry = Registry::new(Config::default(), RngHandle::from_seed(settings.rng_seed));
        detect_backoff_cfg();
        let (inbox_tx, inbox_rx) = mpsc::unbounded_blocking();
        Ok(Self {
            settings,
            vm,
            store,
            registry,
            ids: IdSequence::new(),
            inbox_tx,
            inbox_rx: Mutex::new(Some(inbox_rx)),
            stop_requested: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub const fn settings(&self) -> &EnvSettings {
        &self.settings
    }

    #[must_use]
    pub const fn topology(&self) -> Topology {
        self.store.topology()
    }

    #[must_use]
    pub const fn vm(&self) -> &V {
        &self.vm
    }

    pub(crate) const fn store(&self) -> &CellStore<V::Organism> {
        &self.store
    }

    pub(crate) const fn ids(&self) -> &IdSequence {
        &self.ids
    }

    /// Copy of the cell at `(x, y)`.
    pub fn get(&self, x: u32, y: u32) -> Result<Cell<V::Organism>, EnvError> {
        self.store.get(x, y)
    }

    /// Copy of `cell`'s current neighbor in `direction`, wrapping at the edges.
    #[must_use]
    pub fn neighbor(&self, cell: &Cell<V::Organism>, direction: Direction) -> Cell<V::Organism> {
        self.store.neighbor(cell, direction)
    }

    #[must_use]
    pub fn alive_count(&self) -> usize {
        self.store.alive_count()
    }

    #[must_use]
    pub fn alive_indices(&self) -> Vec<usize> {
        self.store.alive_indices()
    }

    /// Copies of every cell, taken under one read lock.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Cell<V::Organism>> {
        self.store.snapshot()
    }

    /// Number of organism ids handed out so far.
    #[must_use]
    pub fn issued_ids(&self) -> u64 {
        self.ids.issued()
    }

    #[must_use]
    pub fn config(&self) -> Config {
        self.registry.config()
    }

    pub fn set_config(&self, config: Config) {
        self.registry.set_config(config);
    }

    #[must_use]
    pub fn rng(&self) -> RngHandle {
        self.registry.rng()
    }

    pub fn set_rng(&self, rng: RngHandle) {
        self.registry.set_rng(rng);
    }

    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Ask a running (or future) [`Environment::run`] to shut down.
    ///
    /// One-shot: later calls return [`EnvError::AlreadyStopped`] and do nothing.
    pub fn stop(&self) -> Result<(), EnvError> {
        if self.stop_requested.swap(true, Ordering::AcqRel) {
            return Err(EnvError::AlreadyStopped);
        }
        // The inbox is gone once a run has finished; nothing is left to stop.
        let _ = self.inbox_tx.send(Event::Stop);
        Ok(())
    }

    /// Run the simulation on `worker_count` threads until [`Environment::stop`].
    ///
    /// Blocks the calling thread, which becomes the coordinator: it seeds
    /// the initial population, dispatches one advance per `tick` (plus an
    /// introduction every `inflow_frequency` ticks), commits every delta to
    /// the grid and forwards it to `sink`. On stop, workers finish in-flight
    /// work, every remaining delta is committed, and `sink` is closed.
    ///
    /// May only be called once per environment.
    pub fn run<S>(
        &self,
        worker_count: usize,
        tick: Duration,
        mut sink: S,
    ) -> Result<RunSummary, EnvError>
    where
        S: DeltaSink<V::Organism>,
    {
        if worker_count == 0 {
            return Err(EnvError::InvalidSettings("worker_count must be positive"));
        }
        if tick.is_zero() {
            return Err(EnvError::InvalidSettings("tick interval must be non-zero"));
        }
        let inbox = self
            .inbox_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(EnvError::AlreadyRunning)?;

        let topology = self.topology();
        info!(
            worker_count,
            ?tick,
            width = topology.width(),
            height = topology.height(),
            initial_population = self.settings.initial_population,
            "starting environment"
        );
        if self.settings.initial_population > topology.cell_count() && !self.config().overwrite_living {
            warn!(
                initial_population = self.settings.initial_population,
                capacity = topology.cell_count(),
                "initial population exceeds grid capacity; extra introductions will be dropped"
            );
        }

        let (requests_tx, requests_rx) = mpmc::bounded_blocking::<Request>(worker_count);
        let halt_ticker = AtomicBool::new(false);
        let tick_pending = AtomicBool::new(false);

        let summary = thread::scope(|scope| -> Result<RunSummary, EnvError> {
            let mut coordinator =
                Coordinator::new(self, requests_tx, inbox, &mut sink, &tick_pending);

            let mut workers: Vec<ScopedJoinHandle<'_, ()>> = Vec::with_capacity(worker_count);
            for id in 0..worker_count {
                let requests = requests_rx.clone();
                let events = self.inbox_tx.clone();
                let handle = thread::Builder::new()
                    .name(format!("petri-worker-{id}"))
                    .spawn_scoped(scope, move || run_worker(id, self, requests, events))?;
                workers.push(handle);
                coordinator.live_workers += 1;
            }
            drop(requests_rx);

            coordinator.seed(self.settings.initial_population);

            let ticker = if coordinator.running() {
                let events = self.inbox_tx.clone();
                let (halt, pending) = (&halt_ticker, &tick_pending);
                let handle = thread::Builder::new()
                    .name("petri-ticker".into())
                    .spawn_scoped(scope, move || run_ticker(tick, halt, pending, &events));
                match handle {
                    Ok(handle) => Some(handle),
                    Err(err) => {
                        coordinator.shutdown();
                        return Err(EnvError::WorkerSpawn(err));
                    }
                }
            } else {
                None
            };

            coordinator.steady_state();
            coordinator.shutdown();

            halt_ticker.store(true, Ordering::Release);
            if let Some(ticker) = ticker {
                ticker.thread().unpark();
                if ticker.join().is_err() {
                    error!("ticker thread panicked");
                }
            }
            for (id, worker) in workers.into_iter().enumerate() {
                if worker.join().is_err() {
                    coordinator.panicked.get_or_insert(id);
                }
            }

            match coordinator.panicked {
                Some(worker) => Err(EnvError::WorkerPanicked(worker)),
                None => Ok(coordinator.summary),
            }
        })?;

        info!(
            ticks = summary.ticks,
            deltas = summary.deltas,
            introductions = summary.introductions,
            advances = summary.advances,
            dropped = summary.dropped,
            starved = summary.starved,
            alive = self.alive_count(),
            "environment stopped"
        );
        Ok(summary)
    }
}

/// Coordinator-side state for one run; lives on the thread calling `run`.
struct Coordinator<'env, 'sink, V: Vm, S> {
    env: &'env Environment<V>,
    /// Set by the ticker while a `Tick` sits unhandled in the inbox.
    tick_pending: &'env AtomicBool,
    /// `None` once shutdown has closed the request channel.
    requests: Option<MTx<Request>>,
    inbox: Rx<Event<V::Organism>>,
    sink: &'sink mut S,
    summary: RunSummary,
    live_workers: usize,
    pending_introductions: u64,
    stop_requested: bool,
    panicked: Option<usize>,
}

impl<'env, 'sink, V: Vm, S: DeltaSink<V::Organism>> Coordinator<'env, 'sink, V, S> {
    fn new(
        env: &'env Environment<V>,
        requests: MTx<Request>,
        inbox: Rx<Event<V::Organism>>,
        sink: &'sink mut S,
        tick_pending: &'env AtomicBool,
    ) -> Self {
        Self {
            env,
            tick_pending,
            requests: Some(requests),
            inbox,
            sink,
            summary: RunSummary::default(),
            live_workers: 0,
            pending_introductions: 0,
            stop_requested: false,
            panicked: None,
        }
    }

    fn running(&self) -> bool {
        !self.stop_requested
            && !self.env.is_stop_requested()
            && self.panicked.is_none()
            && self.requests.is_some()
    }

    /// Send `request`, blocking until a worker has room for it.
    fn dispatch(&mut self, request: Request) {
        let Some(tx) = &self.requests else {
            return;
        };
        if tx.send(request).is_err() {
            warn!(?request, "every worker is gone; request not delivered");
            self.requests = None;
            return;
        }
        match request {
            Request::Introduce => {
                self.summary.introduce_requests += 1;
                self.pending_introductions += 1;
            }
            Request::Advance => self.summary.advance_requests += 1,
        }
    }

    fn next_event(&self) -> Option<Event<V::Organism>> {
        self.inbox.recv().ok()
    }

    /// Introduce `count` organisms and wait until each introduction has
    /// either committed or been dropped.
    ///
    /// Stops waiting early on stop or a worker panic; shutdown then drains
    /// whatever is still in flight.
    fn seed(&mut self, count: usize) {
        for _ in 0..count {
            self.dispatch(Request::Introduce);
        }
        while self.pending_introductions > 0 && self.live_workers > 0 && self.running() {
            let Some(event) = self.next_event() else {
                break;
            };
            self.handle(event);
        }
        debug!(
            alive = self.env.alive_count(),
            requested = count,
            "initial population seeded"
        );
    }

    fn steady_state(&mut self) {
        let mut inflow = InflowCountdown::new(self.env.config().inflow_frequency);
        while self.running() {
            let Some(event) = self.next_event() else {
                break;
            };
            if matches!(event, Event::Tick) {
                self.on_tick(&mut inflow);
            } else {
                self.handle(event);
            }
        }
    }

    fn on_tick(&mut self, inflow: &mut InflowCountdown) {
        self.tick_pending.store(false, Ordering::Release);
        self.summary.ticks += 1;
        if inflow.tick(self.env.config().inflow_frequency) {
            self.dispatch(Request::Introduce);
        }
        self.dispatch(Request::Advance);
    }

    fn handle(&mut self, event: Event<V::Organism>) {
        match event {
            // Only the steady state acts on ticks.
            Event::Tick => {}
            Event::Stop => {
                debug!("stop requested");
                self.stop_requested = true;
            }
            Event::Outcome(outcome) => self.on_outcome(outcome),
            Event::WorkerExited { worker, panicked } => {
                self.live_workers = self.live_workers.saturating_sub(1);
                if panicked {
                    error!(worker, "worker panicked");
                    self.panicked.get_or_insert(worker);
                }
            }
        }
    }

    fn on_outcome(&mut self, outcome: Outcome<V::Organism>) {
        match outcome {
            Outcome::Delta {
                origin,
                delta,
                claim,
            } => {
                self.env.store().commit(&delta, claim);
                self.summary.deltas += 1;
                match origin {
                    Request::Introduce => {
                        self.pending_introductions = self.pending_introductions.saturating_sub(1);
                        self.summary.introductions += 1;
                    }
                    Request::Advance => self.summary.advances += 1,
                }
                trace!(?origin, cells = delta.len(), "delta applied");
                self.sink.on_delta(delta);
            }
            Outcome::Dropped => {
                self.pending_introductions = self.pending_introductions.saturating_sub(1);
                self.summary.dropped += 1;
            }
            Outcome::Starved => {
                self.summary.starved += 1;
                // The advance may have sampled before an introduction committed.
                if self.running()
                    && self.pending_introductions == 0
                    && self.env.alive_count() == 0
                {
                    self.dispatch(Request::Introduce);
                } else {
                    trace!("stale starvation; no introduction needed");
                }
            }
        }
    }

    /// Close the request channel, then commit everything workers still
    /// produce until the last one has exited, then close the sink.
    fn shutdown(&mut self) {
        if self.requests.take().is_some() {
            debug!(live_workers = self.live_workers, "closing request channel");
        }
        while self.live_workers > 0 {
            let Some(event) = self.next_event() else {
                break;
            };
            self.handle(event);
        }
        self.sink.close();
        debug!("all workers exited; sink closed");
    }
}

/// Emit [`Event::Tick`] every `interval` until `halt` is set.
///
/// At most one tick is outstanding: while `pending` is set the coordinator
/// has not handled the previous one yet and the new tick is dropped.
fn run_ticker<O: Organism>(
    interval: Duration,
    halt: &AtomicBool,
    pending: &AtomicBool,
    events: &MTx<Event<O>>,
) {
    let mut next = Instant::now() + interval;
    loop {
        let now = Instant::now();
        if now < next {
            thread::park_timeout(next - now);
        }
        if halt.load(Ordering::Acquire) {
            break;
        }
        let now = Instant::now();
        if now < next {
            continue;
        }
        if !pending.swap(true, Ordering::AcqRel) && events.send(Event::Tick).is_err() {
            break;
        }
        next += interval;
        if next < now {
            // Skip ticks missed while descheduled instead of bursting.
            next = now + interval;
        }
    }
}
