//! Worker threads turning introduce/advance requests into deltas.

use std::thread;

use crossfire::{MRx, MTx};
use tracing::{debug, trace};

use crate::cell::{Delta, Organism};
use crate::env::Environment;
use crate::sampler::Sampler;
use crate::store::Claim;
use crate::vm::{Context, Vm};

/// Work dispatched by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Request {
    Introduce,
    Advance,
}

/// Result of processing one [`Request`].
#[derive(Debug)]
pub(crate) enum Outcome<O> {
    Delta {
        origin: Request,
        delta: Delta<O>,
        claim: Option<Claim>,
    },
    /// Introduce found no dead cell; the population is at capacity.
    Dropped,
    /// Advance found nothing alive; the coordinator re-enqueues an introduce.
    Starved,
}

/// Everything the coordinator waits on, multiplexed onto one inbox.
#[derive(Debug)]
pub(crate) enum Event<O> {
    Tick,
    Stop,
    Outcome(Outcome<O>),
    WorkerExited { worker: usize, panicked: bool },
}

/// Per-worker execution state: the environment plus a private sampler.
pub(crate) struct Worker<'env, V: Vm> {
    id: usize,
    env: &'env Environment<V>,
    sampler: Sampler,
}

impl<'env, V: Vm> Worker<'env, V> {
    pub(crate) fn new(id: usize, env: &'env Environment<V>) -> Self {
        Self {
            id,
            env,
            sampler: Sampler::with_capacity(env.topology().cell_count()),
        }
    }

    pub(crate) fn process(&mut self, request: Request) -> Outcome<V::Organism> {
        let env = self.env;
        // Snapshots for the whole operation.
        let config = env.config();
        let rng = env.rng();

        let (cell, claim) = match request {
            Request::Introduce if config.overwrite_living => {
                (self.sampler.random_cell(env.store(), &rng), None)
            }
            Request::Introduce => match self.sampler.claim_dead_cell(env.store(), &rng) {
                Some((cell, claim)) => (cell, Some(claim)),
                None => {
                    debug!(worker = self.id, "no dead cell available; introduce dropped");
                    return Outcome::Dropped;
                }
            },
            Request::Advance => match self.sampler.random_live_cell(env.store(), &rng) {
                Some(cell) => (cell, None),
                None => {
                    debug!(worker = self.id, "no living cell to advance; requesting inflow");
                    return Outcome::Starved;
                }
            },
        };

        let index = cell.index();
        let mut ctx = Context::new(
            env.store(),
            env.ids(),
            &mut self.sampler,
            config,
            rng,
            env.settings().genome_size,
        );
        let delta = match request {
            Request::Introduce => env.vm().introduce(&mut ctx, cell),
            Request::Advance => env.vm().advance(&mut ctx, cell),
        };
        trace!(
            worker = self.id,
            ?request,
            index,
            cells = delta.len(),
            "operation produced delta"
        );
        Outcome::Delta {
            origin: request,
            delta,
            claim,
        }
    }
}

/// Reports worker exit to the coordinator, including exit by panic.
struct ExitGuard<O: Organism> {
    worker: usize,
    events: MTx<Event<O>>,
}

impl<O: Organism> Drop for ExitGuard<O> {
    fn drop(&mut self) {
        let _ = self.events.send(Event::WorkerExited {
            worker: self.worker,
            panicked: thread::panicking(),
        });
    }
}

/// Worker loop: runs until the request channel is closed and drained.
pub(crate) fn run_worker<V: Vm>(
    id: usize,
    env: &Environment<V>,
    requests: MRx<Request>,
    events: MTx<Event<V::Organism>>,
) {
    let _guard = ExitGuard {
        worker: id,
        events: events.clone(),
    };
    let mut worker = Worker::new(id, env);
    while let Ok(request) = requests.recv() {
        let outcome = worker.process(request);
        if events.send(Event::Outcome(outcome)).is_err() {
            break;
        }
    }
    debug!(worker = id, "request channel closed; worker exiting");
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cell::Cell;
    use crate::env::EnvSettings;
    use crate::registry::Config;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) struct Tag(pub(crate) u64);

    impl Organism for Tag {
        fn is_alive(&self) -> bool {
            self.0 != 0
        }
    }

    pub(crate) struct Stamp;

    impl Vm for Stamp {
        type Organism = Tag;

        fn vacant(&self, _genome_size: usize) -> Tag {
            Tag(0)
        }

        fn introduce(&self, ctx: &mut Context<'_, Tag>, cell: Cell<Tag>) -> Delta<Tag> {
            Delta::single(cell.with_organism(Tag(ctx.next_organism_id())))
        }

        fn advance(&self, _ctx: &mut Context<'_, Tag>, cell: Cell<Tag>) -> Delta<Tag> {
            Delta::single(cell.with_organism(Tag(0)))
        }
    }

    pub(crate) fn env(width: u32, height: u32) -> Environment<Stamp> {
        Environment::new(
            EnvSettings {
                width,
                height,
                rng_seed: Some(9),
                ..EnvSettings::default()
            },
            Stamp,
        )
        .expect("environment")
    }

    fn apply(env: &Environment<Stamp>, outcome: Outcome<Tag>) -> Delta<Tag> {
        match outcome {
            Outcome::Delta { delta, claim, .. } => {
                env.store().commit(&delta, claim);
                delta
            }
            other => panic!("expected a delta, got {other:?}"),
        }
    }

    #[test]
    fn advance_on_empty_grid_starves() {
        let env = env(3, 3);
        let mut worker = Worker::new(0, &env);
        assert!(matches!(worker.process(Request::Advance), Outcome::Starved));
        assert_eq!(env.alive_count(), 0);
    }

    #[test]
    fn introduce_fills_dead_cells_until_full() {
        let env = env(2, 2);
        let mut worker = Worker::new(0, &env);
        let mut seen = Vec::new();
        for _ in 0..4 {
            let delta = apply(&env, worker.process(Request::Introduce));
            let cell = &delta.cells()[0];
            assert!(cell.is_alive());
            seen.push(cell.index());
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert!(matches!(worker.process(Request::Introduce), Outcome::Dropped));
    }

    #[test]
    fn overwrite_mode_never_drops() {
        let env = env(1, 1);
        env.set_config(Config {
            overwrite_living: true,
            ..Config::default()
        });
        let mut worker = Worker::new(0, &env);
        let first = apply(&env, worker.process(Request::Introduce));
        let second = apply(&env, worker.process(Request::Introduce));
        assert_eq!(first.cells()[0].organism(), &Tag(1));
        assert_eq!(second.cells()[0].organism(), &Tag(2));
        assert_eq!(env.alive_count(), 1);
    }

    #[test]
    fn advance_targets_a_living_cell() {
        let env = env(4, 4);
        let mut worker = Worker::new(0, &env);
        let introduced = apply(&env, worker.process(Request::Introduce));
        let target = introduced.cells()[0].index();
        let advanced = apply(&env, worker.process(Request::Advance));
        assert_eq!(advanced.cells()[0].index(), target);
        assert_eq!(env.alive_count(), 0);
    }

    #[test]
    fn concurrent_claims_never_share_a_cell() {
        let env = env(2, 2);
        let mut a = Worker::new(0, &env);
        let mut b = Worker::new(1, &env);
        let first = a.process(Request::Introduce);
        let second = b.process(Request::Introduce);
        let (Outcome::Delta { delta: da, .. }, Outcome::Delta { delta: db, .. }) = (first, second)
        else {
            panic!("both introductions should produce deltas");
        };
        assert_ne!(da.cells()[0].index(), db.cells()[0].index());
    }
}
