//! Contract with the organism virtual machine.

use crate::cell::{Cell, Delta, Organism};
use crate::grid::{Direction, Topology};
use crate::ids::IdSequence;
use crate::registry::{Config, RngHandle};
use crate::sampler::Sampler;
use crate::store::CellStore;
use crate::EnvError;

/// Interpreter for organism programs.
///
/// The engine never looks inside organisms; it only asks the VM to turn a
/// sampled cell into the [`Delta`] produced by introducing or advancing it.
pub trait Vm: Send + Sync + 'static {
    type Organism: Organism;

    /// Dead organism every grid slot starts with.
    fn vacant(&self, genome_size: usize) -> Self::Organism;

    /// Place a new organism into `cell`.
    fn introduce(
        &self,
        ctx: &mut Context<'_, Self::Organism>,
        cell: Cell<Self::Organism>,
    ) -> Delta<Self::Organism>;

    /// Execute one step of the organism living in `cell`.
    ///
    /// The returned delta may touch any number of cells, e.g. a neighbor the
    /// organism interacted with.
    fn advance(
        &self,
        ctx: &mut Context<'_, Self::Organism>,
        cell: Cell<Self::Organism>,
    ) -> Delta<Self::Organism>;
}

/// Per-operation view handed to the VM.
///
/// Config and RNG are snapshots taken when the operation started, so a
/// concurrent swap never changes them mid-operation.
pub struct Context<'a, O> {
    store: &'a CellStore<O>,
    ids: &'a IdSequence,
    sampler: &'a mut Sampler,
    config: Config,
    rng: RngHandle,
    genome_size: usize,
}

impl<'a, O: Organism> Context<'a, O> {
    pub(crate) fn new(
        store: &'a CellStore<O>,
        ids: &'a IdSequence,
        sampler: &'a mut Sampler,
        config: Config,
        rng: RngHandle,
        genome_size: usize,
    ) -> Self {
        Self {
            store,
            ids,
            sampler,
            config,
            rng,
            genome_size,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub const fn rng(&self) -> &RngHandle {
        &self.rng
    }

    /// Uniform value in `[0, n)`.
    #[must_use]
    pub fn random_below(&self, n: usize) -> usize {
        self.rng.uniform_usize(n)
    }

    /// Fresh organism identifier, unique across all workers.
    pub fn next_organism_id(&self) -> u64 {
        self.ids.next()
    }

    #[must_use]
    pub const fn genome_size(&self) -> usize {
        self.genome_size
    }

    #[must_use]
    pub fn topology(&self) -> Topology {
        self.store.topology()
    }

    pub fn get(&self, x: u32, y: u32) -> Result<Cell<O>, EnvError> {
        self.store.get(x, y)
    }

    #[must_use]
    pub fn neighbor(&self, cell: &Cell<O>, direction: Direction) -> Cell<O> {
        self.store.neighbor(cell, direction)
    }

    #[must_use]
    pub fn random_cell(&self) -> Cell<O> {
        self.sampler.random_cell(self.store, &self.rng)
    }

    pub fn random_live_cell(&mut self) -> Option<Cell<O>> {
        self.sampler.random_live_cell(self.store, &self.rng)
    }

    pub fn random_dead_cell(&mut self) -> Option<Cell<O>> {
        self.sampler.random_dead_cell(self.store, &self.rng)
    }
}
