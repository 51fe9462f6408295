//! Authoritative cell storage.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

use crate::cell::{Cell, Delta, Organism};
use crate::grid::{Direction, Topology};
use crate::EnvError;

/// Reservation of a dead cell for an introduction that has not committed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Claim(pub(crate) usize);

pub(crate) struct GridState<O> {
    pub(crate) cells: Vec<Cell<O>>,
    /// Always equals the set of indices whose cell is alive.
    pub(crate) alive: BTreeSet<usize>,
    pub(crate) reserved: HashSet<usize>,
}

/// Grid cells plus the alive-membership set behind one read/write lock.
///
/// [`CellStore::apply_delta`] is the only mutator of cell contents. Every
/// cell handed out is a clone.
pub struct CellStore<O> {
    topology: Topology,
    state: RwLock<GridState<O>>,
}

impl<O> fmt::Debug for CellStore<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellStore")
            .field("topology", &self.topology)
            .finish_non_exhaustive()
    }
}

impl<O: Organism> CellStore<O> {
    /// Allocate `width * height` cells, each holding a clone of `vacant`.
    pub fn new(topology: Topology, vacant: &O) -> Self {
        let cells: Vec<Cell<O>> = (0..topology.cell_count())
            .map(|index| {
                let (x, y) = topology.coords(index);
                Cell::new(index, x, y, vacant.clone())
            })
            .collect();
        let alive = cells
            .iter()
            .filter(|cell| cell.is_alive())
            .map(Cell::index)
            .collect();
        Self {
            topology,
            state: RwLock::new(GridState {
                cells,
                alive,
                reserved: HashSet::new(),
            }),
        }
    }

    #[must_use]
    pub const fn topology(&self) -> Topology {
        self.topology
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, GridState<O>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, GridState<O>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the cell at `(x, y)`.
    pub fn get(&self, x: u32, y: u32) -> Result<Cell<O>, EnvError> {
        let index = self.topology.index(x, y).ok_or(EnvError::OutOfBounds {
            x,
            y,
            width: self.topology.width(),
            height: self.topology.height(),
        })?;
        Ok(self.read().cells[index].clone())
    }

    /// Copy of the current state of `cell`'s neighbor in `direction`.
    pub fn neighbor(&self, cell: &Cell<O>, direction: Direction) -> Cell<O> {
        let (x, y) = self.topology.neighbor(
            cell.x() % self.topology.width(),
            cell.y() % self.topology.height(),
            direction,
        );
        let index = (y as usize) * (self.topology.width() as usize) + (x as usize);
        self.read().cells[index].clone()
    }

    /// Commit every cell of `delta` under one exclusive lock.
    pub fn apply_delta(&self, delta: &Delta<O>) {
        self.commit(delta, None);
    }

    /// Commit `delta` and release the introduction reservation it was produced under.
    pub(crate) fn commit(&self, delta: &Delta<O>, claim: Option<Claim>) {
        let mut guard = self.write();
        let state = &mut *guard;
        if let Some(Claim(index)) = claim {
            state.reserved.remove(&index);
        }
        for cell in delta.iter() {
            let index = cell.index();
            let Some(slot) = state.cells.get_mut(index) else {
                warn!(index, "delta cell outside the grid skipped");
                continue;
            };
            if cell.is_alive() {
                state.alive.insert(index);
            } else {
                state.alive.remove(&index);
            }
            *slot = cell.clone();
        }
    }

    #[must_use]
    pub fn alive_count(&self) -> usize {
        self.read().alive.len()
    }

    /// Snapshot of the alive-membership set in ascending index order.
    #[must_use]
    pub fn alive_indices(&self) -> Vec<usize> {
        self.read().alive.iter().copied().collect()
    }

    /// Copies of every cell, in index order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Cell<O>> {
        self.read().cells.clone()
    }
}
