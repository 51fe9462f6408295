//! Uniform cell selection.
//!
//! Each [`Sampler`] owns its scratch buffer, so concurrent callers never
//! write to shared storage. Workers keep one sampler each.

use crate::cell::{Cell, Organism};
use crate::registry::RngHandle;
use crate::store::{CellStore, Claim};

/// Enumerate-then-draw sampler over a [`CellStore`].
#[derive(Debug, Default)]
pub struct Sampler {
    scratch: Vec<usize>,
}

impl Sampler {
    /// Sampler whose scratch buffer never reallocates for a grid of `capacity` cells.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            scratch: Vec::with_capacity(capacity),
        }
    }

    /// Any cell, uniformly.
    pub fn random_cell<O: Organism>(&self, store: &CellStore<O>, rng: &RngHandle) -> Cell<O> {
        let topology = store.topology();
        let x = rng.uniform_u32(topology.width()) % topology.width();
        let y = rng.uniform_u32(topology.height()) % topology.height();
        let index = (y as usize) * (topology.width() as usize) + (x as usize);
        store.read().cells[index].clone()
    }

    /// A living cell, uniformly; `None` when nothing is alive.
    pub fn random_live_cell<O: Organism>(
        &mut self,
        store: &CellStore<O>,
        rng: &RngHandle,
    ) -> Option<Cell<O>> {
        let state = store.read();
        self.scratch.clear();
        self.scratch.extend(state.alive.iter().copied());
        let index = self.draw(rng)?;
        Some(state.cells[index].clone())
    }

    /// A dead cell, uniformly; `None` when every cell is alive.
    pub fn random_dead_cell<O: Organism>(
        &mut self,
        store: &CellStore<O>,
        rng: &RngHandle,
    ) -> Option<Cell<O>> {
        let state = store.read();
        self.scratch.clear();
        self.scratch
            .extend((0..state.cells.len()).filter(|index| !state.alive.contains(index)));
        let index = self.draw(rng)?;
        Some(state.cells[index].clone())
    }

    /// Like [`Sampler::random_dead_cell`], but skips cells already reserved by
    /// another in-flight introduction and reserves the chosen one.
    pub(crate) fn claim_dead_cell<O: Organism>(
        &mut self,
        store: &CellStore<O>,
        rng: &RngHandle,
    ) -> Option<(Cell<O>, Claim)> {
        let mut guard = store.write();
        let state = &mut *guard;
        self.scratch.clear();
        self.scratch.extend(
            (0..state.cells.len())
                .filter(|index| !state.alive.contains(index) && !state.reserved.contains(index)),
        );
        let index = self.draw(rng)?;
        state.reserved.insert(index);
        Some((state.cells[index].clone(), Claim(index)))
    }

    fn draw(&self, rng: &RngHandle) -> Option<usize> {
        if self.scratch.is_empty() {
            return None;
        }
        let position = rng.uniform_usize(self.scratch.len());
        self.scratch.get(position).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Delta;
    use crate::store::tests::{living, store};

    #[test]
    fn live_sampling_is_none_only_when_empty() {
        let store = store(3, 3);
        let rng = RngHandle::seeded(3);
        let mut sampler = Sampler::with_capacity(9);
        assert!(sampler.random_live_cell(&store, &rng).is_none());

        store.apply_delta(&living(&store, 1, 1, 7));
        for _ in 0..20 {
            let cell = sampler.random_live_cell(&store, &rng).expect("live cell");
            assert_eq!(cell.index(), 4);
            assert!(cell.is_alive());
        }
    }

    #[test]
    fn dead_sampling_is_none_only_when_full() {
        let store = store(2, 2);
        let rng = RngHandle::seeded(4);
        let mut sampler = Sampler::with_capacity(4);
        for (n, (x, y)) in [(0, 0), (1, 0), (0, 1)].into_iter().enumerate() {
            store.apply_delta(&living(&store, x, y, n as u64 + 1));
        }
        for _ in 0..20 {
            let cell = sampler.random_dead_cell(&store, &rng).expect("dead cell");
            assert_eq!(cell.index(), 3);
        }
        store.apply_delta(&living(&store, 1, 1, 4));
        assert!(sampler.random_dead_cell(&store, &rng).is_none());
        assert!(sampler.random_live_cell(&store, &rng).is_some());
    }

    #[test]
    fn random_cell_is_uniform() {
        let store = store(4, 4);
        let rng = RngHandle::seeded(0x5EED);
        let sampler = Sampler::default();
        let trials = 32_000;
        let mut counts = [0usize; 16];
        for _ in 0..trials {
            counts[sampler.random_cell(&store, &rng).index()] += 1;
        }
        let expected = trials / counts.len();
        for (index, &count) in counts.iter().enumerate() {
            assert!(
                count.abs_diff(expected) < expected / 5,
                "index {index} drawn {count} times, expected about {expected}"
            );
        }
    }

    #[test]
    fn dead_sampling_covers_every_dead_cell() {
        let store = store(3, 3);
        store.apply_delta(&living(&store, 0, 0, 1));
        store.apply_delta(&living(&store, 2, 2, 2));
        let rng = RngHandle::seeded(11);
        let mut sampler = Sampler::with_capacity(9);
        let mut counts = [0usize; 9];
        for _ in 0..7_000 {
            counts[sampler.random_dead_cell(&store, &rng).expect("dead").index()] += 1;
        }
        assert_eq!(counts[0], 0);
        assert_eq!(counts[8], 0);
        for index in 1..8 {
            assert!(counts[index].abs_diff(1_000) < 200, "{counts:?}");
        }
    }

    #[test]
    fn claims_exclude_reserved_cells() {
        let store = store(2, 1);
        let rng = RngHandle::seeded(5);
        let mut sampler = Sampler::with_capacity(2);
        let (first, claim_a) = sampler.claim_dead_cell(&store, &rng).expect("first claim");
        let (second, claim_b) = sampler.claim_dead_cell(&store, &rng).expect("second claim");
        assert_ne!(first.index(), second.index());
        assert!(sampler.claim_dead_cell(&store, &rng).is_none());
        // Unreserved sampling still sees both cells as dead.
        assert!(sampler.random_dead_cell(&store, &rng).is_some());

        store.commit(&Delta::single(first), Some(claim_a));
        let (again, _) = sampler.claim_dead_cell(&store, &rng).expect("released claim");
        assert_eq!(again.index(), claim_a.0);
        assert_ne!(claim_a, claim_b);
    }
}
