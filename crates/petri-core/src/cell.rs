//! Cells, deltas, and the organism collaborator trait.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Opaque organism state owned and interpreted by the VM collaborator.
pub trait Organism: Clone + Send + Sync + Unpin + 'static {
    /// Whether this slot currently holds a living organism.
    fn is_alive(&self) -> bool;
}

/// One grid-addressable organism slot.
///
/// Position fields are fixed at construction; only the organism payload can
/// change, and only through a committed [`Delta`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cell<O> {
    index: usize,
    x: u32,
    y: u32,
    organism: O,
}

impl<O: Organism> Cell<O> {
    pub(crate) fn new(index: usize, x: u32, y: u32, organism: O) -> Self {
        Self {
            index,
            x,
            y,
            organism,
        }
    }

    /// Linear grid index, `y * width + x`.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub const fn x(&self) -> u32 {
        self.x
    }

    #[must_use]
    pub const fn y(&self) -> u32 {
        self.y
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.organism.is_alive()
    }

    #[must_use]
    pub const fn organism(&self) -> &O {
        &self.organism
    }

    pub fn organism_mut(&mut self) -> &mut O {
        &mut self.organism
    }

    /// Replace the organism payload, keeping the position.
    #[must_use]
    pub fn with_organism(mut self, organism: O) -> Self {
        self.organism = organism;
        self
    }
}

/// Complete outcome of one introduce or advance operation.
///
/// A delta commits as a unit: readers see either none or all of its cells.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Delta<O> {
    cells: SmallVec<[Cell<O>; 2]>,
}

impl<O> Default for Delta<O> {
    fn default() -> Self {
        Self {
            cells: SmallVec::new(),
        }
    }
}

impl<O: Organism> Delta<O> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delta touching exactly one cell.
    #[must_use]
    pub fn single(cell: Cell<O>) -> Self {
        let mut delta = Self::new();
        delta.push(cell);
        delta
    }

    pub fn push(&mut self, cell: Cell<O>) {
        self.cells.push(cell);
    }

    #[must_use]
    pub fn cells(&self) -> &[Cell<O>] {
        &self.cells
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cell<O>> {
        self.cells.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Whether any cell in the delta sits at `index`.
    #[must_use]
    pub fn touches(&self, index: usize) -> bool {
        self.cells.iter().any(|cell| cell.index == index)
    }
}

impl<O: Organism> FromIterator<Cell<O>> for Delta<O> {
    fn from_iter<I: IntoIterator<Item = Cell<O>>>(iter: I) -> Self {
        Self {
            cells: iter.into_iter().collect(),
        }
    }
}

impl<O> IntoIterator for Delta<O> {
    type Item = Cell<O>;
    type IntoIter = smallvec::IntoIter<[Cell<O>; 2]>;

    fn into_iter(self) -> Self::IntoIter {
        self.cells.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Flag(bool);

    impl Organism for Flag {
        fn is_alive(&self) -> bool {
            self.0
        }
    }

    #[test]
    fn with_organism_keeps_position() {
        let cell = Cell::new(7, 3, 1, Flag(false));
        let updated = cell.clone().with_organism(Flag(true));
        assert_eq!(updated.index(), 7);
        assert_eq!((updated.x(), updated.y()), (3, 1));
        assert!(updated.is_alive());
        assert!(!cell.is_alive());
    }

    #[test]
    fn delta_preserves_insertion_order() {
        let delta: Delta<Flag> = [
            Cell::new(4, 0, 1, Flag(true)),
            Cell::new(1, 1, 0, Flag(false)),
            Cell::new(9, 1, 2, Flag(true)),
        ]
        .into_iter()
        .collect();
        assert_eq!(delta.len(), 3);
        let order: Vec<usize> = delta.iter().map(Cell::index).collect();
        assert_eq!(order, vec![4, 1, 9]);
        assert!(delta.touches(1));
        assert!(!delta.touches(2));
        assert!(Delta::<Flag>::new().is_empty());
    }
}
