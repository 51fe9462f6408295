//! Fixed-size toroidal addressing.

use serde::{Deserialize, Serialize};

use crate::EnvError;

/// Cardinal step used for neighbor lookups.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Direction {
    Left,
    Right,
    Up,
    Down,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Left,
        Direction::Right,
        Direction::Up,
        Direction::Down,
    ];
}

/// Immutable grid dimensions with wrap-around neighbor math.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Topology {
    width: u32,
    height: u32,
}

impl Topology {
    /// Validate dimensions and build the topology.
    pub fn new(width: u32, height: u32) -> Result<Self, EnvError> {
        if width == 0 || height == 0 {
            return Err(EnvError::InvalidSettings("grid dimensions must be non-zero"));
        }
        if (width as usize).checked_mul(height as usize).is_none() {
            return Err(EnvError::InvalidSettings(
                "grid dimensions overflow the addressable cell count",
            ));
        }
        Ok(Self { width, height })
    }

    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Total number of cells; never zero.
    #[must_use]
    pub const fn cell_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    /// Returns `true` when `(x, y)` lies on the grid.
    #[must_use]
    pub const fn contains(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height
    }

    /// Linear index `y * width + x`, or `None` when off the grid.
    #[must_use]
    pub const fn index(&self, x: u32, y: u32) -> Option<usize> {
        if self.contains(x, y) {
            Some(self.offset(x, y))
        } else {
            None
        }
    }

    #[inline]
    const fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize) * (self.width as usize) + (x as usize)
    }

    /// Inverse of [`Topology::index`]. `index` must be below [`Topology::cell_count`].
    #[must_use]
    pub const fn coords(&self, index: usize) -> (u32, u32) {
        let width = self.width as usize;
        ((index % width) as u32, (index / width) as u32)
    }

    /// Coordinates one step away in `direction`, wrapping at the edges.
    /// `(x, y)` is expected to be on the grid.
    #[must_use]
    pub const fn neighbor(&self, x: u32, y: u32, direction: Direction) -> (u32, u32) {
        match direction {
            Direction::Left => (if x == 0 { self.width - 1 } else { x - 1 }, y),
            Direction::Right => (if x >= self.width - 1 { 0 } else { x + 1 }, y),
            Direction::Up => (x, if y == 0 { self.height - 1 } else { y - 1 }),
            Direction::Down => (x, if y >= self.height - 1 { 0 } else { y + 1 }),
        }
    }
}
