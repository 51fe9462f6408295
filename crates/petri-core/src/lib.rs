//! Concurrent engine for digital organisms living on a toroidal grid.
//!
//! An [`Environment`] owns the authoritative grid. [`Environment::run`]
//! turns the calling thread into a coordinator that dispatches "introduce"
//! and "advance" requests to a pool of worker threads, commits the
//! resulting [`Delta`]s atomically, and forwards them to a [`DeltaSink`].
//! The organism program and its interpreter stay outside this crate behind
//! the [`Vm`] and [`Organism`] traits.

mod cell;
mod env;
mod error;
mod grid;
mod ids;
mod registry;
mod sampler;
mod store;
mod vm;
mod worker;

pub use cell::{Cell, Delta, Organism};
pub use env::{ChannelSink, DeltaSink, EnvSettings, Environment, NullSink, RunSummary};
pub use error::EnvError;
pub use grid::{Direction, Topology};
pub use ids::IdSequence;
pub use registry::{Config, RandomSource, Registry, RngHandle, SeededSource};
pub use sampler::Sampler;
pub use store::CellStore;
pub use vm::{Context, Vm};
