//! Hot-swappable simulation parameters and randomness source.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};

/// Simulation parameters swapped as one unit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Ticks between forced introductions; 0 disables periodic inflow.
    pub inflow_frequency: u64,
    /// Generation an organism must reach to count as viable.
    pub viable_generation: u64,
    /// Penalty applied to an organism whose kill attempt fails.
    pub failed_kill_penalty: u32,
    /// Whether introductions may overwrite a living cell.
    pub overwrite_living: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            inflow_frequency: 10,
            viable_generation: 3,
            failed_kill_penalty: 3,
            overwrite_living: false,
        }
    }
}

/// Source of uniformly distributed integers.
///
/// Implementations are shared by every worker, so they take `&self`.
pub trait RandomSource: Send + Sync {
    /// Uniform value in `[0, n)`; returns 0 when `n == 0`.
    fn uniform_u32(&self, n: u32) -> u32;

    /// Uniform value in `[0, n)` over platform-sized domains; returns 0 when `n == 0`.
    fn uniform_usize(&self, n: usize) -> usize;
}

/// Default source backed by a seeded [`SmallRng`].
pub struct SeededSource {
    rng: Mutex<SmallRng>,
}

impl SeededSource {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(SmallRng::seed_from_u64(seed)),
        }
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut SmallRng) -> T) -> T {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut rng)
    }
}

impl RandomSource for SeededSource {
    fn uniform_u32(&self, n: u32) -> u32 {
        if n == 0 {
            return 0;
        }
        self.with_rng(|rng| rng.random_range(0..n))
    }

    fn uniform_usize(&self, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        self.with_rng(|rng| rng.random_range(0..n))
    }
}

/// Cloneable capability handle over a [`RandomSource`].
#[derive(Clone)]
pub struct RngHandle(Arc<dyn RandomSource>);

impl RngHandle {
    pub fn new(source: impl RandomSource + 'static) -> Self {
        Self(Arc::new(source))
    }

    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self::new(SeededSource::new(seed))
    }

    /// Seeded from OS entropy.
    #[must_use]
    pub fn from_entropy() -> Self {
        Self::seeded(rand::random())
    }

    /// Seeded when `seed` is present, entropy otherwise.
    #[must_use]
    pub fn from_seed(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::seeded(seed),
            None => Self::from_entropy(),
        }
    }

    #[must_use]
    pub fn uniform_u32(&self, n: u32) -> u32 {
        self.0.uniform_u32(n)
    }

    #[must_use]
    pub fn uniform_usize(&self, n: usize) -> usize {
        self.0.uniform_usize(n)
    }

    /// Whether both handles share the same underlying source.
    #[must_use]
    pub fn same_source(&self, other: &RngHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for RngHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RngHandle").finish_non_exhaustive()
    }
}

/// Two independently swappable slots read without locking.
///
/// Readers observe either the value before or after a concurrent store,
/// never a mixture.
pub struct Registry {
    config: ArcSwap<Config>,
    rng: ArcSwap<RngHandle>,
}

impl Registry {
    #[must_use]
    pub fn new(config: Config, rng: RngHandle) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
            rng: ArcSwap::from_pointee(rng),
        }
    }

    #[must_use]
    pub fn config(&self) -> Config {
        **self.config.load()
    }

    pub fn set_config(&self, config: Config) {
        self.config.store(Arc::new(config));
    }

    #[must_use]
    pub fn rng(&self) -> RngHandle {
        RngHandle::clone(&self.rng.load())
    }

    pub fn set_rng(&self, rng: RngHandle) {
        self.rng.store(Arc::new(rng));
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.config())
            .finish_non_exhaustive()
    }
}
