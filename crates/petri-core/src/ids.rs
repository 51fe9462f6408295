//! Organism id allocation.

use std::sync::atomic::{AtomicU64, Ordering};

/// Source of globally unique, strictly increasing organism ids starting at 1.
///
/// Every call to [`IdSequence::next`] takes a distinct position in a single
/// total order, however many workers ask at once.
#[derive(Debug)]
pub struct IdSequence {
    next: AtomicU64,
}

impl Default for IdSequence {
    fn default() -> Self {
        Self::new()
    }
}

impl IdSequence {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of ids handed out so far.
    #[must_use]
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn starts_at_one_and_increments() {
        let ids = IdSequence::new();
        assert_eq!(ids.issued(), 0);
        assert_eq!(ids.next(), 1);
        assert_eq!(ids.next(), 2);
        assert_eq!(ids.next(), 3);
        assert_eq!(ids.issued(), 3);
    }

    #[test]
    fn concurrent_requests_never_collide() {
        let ids = Arc::new(IdSequence::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = Arc::clone(&ids);
                thread::spawn(move || {
                    let mut seen = Vec::with_capacity(500);
                    let mut last = 0;
                    for _ in 0..500 {
                        let id = ids.next();
                        assert!(id > last, "ids must increase per caller");
                        last = id;
                        seen.push(id);
                    }
                    seen
                })
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for id in handle.join().expect("id thread") {
                assert!(all.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(all.len(), 4_000);
        assert_eq!(all.iter().copied().min(), Some(1));
        assert_eq!(all.iter().copied().max(), Some(4_000));
        assert_eq!(ids.issued(), 4_000);
    }
}
